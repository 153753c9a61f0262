use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use rayon::prelude::*;

use crate::encode::codec::{Codec, EncodeJob, PREFERENCE_ORDER, negotiate};
use crate::encode::ffmpeg::{FfmpegSink, FfmpegSinkOpts};
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{Frame, FrameIndex, rgb8_len};
use crate::foundation::error::{QuiltError, QuiltResult};
use crate::quilt::compose::compose_quilt;
use crate::quilt::lenticular::{Calibration, interlace};
use crate::quilt::spec::QuiltSpec;
use crate::quilt::synth::{SynthOpts, synthesize_views};
use crate::session::progress::{PipelineState, ProgressHandle};
use crate::source::{FfmpegSource, FfmpegSourceOpts, FrameSource, SourceFrame};

const MAX_REORDER_BUFFER_BYTES: u64 = 256 * 1024 * 1024;
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Options controlling how a run is scheduled.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineOpts {
    /// Synthesize and compose frames on a rayon pool.
    pub parallel: bool,
    /// Override the number of rayon worker threads. `None` uses rayon defaults.
    pub threads: Option<usize>,
    /// Frames decoded ahead per parallel batch; also capped by quilt size.
    pub chunk_size: usize,
    /// Bounded channel capacity between the workers and the encoder thread.
    pub channel_capacity: usize,
    /// Interlace each quilt for a lenticular display before encoding.
    #[serde(skip)]
    pub calibration: Option<Calibration>,
    /// Finalize instead of deleting the output when a run is cancelled.
    pub keep_partial: bool,
}

impl Default for PipelineOpts {
    fn default() -> Self {
        Self {
            parallel: true,
            threads: None,
            chunk_size: 16,
            channel_capacity: 4,
            calibration: None,
            keep_partial: false,
        }
    }
}

/// Counters for a completed run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunStats {
    /// Frames read from the source.
    pub frames_decoded: u64,
    /// Quilt frames accepted by the sink.
    pub frames_encoded: u64,
    /// Codec selected by negotiation.
    pub codec: Codec,
    /// Where the video was written.
    pub output_path: PathBuf,
}

/// How a run ended. Failures are returned as `Err`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every source frame was encoded and the sink finalized.
    Completed(RunStats),
    /// The run stopped at a cancellation request.
    Cancelled,
}

/// End-to-end controller: source -> view synthesis -> quilt composition -> encoder.
///
/// A pipeline runs once; [`QuiltPipeline::run`] consumes it. Grab a [`ProgressHandle`] with
/// [`QuiltPipeline::progress`] beforehand to watch or cancel the run from another thread.
pub struct QuiltPipeline {
    spec: QuiltSpec,
    synth: SynthOpts,
    job: EncodeJob,
    available: Vec<Codec>,
    opts: PipelineOpts,
    progress: ProgressHandle,
}

impl QuiltPipeline {
    /// Build an idle pipeline. Every codec is assumed available until
    /// [`QuiltPipeline::with_available_codecs`] says otherwise.
    pub fn new(spec: QuiltSpec, synth: SynthOpts, job: EncodeJob, opts: PipelineOpts) -> Self {
        Self {
            spec,
            synth,
            job,
            available: PREFERENCE_ORDER.to_vec(),
            opts,
            progress: ProgressHandle::new(),
        }
    }

    /// Ranked list of codecs usable in this environment, as reported by the setup layer.
    pub fn with_available_codecs(mut self, available: Vec<Codec>) -> Self {
        self.available = available;
        self
    }

    /// Handle for polling, subscribing to and cancelling this run.
    pub fn progress(&self) -> ProgressHandle {
        self.progress.clone()
    }

    /// Output dimensions: the quilt, or the display when interlacing.
    pub fn output_size(&self) -> (u32, u32) {
        match &self.opts.calibration {
            Some(cal) => (cal.screen_w, cal.screen_h),
            None => (self.spec.total_width(), self.spec.total_height()),
        }
    }

    /// Check every option and negotiate the codec. Performs no I/O.
    pub fn preflight(&self) -> QuiltResult<EncodeJob> {
        self.spec.validate()?;
        self.synth.validate()?;
        self.job.validate()?;
        if let Some(0) = self.opts.threads {
            return Err(QuiltError::config("'threads' must be >= 1 when set"));
        }
        if let Some(cal) = &self.opts.calibration {
            cal.validate()?;
        }
        let job = negotiate(&self.job, &self.available)?;
        let (w, h) = self.output_size();
        job.validate_dimensions(w, h)?;
        Ok(job)
    }

    /// Decode from `path` with `ffmpeg` and encode with the negotiated codec.
    pub fn convert_file(
        self,
        path: impl Into<PathBuf>,
        tools: FfmpegSourceOpts,
    ) -> QuiltResult<RunOutcome> {
        let path = path.into();
        let ffmpeg_bin = tools.ffmpeg_bin.clone();
        self.run(
            move || FfmpegSource::open(path, &tools),
            move |job| {
                let mut opts = FfmpegSinkOpts::new(job.clone());
                opts.ffmpeg_bin = ffmpeg_bin;
                Ok(FfmpegSink::new(opts))
            },
        )
    }

    /// Run the pipeline to a terminal state.
    ///
    /// Configuration is validated and the codec negotiated before `open_source` or `make_sink`
    /// is called. Cancellation is reported as `Ok(RunOutcome::Cancelled)`; every other failure
    /// moves the run to `Failed`, records the error on the progress handle, and is returned.
    #[tracing::instrument(skip_all, fields(
        cols = self.spec.cols,
        rows = self.spec.rows,
        views = self.spec.view_count,
    ))]
    pub fn run<S, K>(
        self,
        open_source: impl FnOnce() -> QuiltResult<S>,
        make_sink: impl FnOnce(&EncodeJob) -> QuiltResult<K>,
    ) -> QuiltResult<RunOutcome>
    where
        S: FrameSource,
        K: FrameSink,
    {
        let progress = self.progress.clone();
        let res = self
            .preflight()
            .and_then(|job| {
                progress.transition(PipelineState::Running);
                self.execute(job, open_source, make_sink)
            });

        match res {
            Ok(stats) => {
                tracing::info!(
                    frames = stats.frames_encoded,
                    codec = %stats.codec,
                    out = %stats.output_path.display(),
                    "conversion complete"
                );
                progress.transition(PipelineState::Completed);
                Ok(RunOutcome::Completed(stats))
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(
                    frames = progress.snapshot().frames_processed,
                    "conversion cancelled"
                );
                progress.transition(PipelineState::Cancelled);
                Ok(RunOutcome::Cancelled)
            }
            Err(e) => {
                tracing::warn!(error = %e, "conversion failed");
                progress.fail(&e);
                Err(e)
            }
        }
    }

    fn execute<S, K>(
        &self,
        job: EncodeJob,
        open_source: impl FnOnce() -> QuiltResult<S>,
        make_sink: impl FnOnce(&EncodeJob) -> QuiltResult<K>,
    ) -> QuiltResult<RunStats>
    where
        S: FrameSource,
        K: FrameSink,
    {
        self.progress.check_cancelled()?;
        let mut source = open_source()?;
        let info = source.info().clone();
        self.progress.set_total(info.frame_count);

        let (width, height) = self.output_size();
        let cfg = SinkConfig {
            width,
            height,
            fps: job.frame_rate.unwrap_or(info.fps),
        };
        let mut sink = make_sink(&job)?;

        let cap = self.opts.channel_capacity.max(1);
        let bytes_per_frame = (rgb8_len(width, height) as u64).max(1);
        let max_chunk_by_mem = (MAX_REORDER_BUFFER_BYTES / bytes_per_frame).max(1) as usize;
        let chunk_size = self.opts.chunk_size.max(1).min(max_chunk_by_mem);

        let pool = if self.opts.parallel {
            Some(build_thread_pool(self.opts.threads)?)
        } else {
            None
        };

        let stage = FrameStage {
            spec: &self.spec,
            synth: &self.synth,
            calibration: self.opts.calibration.as_ref(),
        };
        let progress = &self.progress;
        let keep_partial = self.opts.keep_partial;

        // Encoder thread: owns the sink lifecycle and restores frame order regardless of worker
        // completion order.
        let (frames_decoded, frames_encoded) =
            std::thread::scope(|scope| -> QuiltResult<(u64, u64)> {
                let (tx, rx) = mpsc::sync_channel::<EncoderMsg>(cap);
                let sink_ref: &mut K = &mut sink;

                let enc = scope.spawn(move || -> QuiltResult<u64> {
                    sink_ref.begin(cfg)?;
                    match drain_in_order(&rx, sink_ref, progress, chunk_size as u64) {
                        Ok(n) => match sink_ref.end() {
                            Ok(()) => Ok(n),
                            Err(e) => {
                                sink_ref.abort();
                                Err(e)
                            }
                        },
                        Err(e) if e.is_cancelled() && keep_partial => {
                            if let Err(end_err) = sink_ref.end() {
                                tracing::warn!(error = %end_err, "failed to finalize partial output");
                                sink_ref.abort();
                            }
                            Err(e)
                        }
                        Err(e) => {
                            sink_ref.abort();
                            Err(e)
                        }
                    }
                });

                let produce_res = match pool.as_ref() {
                    Some(pool) => produce_parallel(&mut source, &stage, pool, chunk_size, &tx, progress),
                    None => produce_sequential(&mut source, &stage, &tx, progress),
                };
                if let Ok(n) = produce_res {
                    let _ = tx.send(EncoderMsg::Done { frames: n });
                }
                drop(tx);

                let enc_res = enc
                    .join()
                    .map_err(|_| QuiltError::Other(anyhow::anyhow!("encoder thread panicked")))?;

                // A producer failure is the root cause unless the encoder stopped first, in which
                // case the producer only saw a closed channel.
                match (produce_res, enc_res) {
                    (Ok(decoded), Ok(encoded)) => Ok((decoded, encoded)),
                    (Err(ProduceError::Stage(e)), _) => Err(e),
                    (Err(ProduceError::EncoderGone), Err(e)) | (Ok(_), Err(e)) => Err(e),
                    (Err(ProduceError::EncoderGone), Ok(_)) => Err(QuiltError::Other(
                        anyhow::anyhow!("encoder stopped accepting frames"),
                    )),
                }
            })?;

        Ok(RunStats {
            frames_decoded,
            frames_encoded,
            codec: job.codec,
            output_path: job.output_path,
        })
    }
}

/// Turn one source frame into the frame handed to the encoder.
///
/// Synthesizes the view set, composes the quilt and, with a calibration, interlaces it for the
/// display. Pure: the same inputs always produce the same bytes.
pub fn build_output_frame(
    frame: &Frame,
    spec: &QuiltSpec,
    synth: &SynthOpts,
    calibration: Option<&Calibration>,
) -> QuiltResult<Frame> {
    let views = synthesize_views(frame, spec, synth)?;
    let quilt = compose_quilt(&views, spec)?;
    drop(views);
    match calibration {
        Some(cal) => interlace(&quilt, spec, cal),
        None => Ok(quilt),
    }
}

#[derive(Clone, Copy)]
struct FrameStage<'a> {
    spec: &'a QuiltSpec,
    synth: &'a SynthOpts,
    calibration: Option<&'a Calibration>,
}

impl FrameStage<'_> {
    fn apply(&self, frame: &Frame) -> QuiltResult<Frame> {
        build_output_frame(frame, self.spec, self.synth, self.calibration)
    }
}

#[derive(Debug)]
enum EncoderMsg {
    Frame { idx: FrameIndex, frame: Frame },
    /// Producer finished cleanly after `frames` frames.
    Done { frames: u64 },
}

enum ProduceError {
    Stage(QuiltError),
    EncoderGone,
}

impl From<QuiltError> for ProduceError {
    fn from(e: QuiltError) -> Self {
        Self::Stage(e)
    }
}

fn send_frame(
    tx: &mpsc::SyncSender<EncoderMsg>,
    idx: FrameIndex,
    frame: Frame,
) -> Result<(), ProduceError> {
    tx.send(EncoderMsg::Frame { idx, frame })
        .map_err(|_| ProduceError::EncoderGone)
}

fn first_frame_check(decoded: u64) -> QuiltResult<()> {
    if decoded == 0 {
        return Err(QuiltError::source_unreadable(
            "source produced no decodable frames",
        ));
    }
    Ok(())
}

fn produce_sequential<S: FrameSource>(
    source: &mut S,
    stage: &FrameStage<'_>,
    tx: &mpsc::SyncSender<EncoderMsg>,
    progress: &ProgressHandle,
) -> Result<u64, ProduceError> {
    let mut decoded = 0u64;
    loop {
        progress.check_cancelled()?;
        let Some(SourceFrame { index, frame }) = source.next_frame()? else {
            break;
        };
        decoded += 1;
        let out = stage.apply(&frame)?;
        send_frame(tx, index, out)?;
    }
    first_frame_check(decoded)?;
    Ok(decoded)
}

fn produce_parallel<S: FrameSource>(
    source: &mut S,
    stage: &FrameStage<'_>,
    pool: &rayon::ThreadPool,
    chunk_size: usize,
    tx: &mpsc::SyncSender<EncoderMsg>,
    progress: &ProgressHandle,
) -> Result<u64, ProduceError> {
    let mut decoded = 0u64;
    let mut chunk = Vec::with_capacity(chunk_size);
    loop {
        chunk.clear();
        while chunk.len() < chunk_size {
            progress.check_cancelled()?;
            match source.next_frame()? {
                Some(f) => chunk.push(f),
                None => break,
            }
        }
        if chunk.is_empty() {
            break;
        }
        decoded += chunk.len() as u64;
        let exhausted = chunk.len() < chunk_size;

        let tx = tx.clone();
        pool.install(|| {
            chunk
                .par_drain(..)
                .try_for_each(move |sf| -> Result<(), ProduceError> {
                    progress.check_cancelled()?;
                    let out = stage.apply(&sf.frame)?;
                    send_frame(&tx, sf.index, out)
                })
        })?;

        if exhausted {
            break;
        }
    }
    first_frame_check(decoded)?;
    Ok(decoded)
}

/// Push frames to `sink` in strictly increasing index order until the producer reports `Done`.
///
/// Producers never run more than `window` frames ahead of the encoder, so an index at or past
/// `next + window` means the source skipped frames and is rejected instead of buffered.
fn drain_in_order<K: FrameSink + ?Sized>(
    rx: &mpsc::Receiver<EncoderMsg>,
    sink: &mut K,
    progress: &ProgressHandle,
    window: u64,
) -> QuiltResult<u64> {
    let mut next = 0u64;
    let mut pending = HashMap::<u64, Frame>::new();
    let mut expected: Option<u64> = None;

    loop {
        progress.check_cancelled()?;
        while let Some(frame) = pending.remove(&next) {
            sink.push_frame(FrameIndex(next), &frame)?;
            next += 1;
            progress.frame_done();
            progress.check_cancelled()?;
        }
        if expected == Some(next) {
            return Ok(next);
        }

        match rx.recv_timeout(CANCEL_POLL) {
            Ok(EncoderMsg::Frame { idx, frame }) => {
                if idx.0 >= next.saturating_add(window.max(1)) {
                    return Err(QuiltError::invalid_frame(format!(
                        "frame index {} arrived while waiting for frame {next}",
                        idx.0
                    )));
                }
                if idx.0 < next || pending.insert(idx.0, frame).is_some() {
                    return Err(QuiltError::invalid_frame(format!(
                        "duplicate frame index {}",
                        idx.0
                    )));
                }
            }
            Ok(EncoderMsg::Done { frames }) => {
                if frames < next {
                    return Err(QuiltError::invalid_frame(format!(
                        "producer reported {frames} frames after {next} were encoded"
                    )));
                }
                expected = Some(frames);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(total) = expected
                    && pending.is_empty()
                    && next == total
                {
                    return Ok(next);
                }
                // Producer stopped without finishing; its error is reported by the caller.
                progress.check_cancelled()?;
                return Err(QuiltError::Other(anyhow::anyhow!(
                    "producer stopped before frame {next}"
                )));
            }
        }
    }
}

fn build_thread_pool(threads: Option<usize>) -> QuiltResult<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("quiltgen-worker-{i}"));
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| QuiltError::Other(anyhow::anyhow!("failed to build rayon thread pool: {e}")))
}
