use std::io::{Read, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::encode::codec::EncodeJob;
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{Fps, Frame, FrameIndex, rgb8_len};
use crate::foundation::error::{QuiltError, QuiltResult};

/// Options for [`FfmpegSink`].
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    /// Negotiated encode job (codec, quality, output path).
    pub job: EncodeJob,
    /// `ffmpeg` executable; resolved through `PATH` when not absolute.
    pub ffmpeg_bin: PathBuf,
    /// Overwrite output file if it already exists.
    pub overwrite: bool,
}

impl FfmpegSinkOpts {
    /// Options for encoding `job` with the `ffmpeg` found on `PATH`.
    pub fn new(job: EncodeJob) -> Self {
        Self {
            job,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            overwrite: true,
        }
    }
}

/// Sink that spawns `ffmpeg` and streams raw `rgb24` frames to its stdin.
///
/// Writes block while the pipe is full, which is what suspends the producer side of the
/// pipeline. Dropping a sink that was started but not ended terminates the process and removes
/// the partial output.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,

    cfg: Option<SinkConfig>,
    last_idx: Option<FrameIndex>,
}

impl FfmpegSink {
    /// Create a new sink; nothing is spawned until [`FrameSink::begin`].
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            cfg: None,
            last_idx: None,
        }
    }

    /// Output path this sink writes to.
    pub fn output_path(&self) -> &Path {
        &self.opts.job.output_path
    }

    fn command(&self, cfg: SinkConfig) -> Command {
        let mut cmd = Command::new(&self.opts.ffmpeg_bin);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // `begin` has already created the output file and honored `overwrite`.
        cmd.arg("-y");
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
        ]);
        push_input_fps(&mut cmd, cfg.fps);
        cmd.args(["-i", "pipe:0"]);
        cmd.args(self.opts.job.ffmpeg_output_args());
        cmd.arg(&self.opts.job.output_path);
        cmd
    }

    /// Wait for the process and collect its stderr.
    fn reap(&mut self) -> (Option<std::process::ExitStatus>, String) {
        drop(self.stdin.take());
        let status = self.child.take().and_then(|mut c| c.wait().ok());
        let stderr = match self.stderr_drain.take() {
            Some(handle) => match handle.join() {
                Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).trim().to_owned(),
                Ok(Err(e)) => format!("<stderr read failed: {e}>"),
                Err(_) => "<stderr drain thread panicked>".to_owned(),
            },
            None => String::new(),
        };
        (status, stderr)
    }

    fn fail(&mut self, context: &str) -> QuiltError {
        let (status, stderr) = self.reap();
        self.cfg = None;
        let status = status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown status".to_owned());
        QuiltError::process_failed(format!("{context}, {status}"), stderr)
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> QuiltResult<()> {
        if cfg.fps.num == 0 || cfg.fps.den == 0 {
            return Err(QuiltError::config("fps must be non-zero"));
        }
        self.opts.job.validate_dimensions(cfg.width, cfg.height)?;

        let out_path = self.opts.job.output_path.clone();
        ensure_parent_dir(&out_path)?;
        create_output(&out_path, self.opts.overwrite)?;

        let mut cmd = self.command(cfg);
        tracing::info!(
            codec = %self.opts.job.codec,
            width = cfg.width,
            height = cfg.height,
            fps = %cfg.fps,
            out = %out_path.display(),
            "starting ffmpeg"
        );
        tracing::debug!(?cmd, "ffmpeg command");

        let mut child = cmd.spawn().map_err(|e| {
            remove_partial(&out_path);
            QuiltError::process_failed(
                "not started",
                format!(
                    "failed to spawn '{}' (is it installed and on PATH?): {e}",
                    self.opts.ffmpeg_bin.display()
                ),
            )
        })?;

        let stdin = child.stdin.take();
        let stderr = child.stderr.take();
        let (Some(stdin), Some(mut stderr)) = (stdin, stderr) else {
            let _ = child.kill();
            let _ = child.wait();
            remove_partial(&out_path);
            return Err(QuiltError::process_failed(
                "not started",
                "failed to open ffmpeg stdio pipes",
            ));
        };
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.last_idx = None;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &Frame) -> QuiltResult<()> {
        let cfg = self
            .cfg
            .ok_or_else(|| QuiltError::invalid_frame("ffmpeg sink not started"))?;
        if let Some(last) = self.last_idx
            && idx.0 <= last.0
        {
            return Err(QuiltError::invalid_frame(format!(
                "ffmpeg sink received out-of-order frame {} after {}",
                idx.0, last.0
            )));
        }
        self.last_idx = Some(idx);

        if frame.size() != (cfg.width, cfg.height) {
            return Err(QuiltError::invalid_frame(format!(
                "frame size mismatch: got {:?}, expected {}x{}",
                frame.size(),
                cfg.width,
                cfg.height
            )));
        }
        debug_assert_eq!(frame.as_bytes().len(), rgb8_len(cfg.width, cfg.height));

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(QuiltError::invalid_frame("ffmpeg sink is already finalized"));
        };
        if let Err(e) = stdin.write_all(frame.as_bytes()) {
            tracing::debug!(error = %e, frame = idx.0, "ffmpeg stdin write failed");
            return Err(self.fail(&format!("stdin closed at frame {}", idx.0)));
        }
        Ok(())
    }

    fn end(&mut self) -> QuiltResult<()> {
        if self.child.is_none() {
            return Err(QuiltError::invalid_frame("ffmpeg sink not started"));
        }
        let (status, stderr) = self.reap();
        self.cfg = None;
        match status {
            Some(s) if s.success() => Ok(()),
            Some(s) => Err(QuiltError::process_failed(s.to_string(), stderr)),
            None => Err(QuiltError::process_failed("wait failed", stderr)),
        }
    }

    fn abort(&mut self) {
        if let Some(child) = self.child.as_mut() {
            drop(self.stdin.take());
            let _ = child.kill();
        }
        let (_, stderr) = self.reap();
        if !stderr.is_empty() {
            tracing::debug!(%stderr, "ffmpeg terminated");
        }
        self.cfg = None;
        remove_partial(&self.opts.job.output_path);
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.abort();
        }
    }
}

fn push_input_fps(cmd: &mut Command, fps: Fps) {
    // For rawvideo input, `-r` goes before `-i`.
    cmd.args(["-r", &format!("{}/{}", fps.num, fps.den)]);
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> QuiltResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| QuiltError::io_write(parent, e))?;
    }
    Ok(())
}

/// Create (or truncate, when `overwrite` is set) the output file so path problems surface as
/// write errors before the encoder starts.
fn create_output(path: &Path, overwrite: bool) -> QuiltResult<()> {
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true);
    if overwrite {
        opts.create(true).truncate(true);
    } else {
        opts.create_new(true);
    }
    opts.open(path)
        .map(drop)
        .map_err(|e| QuiltError::io_write(path, e))
}

/// Remove a partial output file, ignoring a missing file.
pub(crate) fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove partial output"),
    }
}

/// Return `true` when `bin -version` runs successfully.
pub fn is_tool_available(bin: &str) -> bool {
    Command::new(bin)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
