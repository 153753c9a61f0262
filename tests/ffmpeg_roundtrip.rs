use std::path::{Path, PathBuf};
use std::process::Command;

use quiltgen::{
    Codec, EncodeJob, FfmpegSink, FfmpegSinkOpts, FfmpegSource, FfmpegSourceOpts, FrameSource,
    PipelineOpts, PipelineState, ProgressHandle, QuiltError, QuiltPipeline, QuiltResult,
    QuiltSpec, Raster, RunOutcome, SourceFrame, SourceInfo, SynthOpts, is_tool_available,
    probe_video,
};

fn ffmpeg_tools_available() -> bool {
    is_tool_available("ffmpeg") && is_tool_available("ffprobe")
}

fn work_dir(name: &str) -> PathBuf {
    let dir = PathBuf::from("target").join("quiltgen_it").join(name);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// `frames` frames of one solid color at 64x48, encoded losslessly.
fn synth_source(dir: &Path, frames: u32) -> PathBuf {
    let path = dir.join("solid.mkv");
    let status = Command::new("ffmpeg")
        .args(["-v", "error", "-y", "-f", "lavfi", "-i"])
        .arg("color=c=0x3366cc:size=64x48:rate=10")
        .args(["-frames:v", &frames.to_string(), "-c:v", "ffv1", "-pix_fmt", "bgr0"])
        .arg(&path)
        .status()
        .unwrap();
    assert!(status.success(), "ffmpeg failed creating {}", path.display());
    path
}

#[derive(Debug)]
struct Probed {
    width: u32,
    height: u32,
    frames: u64,
    codec: String,
}

fn count_frames(path: &Path) -> Probed {
    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_frames",
            "-show_entries",
            "stream=width,height,nb_read_frames,codec_name",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let s = &v["streams"][0];
    Probed {
        width: s["width"].as_u64().unwrap() as u32,
        height: s["height"].as_u64().unwrap() as u32,
        frames: s["nb_read_frames"].as_str().unwrap().parse().unwrap(),
        codec: s["codec_name"].as_str().unwrap().to_owned(),
    }
}

fn prores_job(out: &Path) -> EncodeJob {
    EncodeJob {
        codec: Codec::ProRes422,
        output_path: out.to_path_buf(),
        ..EncodeJob::default()
    }
}

#[test]
fn probe_and_decode_solid_source() {
    if !ffmpeg_tools_available() {
        return;
    }
    let dir = work_dir("decode");
    let src = synth_source(&dir, 10);

    let info = probe_video(&src, Path::new("ffprobe")).unwrap();
    assert_eq!((info.width, info.height), (64, 48));
    assert_eq!(info.fps.as_f64(), 10.0);

    let mut source = FfmpegSource::open(&src, &FfmpegSourceOpts::default()).unwrap();
    let mut n = 0u64;
    while let Some(sf) = source.next_frame().unwrap() {
        assert_eq!(sf.index.0, n);
        assert_eq!(sf.frame.size(), (64, 48));
        let px = sf.frame.pixel_at(10, 10);
        for (got, want) in px.into_iter().zip([0x33u8, 0x66, 0xcc]) {
            assert!(got.abs_diff(want) <= 2, "pixel {px:?}");
        }
        n += 1;
    }
    assert_eq!(n, 10);
}

#[test]
fn ten_frame_solid_video_becomes_ten_quilt_frames() {
    if !ffmpeg_tools_available() {
        return;
    }
    let dir = work_dir("roundtrip");
    let src = synth_source(&dir, 10);
    let out = dir.join("quilt_qs2x2a1.33.mov");
    let _ = std::fs::remove_file(&out);

    let spec = QuiltSpec::new(2, 2, 4, 32, 24);
    let pipeline = QuiltPipeline::new(
        spec,
        SynthOpts::default(),
        prores_job(&out),
        PipelineOpts {
            threads: Some(2),
            ..PipelineOpts::default()
        },
    )
    .with_available_codecs(vec![Codec::ProRes422]);
    let progress = pipeline.progress();

    let outcome = pipeline
        .convert_file(&src, FfmpegSourceOpts::default())
        .unwrap();
    let RunOutcome::Completed(stats) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(stats.frames_decoded, 10);
    assert_eq!(stats.frames_encoded, 10);
    assert_eq!(progress.snapshot().state, PipelineState::Completed);

    let probed = count_frames(&out);
    assert_eq!(probed.frames, 10);
    assert_eq!((probed.width, probed.height), (2 * 32, 2 * 24));
    assert_eq!(probed.codec, "prores");
}

/// Requests cancellation on the progress handle after yielding `after` frames.
struct CancelAfter {
    inner: FfmpegSource,
    after: u64,
    progress: ProgressHandle,
}

impl FrameSource for CancelAfter {
    fn info(&self) -> &SourceInfo {
        self.inner.info()
    }

    fn next_frame(&mut self) -> QuiltResult<Option<SourceFrame>> {
        let next = self.inner.next_frame()?;
        if let Some(sf) = &next
            && sf.index.0 + 1 == self.after
        {
            self.progress.request_cancel();
        }
        Ok(next)
    }
}

#[test]
fn cancelled_encode_leaves_no_output() {
    if !ffmpeg_tools_available() {
        return;
    }
    let dir = work_dir("cancel");
    let src = synth_source(&dir, 40);
    let out = dir.join("cancelled.mov");
    let _ = std::fs::remove_file(&out);

    let job = prores_job(&out);
    let pipeline = QuiltPipeline::new(
        QuiltSpec::new(2, 2, 4, 32, 24),
        SynthOpts::default(),
        job,
        PipelineOpts {
            parallel: false,
            ..PipelineOpts::default()
        },
    )
    .with_available_codecs(vec![Codec::ProRes422]);
    let progress = pipeline.progress();
    let cancel_handle = progress.clone();

    let outcome = pipeline
        .run(
            move || {
                Ok(CancelAfter {
                    inner: FfmpegSource::open(&src, &FfmpegSourceOpts::default())?,
                    after: 3,
                    progress: cancel_handle,
                })
            },
            |job| Ok(FfmpegSink::new(FfmpegSinkOpts::new(job.clone()))),
        )
        .unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    let snap = progress.snapshot();
    assert_eq!(snap.state, PipelineState::Cancelled);
    assert!(snap.cancelled);
    assert!(snap.frames_processed <= 3);
    assert!(!out.exists(), "partial output left at {}", out.display());
}

#[test]
fn unreadable_source_fails_without_output() {
    if !ffmpeg_tools_available() {
        return;
    }
    let dir = work_dir("unreadable");
    let src = dir.join("not_a_video.mp4");
    std::fs::write(&src, b"definitely not a video").unwrap();
    let out = dir.join("never.mov");
    let _ = std::fs::remove_file(&out);

    let pipeline = QuiltPipeline::new(
        QuiltSpec::new(2, 2, 4, 32, 24),
        SynthOpts::default(),
        prores_job(&out),
        PipelineOpts::default(),
    );
    let progress = pipeline.progress();
    let err = pipeline
        .convert_file(&src, FfmpegSourceOpts::default())
        .unwrap_err();

    assert!(matches!(err, QuiltError::SourceUnreadable(_)), "{err}");
    assert_eq!(progress.snapshot().state, PipelineState::Failed);
    assert!(!out.exists());
}
