use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

use crate::foundation::core::{Fps, Frame, FrameIndex, rgb8_len};
use crate::foundation::error::{QuiltError, QuiltResult};
use crate::source::{FrameSource, SourceFrame, SourceInfo};

/// Tool locations for [`FfmpegSource`].
#[derive(Clone, Debug)]
pub struct FfmpegSourceOpts {
    /// `ffmpeg` executable used for decoding.
    pub ffmpeg_bin: PathBuf,
    /// `ffprobe` executable used for metadata.
    pub ffprobe_bin: PathBuf,
}

impl Default for FfmpegSourceOpts {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(serde::Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(serde::Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(serde::Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    tags: Option<ProbeTags>,
}

impl ProbeStream {
    /// Display rotation in degrees, from the display matrix or the legacy `rotate` tag.
    fn rotation(&self) -> i64 {
        self.side_data_list
            .iter()
            .find_map(|sd| sd.rotation)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.rotate.as_deref())
                    .and_then(|r| r.trim().parse::<f64>().ok())
            })
            .map(|deg| deg.round() as i64)
            .unwrap_or(0)
    }
}

#[derive(serde::Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(serde::Deserialize)]
struct ProbeOut {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

/// Probe source video metadata through `ffprobe`.
///
/// Dimensions are reported as decoded: `ffmpeg` applies display rotation, so a stream rotated by
/// a quarter turn reports its width and height swapped.
pub fn probe_video(source_path: &Path, ffprobe_bin: &Path) -> QuiltResult<SourceInfo> {
    if !source_path.is_file() {
        return Err(QuiltError::source_unreadable(format!(
            "'{}' does not exist or is not a file",
            source_path.display()
        )));
    }

    let out = Command::new(ffprobe_bin)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| {
            QuiltError::source_unreadable(format!(
                "failed to run '{}': {e}",
                ffprobe_bin.display()
            ))
        })?;
    if !out.status.success() {
        return Err(QuiltError::source_unreadable(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    parse_probe(&out.stdout, source_path)
}

fn parse_probe(json: &[u8], source_path: &Path) -> QuiltResult<SourceInfo> {
    let parsed: ProbeOut = serde_json::from_slice(json)
        .map_err(|e| QuiltError::source_unreadable(format!("ffprobe json parse failed: {e}")))?;
    let stream = parsed.streams.first().ok_or_else(|| {
        QuiltError::source_unreadable(format!(
            "no video stream found in '{}'",
            source_path.display()
        ))
    })?;
    let (Some(coded_w), Some(coded_h)) = (stream.width, stream.height) else {
        return Err(QuiltError::source_unreadable(
            "missing video dimensions from ffprobe",
        ));
    };
    let rotation = stream.rotation();
    let (width, height) = if rotation.rem_euclid(180) == 90 {
        tracing::debug!(rotation, "source is rotated a quarter turn, swapping dimensions");
        (coded_h, coded_w)
    } else {
        (coded_w, coded_h)
    };
    if width == 0 || height == 0 {
        return Err(QuiltError::source_unreadable(format!(
            "video stream reports {width}x{height}"
        )));
    }

    let fps = [&stream.avg_frame_rate, &stream.r_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|s| Fps::parse(s).ok())
        .ok_or_else(|| QuiltError::source_unreadable("cannot determine source frame rate"))?;

    let duration = stream
        .duration
        .as_deref()
        .or(parsed.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok());
    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .or_else(|| duration.map(|d| (d * fps.as_f64()).round().max(0.0) as u64))
        .filter(|n| *n > 0);

    Ok(SourceInfo {
        width,
        height,
        fps,
        frame_count,
    })
}

/// Decodes a video by streaming packed `rgb24` frames from an `ffmpeg` child process.
///
/// The child is killed and reaped when the source is exhausted or dropped.
pub struct FfmpegSource {
    path: PathBuf,
    info: SourceInfo,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
    next: u64,
}

impl FfmpegSource {
    /// Probe and open `path` for decoding.
    pub fn open(path: impl Into<PathBuf>, opts: &FfmpegSourceOpts) -> QuiltResult<Self> {
        let path = path.into();
        let info = probe_video(&path, &opts.ffprobe_bin)?;
        tracing::info!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = %info.fps,
            frames = ?info.frame_count,
            "opened source"
        );

        let mut child = Command::new(&opts.ffmpeg_bin)
            // ffmpeg applies display rotation here; `probe_video` reports the rotated size.
        .args(["-v", "error", "-nostdin", "-i"])
            .arg(&path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                QuiltError::source_unreadable(format!(
                    "failed to spawn '{}' for decode: {e}",
                    opts.ffmpeg_bin.display()
                ))
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdout), Some(mut stderr)) = (stdout, stderr) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(QuiltError::source_unreadable(
                "failed to open ffmpeg decode pipes",
            ));
        };
        let stderr_drain = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        });

        Ok(Self {
            path,
            info,
            child: Some(child),
            stdout: Some(stdout),
            stderr_drain: Some(stderr_drain),
            next: 0,
        })
    }

    /// Kill (if still running) and reap the decoder, returning its exit status and stderr.
    fn release(&mut self, kill: bool) -> (Option<ExitStatus>, String) {
        drop(self.stdout.take());
        let status = self.child.take().and_then(|mut child| {
            if kill {
                let _ = child.kill();
            }
            child.wait().ok()
        });
        let stderr = match self.stderr_drain.take().map(|h| h.join()) {
            Some(Ok(Ok(bytes))) => String::from_utf8_lossy(&bytes).trim().to_owned(),
            _ => String::new(),
        };
        (status, stderr)
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_frame(&mut self) -> QuiltResult<Option<SourceFrame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let len = rgb8_len(self.info.width, self.info.height);
        let mut buf = vec![0u8; len];
        let filled = read_full(stdout, &mut buf).map_err(|e| {
            QuiltError::source_unreadable(format!(
                "decode read failed for '{}': {e}",
                self.path.display()
            ))
        })?;

        if filled < len {
            let (status, stderr) = self.release(false);
            match status {
                Some(s) if s.success() => {}
                Some(s) => {
                    return Err(QuiltError::source_unreadable(format!(
                        "decoder for '{}' exited with {s} after {} frames: {stderr}",
                        self.path.display(),
                        self.next
                    )));
                }
                None => {
                    return Err(QuiltError::source_unreadable(format!(
                        "lost decoder for '{}' after {} frames: {stderr}",
                        self.path.display(),
                        self.next
                    )));
                }
            }
            if filled > 0 {
                return Err(QuiltError::invalid_frame(format!(
                    "frame {} is truncated: {filled} of {len} bytes",
                    self.next
                )));
            }
            if self.next == 0 {
                return Err(QuiltError::source_unreadable(format!(
                    "no decodable frames in '{}': {stderr}",
                    self.path.display()
                )));
            }
            tracing::debug!(frames = self.next, "source exhausted");
            return Ok(None);
        }

        let index = FrameIndex(self.next);
        self.next += 1;
        let frame = Frame::from_rgb8(self.info.width, self.info.height, buf)?;
        Ok(Some(SourceFrame { index, frame }))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.release(true);
        }
    }
}

/// Read until `buf` is full or EOF; returns bytes read.
fn read_full(r: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_full_stops_at_eof() {
        let data = [1u8, 2, 3, 4, 5];
        let mut buf = [0u8; 8];
        let n = read_full(&mut &data[..], &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], &data);
    }

    #[test]
    fn missing_file_is_unreadable_without_spawning() {
        let err = FfmpegSource::open(
            "/definitely/not/here.mp4",
            &FfmpegSourceOpts {
                ffmpeg_bin: PathBuf::from("/no/ffmpeg"),
                ffprobe_bin: PathBuf::from("/no/ffprobe"),
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, QuiltError::SourceUnreadable(_)));
    }

    #[test]
    fn quarter_turn_rotation_swaps_dimensions() {
        let json = br#"{
            "streams": [{
                "width": 1920, "height": 1080, "avg_frame_rate": "30/1", "nb_frames": "12",
                "side_data_list": [{ "side_data_type": "Display Matrix", "rotation": -90 }]
            }]
        }"#;
        let info = parse_probe(json, Path::new("phone.mp4")).unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));
        assert_eq!(info.frame_count, Some(12));

        let legacy = br#"{"streams": [{"width": 64, "height": 48, "r_frame_rate": "25/1",
            "tags": {"rotate": "270"}}], "format": {"duration": "2.0"}}"#;
        let info = parse_probe(legacy, Path::new("old.mov")).unwrap();
        assert_eq!((info.width, info.height), (48, 64));
        assert_eq!(info.frame_count, Some(50));

        let flipped = br#"{"streams": [{"width": 64, "height": 48, "avg_frame_rate": "25/1",
            "side_data_list": [{"rotation": 180}]}]}"#;
        let info = parse_probe(flipped, Path::new("flip.mp4")).unwrap();
        assert_eq!((info.width, info.height), (64, 48));
    }

    #[test]
    fn ffprobe_output_without_video_stream_is_unreadable() {
        let err = parse_probe(br#"{"streams": []}"#, Path::new("audio.m4a")).unwrap_err();
        assert!(matches!(err, QuiltError::SourceUnreadable(_)));
    }

    /// Stand-in `ffprobe`/`ffmpeg` pairs written as shell scripts.
    #[cfg(unix)]
    mod fake_decoder {
        use super::*;
        use crate::encode::codec::{Codec, EncodeJob};
        use crate::encode::sink::InMemorySink;
        use crate::quilt::spec::QuiltSpec;
        use crate::quilt::synth::SynthOpts;
        use crate::session::pipeline::{PipelineOpts, QuiltPipeline};
        use crate::session::progress::PipelineState;
        use std::os::unix::fs::PermissionsExt as _;

        const FFPROBE_4X2: &str = r#"cat <<'EOF'
{"streams": [{"width": 4, "height": 2, "avg_frame_rate": "10/1", "nb_frames": "3"}]}
EOF"#;

        /// Directory holding `input.mkv`, a fake `ffprobe` and a fake `ffmpeg` running `decode`.
        fn setup(name: &str, decode: &str) -> (PathBuf, FfmpegSourceOpts) {
            let dir = std::env::temp_dir().join(format!(
                "quiltgen_fake_decoder_{name}_{}",
                std::process::id()
            ));
            std::fs::create_dir_all(&dir).unwrap();
            let input = dir.join("input.mkv");
            std::fs::write(&input, b"not inspected").unwrap();
            let opts = FfmpegSourceOpts {
                ffprobe_bin: write_script(&dir, "ffprobe", FFPROBE_4X2),
                ffmpeg_bin: write_script(&dir, "ffmpeg", decode),
            };
            (input, opts)
        }

        fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn clean_exit_ends_the_stream() {
            let (input, opts) = setup("clean", "head -c 48 /dev/zero");
            let mut src = FfmpegSource::open(&input, &opts).unwrap();
            assert_eq!(src.info().frame_count, Some(3));
            assert!(src.next_frame().unwrap().is_some());
            assert!(src.next_frame().unwrap().is_some());
            assert!(src.next_frame().unwrap().is_none());
            assert!(src.next_frame().unwrap().is_none());
        }

        #[test]
        fn decoder_crash_after_first_frame_is_unreadable() {
            let (input, opts) = setup(
                "crash",
                "head -c 24 /dev/zero\necho 'Invalid data found when processing input' >&2\nexit 1",
            );
            let mut src = FfmpegSource::open(&input, &opts).unwrap();
            assert!(src.next_frame().unwrap().is_some());
            match src.next_frame() {
                Err(QuiltError::SourceUnreadable(msg)) => {
                    assert!(msg.contains("Invalid data"), "{msg}");
                }
                other => panic!("expected SourceUnreadable, got {other:?}"),
            }
        }

        #[test]
        fn truncated_trailing_frame_is_invalid() {
            let (input, opts) = setup("truncated", "head -c 30 /dev/zero");
            let mut src = FfmpegSource::open(&input, &opts).unwrap();
            assert!(src.next_frame().unwrap().is_some());
            assert!(matches!(src.next_frame(), Err(QuiltError::InvalidFrame(_))));
        }

        #[test]
        fn decoder_crash_fails_the_run() {
            let (input, opts) = setup("run", "head -c 24 /dev/zero\nexit 1");
            let job = EncodeJob {
                codec: Codec::H264,
                output_path: PathBuf::from("mem.mp4"),
                ..EncodeJob::default()
            };
            let pipeline = QuiltPipeline::new(
                QuiltSpec::new(1, 2, 2, 4, 2),
                SynthOpts::default(),
                job,
                PipelineOpts::default(),
            );
            let progress = pipeline.progress();
            let mut sink = InMemorySink::new();
            let sink_ref = &mut sink;

            let err = pipeline
                .run(
                    move || FfmpegSource::open(&input, &opts),
                    move |_| Ok(sink_ref),
                )
                .unwrap_err();

            assert!(matches!(err, QuiltError::SourceUnreadable(_)), "{err}");
            assert_eq!(progress.state(), PipelineState::Failed);
            assert!(sink.is_aborted());
            assert!(!sink.is_finished());
        }
    }
}
