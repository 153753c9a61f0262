use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::PathBuf;

use crate::encode::ffmpeg::ensure_parent_dir;
use crate::foundation::core::{Fps, Frame, FrameIndex};
use crate::foundation::error::{QuiltError, QuiltResult};

/// Configuration provided to a [`FrameSink`] at the start of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Output frame rate.
    pub fps: Fps,
}

/// Handle to an encoding process: explicit start / write / close / terminate.
///
/// Ordering contract: `push_frame` is called in strictly increasing `FrameIndex` order. After a
/// successful `begin`, the run closes with `end`, with `abort`, or with `abort` following a
/// failed `end`.
pub trait FrameSink: Send {
    /// Start the encoder. Called once before any frames are pushed.
    fn begin(&mut self, cfg: SinkConfig) -> QuiltResult<()>;
    /// Push one frame. May block while the encoder drains its input.
    fn push_frame(&mut self, idx: FrameIndex, frame: &Frame) -> QuiltResult<()>;
    /// Flush and close the encoder; fails if the encoder reported an error.
    fn end(&mut self) -> QuiltResult<()>;
    /// Terminate the encoder and discard any partial output. Must not fail.
    fn abort(&mut self);
}

impl<T: FrameSink + ?Sized> FrameSink for &mut T {
    fn begin(&mut self, cfg: SinkConfig) -> QuiltResult<()> {
        (**self).begin(cfg)
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &Frame) -> QuiltResult<()> {
        (**self).push_frame(idx, frame)
    }

    fn end(&mut self) -> QuiltResult<()> {
        (**self).end()
    }

    fn abort(&mut self) {
        (**self).abort()
    }
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    frames: Vec<(FrameIndex, Frame)>,
    finished: bool,
    aborted: bool,
}

impl InMemorySink {
    /// Create a new in-memory sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the sink configuration captured in `begin`, if any.
    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg
    }

    /// Borrow the captured frames.
    pub fn frames(&self) -> &[(FrameIndex, Frame)] {
        &self.frames
    }

    /// `true` once `end` has been called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// `true` once `abort` has been called.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> QuiltResult<()> {
        self.cfg = Some(cfg);
        self.frames.clear();
        self.finished = false;
        self.aborted = false;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &Frame) -> QuiltResult<()> {
        self.frames.push((idx, frame.clone()));
        Ok(())
    }

    fn end(&mut self) -> QuiltResult<()> {
        self.finished = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.aborted = true;
        self.frames.clear();
    }
}

/// Writes headerless packed `rgb24` frames to a file (readable with
/// `ffplay -f rawvideo -pixel_format rgb24 -video_size WxH`).
pub struct RawVideoSink {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    cfg: Option<SinkConfig>,
}

impl RawVideoSink {
    /// Create a sink writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            out: None,
            cfg: None,
        }
    }
}

impl FrameSink for RawVideoSink {
    fn begin(&mut self, cfg: SinkConfig) -> QuiltResult<()> {
        ensure_parent_dir(&self.path)?;
        let f = File::create(&self.path).map_err(|e| QuiltError::io_write(&self.path, e))?;
        self.out = Some(BufWriter::new(f));
        self.cfg = Some(cfg);
        Ok(())
    }

    fn push_frame(&mut self, _idx: FrameIndex, frame: &Frame) -> QuiltResult<()> {
        let cfg = self
            .cfg
            .ok_or_else(|| QuiltError::invalid_frame("raw sink not started"))?;
        if frame.size() != (cfg.width, cfg.height) {
            return Err(QuiltError::invalid_frame(format!(
                "frame size mismatch: got {:?}, expected {}x{}",
                frame.size(),
                cfg.width,
                cfg.height
            )));
        }
        let Some(out) = self.out.as_mut() else {
            return Err(QuiltError::invalid_frame("raw sink is already finalized"));
        };
        out.write_all(frame.as_bytes())
            .map_err(|e| QuiltError::io_write(&self.path, e))
    }

    fn end(&mut self) -> QuiltResult<()> {
        if let Some(mut out) = self.out.take() {
            out.flush().map_err(|e| QuiltError::io_write(&self.path, e))?;
        }
        self.cfg = None;
        Ok(())
    }

    fn abort(&mut self) {
        drop(self.out.take());
        self.cfg = None;
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(w: u32, h: u32) -> SinkConfig {
        SinkConfig {
            width: w,
            height: h,
            fps: Fps::new(24, 1).unwrap(),
        }
    }

    #[test]
    fn raw_sink_writes_concatenated_frames() {
        let path = std::env::temp_dir().join(format!("quiltgen_raw_{}.rgb", std::process::id()));
        let mut sink = RawVideoSink::new(&path);
        sink.begin(cfg(2, 1)).unwrap();
        sink.push_frame(FrameIndex(0), &Frame::solid(2, 1, [1, 2, 3]).unwrap())
            .unwrap();
        sink.push_frame(FrameIndex(1), &Frame::solid(2, 1, [4, 5, 6]).unwrap())
            .unwrap();
        sink.end().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 1, 2, 3, 4, 5, 6, 4, 5, 6]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn raw_sink_abort_removes_partial_file() {
        let path =
            std::env::temp_dir().join(format!("quiltgen_raw_abort_{}.rgb", std::process::id()));
        let mut sink = RawVideoSink::new(&path);
        sink.begin(cfg(2, 2)).unwrap();
        sink.push_frame(FrameIndex(0), &Frame::solid(2, 2, [9, 9, 9]).unwrap())
            .unwrap();
        sink.abort();
        assert!(!path.exists());
    }

    #[test]
    fn raw_sink_rejects_wrong_size() {
        let path =
            std::env::temp_dir().join(format!("quiltgen_raw_size_{}.rgb", std::process::id()));
        let mut sink = RawVideoSink::new(&path);
        sink.begin(cfg(4, 4)).unwrap();
        let err = sink
            .push_frame(FrameIndex(0), &Frame::solid(2, 2, [0, 0, 0]).unwrap())
            .unwrap_err();
        assert!(matches!(err, QuiltError::InvalidFrame(_)));
        sink.abort();
    }

    #[test]
    fn in_memory_sink_tracks_lifecycle() {
        let mut sink = InMemorySink::new();
        sink.begin(cfg(1, 1)).unwrap();
        sink.push_frame(FrameIndex(0), &Frame::solid(1, 1, [0, 0, 0]).unwrap())
            .unwrap();
        sink.end().unwrap();
        assert!(sink.is_finished());
        assert_eq!(sink.frames().len(), 1);
        assert_eq!(sink.config().map(|c| c.width), Some(1));
    }
}
