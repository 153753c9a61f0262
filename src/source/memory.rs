use std::collections::VecDeque;

use crate::foundation::core::{Fps, Frame, FrameIndex, Raster};
use crate::foundation::error::{QuiltError, QuiltResult};
use crate::source::{FrameSource, SourceFrame, SourceInfo};

/// Serves a fixed list of frames in order.
#[derive(Debug)]
pub struct MemorySource {
    info: SourceInfo,
    frames: VecDeque<Frame>,
    next: u64,
}

impl MemorySource {
    /// Build a source from frames that all share one size.
    pub fn new(frames: Vec<Frame>, fps: Fps) -> QuiltResult<Self> {
        let first = frames
            .first()
            .ok_or_else(|| QuiltError::source_unreadable("memory source has no frames"))?;
        let (width, height) = (first.width(), first.height());
        if let Some(bad) = frames.iter().position(|f| f.size() != (width, height)) {
            return Err(QuiltError::invalid_frame(format!(
                "memory source frame {bad} is {:?}, expected {width}x{height}",
                frames[bad].size()
            )));
        }
        Ok(Self {
            info: SourceInfo {
                width,
                height,
                fps,
                frame_count: Some(frames.len() as u64),
            },
            frames: frames.into(),
            next: 0,
        })
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn next_frame(&mut self) -> QuiltResult<Option<SourceFrame>> {
        let Some(frame) = self.frames.pop_front() else {
            return Ok(None);
        };
        let index = FrameIndex(self.next);
        self.next += 1;
        Ok(Some(SourceFrame { index, frame }))
    }
}
