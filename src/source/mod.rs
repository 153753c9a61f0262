//! Frame sources: lazy, forward-only decoders producing frames in presentation order.

use crate::foundation::core::{Fps, Frame, FrameIndex};
use crate::foundation::error::QuiltResult;

/// `ffmpeg`-subprocess decoder.
pub mod ffmpeg;
/// In-memory source for tests and pre-decoded input.
pub mod memory;

pub use ffmpeg::{FfmpegSource, FfmpegSourceOpts, probe_video};
pub use memory::MemorySource;

/// Basic metadata about a source video.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceInfo {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Native frame rate.
    pub fps: Fps,
    /// Frame count reported or estimated by the container, if known.
    pub frame_count: Option<u64>,
}

/// A decoded frame tagged with its presentation index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFrame {
    /// 0-based presentation index.
    pub index: FrameIndex,
    /// Decoded pixels.
    pub frame: Frame,
}

/// Forward-only frame sequence.
///
/// Not restartable: once `next_frame` returns `Ok(None)` the source is exhausted. Implementations
/// release their decoder when exhausted or dropped.
pub trait FrameSource: Send {
    /// Metadata known at open time.
    fn info(&self) -> &SourceInfo;

    /// Decode the next frame, or `None` at end of stream.
    ///
    /// Returns `SourceUnreadable` if the stream ends before yielding any frame.
    fn next_frame(&mut self) -> QuiltResult<Option<SourceFrame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn info(&self) -> &SourceInfo {
        (**self).info()
    }

    fn next_frame(&mut self) -> QuiltResult<Option<SourceFrame>> {
        (**self).next_frame()
    }
}
