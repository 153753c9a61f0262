//! Quiltgen converts 2D video into Looking Glass quilt video.
//!
//! Each source frame is expanded into a set of horizontally shifted views, the views are packed
//! into one `rows x cols` grid frame, and the frames are streamed to `ffmpeg` with the best codec
//! the environment supports:
//!
//! - Describe the grid with a [`QuiltSpec`] (or a [`QuiltPreset`])
//! - Build a [`QuiltPipeline`] and keep its [`ProgressHandle`]
//! - Run it over a [`FrameSource`] into a [`FrameSink`]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod foundation;

/// Run configuration files.
pub mod config;
/// Encoding sinks and codec negotiation.
pub mod encode;
/// Quilt geometry and per-frame stages.
pub mod quilt;
/// Pipeline controller and progress reporting.
pub mod session;
/// Frame sources.
pub mod source;

pub use crate::foundation::core::{CHANNELS, Fps, Frame, FrameIndex, Raster, rgb8_len};
pub use crate::foundation::error::{QuiltError, QuiltResult};

pub use crate::config::RunConfig;
pub use crate::encode::codec::{Codec, EncodeJob, PREFERENCE_ORDER, negotiate, parse_codec_list};
pub use crate::encode::ffmpeg::{FfmpegSink, FfmpegSinkOpts, is_tool_available};
pub use crate::encode::sink::{FrameSink, InMemorySink, RawVideoSink, SinkConfig};
pub use crate::quilt::compose::{compose_quilt, tile_origin};
pub use crate::quilt::lenticular::{Calibration, interlace};
pub use crate::quilt::spec::{
    QuiltPreset, QuiltSpec, QuiltTag, default_output_path, parse_quilt_tag,
};
pub use crate::quilt::synth::{DepthMode, SynthOpts, ViewSet, synthesize_views, view_shift};
pub use crate::session::pipeline::{
    PipelineOpts, QuiltPipeline, RunOutcome, RunStats, build_output_frame,
};
pub use crate::session::progress::{PipelineState, ProgressHandle, ProgressSnapshot};
pub use crate::source::{
    FfmpegSource, FfmpegSourceOpts, FrameSource, MemorySource, SourceFrame, SourceInfo,
    probe_video,
};
