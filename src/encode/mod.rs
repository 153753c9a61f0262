//! Encoding sinks.
//!
//! Sinks consume quilt frames in presentation order and are driven by the pipeline's encoder
//! thread.

/// Codec table, encode jobs and negotiation.
pub mod codec;
/// `ffmpeg`-based sink.
pub mod ffmpeg;
/// Generic frame sink trait and built-in sinks.
pub mod sink;
