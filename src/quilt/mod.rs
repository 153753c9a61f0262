//! Quilt geometry and the pure per-frame stages: view synthesis, grid composition and
//! lenticular interlacing.

/// Composing a view set into one quilt frame.
pub mod compose;
/// Display calibration and interlacing.
pub mod lenticular;
/// Grid geometry, presets and the filename tag.
pub mod spec;
/// View synthesis.
pub mod synth;
