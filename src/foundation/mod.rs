/// Frame, frame index and frame-rate primitives.
pub mod core;
/// Error taxonomy.
pub mod error;
