/// Pipeline controller.
pub mod pipeline;
/// Progress state shared with callers.
pub mod progress;
