use std::path::PathBuf;

use crate::encode::codec::Codec;

/// Result alias used throughout the crate.
pub type QuiltResult<T> = Result<T, QuiltError>;

/// Error taxonomy for a quilt conversion run.
///
/// Every variant except [`QuiltError::Cancelled`] is fatal for the run. `Cancelled` is used to
/// unwind the pipeline and is reported to callers as a terminal state, not as a failure.
#[derive(thiserror::Error, Debug)]
pub enum QuiltError {
    /// Quilt or encode configuration is inconsistent. Raised before any I/O.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Input video could not be opened or produced no decodable frames.
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),

    /// A frame handed to a stage was malformed (zero-sized, wrong buffer length).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A synthesized view does not match the configured tile size.
    #[error("tile size mismatch at view {view}: expected {expected:?}, got {got:?}")]
    TileSizeMismatch {
        /// Offending view index.
        view: usize,
        /// Configured `(tile_width, tile_height)`.
        expected: (u32, u32),
        /// Actual `(width, height)` of the view.
        got: (u32, u32),
    },

    /// No codec in the ranked list is usable in this environment.
    #[error("no usable encoder (tried: {})", fmt_codecs(tried))]
    EncoderUnavailable {
        /// Codecs attempted, in preference order.
        tried: Vec<Codec>,
    },

    /// The external encoder exited unsuccessfully.
    #[error("encoder process failed ({status}): {stderr}")]
    EncoderProcessFailed {
        /// Exit status description.
        status: String,
        /// Captured diagnostic output.
        stderr: String,
    },

    /// The output path could not be created or written.
    #[error("failed to write '{}': {source}", path.display())]
    IoWriteFailed {
        /// Output path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled cooperatively.
    #[error("cancelled")]
    Cancelled,

    /// Wrapped lower-level error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QuiltError {
    /// Build a [`QuiltError::ConfigInvalid`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    /// Build a [`QuiltError::SourceUnreadable`] value.
    pub fn source_unreadable(msg: impl Into<String>) -> Self {
        Self::SourceUnreadable(msg.into())
    }

    /// Build a [`QuiltError::InvalidFrame`] value.
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Build a [`QuiltError::EncoderProcessFailed`] value.
    pub fn process_failed(status: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::EncoderProcessFailed {
            status: status.into(),
            stderr: stderr.into(),
        }
    }

    /// Build a [`QuiltError::IoWriteFailed`] value.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoWriteFailed {
            path: path.into(),
            source,
        }
    }

    /// Return `true` for the cooperative cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn fmt_codecs(codecs: &[Codec]) -> String {
    codecs
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
