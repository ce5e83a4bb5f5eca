//! Error types for FrameServe.

use thiserror::Error;

/// Main error type for FrameServe operations.
#[derive(Error, Debug)]
pub enum FrameServeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Requested buffer size of {requested} bytes is too large")]
    BufferTooLarge { requested: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Completion handle is already full")]
    CompletionFull,

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for FrameServe operations.
pub type Result<T> = std::result::Result<T, FrameServeError>;
