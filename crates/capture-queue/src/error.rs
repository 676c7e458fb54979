//! Retry queue error types.

use thiserror::Error;

/// Retry queue error type.
#[derive(Error, Debug)]
pub enum QueueError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store disabled at startup
    #[error("Queue disabled: {0}")]
    Disabled(String),
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;
