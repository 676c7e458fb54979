//! Error types for the capture hook.

use thiserror::Error;

/// Hook error type.
#[derive(Error, Debug)]
pub enum HookError {
    /// The host did not name the event
    #[error("Missing event type")]
    MissingEvent,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] capture_config::ConfigError),

    /// Delivery client could not be built
    #[error("Delivery error: {0}")]
    Delivery(#[from] capture_delivery::DeliveryError),

    /// Retry queue I/O or parse error
    #[error("Queue error: {0}")]
    Queue(#[from] capture_queue::QueueError),

    /// Signal handler or other I/O setup failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The capture task panicked
    #[error("Capture task panicked: {0}")]
    Panicked(String),
}

/// Result type for hook operations.
pub type HookResult<T> = Result<T, HookError>;
