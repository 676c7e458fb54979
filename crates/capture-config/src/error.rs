//! Configuration error types.

use thiserror::Error;

/// Error raised while resolving paths or loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Path error (e.g., home directory not found)
    #[error("Path error: {0}")]
    Path(String),
}

/// Result type alias using ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
