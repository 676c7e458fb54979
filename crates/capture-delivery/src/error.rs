//! Delivery error types.

use std::time::Duration;
use thiserror::Error;

/// Network code reported for timeouts.
pub const TIMEOUT_CODE: &str = "ETIMEDOUT";

/// Classified failure of a single delivery attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Transport failure before a response arrived
    #[error("Network error ({code}): {message}")]
    Network { code: String, message: String },

    /// Non-success HTTP response
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Hard timeout elapsed
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Payload is not a JSON object
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl DeliveryError {
    /// Network-level code, e.g. `ECONNREFUSED`.
    pub fn code(&self) -> Option<&str> {
        match self {
            DeliveryError::Network { code, .. } => Some(code),
            DeliveryError::Timeout(_) => Some(TIMEOUT_CODE),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias using DeliveryError.
pub type SendResult<T> = Result<T, DeliveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let network = DeliveryError::Network {
            code: "ECONNREFUSED".into(),
            message: "refused".into(),
        };
        assert_eq!(network.code(), Some("ECONNREFUSED"));
        assert_eq!(network.status(), None);

        let timeout = DeliveryError::Timeout(Duration::from_millis(5_000));
        assert_eq!(timeout.code(), Some(TIMEOUT_CODE));
        assert_eq!(timeout.to_string(), "Request timed out after 5000ms");

        let status = DeliveryError::Status {
            status: 404,
            body: "missing".into(),
        };
        assert_eq!(status.status(), Some(404));
        assert_eq!(status.code(), None);
        assert_eq!(status.to_string(), "HTTP 404: missing");
    }
}
