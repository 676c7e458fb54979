//! Delivery of captured events to the collection endpoint.
//!
//! One [`DeliveryClient::send`] performs up to `max_attempts` POSTs, stops at
//! the first non-retryable failure, and reports whether the failure should
//! go to the retry queue.

mod client;
mod error;

pub use client::{
    classify_transport, DeliveryClient, DeliveryConfig, DeliveryResult, DEFAULT_RETRYABLE_CODES,
    DEFAULT_RETRYABLE_STATUSES, REQUEST_ID_HEADER, TRACE_FIELD,
};
pub use error::{DeliveryError, SendResult, TIMEOUT_CODE};
