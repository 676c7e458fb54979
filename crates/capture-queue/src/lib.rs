//! Durable retry queue for capture deliveries that failed in a retryable way.
//!
//! This crate provides:
//! - RetryQueue: the store interface used by the orchestrator and drainer
//! - FsRetryQueue: pending/processing/failed directories with rename-based transitions
//! - QueueEntry: the persisted document, plus the backoff schedule helpers

mod atomic;
mod entry;
mod error;
mod queue;
mod store;

pub use entry::{backoff, entry_file_name, next_retry_at, QueueEntry, QueuedError};
pub use error::{QueueError, QueueResult};
pub use queue::{EnqueueOutcome, QueueStatus, RetryQueue, Transition};
pub use store::{
    FsRetryQueue, QueueConfig, FAILED_DIR, PENDING_DIR, PROCESSING_DIR, STALE_REASON,
};
