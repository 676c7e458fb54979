//! The retry queue interface.

use crate::entry::{QueueEntry, QueuedError};
use crate::QueueResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Result of [`RetryQueue::enqueue`]. Rejection is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued {
        path: PathBuf,
        next_retry_at: DateTime<Utc>,
    },
    Rejected(String),
}

impl EnqueueOutcome {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, EnqueueOutcome::Enqueued { .. })
    }
}

/// Result of a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Moved,
    /// Another process already moved or removed the entry.
    AlreadyHandled,
}

/// Health of the store, reported by `capture-hook status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
}

/// Durable holding area for retryable delivery failures.
///
/// Concurrent callers never coordinate: each transition either wins or
/// reports [`Transition::AlreadyHandled`].
#[async_trait]
pub trait RetryQueue: Send + Sync {
    /// Persist a failed attempt, scheduled per the backoff for `retry_count`.
    async fn enqueue(
        &self,
        request_id: &str,
        payload: &Value,
        error: &QueuedError,
        retry_count: u32,
    ) -> EnqueueOutcome;

    /// Pending entries due for resubmission, oldest schedule first.
    /// Stale entries are moved to failed as a side effect.
    async fn ready_requests(&self) -> QueueResult<Vec<QueueEntry>>;

    async fn move_to_processing(&self, entry: &QueueEntry) -> QueueResult<Transition>;

    /// Return a processing entry to pending with a new retry count.
    async fn move_to_pending(&self, entry: &QueueEntry, new_retry_count: u32)
        -> QueueResult<Transition>;

    async fn move_to_failed(&self, entry: &QueueEntry, reason: &str) -> QueueResult<Transition>;

    async fn delete_entry(&self, entry: &QueueEntry) -> QueueResult<Transition>;

    async fn status(&self) -> QueueStatus;

    /// Return entries stuck in processing for longer than `older_than` to
    /// pending. Returns how many were recovered.
    async fn recover_stuck_processing(&self, older_than: Duration) -> QueueResult<usize>;
}
