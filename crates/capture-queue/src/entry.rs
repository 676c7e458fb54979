//! Queue documents and retry scheduling.

use capture_config::ids::digest_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Longest sanitized prefix kept in a queue filename.
const MAX_FILE_STEM_CHARS: usize = 64;
const FILE_HASH_HEX_LEN: usize = 8;

/// Classified delivery error stored with an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl QueuedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status_code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

/// One persisted delivery attempt awaiting resubmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub request_id: String,
    /// Original payload, without the `_trace` block.
    pub payload: Value,
    pub error: QueuedError,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Filename of this entry inside any of the state directories.
    pub fn file_name(&self) -> String {
        entry_file_name(&self.request_id)
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_retry_at
    }

    /// True when the entry has been queued for longer than `max_age`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let age = now.signed_duration_since(self.enqueued_at);
        age.to_std().map(|age| age > max_age).unwrap_or(false)
    }
}

/// Delay before retry `retry_count`. Counts past the end of the schedule
/// reuse its last value.
pub fn backoff(schedule: &[Duration], retry_count: u32) -> Duration {
    let Some(last) = schedule.last() else {
        return Duration::ZERO;
    };
    schedule
        .get(retry_count as usize)
        .copied()
        .unwrap_or(*last)
}

/// `now + backoff(retry_count)`, saturating at the far future.
pub fn next_retry_at(
    schedule: &[Duration],
    retry_count: u32,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    chrono::Duration::from_std(backoff(schedule, retry_count))
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Filesystem-safe filename for a request id.
///
/// Characters outside `[A-Za-z0-9_-]` become `_`, and a short digest of the
/// raw id keeps ids that sanitize alike apart.
pub fn entry_file_name(request_id: &str) -> String {
    let mut stem = String::with_capacity(request_id.len().min(MAX_FILE_STEM_CHARS));
    for ch in request_id.chars().take(MAX_FILE_STEM_CHARS) {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            stem.push(ch);
        } else {
            stem.push('_');
        }
    }
    if stem.is_empty() {
        stem.push_str("request");
    }

    let hash = digest_hex(request_id.as_bytes(), FILE_HASH_HEX_LEN);
    format!("{stem}-{hash}.json")
}
