//! Filesystem-backed retry queue.
//!
//! ```text
//! <queue_dir>/
//!   pending/      waiting for nextRetryAt
//!   processing/   claimed by a drainer
//!   failed/       terminal, kept for inspection
//! ```
//!
//! One JSON document per entry. Every move between directories is a single
//! `rename`, so a scanner sees each entry in exactly one place and the loser
//! of a race gets `NotFound`.

use crate::atomic::{atomic_write, is_entry_file};
use crate::entry::{next_retry_at, QueueEntry, QueuedError};
use crate::queue::{EnqueueOutcome, QueueStatus, RetryQueue, Transition};
use crate::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, error, info, warn};

pub const PENDING_DIR: &str = "pending";
pub const PROCESSING_DIR: &str = "processing";
pub const FAILED_DIR: &str = "failed";

/// Reason recorded on entries swept by age.
pub const STALE_REASON: &str = "stale";

/// Retry queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub queue_dir: PathBuf,
    /// Delay before retry N. The last value repeats.
    pub backoff_schedule: Vec<Duration>,
    /// Pending entries allowed before enqueues are rejected.
    pub max_queue_size: usize,
    /// Entries older than this are moved to failed on the next scan.
    pub max_age: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_dir: PathBuf::from(".conversation-capture/queue"),
            backoff_schedule: capture_config::DEFAULT_BACKOFF_SCHEDULE_SECS
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
            max_queue_size: 1_000,
            max_age: Duration::from_secs(7 * 24 * 3_600),
        }
    }
}

/// [`RetryQueue`] over three state directories.
pub struct FsRetryQueue {
    config: QueueConfig,
    pending_dir: PathBuf,
    processing_dir: PathBuf,
    failed_dir: PathBuf,
    disabled_reason: Option<String>,
}

impl FsRetryQueue {
    /// Open the store, creating its directories.
    ///
    /// Never fails: when the directories cannot be created the store is
    /// disabled and reports why through [`RetryQueue::status`].
    pub fn new(config: QueueConfig) -> Self {
        let pending_dir = config.queue_dir.join(PENDING_DIR);
        let processing_dir = config.queue_dir.join(PROCESSING_DIR);
        let failed_dir = config.queue_dir.join(FAILED_DIR);

        let disabled_reason = [&pending_dir, &processing_dir, &failed_dir]
            .into_iter()
            .find_map(|dir| {
                std::fs::create_dir_all(dir)
                    .err()
                    .map(|err| format!("cannot create {}: {}", dir.display(), err))
            });

        if let Some(reason) = &disabled_reason {
            error!(reason = %reason, "Retry queue disabled");
        }

        Self {
            config,
            pending_dir,
            processing_dir,
            failed_dir,
            disabled_reason,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.disabled_reason.is_none()
    }

    pub fn pending_dir(&self) -> &Path {
        &self.pending_dir
    }

    pub fn processing_dir(&self) -> &Path {
        &self.processing_dir
    }

    pub fn failed_dir(&self) -> &Path {
        &self.failed_dir
    }

    fn ensure_enabled(&self) -> QueueResult<()> {
        match &self.disabled_reason {
            Some(reason) => Err(QueueError::Disabled(reason.clone())),
            None => Ok(()),
        }
    }

    /// Claim the entry into `failed/` from the first of `sources` holding it,
    /// then record the reason on the claimed copy.
    async fn fail_from(
        &self,
        entry: &QueueEntry,
        reason: &str,
        sources: &[&Path],
    ) -> QueueResult<Transition> {
        let name = entry.file_name();
        let failed_path = self.failed_dir.join(&name);

        let mut claimed = false;
        for source in sources {
            if rename_entry(&source.join(&name), &failed_path).await? == Transition::Moved {
                claimed = true;
                break;
            }
        }
        if !claimed {
            return Ok(Transition::AlreadyHandled);
        }

        let mut failed = entry.clone();
        failed.failure_reason = Some(reason.to_string());
        failed.failed_at = Some(Utc::now());
        atomic_write(&failed_path, &serde_json::to_vec_pretty(&failed)?).await?;

        warn!(
            channel = "queue",
            request_id = %entry.request_id,
            retry_count = entry.retry_count,
            reason = %reason,
            "Entry moved to failed"
        );
        Ok(Transition::Moved)
    }

    /// Move a stale entry from pending to failed. Errors are logged and the
    /// entry is left for the next scan.
    async fn sweep_stale(&self, entry: &QueueEntry) {
        // Sweep from pending only: a claimed entry belongs to its drainer.
        let sources = [self.pending_dir.as_path()];
        match self.fail_from(entry, STALE_REASON, &sources).await {
            Ok(Transition::Moved) => info!(
                channel = "queue",
                request_id = %entry.request_id,
                enqueued_at = %entry.enqueued_at.to_rfc3339(),
                "Stale entry moved to failed"
            ),
            Ok(Transition::AlreadyHandled) => {}
            Err(err) => warn!(
                channel = "queue",
                request_id = %entry.request_id,
                error = %err,
                "Failed to move stale entry, skipping"
            ),
        }
    }

    async fn try_enqueue(
        &self,
        request_id: &str,
        payload: &Value,
        error: &QueuedError,
        retry_count: u32,
    ) -> QueueResult<EnqueueOutcome> {
        let pending = count_entries(&self.pending_dir).await?;
        if pending >= self.config.max_queue_size {
            return Ok(EnqueueOutcome::Rejected(format!(
                "queue full: {} pending entries (max {})",
                pending, self.config.max_queue_size
            )));
        }

        let now = Utc::now();
        let entry = QueueEntry {
            request_id: request_id.to_string(),
            payload: payload.clone(),
            error: error.clone(),
            retry_count,
            enqueued_at: now,
            next_retry_at: next_retry_at(&self.config.backoff_schedule, retry_count, now),
            last_retry_at: None,
            failure_reason: None,
            failed_at: None,
        };

        let path = self.pending_dir.join(entry.file_name());
        atomic_write(&path, &serde_json::to_vec_pretty(&entry)?).await?;

        Ok(EnqueueOutcome::Enqueued {
            path,
            next_retry_at: entry.next_retry_at,
        })
    }
}

#[async_trait]
impl RetryQueue for FsRetryQueue {
    async fn enqueue(
        &self,
        request_id: &str,
        payload: &Value,
        error: &QueuedError,
        retry_count: u32,
    ) -> EnqueueOutcome {
        if let Some(reason) = &self.disabled_reason {
            warn!(
                channel = "queue",
                request_id = %request_id,
                reason = %reason,
                "Enqueue rejected: queue disabled"
            );
            return EnqueueOutcome::Rejected(format!("queue disabled: {reason}"));
        }

        let outcome = match self.try_enqueue(request_id, payload, error, retry_count).await {
            Ok(outcome) => outcome,
            Err(err) => EnqueueOutcome::Rejected(format!("queue write failed: {err}")),
        };

        match &outcome {
            EnqueueOutcome::Enqueued { next_retry_at, .. } => info!(
                channel = "queue",
                request_id = %request_id,
                retry_count,
                next_retry_at = %next_retry_at.to_rfc3339(),
                error = %error.message,
                "Request enqueued for retry"
            ),
            EnqueueOutcome::Rejected(reason) => warn!(
                channel = "queue",
                request_id = %request_id,
                reason = %reason,
                "Enqueue rejected"
            ),
        }

        outcome
    }

    async fn ready_requests(&self) -> QueueResult<Vec<QueueEntry>> {
        if self.disabled_reason.is_some() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut ready = Vec::new();

        for path in list_entries(&self.pending_dir).await? {
            let entry = match read_entry(&path).await {
                Ok(Some(entry)) => entry,
                // Claimed by someone else between listing and reading.
                Ok(None) => continue,
                Err(err) => {
                    warn!(
                        channel = "queue",
                        path = %path.display(),
                        error = %err,
                        "Skipping unreadable queue entry"
                    );
                    continue;
                }
            };

            if entry.is_stale(now, self.config.max_age) {
                self.sweep_stale(&entry).await;
                continue;
            }

            if entry.is_ready(now) {
                ready.push(entry);
            }
        }

        ready.sort_by(|a, b| {
            a.next_retry_at
                .cmp(&b.next_retry_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });

        debug!(channel = "queue", count = ready.len(), "Scanned pending entries");
        Ok(ready)
    }

    async fn move_to_processing(&self, entry: &QueueEntry) -> QueueResult<Transition> {
        self.ensure_enabled()?;
        let name = entry.file_name();
        let transition = rename_entry(
            &self.pending_dir.join(&name),
            &self.processing_dir.join(&name),
        )
        .await?;

        if transition == Transition::Moved {
            // rename keeps the enqueue-time mtime; stuck detection needs the claim time
            if let Err(err) = touch(&self.processing_dir.join(&name)).await {
                debug!(
                    channel = "queue",
                    request_id = %entry.request_id,
                    error = %err,
                    "Failed to stamp claimed entry"
                );
            }
        }

        debug!(
            channel = "queue",
            request_id = %entry.request_id,
            ?transition,
            "Move to processing"
        );
        Ok(transition)
    }

    async fn move_to_pending(
        &self,
        entry: &QueueEntry,
        new_retry_count: u32,
    ) -> QueueResult<Transition> {
        self.ensure_enabled()?;
        let name = entry.file_name();
        let processing_path = self.processing_dir.join(&name);

        match fs::metadata(&processing_path).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Transition::AlreadyHandled)
            }
            Err(err) => return Err(err.into()),
        }

        let now = Utc::now();
        let mut updated = entry.clone();
        updated.retry_count = new_retry_count;
        updated.next_retry_at = next_retry_at(&self.config.backoff_schedule, new_retry_count, now);
        updated.last_retry_at = Some(now);

        atomic_write(&processing_path, &serde_json::to_vec_pretty(&updated)?).await?;
        let transition = rename_entry(&processing_path, &self.pending_dir.join(&name)).await?;

        if transition == Transition::Moved {
            info!(
                channel = "queue",
                request_id = %entry.request_id,
                retry_count = new_retry_count,
                next_retry_at = %updated.next_retry_at.to_rfc3339(),
                "Entry rescheduled"
            );
        }
        Ok(transition)
    }

    async fn move_to_failed(&self, entry: &QueueEntry, reason: &str) -> QueueResult<Transition> {
        self.ensure_enabled()?;
        let sources = [self.processing_dir.as_path(), self.pending_dir.as_path()];
        self.fail_from(entry, reason, &sources).await
    }

    async fn delete_entry(&self, entry: &QueueEntry) -> QueueResult<Transition> {
        self.ensure_enabled()?;
        let name = entry.file_name();

        for dir in [&self.processing_dir, &self.pending_dir] {
            match fs::remove_file(dir.join(&name)).await {
                Ok(()) => {
                    info!(channel = "queue", request_id = %entry.request_id, "Entry removed");
                    return Ok(Transition::Moved);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(Transition::AlreadyHandled)
    }

    async fn status(&self) -> QueueStatus {
        if let Some(reason) = &self.disabled_reason {
            return QueueStatus {
                enabled: false,
                disabled_reason: Some(reason.clone()),
                pending: 0,
                processing: 0,
                failed: 0,
            };
        }

        QueueStatus {
            enabled: true,
            disabled_reason: None,
            pending: count_entries(&self.pending_dir).await.unwrap_or(0),
            processing: count_entries(&self.processing_dir).await.unwrap_or(0),
            failed: count_entries(&self.failed_dir).await.unwrap_or(0),
        }
    }

    async fn recover_stuck_processing(&self, older_than: Duration) -> QueueResult<usize> {
        if self.disabled_reason.is_some() {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut recovered = 0;

        for path in list_entries(&self.processing_dir).await? {
            let modified = match fs::metadata(&path).await.and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < older_than {
                continue;
            }

            let Some(name) = path.file_name() else {
                continue;
            };
            if rename_entry(&path, &self.pending_dir.join(name)).await? == Transition::Moved {
                recovered += 1;
                warn!(
                    channel = "queue",
                    file = %name.to_string_lossy(),
                    age_secs = age.as_secs(),
                    "Recovered entry stuck in processing"
                );
            }
        }

        Ok(recovered)
    }
}

async fn touch(path: &Path) -> io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path).await?;
    let file = file.into_std().await;
    tokio::task::spawn_blocking(move || file.set_modified(SystemTime::now()))
        .await
        .map_err(io::Error::other)?
}

async fn rename_entry(from: &Path, to: &Path) -> QueueResult<Transition> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(Transition::Moved),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Transition::AlreadyHandled),
        Err(err) => Err(err.into()),
    }
}

/// Read and parse one document. `None` when the file has vanished.
async fn read_entry(path: &Path) -> QueueResult<Option<QueueEntry>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

async fn list_entries(dir: &Path) -> QueueResult<Vec<PathBuf>> {
    let mut entries = Vec::new();
    let mut reader = fs::read_dir(dir).await?;
    while let Some(item) = reader.next_entry().await? {
        let name = item.file_name();
        if name.to_str().is_some_and(is_entry_file) {
            entries.push(item.path());
        }
    }
    entries.sort();
    Ok(entries)
}

async fn count_entries(dir: &Path) -> QueueResult<usize> {
    Ok(list_entries(dir).await?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn open(dir: &TempDir) -> FsRetryQueue {
        FsRetryQueue::new(QueueConfig {
            queue_dir: dir.path().join("queue"),
            ..QueueConfig::default()
        })
    }

    fn refused() -> QueuedError {
        QueuedError::new("connection refused").with_code("ECONNREFUSED")
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    /// Write an entry straight into pending with chosen timestamps.
    fn seed(
        queue: &FsRetryQueue,
        request_id: &str,
        retry_count: u32,
        due_in: chrono::Duration,
        age: chrono::Duration,
    ) -> QueueEntry {
        let now = Utc::now();
        let entry = QueueEntry {
            request_id: request_id.to_string(),
            payload: json!({ "event": "stop", "sessionId": "s" }),
            error: refused(),
            retry_count,
            enqueued_at: now - age,
            next_retry_at: now + due_in,
            last_retry_at: None,
            failure_reason: None,
            failed_at: None,
        };
        let path = queue.pending_dir().join(entry.file_name());
        std::fs::write(path, serde_json::to_vec(&entry).unwrap()).unwrap();
        entry
    }

    fn due(queue: &FsRetryQueue, request_id: &str, retry_count: u32) -> QueueEntry {
        seed(
            queue,
            request_id,
            retry_count,
            chrono::Duration::seconds(-1),
            chrono::Duration::minutes(5),
        )
    }

    // =========================================================================
    // enqueue
    // =========================================================================

    #[tokio::test]
    async fn test_enqueue_round_trips_payload_and_schedule() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        let payload = json!({ "event": "user-prompt-submit", "prompt": "hi" });
        let error = QueuedError::new("bad gateway").with_status(502);

        let before = Utc::now();
        let outcome = queue.enqueue("req_1", &payload, &error, 0).await;
        let EnqueueOutcome::Enqueued { path, next_retry_at } = outcome.clone() else {
            panic!("expected enqueue, got {outcome:?}");
        };

        let stored: QueueEntry = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored.request_id, "req_1");
        assert_eq!(stored.payload, payload);
        assert_eq!(stored.error, error);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.next_retry_at, next_retry_at);
        assert!(stored.next_retry_at >= before + chrono::Duration::seconds(60));
        assert!(stored.next_retry_at <= Utc::now() + chrono::Duration::seconds(60));
        assert_eq!(files_in(queue.pending_dir()).len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_when_full() {
        let dir = tempdir().unwrap();
        let queue = FsRetryQueue::new(QueueConfig {
            queue_dir: dir.path().join("queue"),
            max_queue_size: 2,
            ..QueueConfig::default()
        });

        assert!(queue.enqueue("a", &json!({}), &refused(), 0).await.is_enqueued());
        assert!(queue.enqueue("b", &json!({}), &refused(), 0).await.is_enqueued());

        let outcome = queue.enqueue("c", &json!({}), &refused(), 0).await;
        assert!(matches!(
            outcome,
            EnqueueOutcome::Rejected(ref reason) if reason.contains("queue full")
        ));
        assert_eq!(files_in(queue.pending_dir()).len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_store_rejects_and_reports() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let queue = FsRetryQueue::new(QueueConfig {
            queue_dir: blocker.join("queue"),
            ..QueueConfig::default()
        });

        assert!(!queue.is_enabled());
        let outcome = queue.enqueue("a", &json!({}), &refused(), 0).await;
        assert!(matches!(outcome, EnqueueOutcome::Rejected(_)));
        assert!(queue.ready_requests().await.unwrap().is_empty());

        let status = queue.status().await;
        assert!(!status.enabled);
        assert!(status.disabled_reason.unwrap().contains("cannot create"));
    }

    // =========================================================================
    // ready_requests
    // =========================================================================

    #[tokio::test]
    async fn test_only_due_entries_are_ready_in_schedule_order() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        let hour = chrono::Duration::hours(1);

        seed(&queue, "later", 0, chrono::Duration::seconds(-10), hour);
        seed(&queue, "earlier", 0, chrono::Duration::seconds(-60), hour);
        seed(&queue, "future", 0, hour, hour);

        let ready = queue.ready_requests().await.unwrap();
        let ids: Vec<_> = ready.iter().map(|e| e.request_id.as_str()).collect();
        assert_eq!(ids, vec!["earlier", "later"]);
    }

    #[tokio::test]
    async fn test_scanning_is_idempotent() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        due(&queue, "a", 0);
        due(&queue, "b", 1);

        let first = queue.ready_requests().await.unwrap();
        let second = queue.ready_requests().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_entries_are_swept_regardless_of_schedule() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        let old = seed(&queue, "old", 2, chrono::Duration::hours(1), chrono::Duration::days(8));

        let ready = queue.ready_requests().await.unwrap();

        assert!(ready.is_empty());
        assert!(files_in(queue.pending_dir()).is_empty());
        let failed_path = queue.failed_dir().join(old.file_name());
        let failed: QueueEntry =
            serde_json::from_slice(&std::fs::read(failed_path).unwrap()).unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some(STALE_REASON));
        assert!(failed.failed_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_entry_that_cannot_be_moved_does_not_block_the_scan() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        let old = seed(&queue, "old", 0, chrono::Duration::hours(1), chrono::Duration::days(8));
        due(&queue, "fresh", 0);
        let occupied = queue.failed_dir().join(old.file_name());
        std::fs::create_dir(&occupied).unwrap();
        std::fs::write(occupied.join("keep"), "x").unwrap();

        let ready = queue.ready_requests().await.unwrap();

        let ids: Vec<_> = ready.iter().map(|e| e.request_id.as_str()).collect();
        assert_eq!(ids, vec!["fresh"]);
        assert!(queue.pending_dir().join(old.file_name()).exists());
    }

    #[tokio::test]
    async fn test_stale_sweep_leaves_claimed_entry_to_its_drainer() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        let old = seed(&queue, "old", 0, chrono::Duration::seconds(-1), chrono::Duration::days(8));
        assert_eq!(queue.move_to_processing(&old).await.unwrap(), Transition::Moved);

        // The scan read the entry before the drainer claimed it.
        queue.sweep_stale(&old).await;

        assert_eq!(files_in(queue.processing_dir()), vec![old.file_name()]);
        assert!(files_in(queue.failed_dir()).is_empty());
        assert_eq!(queue.delete_entry(&old).await.unwrap(), Transition::Moved);
    }

    #[tokio::test]
    async fn test_unparseable_and_temp_files_are_skipped() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        due(&queue, "good", 0);
        std::fs::write(queue.pending_dir().join("broken.json"), "{ nope").unwrap();
        std::fs::write(queue.pending_dir().join(".good.json.tmp.1"), "{}").unwrap();

        let ready = queue.ready_requests().await.unwrap();

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].request_id, "good");
        assert!(queue.pending_dir().join("broken.json").exists());
    }

    // =========================================================================
    // transitions
    // =========================================================================

    #[tokio::test]
    async fn test_concurrent_claims_have_exactly_one_winner() {
        let dir = tempdir().unwrap();
        let queue = Arc::new(open(&dir));
        let entry = due(&queue, "contested", 0);

        let (a, b) = tokio::join!(
            queue.move_to_processing(&entry),
            queue.move_to_processing(&entry)
        );
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|t| *t == Transition::AlreadyHandled);

        assert_eq!(outcomes, vec![Transition::Moved, Transition::AlreadyHandled]);
        assert_eq!(files_in(queue.processing_dir()), vec![entry.file_name()]);
        assert!(files_in(queue.pending_dir()).is_empty());
    }

    #[tokio::test]
    async fn test_move_to_pending_reschedules_with_new_count() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        let entry = due(&queue, "retry-me", 1);
        queue.move_to_processing(&entry).await.unwrap();

        let before = Utc::now();
        assert_eq!(queue.move_to_pending(&entry, 2).await.unwrap(), Transition::Moved);

        assert!(files_in(queue.processing_dir()).is_empty());
        let path = queue.pending_dir().join(entry.file_name());
        let stored: QueueEntry = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(stored.retry_count, 2);
        assert!(stored.last_retry_at.unwrap() >= before);
        assert!(stored.next_retry_at >= before + chrono::Duration::seconds(900));
        assert!(queue.ready_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_move_to_pending_of_unclaimed_entry_is_already_handled() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        let entry = due(&queue, "unclaimed", 0);

        assert_eq!(queue.move_to_pending(&entry, 1).await.unwrap(), Transition::AlreadyHandled);
        assert!(files_in(queue.processing_dir()).is_empty());
    }

    #[tokio::test]
    async fn test_move_to_failed_records_reason() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        let entry = due(&queue, "doomed", 5);
        queue.move_to_processing(&entry).await.unwrap();

        let first = queue.move_to_failed(&entry, "Max retries exceeded").await.unwrap();
        let second = queue.move_to_failed(&entry, "again").await.unwrap();
        assert_eq!(first, Transition::Moved);
        assert_eq!(second, Transition::AlreadyHandled);

        assert!(files_in(queue.pending_dir()).is_empty());
        assert!(files_in(queue.processing_dir()).is_empty());
        let path = queue.failed_dir().join(entry.file_name());
        let stored: QueueEntry = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(stored.failure_reason.as_deref(), Some("Max retries exceeded"));
        assert_eq!(stored.retry_count, 5);
    }

    #[tokio::test]
    async fn test_delete_removes_claimed_entry_once() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        let entry = due(&queue, "delivered", 0);
        queue.move_to_processing(&entry).await.unwrap();

        assert_eq!(queue.delete_entry(&entry).await.unwrap(), Transition::Moved);
        assert_eq!(queue.delete_entry(&entry).await.unwrap(), Transition::AlreadyHandled);
        assert_eq!(queue.status().await.processing, 0);
    }

    #[tokio::test]
    async fn test_stuck_processing_entries_are_recovered() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        let entry = due(&queue, "crashed", 0);
        queue.move_to_processing(&entry).await.unwrap();

        assert_eq!(queue.recover_stuck_processing(Duration::from_secs(3_600)).await.unwrap(), 0);
        assert_eq!(queue.recover_stuck_processing(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(files_in(queue.pending_dir()), vec![entry.file_name()]);
    }

    #[tokio::test]
    async fn test_status_counts_each_state() {
        let dir = tempdir().unwrap();
        let queue = open(&dir);
        let a = due(&queue, "a", 0);
        let b = due(&queue, "b", 0);
        due(&queue, "c", 0);
        queue.move_to_processing(&a).await.unwrap();
        queue.move_to_failed(&b, "Non-retryable error: 404").await.unwrap();

        let status = queue.status().await;
        assert_eq!(
            status,
            QueueStatus {
                enabled: true,
                disabled_reason: None,
                pending: 1,
                processing: 1,
                failed: 1,
            }
        );
    }
}
