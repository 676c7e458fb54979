//! Resubmission of queued events.
//!
//! Each pass claims due entries by renaming them into `processing/`, resends
//! them under their original request id, and settles each one: deleted on
//! success, back to `pending/` with a bumped retry count on a retryable
//! failure, or into `failed/` once retries run out.

use crate::config::DrainConfig;
use crate::error::HookResult;
use crate::event::UNKNOWN_SESSION;
use crate::orchestrator::queued_error;
use crate::shutdown::shutdown_signal;
use capture_config::TraceContext;
use capture_delivery::{DeliveryClient, DeliveryResult};
use capture_queue::{QueueEntry, RetryQueue, Transition};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const MAX_RETRIES_REASON: &str = "Max retries exceeded";

/// Counts from one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Processing entries returned to pending before the scan
    pub recovered: usize,
    /// Due entries found
    pub ready: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub failed: usize,
    /// Claimed by another process first
    pub skipped: usize,
    /// Entries left untouched because of an I/O error
    pub errors: usize,
}

impl DrainReport {
    pub fn processed(&self) -> usize {
        self.delivered + self.rescheduled + self.failed
    }
}

enum Settled {
    Delivered,
    Rescheduled,
    Failed,
    Skipped,
}

pub struct Drainer {
    queue: Arc<dyn RetryQueue>,
    delivery: Arc<DeliveryClient>,
    config: DrainConfig,
}

impl Drainer {
    pub fn new(
        queue: Arc<dyn RetryQueue>,
        delivery: Arc<DeliveryClient>,
        config: DrainConfig,
    ) -> Self {
        Self {
            queue,
            delivery,
            config,
        }
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    /// One pass over the due entries, at most `batch_limit` of them.
    pub async fn drain_once(&self) -> HookResult<DrainReport> {
        let mut report = DrainReport::default();

        match self.queue.recover_stuck_processing(self.config.stuck_after).await {
            Ok(recovered) => report.recovered = recovered,
            Err(err) => {
                warn!(channel = "queue", error = %err, "Failed to recover stuck entries");
            }
        }

        let ready = self.queue.ready_requests().await?;
        report.ready = ready.len();

        for entry in ready.iter().take(self.config.batch_limit) {
            match self.process(entry).await {
                Ok(Settled::Delivered) => report.delivered += 1,
                Ok(Settled::Rescheduled) => report.rescheduled += 1,
                Ok(Settled::Failed) => report.failed += 1,
                Ok(Settled::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.errors += 1;
                    error!(
                        channel = "queue",
                        request_id = %entry.request_id,
                        error = %err,
                        "Failed to process queued event"
                    );
                }
            }
        }

        if report.ready > 0 || report.recovered > 0 {
            info!(
                channel = "queue",
                recovered = report.recovered,
                ready = report.ready,
                delivered = report.delivered,
                rescheduled = report.rescheduled,
                failed = report.failed,
                skipped = report.skipped,
                errors = report.errors,
                "Drain pass finished"
            );
        } else {
            debug!(channel = "queue", "Queue empty");
        }

        Ok(report)
    }

    async fn process(&self, entry: &QueueEntry) -> HookResult<Settled> {
        if self.queue.move_to_processing(entry).await? == Transition::AlreadyHandled {
            return Ok(Settled::Skipped);
        }

        let session_id = entry
            .payload
            .get("sessionId")
            .and_then(|value| value.as_str())
            .unwrap_or(UNKNOWN_SESSION);
        let attempt = entry.retry_count.saturating_add(1);
        let trace = TraceContext::new(entry.request_id.clone(), session_id, "drain", attempt);

        match self.delivery.send(&entry.payload, trace).await {
            DeliveryResult::Delivered { status, attempts, .. } => {
                self.queue.delete_entry(entry).await?;
                info!(
                    channel = "queue",
                    request_id = %entry.request_id,
                    status,
                    attempts,
                    retry_count = entry.retry_count,
                    "Queued event delivered"
                );
                Ok(Settled::Delivered)
            }
            DeliveryResult::Failed {
                error,
                should_queue: false,
                ..
            } => {
                let reason = format!("Non-retryable error: {error}");
                self.queue.move_to_failed(entry, &reason).await?;
                error!(
                    channel = "queue",
                    request_id = %entry.request_id,
                    error = %error,
                    "Queued event failed permanently"
                );
                Ok(Settled::Failed)
            }
            DeliveryResult::Failed { error, .. }
                if entry.retry_count >= self.config.max_queue_retries =>
            {
                self.queue.move_to_failed(entry, MAX_RETRIES_REASON).await?;
                error!(
                    channel = "queue",
                    request_id = %entry.request_id,
                    retry_count = entry.retry_count,
                    error = %error,
                    "Queued event exceeded max retries"
                );
                Ok(Settled::Failed)
            }
            DeliveryResult::Failed { error, .. } => {
                let mut updated = entry.clone();
                updated.error = queued_error(&error);
                self.queue.move_to_pending(&updated, attempt).await?;
                warn!(
                    channel = "queue",
                    request_id = %entry.request_id,
                    retry_count = attempt,
                    error = %error,
                    "Queued event rescheduled"
                );
                Ok(Settled::Rescheduled)
            }
        }
    }

    /// Drain every `interval` until ctrl-c or SIGTERM.
    pub async fn run(&self, interval: Duration) -> HookResult<()> {
        self.run_until(interval, shutdown_signal()?).await;
        Ok(())
    }

    /// Drain every `interval` until `shutdown` resolves.
    pub async fn run_until<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            channel = "queue",
            interval_secs = interval.as_secs(),
            "Queue drainer started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(channel = "queue", "Queue drainer stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.drain_once().await {
                        error!(channel = "queue", error = %err, "Drain pass failed");
                    }
                }
            }
        }
    }
}
