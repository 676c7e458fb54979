//! `capture-hook status`: a JSON health report.

use crate::config::HookConfig;
use capture_logger::LogChannel;
use capture_queue::{FsRetryQueue, QueueStatus, RetryQueue};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggerStatus {
    pub log_dir: PathBuf,
    pub writable: bool,
    /// Current size in bytes of each channel file that exists.
    pub files: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub version: String,
    pub base_dir: PathBuf,
    pub enabled: bool,
    pub endpoint_valid: bool,
    /// Configuration with the API token masked
    pub config: Value,
    pub logger: LoggerStatus,
    pub queue: QueueStatus,
}

/// Inspect configuration, log directory and queue without sending anything.
pub async fn status_report(settings: &HookConfig) -> StatusReport {
    let log_dir = settings.logger_config().log_dir;
    let writable = tokio::fs::create_dir_all(&log_dir).await.is_ok();

    let mut files = BTreeMap::new();
    for channel in LogChannel::ALL {
        if let Ok(meta) = tokio::fs::metadata(log_dir.join(channel.file_name())).await {
            files.insert(channel.file_name().to_string(), meta.len());
        }
    }

    let queue = FsRetryQueue::new(settings.queue_config());

    StatusReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        base_dir: settings.paths.base_dir().to_path_buf(),
        enabled: settings.config.enabled,
        endpoint_valid: settings.config.endpoint_url().is_ok(),
        config: settings.config.redacted(),
        logger: LoggerStatus {
            log_dir,
            writable,
            files,
        },
        queue: queue.status().await,
    }
}
