//! Shared fixtures: an isolated base directory, config pointing at a mock
//! endpoint, and readers for log and queue files.

#![allow(dead_code)]

use capture_config::{Config, Paths};
use capture_hook::{HookConfig, HookInput};
use capture_queue::{FsRetryQueue, QueueEntry};
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub struct Harness {
    pub dir: TempDir,
    pub settings: HookConfig,
}

impl Harness {
    pub fn new(endpoint: &str) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let config = Config {
            endpoint_url: endpoint.to_string(),
            api_token: Some("test-token".into()),
            timeout_ms: 2_000,
            retry_delay_ms: 1,
            ..Config::default()
        };
        let settings = HookConfig::new(config, Paths::with_base_dir(dir.path().to_path_buf()));
        Self { dir, settings }
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.settings.config
    }

    pub fn logs_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("logs")
    }

    pub fn queue_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("queue")
    }

    /// Parsed lines of one log file, empty when it does not exist.
    pub fn log(&self, file: &str) -> Vec<Value> {
        read_jsonl(&self.logs_dir().join(file))
    }

    pub fn queue(&self) -> FsRetryQueue {
        FsRetryQueue::new(self.settings.queue_config())
    }

    pub fn entries(&self, state: &str) -> Vec<QueueEntry> {
        let dir = self.queue_dir().join(state);
        let mut entries: Vec<QueueEntry> = files_in(&dir)
            .into_iter()
            .map(|name| {
                let raw = std::fs::read(dir.join(name)).expect("failed to read entry");
                serde_json::from_slice(&raw).expect("failed to parse entry")
            })
            .collect();
        entries.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        entries
    }
}

pub fn input(event: &str) -> HookInput {
    HookInput {
        event: Some(event.to_string()),
        session_id: Some("session-42".into()),
        project_dir: Some("/work/app".into()),
        ..HookInput::default()
    }
}

pub fn read_jsonl(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("log line is not JSON"))
        .collect()
}

pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .filter(|name| !name.starts_with('.'))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// An endpoint URL on a port nothing listens on.
pub async fn refused_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/api/capture")
}
