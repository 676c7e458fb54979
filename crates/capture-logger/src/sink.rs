//! Buffered, multi-channel JSONL sink.
//!
//! Lines are buffered per channel and written by a periodic flush task, by
//! the overflow threshold, or by an explicit [`LogSink::shutdown`]. Writes are
//! append-only, so several capture processes can share one log directory.

use crate::entry::{LogChannel, LogEntry, LogLevel};
use crate::hostname::detect_hostname;
use crate::rotation::rotate_if_needed;
use crate::LoggerConfig;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Shortest flush period accepted by the timer.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Cloneable handle to the shared sink state.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    config: LoggerConfig,
    hostname: String,
    /// Set when the log directory could not be created.
    disabled_reason: Option<String>,
    buffers: Mutex<HashMap<LogChannel, Vec<String>>>,
    /// Serializes append + rotate so a rotation never splits a batch.
    write_lock: Mutex<()>,
    /// Overflow flushes handed to the blocking pool.
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl LogSink {
    /// Create a sink writing under `config.log_dir`.
    ///
    /// Never fails: if the directory cannot be created the sink disables file
    /// output and echoes every record to stderr instead.
    pub fn new(config: LoggerConfig) -> Self {
        let disabled_reason = match fs::create_dir_all(&config.log_dir) {
            Ok(()) => None,
            Err(err) => {
                let reason = format!(
                    "cannot create log directory {}: {}",
                    config.log_dir.display(),
                    err
                );
                eprintln!("[capture-logger] {reason}; falling back to console output");
                Some(reason)
            }
        };

        let hostname = config.hostname.clone().unwrap_or_else(detect_hostname);

        Self {
            inner: Arc::new(SinkInner {
                config,
                hostname,
                disabled_reason,
                buffers: Mutex::new(HashMap::new()),
                write_lock: Mutex::new(()),
                in_flight: Mutex::new(Vec::new()),
                flush_task: Mutex::new(None),
            }),
        }
    }

    /// Record a message on the channel selected by `level`.
    pub fn log(&self, level: LogLevel, message: &str, context: Map<String, Value>) {
        let entry = LogEntry::new(level, message, context, self.inner.hostname.clone());
        self.record(entry);
    }

    /// Record a prebuilt entry.
    pub fn record(&self, entry: LogEntry) {
        let Some(line) = entry.to_json_line() else {
            return;
        };

        let inner = &self.inner;
        if entry.level == LogLevel::Error || inner.config.debug || inner.disabled_reason.is_some() {
            eprintln!("{line}");
        }
        if inner.disabled_reason.is_some() {
            return;
        }

        let channel = entry.level.channel();
        if !inner.config.buffered {
            inner.write_lines(channel, vec![line]);
            return;
        }

        let overflow = {
            let mut buffers = inner.buffers.lock();
            let buffer = buffers.entry(channel).or_default();
            buffer.push(line);
            if buffer.len() >= inner.config.buffer_threshold.max(1) {
                Some(std::mem::take(buffer))
            } else {
                None
            }
        };

        if let Some(lines) = overflow {
            self.flush_overflow(channel, lines);
        }
    }

    fn flush_overflow(&self, channel: LogChannel, lines: Vec<String>) {
        match Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                let task = handle.spawn_blocking(move || inner.write_lines(channel, lines));
                let mut in_flight = self.inner.in_flight.lock();
                in_flight.retain(|task| !task.is_finished());
                in_flight.push(task);
            }
            Err(_) => self.inner.write_lines(channel, lines),
        }
    }

    /// Flush every buffer on the calling thread.
    pub fn flush_blocking(&self) {
        self.inner.flush_all();
    }

    /// Flush every buffer on Tokio's blocking pool.
    pub async fn flush(&self) {
        let inner = Arc::clone(&self.inner);
        if let Err(err) = tokio::task::spawn_blocking(move || inner.flush_all()).await {
            eprintln!("[capture-logger] flush task failed: {err}");
        }
    }

    /// Start the periodic flush timer on the current runtime.
    ///
    /// Returns false when buffering is off, the sink is disabled, or no
    /// runtime is available.
    pub fn spawn_flush_task(&self) -> bool {
        if !self.inner.config.buffered || self.inner.disabled_reason.is_some() {
            return false;
        }
        let Ok(handle) = Handle::try_current() else {
            return false;
        };

        let sink = self.clone();
        let period = self.inner.config.flush_interval.max(MIN_FLUSH_INTERVAL);
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sink.flush().await;
            }
        });

        if let Some(previous) = self.inner.flush_task.lock().replace(task) {
            previous.abort();
        }
        true
    }

    /// Stop the timer, wait for overflow writes, and flush what is left.
    pub async fn shutdown(&self) {
        if let Some(task) = self.inner.flush_task.lock().take() {
            task.abort();
        }

        let pending = std::mem::take(&mut *self.inner.in_flight.lock());
        for task in pending {
            let _ = task.await;
        }

        self.flush_blocking();
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.disabled_reason.is_none()
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        self.inner.disabled_reason.as_deref()
    }

    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.inner.config
    }

    /// Path of the active file for `channel`.
    pub fn channel_path(&self, channel: LogChannel) -> PathBuf {
        self.inner.channel_path(channel)
    }

    /// Number of lines waiting in memory for `channel`.
    pub fn buffered_len(&self, channel: LogChannel) -> usize {
        self.inner
            .buffers
            .lock()
            .get(&channel)
            .map_or(0, Vec::len)
    }
}

impl SinkInner {
    fn channel_path(&self, channel: LogChannel) -> PathBuf {
        self.config.log_dir.join(channel.file_name())
    }

    fn flush_all(&self) {
        for (channel, lines) in self.take_buffers() {
            self.write_lines(channel, lines);
        }
    }

    fn take_buffers(&self) -> Vec<(LogChannel, Vec<String>)> {
        let mut buffers = self.buffers.lock();
        let mut drained: Vec<_> = buffers
            .iter_mut()
            .filter(|(_, lines)| !lines.is_empty())
            .map(|(channel, lines)| (*channel, std::mem::take(lines)))
            .collect();
        drained.sort_by_key(|(channel, _)| *channel);
        drained
    }

    fn write_lines(&self, channel: LogChannel, lines: Vec<String>) {
        if lines.is_empty() || self.disabled_reason.is_some() {
            return;
        }

        let _guard = self.write_lock.lock();
        let path = self.channel_path(channel);

        if let Err(err) = append_lines(&path, &lines) {
            eprintln!(
                "[capture-logger] failed to write {} lines to {}: {}",
                lines.len(),
                path.display(),
                err
            );
            return;
        }

        let rotated = rotate_if_needed(&path, self.config.max_file_bytes, self.config.max_files);
        if let Err(err) = rotated {
            eprintln!("[capture-logger] failed to rotate {}: {}", path.display(), err);
        }
    }
}

fn append_lines(path: &Path, lines: &[String]) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::with_capacity(8192, file);
    for line in lines {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::rotated_siblings;
    use serde_json::json;
    use tempfile::tempdir;

    fn test_config(dir: &Path) -> LoggerConfig {
        LoggerConfig {
            log_dir: dir.join("logs"),
            hostname: Some("test-host".into()),
            ..Default::default()
        }
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn context(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_buffered_lines_stay_in_memory_until_flush() {
        let dir = tempdir().unwrap();
        let sink = LogSink::new(test_config(dir.path()));

        sink.log(LogLevel::Info, "delivered", context(&[("status", json!(200))]));

        assert_eq!(sink.buffered_len(LogChannel::Success), 1);
        assert!(!sink.channel_path(LogChannel::Success).exists());

        sink.flush_blocking();

        let lines = read_lines(&sink.channel_path(LogChannel::Success));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["message"], "delivered");
        assert_eq!(lines[0]["status"], 200);
        assert_eq!(lines[0]["hostname"], "test-host");
        assert_eq!(sink.buffered_len(LogChannel::Success), 0);
    }

    #[test]
    fn test_levels_land_in_separate_files() {
        let dir = tempdir().unwrap();
        let sink = LogSink::new(test_config(dir.path()));

        sink.log(LogLevel::Debug, "d", Map::new());
        sink.log(LogLevel::Info, "i", Map::new());
        sink.log(LogLevel::Warn, "w", Map::new());
        sink.log(LogLevel::Error, "e", Map::new());
        sink.log(LogLevel::Queue, "q", Map::new());
        sink.flush_blocking();

        assert_eq!(read_lines(&sink.channel_path(LogChannel::Debug)).len(), 1);
        assert_eq!(read_lines(&sink.channel_path(LogChannel::Success)).len(), 1);
        assert_eq!(read_lines(&sink.channel_path(LogChannel::Error)).len(), 2);
        assert_eq!(read_lines(&sink.channel_path(LogChannel::Queue)).len(), 1);
    }

    #[test]
    fn test_unbuffered_mode_writes_immediately() {
        let dir = tempdir().unwrap();
        let sink = LogSink::new(LoggerConfig {
            buffered: false,
            ..test_config(dir.path())
        });

        sink.log(LogLevel::Queue, "enqueued", Map::new());

        assert_eq!(read_lines(&sink.channel_path(LogChannel::Queue)).len(), 1);
        assert_eq!(sink.buffered_len(LogChannel::Queue), 0);
    }

    #[test]
    fn test_threshold_forces_flush_without_runtime() {
        let dir = tempdir().unwrap();
        let sink = LogSink::new(LoggerConfig {
            buffer_threshold: 3,
            ..test_config(dir.path())
        });

        sink.log(LogLevel::Info, "1", Map::new());
        sink.log(LogLevel::Info, "2", Map::new());
        assert!(!sink.channel_path(LogChannel::Success).exists());

        sink.log(LogLevel::Info, "3", Map::new());

        assert_eq!(read_lines(&sink.channel_path(LogChannel::Success)).len(), 3);
        assert_eq!(sink.buffered_len(LogChannel::Success), 0);
    }

    #[tokio::test]
    async fn test_threshold_flush_on_runtime_completes_before_shutdown_returns() {
        let dir = tempdir().unwrap();
        let sink = LogSink::new(LoggerConfig {
            buffer_threshold: 2,
            ..test_config(dir.path())
        });

        for i in 0..5 {
            sink.log(LogLevel::Warn, &format!("w{i}"), Map::new());
        }
        sink.shutdown().await;

        assert_eq!(read_lines(&sink.channel_path(LogChannel::Error)).len(), 5);
    }

    #[tokio::test]
    async fn test_flush_timer_writes_buffered_lines() {
        let dir = tempdir().unwrap();
        let sink = LogSink::new(LoggerConfig {
            flush_interval: Duration::from_millis(20),
            ..test_config(dir.path())
        });
        assert!(sink.spawn_flush_task());

        sink.log(LogLevel::Info, "tick", Map::new());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(read_lines(&sink.channel_path(LogChannel::Success)).len(), 1);
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_every_channel() {
        let dir = tempdir().unwrap();
        let sink = LogSink::new(test_config(dir.path()));
        sink.spawn_flush_task();

        sink.log(LogLevel::Info, "a", Map::new());
        sink.log(LogLevel::Queue, "b", Map::new());
        sink.shutdown().await;

        assert_eq!(read_lines(&sink.channel_path(LogChannel::Success)).len(), 1);
        assert_eq!(read_lines(&sink.channel_path(LogChannel::Queue)).len(), 1);
    }

    #[test]
    fn test_oversized_channel_is_rotated_after_flush() {
        let dir = tempdir().unwrap();
        let sink = LogSink::new(LoggerConfig {
            max_file_bytes: 64,
            max_files: 2,
            ..test_config(dir.path())
        });
        let path = sink.channel_path(LogChannel::Success);

        for round in 0..4 {
            sink.log(
                LogLevel::Info,
                "a message long enough to cross the tiny rotation threshold",
                context(&[("round", json!(round))]),
            );
            sink.flush_blocking();
        }

        assert!(rotated_siblings(&path).unwrap().len() <= 2);
        assert!(!rotated_siblings(&path).unwrap().is_empty());
    }

    #[test]
    fn test_unwritable_directory_disables_file_output() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();

        let sink = LogSink::new(LoggerConfig {
            log_dir: blocker.join("logs"),
            ..Default::default()
        });

        assert!(!sink.is_enabled());
        assert!(sink.disabled_reason().unwrap().contains("cannot create log directory"));

        // Logging still never panics or buffers.
        sink.log(LogLevel::Error, "still fine", Map::new());
        assert_eq!(sink.buffered_len(LogChannel::Error), 0);
        assert!(!sink.spawn_flush_task());
    }
}
