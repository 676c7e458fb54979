//! # Capture Logger
//!
//! Structured JSONL logging for the capture agent.
//!
//! Code logs through the standard `tracing` macros. [`install`] wires a
//! [`ChannelLayer`] into a subscriber that routes each record by level into
//! one of four files under the log directory:
//!
//! | level         | file          |
//! |---------------|---------------|
//! | debug/trace   | `debug.log`   |
//! | info          | `success.log` |
//! | warn/error    | `error.log`   |
//! | queue-tagged  | `queue.log`   |
//!
//! Info and debug events carrying `channel = "queue"` go to `queue.log`.
//!
//! Records are buffered in memory and flushed on a timer, when a channel
//! buffer reaches its threshold, and on [`LoggingHandle::shutdown`]. Files
//! larger than the configured size are rotated to `<name>.<unix-millis>`.
//!
//! ```rust,ignore
//! let logging = capture_logger::install(LoggerConfig {
//!     log_dir: paths.logs_dir(),
//!     ..Default::default()
//! });
//! tracing::info!(request_id = %id, "delivered");
//! logging.shutdown().await;
//! ```

mod entry;
mod hostname;
mod layer;
mod rotation;
mod sink;

pub use entry::{LogChannel, LogEntry, LogLevel};
pub use hostname::detect_hostname;
pub use layer::{ChannelLayer, CHANNEL_FIELD};
pub use sink::LogSink;

use std::path::PathBuf;
use std::time::Duration;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_BUFFER_THRESHOLD: usize = 100;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_FILES: usize = 5;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Directory holding the channel files.
    pub log_dir: PathBuf,

    /// Debug mode: enables debug-level records and echoes every line to stderr.
    pub debug: bool,

    /// Buffer lines in memory instead of writing each one immediately.
    pub buffered: bool,

    /// Period of the background flush task.
    pub flush_interval: Duration,

    /// Lines per channel that force an early flush.
    pub buffer_threshold: usize,

    /// Size above which a channel file is rotated.
    pub max_file_bytes: u64,

    /// Rotated files kept per channel.
    pub max_files: usize,

    /// Hostname override. Detected when `None`.
    pub hostname: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(".conversation-capture/logs"),
            debug: false,
            buffered: true,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            buffer_threshold: DEFAULT_BUFFER_THRESHOLD,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_files: DEFAULT_MAX_FILES,
            hostname: None,
        }
    }
}

/// Installed logger. Keep it alive for as long as events should be recorded.
pub struct LoggingHandle {
    sink: LogSink,
    _guard: DefaultGuard,
    timer_running: bool,
}

impl LoggingHandle {
    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    /// True when file output is disabled and records only reach stderr.
    pub fn is_degraded(&self) -> bool {
        !self.sink.is_enabled()
    }

    pub fn timer_running(&self) -> bool {
        self.timer_running
    }

    /// Flush every buffered line, then uninstall the subscriber.
    pub async fn shutdown(self) {
        self.sink.shutdown().await;
    }
}

/// Build the level filter: `RUST_LOG` wins, otherwise debug mode decides.
pub fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }))
}

/// Install the channel logger as the subscriber for the current thread.
///
/// The flush timer is started when called inside a Tokio runtime.
pub fn install(config: LoggerConfig) -> LoggingHandle {
    let filter = env_filter(config.debug);
    let sink = LogSink::new(config);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(ChannelLayer::new(sink.clone()));
    let guard = tracing::subscriber::set_default(subscriber);

    let timer_running = sink.spawn_flush_task();

    LoggingHandle {
        sink,
        _guard: guard,
        timer_running,
    }
}
