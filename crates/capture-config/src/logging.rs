//! Logging initialization for the capture agent.
//!
//! Maps [`Config`] onto the channel logger and installs it for the current
//! thread. Configuration warnings collected before logging existed are
//! replayed here.

use crate::{Config, Paths};
use capture_logger::{LoggerConfig, LoggingHandle};

/// Logger settings derived from the agent configuration.
pub fn logger_config(config: &Config, paths: &Paths) -> LoggerConfig {
    LoggerConfig {
        log_dir: config.log_dir(paths),
        debug: config.debug,
        buffered: config.log_buffered,
        flush_interval: config.log_flush_interval(),
        buffer_threshold: config.log_buffer_lines,
        max_file_bytes: config.log_max_bytes,
        max_files: config.log_max_files,
        hostname: None,
    }
}

/// Initialize the logging system.
///
/// ```ignore
/// let logging = init_logging(&config, &paths);
/// tracing::info!("capture started");
/// logging.shutdown().await;
/// ```
pub fn init_logging(config: &Config, paths: &Paths) -> LoggingHandle {
    let handle = capture_logger::install(logger_config(config, paths));

    for warning in &config.warnings {
        tracing::warn!(warning = %warning, "configuration value ignored");
    }

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_logger_config_follows_agent_config() {
        let paths = Paths::with_base_dir(PathBuf::from("/base"));
        let config = Config {
            debug: true,
            log_buffered: false,
            log_flush_interval_ms: 500,
            log_buffer_lines: 7,
            log_max_bytes: 1_024,
            log_max_files: 2,
            ..Config::default()
        };

        let logger = logger_config(&config, &paths);

        assert_eq!(logger.log_dir, PathBuf::from("/base/logs"));
        assert!(logger.debug);
        assert!(!logger.buffered);
        assert_eq!(logger.flush_interval, Duration::from_millis(500));
        assert_eq!(logger.buffer_threshold, 7);
        assert_eq!(logger.max_file_bytes, 1_024);
        assert_eq!(logger.max_files, 2);
    }

    #[tokio::test]
    async fn test_init_logging_replays_config_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let mut config = Config::default();
        config.warnings.push("invalid value 'x' for CAPTURE_TIMEOUT_MS; using default".into());

        let logging = init_logging(&config, &paths);
        let error_log = logging.sink().channel_path(capture_logger::LogChannel::Error);
        logging.shutdown().await;

        let content = std::fs::read_to_string(error_log).unwrap();
        assert!(content.contains("CAPTURE_TIMEOUT_MS"));
    }
}
