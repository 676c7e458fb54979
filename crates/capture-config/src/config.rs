//! Configuration management for the capture agent.
//!
//! Values are layered: built-in defaults, then `<base>/config.json` when it
//! exists, then `CAPTURE_*` environment variables. Invalid values never abort
//! a capture; they fall back to the default and leave a warning in
//! [`Config::warnings`] for the caller to log once logging is up.

use crate::{ConfigError, ConfigResult, Paths};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_ENDPOINT_URL: &str = "http://localhost:3000/api/capture";
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_LOG_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_LOG_MAX_FILES: usize = 5;
pub const DEFAULT_LOG_FLUSH_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_LOG_BUFFER_LINES: usize = 100;
pub const DEFAULT_BACKOFF_SCHEDULE_SECS: [u64; 5] = [60, 300, 900, 3_600, 7_200];
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1_000;
pub const DEFAULT_MAX_QUEUE_AGE_HOURS: u64 = 7 * 24;
pub const DEFAULT_MAX_QUEUE_RETRIES: u32 = 5;
pub const DEFAULT_DRAIN_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_DRAIN_BATCH_LIMIT: usize = 100;
pub const DEFAULT_MAX_FIELD_BYTES: usize = 100_000;

const REDACTED: &str = "***";

/// Environment variable names.
pub mod env {
    pub const ENDPOINT_URL: &str = "CAPTURE_ENDPOINT_URL";
    pub const API_TOKEN: &str = "CAPTURE_API_TOKEN";
    pub const TIMEOUT_MS: &str = "CAPTURE_TIMEOUT_MS";
    pub const MAX_RETRIES: &str = "CAPTURE_MAX_RETRIES";
    pub const RETRY_DELAY_MS: &str = "CAPTURE_RETRY_DELAY_MS";
    pub const DEBUG: &str = "CAPTURE_DEBUG";
    pub const ENABLED: &str = "CAPTURE_ENABLED";
    pub const LOG_DIR: &str = "CAPTURE_LOG_DIR";
    pub const QUEUE_DIR: &str = "CAPTURE_QUEUE_DIR";
    pub const LOG_MAX_BYTES: &str = "CAPTURE_LOG_MAX_BYTES";
    pub const LOG_MAX_FILES: &str = "CAPTURE_LOG_MAX_FILES";
    pub const LOG_BUFFERED: &str = "CAPTURE_LOG_BUFFERED";
    pub const LOG_FLUSH_INTERVAL_MS: &str = "CAPTURE_LOG_FLUSH_INTERVAL_MS";
    pub const LOG_BUFFER_LINES: &str = "CAPTURE_LOG_BUFFER_LINES";
    pub const BACKOFF_SCHEDULE_SECS: &str = "CAPTURE_BACKOFF_SCHEDULE_SECS";
    pub const MAX_QUEUE_SIZE: &str = "CAPTURE_MAX_QUEUE_SIZE";
    pub const MAX_QUEUE_AGE_HOURS: &str = "CAPTURE_MAX_QUEUE_AGE_HOURS";
    pub const MAX_QUEUE_RETRIES: &str = "CAPTURE_MAX_QUEUE_RETRIES";
    pub const DRAIN_INTERVAL_SECS: &str = "CAPTURE_DRAIN_INTERVAL_SECS";
    pub const DRAIN_BATCH_LIMIT: &str = "CAPTURE_DRAIN_BATCH_LIMIT";
    pub const MAX_FIELD_BYTES: &str = "CAPTURE_MAX_FIELD_BYTES";
}

/// Main capture agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collection endpoint receiving captured events.
    pub endpoint_url: String,
    /// Bearer token sent with every delivery.
    pub api_token: Option<String>,
    /// Hard per-request timeout.
    pub timeout_ms: u64,
    /// Immediate attempts per delivery.
    pub max_retries: u32,
    /// Sleep between immediate attempts.
    pub retry_delay_ms: u64,
    pub debug: bool,
    /// Master switch. When false, captures exit immediately.
    pub enabled: bool,
    /// Log directory override (defaults to `<base>/logs`).
    pub log_dir: Option<PathBuf>,
    /// Queue directory override (defaults to `<base>/queue`).
    pub queue_dir: Option<PathBuf>,
    pub log_max_bytes: u64,
    pub log_max_files: usize,
    pub log_buffered: bool,
    pub log_flush_interval_ms: u64,
    pub log_buffer_lines: usize,
    /// Delay before retry N, in seconds. The last value repeats.
    pub backoff_schedule_secs: Vec<u64>,
    pub max_queue_size: usize,
    /// Entries older than this are swept to `failed/`.
    pub max_queue_age_hours: u64,
    /// Drain attempts before an entry is given up on.
    pub max_queue_retries: u32,
    pub drain_interval_secs: u64,
    pub drain_batch_limit: usize,
    /// Free-text payload fields longer than this are truncated.
    pub max_field_bytes: usize,

    /// Problems found while loading, reported once logging is available.
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            api_token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            debug: false,
            enabled: true,
            log_dir: None,
            queue_dir: None,
            log_max_bytes: DEFAULT_LOG_MAX_BYTES,
            log_max_files: DEFAULT_LOG_MAX_FILES,
            log_buffered: true,
            log_flush_interval_ms: DEFAULT_LOG_FLUSH_INTERVAL_MS,
            log_buffer_lines: DEFAULT_LOG_BUFFER_LINES,
            backoff_schedule_secs: DEFAULT_BACKOFF_SCHEDULE_SECS.to_vec(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_queue_age_hours: DEFAULT_MAX_QUEUE_AGE_HOURS,
            max_queue_retries: DEFAULT_MAX_QUEUE_RETRIES,
            drain_interval_secs: DEFAULT_DRAIN_INTERVAL_SECS,
            drain_batch_limit: DEFAULT_DRAIN_BATCH_LIMIT,
            max_field_bytes: DEFAULT_MAX_FIELD_BYTES,
            warnings: Vec::new(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file (if any), then the environment.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Like [`Config::load`], but an unreadable config file only produces a
    /// warning and the file is ignored.
    pub fn load_or_default(paths: &Paths) -> Self {
        match Self::load(paths) {
            Ok(config) => config,
            Err(err) => {
                let mut config = Self::new();
                config.warnings.insert(
                    0,
                    format!(
                        "ignoring config file {}: {}",
                        paths.config_file().display(),
                        err
                    ),
                );
                config
            }
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn load_from_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Override values from `lookup`, then reset anything out of range.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut overrides = EnvOverrides {
            lookup: &lookup,
            warnings: Vec::new(),
        };

        if let Some(url) = overrides.raw(env::ENDPOINT_URL) {
            self.endpoint_url = url;
        }
        if let Some(token) = overrides.raw(env::API_TOKEN) {
            self.api_token = Some(token);
        }
        overrides.parsed(env::TIMEOUT_MS, &mut self.timeout_ms);
        overrides.parsed(env::MAX_RETRIES, &mut self.max_retries);
        overrides.parsed(env::RETRY_DELAY_MS, &mut self.retry_delay_ms);
        overrides.flag(env::DEBUG, &mut self.debug);
        overrides.flag(env::ENABLED, &mut self.enabled);
        if let Some(dir) = overrides.raw(env::LOG_DIR) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = overrides.raw(env::QUEUE_DIR) {
            self.queue_dir = Some(PathBuf::from(dir));
        }
        overrides.parsed(env::LOG_MAX_BYTES, &mut self.log_max_bytes);
        overrides.parsed(env::LOG_MAX_FILES, &mut self.log_max_files);
        overrides.flag(env::LOG_BUFFERED, &mut self.log_buffered);
        overrides.parsed(env::LOG_FLUSH_INTERVAL_MS, &mut self.log_flush_interval_ms);
        overrides.parsed(env::LOG_BUFFER_LINES, &mut self.log_buffer_lines);
        overrides.schedule(env::BACKOFF_SCHEDULE_SECS, &mut self.backoff_schedule_secs);
        overrides.parsed(env::MAX_QUEUE_SIZE, &mut self.max_queue_size);
        overrides.parsed(env::MAX_QUEUE_AGE_HOURS, &mut self.max_queue_age_hours);
        overrides.parsed(env::MAX_QUEUE_RETRIES, &mut self.max_queue_retries);
        overrides.parsed(env::DRAIN_INTERVAL_SECS, &mut self.drain_interval_secs);
        overrides.parsed(env::DRAIN_BATCH_LIMIT, &mut self.drain_batch_limit);
        overrides.parsed(env::MAX_FIELD_BYTES, &mut self.max_field_bytes);

        self.warnings.extend(overrides.warnings);
        self.sanitize();
    }

    /// Reset zero values that would disable a mechanism outright.
    fn sanitize(&mut self) {
        let warnings = &mut self.warnings;
        let mut reset = |name: &str, is_zero: bool| {
            if is_zero {
                warnings.push(format!("{name} must be greater than zero; using default"));
            }
            is_zero
        };

        if reset("timeout_ms", self.timeout_ms == 0) {
            self.timeout_ms = DEFAULT_TIMEOUT_MS;
        }
        if reset("max_retries", self.max_retries == 0) {
            self.max_retries = DEFAULT_MAX_RETRIES;
        }
        if reset("log_max_bytes", self.log_max_bytes == 0) {
            self.log_max_bytes = DEFAULT_LOG_MAX_BYTES;
        }
        if reset("log_flush_interval_ms", self.log_flush_interval_ms == 0) {
            self.log_flush_interval_ms = DEFAULT_LOG_FLUSH_INTERVAL_MS;
        }
        if reset("log_buffer_lines", self.log_buffer_lines == 0) {
            self.log_buffer_lines = DEFAULT_LOG_BUFFER_LINES;
        }
        if reset("backoff_schedule_secs", self.backoff_schedule_secs.is_empty()) {
            self.backoff_schedule_secs = DEFAULT_BACKOFF_SCHEDULE_SECS.to_vec();
        }
        if reset("max_queue_size", self.max_queue_size == 0) {
            self.max_queue_size = DEFAULT_MAX_QUEUE_SIZE;
        }
        if reset("max_queue_age_hours", self.max_queue_age_hours == 0) {
            self.max_queue_age_hours = DEFAULT_MAX_QUEUE_AGE_HOURS;
        }
        if reset("drain_interval_secs", self.drain_interval_secs == 0) {
            self.drain_interval_secs = DEFAULT_DRAIN_INTERVAL_SECS;
        }
        if reset("drain_batch_limit", self.drain_batch_limit == 0) {
            self.drain_batch_limit = DEFAULT_DRAIN_BATCH_LIMIT;
        }
        if reset("max_field_bytes", self.max_field_bytes == 0) {
            self.max_field_bytes = DEFAULT_MAX_FIELD_BYTES;
        }
    }

    /// Get the endpoint as a parsed URL. Only http and https are accepted.
    pub fn endpoint_url(&self) -> ConfigResult<Url> {
        let url = Url::parse(&self.endpoint_url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::Config(format!(
                "unsupported endpoint scheme '{other}'"
            ))),
        }
    }

    pub fn log_dir(&self, paths: &Paths) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| paths.logs_dir())
    }

    pub fn queue_dir(&self, paths: &Paths) -> PathBuf {
        self.queue_dir.clone().unwrap_or_else(|| paths.queue_dir())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn log_flush_interval(&self) -> Duration {
        Duration::from_millis(self.log_flush_interval_ms)
    }

    pub fn backoff_schedule(&self) -> Vec<Duration> {
        self.backoff_schedule_secs
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }

    pub fn max_queue_age(&self) -> Duration {
        Duration::from_secs(self.max_queue_age_hours.saturating_mul(3_600))
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    /// Serializable view with the API token masked.
    pub fn redacted(&self) -> Value {
        let mut view = self.clone();
        if view.api_token.is_some() {
            view.api_token = Some(REDACTED.to_string());
        }
        serde_json::to_value(&view).unwrap_or(Value::Null)
    }
}

struct EnvOverrides<'a, F> {
    lookup: &'a F,
    warnings: Vec<String>,
}

impl<F> EnvOverrides<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parsed<T: FromStr>(&mut self, name: &str, target: &mut T) {
        let Some(raw) = self.raw(name) else {
            return;
        };
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => self
                .warnings
                .push(format!("invalid value '{raw}' for {name}; using default")),
        }
    }

    fn flag(&mut self, name: &str, target: &mut bool) {
        let Some(raw) = self.raw(name) else {
            return;
        };
        match parse_flag(&raw) {
            Some(value) => *target = value,
            None => self
                .warnings
                .push(format!("invalid boolean '{raw}' for {name}; using default")),
        }
    }

    fn schedule(&mut self, name: &str, target: &mut Vec<u64>) {
        let Some(raw) = self.raw(name) else {
            return;
        };
        let parsed: Result<Vec<u64>, _> = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse::<u64>)
            .collect();
        match parsed {
            Ok(schedule) if !schedule.is_empty() => *target = schedule,
            _ => self
                .warnings
                .push(format!("invalid schedule '{raw}' for {name}; using default")),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
