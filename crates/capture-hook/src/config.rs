//! Settings for one hook invocation.

use crate::error::HookResult;
use capture_config::{Config, Paths};
use capture_delivery::DeliveryConfig;
use capture_logger::LoggerConfig;
use capture_queue::QueueConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Processing entries untouched for this long are assumed abandoned by a
/// crashed drainer.
pub const DEFAULT_STUCK_AFTER: Duration = Duration::from_secs(10 * 60);

/// Drainer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainConfig {
    /// Retry count at which a retryable failure becomes terminal
    pub max_queue_retries: u32,

    /// Entries handled per pass
    pub batch_limit: usize,

    /// Delay between passes in watch mode
    pub interval: Duration,

    /// Age after which processing entries are returned to pending
    pub stuck_after: Duration,
}

/// Agent configuration bound to its filesystem layout.
#[derive(Debug, Clone)]
pub struct HookConfig {
    pub config: Config,
    pub paths: Paths,
}

impl HookConfig {
    pub fn new(config: Config, paths: Paths) -> Self {
        Self { config, paths }
    }

    /// Resolve paths (`--base-dir`, then `CAPTURE_HOME`, then the home
    /// directory) and load the configuration. A broken config file is
    /// ignored with a warning.
    pub fn load(base_dir: Option<PathBuf>) -> HookResult<Self> {
        let paths = Paths::resolve(base_dir)?;
        let config = Config::load_or_default(&paths);
        Ok(Self { config, paths })
    }

    pub fn logger_config(&self) -> LoggerConfig {
        capture_config::logger_config(&self.config, &self.paths)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            queue_dir: self.config.queue_dir(&self.paths),
            backoff_schedule: self.config.backoff_schedule(),
            max_queue_size: self.config.max_queue_size,
            max_age: self.config.max_queue_age(),
        }
    }

    /// Fails when the endpoint URL does not parse.
    pub fn delivery_config(&self) -> HookResult<DeliveryConfig> {
        Ok(DeliveryConfig::from_config(&self.config)?)
    }

    pub fn drain_config(&self) -> DrainConfig {
        DrainConfig {
            max_queue_retries: self.config.max_queue_retries,
            batch_limit: self.config.drain_batch_limit,
            interval: self.config.drain_interval(),
            stuck_after: DEFAULT_STUCK_AFTER,
        }
    }
}
