//! Configuration, paths, and correlation identifiers for the capture agent.

mod config;
mod error;
pub mod ids;
mod logging;
mod paths;

pub use config::{env, Config};
pub use config::{
    DEFAULT_BACKOFF_SCHEDULE_SECS, DEFAULT_ENDPOINT_URL, DEFAULT_MAX_QUEUE_RETRIES,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, DEFAULT_TIMEOUT_MS,
};
pub use error::{ConfigError, ConfigResult};
pub use ids::TraceContext;
pub use logging::{init_logging, logger_config};
pub use paths::{Paths, HOME_ENV};
