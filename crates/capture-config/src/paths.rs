//! File system paths for the capture agent.

use crate::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};

/// Environment variable overriding the base directory.
pub const HOME_ENV: &str = "CAPTURE_HOME";
/// Base directory name under the user's home.
const BASE_DIR_NAME: &str = ".conversation-capture";

/// Manages file system paths for the capture agent.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for agent files (~/.conversation-capture)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance.
    ///
    /// Uses `$CAPTURE_HOME` when set, otherwise `~/.conversation-capture`.
    pub fn new() -> ConfigResult<Self> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::with_base_dir(PathBuf::from(home)));
        }

        let home = dirs::home_dir()
            .ok_or_else(|| ConfigError::Path("Could not determine home directory".to_string()))?;

        Ok(Self::with_base_dir(home.join(BASE_DIR_NAME)))
    }

    /// Resolve paths, preferring an explicit base directory (e.g. `--base-dir`).
    pub fn resolve(base_override: Option<PathBuf>) -> ConfigResult<Self> {
        match base_override {
            Some(base) => Ok(Self::with_base_dir(base)),
            None => Self::new(),
        }
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.conversation-capture).
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the config file path (~/.conversation-capture/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the default logs directory (~/.conversation-capture/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the default queue directory (~/.conversation-capture/queue).
    pub fn queue_dir(&self) -> PathBuf {
        self.base_dir.join("queue")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_with_base_dir() {
        let base = PathBuf::from("/tmp/test-capture");
        let paths = Paths::with_base_dir(base.clone());

        assert_eq!(paths.base_dir(), base.as_path());
        assert_eq!(paths.config_file(), base.join("config.json"));
        assert_eq!(paths.logs_dir(), base.join("logs"));
        assert_eq!(paths.queue_dir(), base.join("queue"));
    }

    #[test]
    fn test_resolve_prefers_override() {
        let base = PathBuf::from("/tmp/override");
        let paths = Paths::resolve(Some(base.clone())).unwrap();

        assert_eq!(paths.base_dir(), base.as_path());
    }

    #[test]
    fn test_paths_clone() {
        let paths = Paths::with_base_dir(PathBuf::from("/test/clone"));
        let cloned = paths.clone();

        assert_eq!(paths.base_dir(), cloned.base_dir());
        assert_eq!(paths.config_file(), cloned.config_file());
    }
}
