///
/// # Scheduler Configuration
///
/// Sizes the worker pool that backs `spawn`. Every field has a default, so an
/// empty file or no file at all is valid.
///
/// ## Example strand.toml
///
/// ```toml
/// core_workers = 4
/// max_workers = 2048
/// keep_alive_ms = 5000
/// stack_size = 262144
/// thread_name = "strand-worker"
/// ```
///
/// ## Sources
///
/// Lowest to highest precedence:
/// - built-in defaults
/// - the TOML file named by `STRAND_CONFIG`
/// - `STRAND_CORE_WORKERS`, `STRAND_MAX_WORKERS`, `STRAND_KEEP_ALIVE_MS`
///

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;

pub const CONFIG_PATH_VAR: &str = "STRAND_CONFIG";
pub const CORE_WORKERS_VAR: &str = "STRAND_CORE_WORKERS";
pub const MAX_WORKERS_VAR: &str = "STRAND_MAX_WORKERS";
pub const KEEP_ALIVE_VAR: &str = "STRAND_KEEP_ALIVE_MS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Workers kept alive while idle. Defaults to the number of CPUs.
    pub core_workers: usize,
    /// Upper bound on live workers. Tasks queue once it is reached.
    pub max_workers: usize,
    /// How long a worker above `core_workers` idles before exiting.
    pub keep_alive_ms: u64,
    /// Stack size for worker threads; the platform default when unset.
    pub stack_size: Option<usize>,
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            core_workers: available_parallelism(),
            max_workers: 10_000,
            keep_alive_ms: 10_000,
            stack_size: None,
            thread_name: "strand-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults, then the `STRAND_CONFIG` file, then variable overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SchedulerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_PATH_VAR) {
            Some(path) => Self::from_path(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(value) = lookup(CORE_WORKERS_VAR) {
            config.core_workers = parse_var(CORE_WORKERS_VAR, &value)?;
        }
        if let Some(value) = lookup(MAX_WORKERS_VAR) {
            config.max_workers = parse_var(MAX_WORKERS_VAR, &value)?;
        }
        if let Some(value) = lookup(KEEP_ALIVE_VAR) {
            config.keep_alive_ms = parse_var(KEEP_ALIVE_VAR, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid {
                key: "max_workers".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.core_workers > self.max_workers {
            return Err(ConfigError::Invalid {
                key: "core_workers".to_string(),
                reason: format!(
                    "{} exceeds max_workers ({})",
                    self.core_workers, self.max_workers
                ),
            });
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::Invalid {
                key: "thread_name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("'{}': {}", value, e),
    })
}

/// Number of CPUs, or 4 when it cannot be determined.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
