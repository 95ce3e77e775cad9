use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::queue::RetryPolicy;

const DEFAULTS_TOML: &str = include_str!("config_defaults.toml");

const MAX_RETRY_DELAY_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_RETENTION_DAYS: u64 = 3650;
const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub retention: Duration,
    pub retry_tick: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    retry: RawRetry,
    #[serde(default)]
    connectivity: RawConnectivity,
    #[serde(default)]
    queue: RawQueue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRetry {
    base_delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConnectivity {
    poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawQueue {
    retention_days: Option<u64>,
    retry_tick_secs: Option<u64>,
}

impl SyncConfig {
    /// Built-in defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_toml(DEFAULTS_TOML, &Self::zero())?;
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
                path: path.to_path_buf(),
                source: err,
            })?;
            config = Self::from_toml(&raw, &config)?;
        }
        Ok(config)
    }

    fn zero() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: Duration::ZERO,
            retention: Duration::ZERO,
            retry_tick: Duration::ZERO,
        }
    }

    pub(crate) fn from_toml(raw: &str, base: &SyncConfig) -> Result<Self, ConfigError> {
        let file: RawConfig = toml::from_str(raw)?;
        let secs = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_secs).unwrap_or(fallback)
        };
        let config = Self {
            retry: RetryPolicy {
                base_delay: secs(file.retry.base_delay_secs, base.retry.base_delay),
                max_delay: secs(file.retry.max_delay_secs, base.retry.max_delay),
                max_attempts: file.retry.max_attempts.unwrap_or(base.retry.max_attempts),
            },
            poll_interval: secs(file.connectivity.poll_interval_secs, base.poll_interval),
            retention: file
                .queue
                .retention_days
                .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60)))
                .unwrap_or(base.retention),
            retry_tick: secs(file.queue.retry_tick_secs, base.retry_tick),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid(
                "retry.base_delay_secs must not exceed retry.max_delay_secs".to_string(),
            ));
        }
        if self.retry.max_delay > Duration::from_secs(MAX_RETRY_DELAY_SECS) {
            return Err(ConfigError::Invalid(format!(
                "retry.max_delay_secs must not exceed {}",
                MAX_RETRY_DELAY_SECS
            )));
        }
        if self.retention > Duration::from_secs(MAX_RETENTION_DAYS * 24 * 60 * 60) {
            return Err(ConfigError::Invalid(format!(
                "queue.retention_days must not exceed {}",
                MAX_RETENTION_DAYS
            )));
        }
        if self.poll_interval.is_zero() || self.retry_tick.is_zero() {
            return Err(ConfigError::Invalid(
                "connectivity.poll_interval_secs and queue.retry_tick_secs must be positive"
                    .to_string(),
            ));
        }
        let max_interval = Duration::from_secs(MAX_INTERVAL_SECS);
        if self.poll_interval > max_interval || self.retry_tick > max_interval {
            return Err(ConfigError::Invalid(format!(
                "connectivity.poll_interval_secs and queue.retry_tick_secs must not exceed {}",
                MAX_INTERVAL_SECS
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Toml(err) => write!(f, "invalid config TOML: {}", err),
            ConfigError::Invalid(message) => write!(f, "invalid config: {}", message),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Toml(value)
    }
}
