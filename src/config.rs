//! Tuning configuration for the evaluation engine.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// Result stream: bounded so a slow sink applies backpressure to scoring
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

// Configurations (algorithm x split) trained and scored at once
pub const DEFAULT_MAX_CONCURRENT_CONFIGS: usize = 2;

// Rank-biased precision persistence
pub const DEFAULT_RBP_PATIENCE: f64 = 0.85;

// Environment overrides
pub const ENV_NUM_THREADS: &str = "RECBENCH_NUM_THREADS";
pub const ENV_MAX_CONFIGS: &str = "RECBENCH_MAX_CONFIGS";
pub const ENV_QUERY_TIMEOUT: &str = "RECBENCH_QUERY_TIMEOUT";
pub const ENV_ORDERED_OUTPUT: &str = "RECBENCH_ORDERED_OUTPUT";

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Total scoring (and training) calls in flight across the whole run
    pub max_concurrency: usize,
    /// Configurations processed at the same time
    pub max_concurrent_configs: usize,
    /// Per-query scoring timeout in seconds
    pub query_timeout_secs: Option<f64>,
    /// Emit result rows in query order instead of completion order
    pub ordered_output: bool,
    /// Capacity of the result channel feeding the sink
    pub channel_capacity: usize,
    /// Rayon threads for metric computation (0 = rayon default)
    pub metric_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: available_parallelism(),
            max_concurrent_configs: DEFAULT_MAX_CONCURRENT_CONFIGS,
            query_timeout_secs: None,
            ordered_output: false,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            metric_threads: 0,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply `RECBENCH_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_NUM_THREADS) {
            self.max_concurrency = parse_env(ENV_NUM_THREADS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_CONFIGS) {
            self.max_concurrent_configs = parse_env(ENV_MAX_CONFIGS, &v)?;
        }
        if let Some(v) = lookup(ENV_QUERY_TIMEOUT) {
            self.query_timeout_secs = Some(parse_env(ENV_QUERY_TIMEOUT, &v)?);
        }
        if let Some(v) = lookup(ENV_ORDERED_OUTPUT) {
            self.ordered_output = matches!(v.trim(), "1" | "true" | "yes");
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".into()));
        }
        if self.max_concurrent_configs == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_configs must be at least 1".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be at least 1".into()));
        }
        if let Some(t) = self.query_timeout_secs {
            if !(t.is_finite() && t > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "query_timeout_secs must be positive, got {}",
                    t
                )));
            }
            if Duration::try_from_secs_f64(t).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "query_timeout_secs out of range: {}",
                    t
                )));
            }
        }
        Ok(())
    }

    /// The per-query timeout, or `None` if unset or not representable.
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn max_concurrent_configs(mut self, n: usize) -> Self {
        self.max_concurrent_configs = n;
        self
    }

    pub fn query_timeout_secs(mut self, secs: f64) -> Self {
        self.query_timeout_secs = Some(secs);
        self
    }

    pub fn ordered_output(mut self, ordered: bool) -> Self {
        self.ordered_output = ordered;
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{}: cannot parse '{}'", key, value)))
}
