//! Error types for the evaluation engine.
//!
//! Errors are scoped to the smallest unit they can invalidate: a metric
//! value, a query, a configuration, or (only for an invalid run
//! configuration) the whole run.

use thiserror::Error;

/// Errors raised while building or slicing an [`ItemList`](crate::items::ItemList).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ItemListError {
    /// The list could not be constructed or the requested view is undefined
    #[error("invalid item list: {0}")]
    InvalidState(String),
    /// A ranking operation was requested on an unordered list
    #[error("item list is unordered: {0}")]
    Unordered(String),
}

/// Errors raised by a [`Scorer`](crate::scorer::Scorer).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScorerError {
    /// Scoring was attempted before the model was trained
    #[error("scorer '{0}' used before training")]
    Untrained(String),
    /// Any other scoring or training failure
    #[error("scorer failed: {0}")]
    Failed(String),
}

/// Errors raised while computing a single metric value.
///
/// These never abort a row: the evaluator records them as missing values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    /// Truncation was requested on an unordered recommendation list
    #[error("metric {metric} requires an ordered list")]
    Unordered { metric: String },
    /// The metric has no defined value for these inputs
    #[error("metric {metric} undefined: {reason}")]
    Undefined { metric: String, reason: String },
    /// The metric was configured with an out-of-range parameter
    #[error("invalid metric parameter: {0}")]
    InvalidParameter(String),
}

/// A per-query failure inside a batch run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// The scorer returned an error
    #[error(transparent)]
    Scorer(#[from] ScorerError),
    /// The scorer returned a malformed list
    #[error(transparent)]
    InvalidList(#[from] ItemListError),
    /// The scoring call exceeded the configured per-query timeout
    #[error("scoring timed out after {0:?}")]
    TimedOut(std::time::Duration),
    /// The scoring call panicked
    #[error("scoring panicked: {0}")]
    Panicked(String),
    /// The run was cancelled before this query was scored
    #[error("cancelled before scoring")]
    Cancelled,
}

/// Errors raised while loading a data split.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    /// The split could not be produced
    #[error("split '{split}' unavailable: {reason}")]
    SplitUnavailable { split: String, reason: String },
    /// A test query does not exist in the source data
    #[error("unknown query: {0}")]
    UnknownQuery(String),
}

/// Errors raised while loading engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration text is not valid TOML for [`EngineConfig`](crate::config::EngineConfig)
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors raised by a [`ResultSink`](crate::sink::ResultSink).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON encode failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Run-level errors.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The run configuration is unusable; no work was started
    #[error("invalid run config: {0}")]
    InvalidRunConfig(String),
    /// Engine configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The metric thread pool could not be built
    #[error("failed to build metric thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    /// The result consumer task could not be joined
    #[error("result consumer failed: {0}")]
    Join(String),
}
