//! Batch recommendation and offline evaluation engine.
//!
//! Scorers are trained on a split's training data, applied to every test
//! query in parallel to produce ranked top-N lists, and measured against the
//! held-out reference items with list and global metrics. The
//! [`Evaluator`](experiment::Evaluator) runs that pipeline for every
//! (algorithm, split) pair and streams per-query results into a sink.

pub mod basic;
pub mod batch;
pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod items;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod scorer;
pub mod sink;

pub use batch::{recommend, BatchResults, BatchRunner, QueryOutcome};
pub use config::EngineConfig;
pub use data::{Dataset, Interaction, Query, QueryId, Split, SplitSource};
pub use error::{
    ConfigError, DataError, EvalError, ItemListError, MetricError, QueryError, ScorerError,
    SinkError,
};
pub use experiment::{CandidateMode, ConfigKey, ConfigState, Evaluator, RunConfig, RunReport};
pub use items::{ItemId, ItemList};
pub use pool::{CancelToken, ScoringBudget};
pub use scorer::{AlgorithmSpec, CandidateSelector, Scorer};
pub use sink::{CsvSink, JsonLinesSink, MemorySink, ResultRow, ResultSink};
