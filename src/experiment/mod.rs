//! Multi-configuration experiments: every algorithm trained and evaluated
//! on every split, with results streamed to a sink as they are produced.

pub mod evaluator;
pub mod state;

pub use evaluator::Evaluator;
pub use state::{ConfigKey, ConfigReport, ConfigState, RunReport, Stage, SummaryRow};

use crate::data::SplitSource;
use crate::error::EvalError;
use crate::metrics::Metric;
use crate::scorer::AlgorithmSpec;
use std::collections::HashSet;
use std::sync::Arc;

/// Where candidate items come from for test queries without their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CandidateMode {
    AllTrainingItems,
    /// Training items the query has not already interacted with
    #[default]
    UnratedTrainingItems,
}

/// The cross product to evaluate: algorithms x splits, each measured with
/// every metric.
#[derive(Clone, Default)]
pub struct RunConfig {
    pub algorithms: Vec<AlgorithmSpec>,
    pub splits: Vec<Arc<dyn SplitSource>>,
    pub metrics: Vec<Metric>,
    /// List length per query (all candidates if `None`)
    pub n: Option<usize>,
    pub candidates: CandidateMode,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn algorithm(mut self, algorithm: AlgorithmSpec) -> Self {
        self.algorithms.push(algorithm);
        self
    }

    pub fn split<S: SplitSource + 'static>(mut self, split: S) -> Self {
        self.splits.push(Arc::new(split));
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn n(mut self, n: usize) -> Self {
        self.n = Some(n);
        self
    }

    pub fn candidates(mut self, mode: CandidateMode) -> Self {
        self.candidates = mode;
        self
    }

    /// Number of (algorithm, split) configurations.
    pub fn n_configs(&self) -> usize {
        self.algorithms.len() * self.splits.len()
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.algorithms.is_empty() {
            return Err(EvalError::InvalidRunConfig("no algorithms".to_string()));
        }
        if self.splits.is_empty() {
            return Err(EvalError::InvalidRunConfig("no splits".to_string()));
        }
        if self.metrics.is_empty() {
            return Err(EvalError::InvalidRunConfig("no metrics".to_string()));
        }
        if self.n == Some(0) {
            return Err(EvalError::InvalidRunConfig(
                "list length must be at least 1".to_string(),
            ));
        }
        check_unique("algorithm", self.algorithms.iter().map(|a| a.id.as_str()))?;
        check_unique("split", self.splits.iter().map(|s| s.id()))?;
        check_unique("metric", self.metrics.iter().map(|m| m.label()))?;
        Ok(())
    }
}

fn check_unique<I, S>(what: &str, ids: I) -> Result<(), EvalError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    for id in ids {
        let id = id.as_ref().to_string();
        if !seen.insert(id.clone()) {
            return Err(EvalError::InvalidRunConfig(format!(
                "duplicate {} '{}'",
                what, id
            )));
        }
    }
    Ok(())
}
