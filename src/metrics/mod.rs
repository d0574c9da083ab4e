//! Metric protocol: list metrics measured once per query, global metrics
//! measured once per run.
//!
//! Metrics are stateless and `Send + Sync`; one instance is shared by every
//! worker measuring a run. A metric with a truncation length `k` cuts the
//! recommendation list with [`ItemList::top_k`] before measuring, which
//! needs an ordered list. The check happens per list, at measurement time.
//!
//! | Metric | Shape | Empty recommendations | Empty reference |
//! |--------|-------|-----------------------|-----------------|
//! | [`Hit`] | list | 0 | 0 |
//! | [`Precision`] | list | 0 | 0 |
//! | [`Recall`] | list | 0 | 0 |
//! | [`RecipRank`] | list | 0 | 0 |
//! | [`Dcg`] | list | 0 | 0 |
//! | [`Ndcg`] | list | 0 | 0 |
//! | [`Rbp`] | list | 0 | 0 |
//! | [`MeanPopRank`] | list | undefined | n/a |
//! | [`ItemCoverage`] | global | 0 | n/a |

pub mod analysis;
pub mod beyond;
pub mod ranking;

pub use analysis::{AnalysisResult, MeasuredList, MetricSummary, RunAnalysis};
pub use beyond::{ItemCoverage, MeanPopRank};
pub use ranking::{Dcg, Hit, Ndcg, Precision, Rbp, RecipRank, Recall};

use crate::error::MetricError;
use crate::items::ItemList;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// A statistic over one (recommendations, reference) pair.
pub trait ListMetric: Send + Sync {
    fn label(&self) -> String;

    fn measure_list(&self, recs: &ItemList, test: &ItemList) -> Result<f64, MetricError>;
}

/// A statistic over every list of a run at once.
pub trait GlobalMetric: Send + Sync {
    fn label(&self) -> String;

    fn measure_run(&self, recs: &[&ItemList], tests: &[&ItemList]) -> Result<f64, MetricError>;
}

/// A configured metric of either shape.
#[derive(Clone)]
pub enum Metric {
    List(Arc<dyn ListMetric>),
    Global(Arc<dyn GlobalMetric>),
}

impl Metric {
    pub fn list<M: ListMetric + 'static>(metric: M) -> Self {
        Self::List(Arc::new(metric))
    }

    pub fn global<M: GlobalMetric + 'static>(metric: M) -> Self {
        Self::Global(Arc::new(metric))
    }

    pub fn label(&self) -> String {
        match self {
            Self::List(m) => m.label(),
            Self::Global(m) => m.label(),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global(_))
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(m) => write!(f, "List({})", m.label()),
            Self::Global(m) => write!(f, "Global({})", m.label()),
        }
    }
}

/// `Name@k`, or just `Name` without truncation.
pub(crate) fn label_at(name: &str, k: Option<usize>) -> String {
    match k {
        Some(k) => format!("{}@{}", name, k),
        None => name.to_string(),
    }
}

/// Apply a metric's truncation length to a recommendation list.
///
/// Any `k` against an unordered list is an error, even when `k` would keep
/// every element: the caller asked for a ranking cut the list cannot carry.
pub(crate) fn truncate<'a>(
    label: &str,
    recs: &'a ItemList,
    k: Option<usize>,
) -> Result<Cow<'a, ItemList>, MetricError> {
    match k {
        None => Ok(Cow::Borrowed(recs)),
        Some(0) => Err(MetricError::InvalidParameter(format!(
            "{}: truncation length must be at least 1",
            label
        ))),
        Some(_) if !recs.is_ordered() => Err(MetricError::Unordered {
            metric: label.to_string(),
        }),
        Some(k) if k >= recs.len() => Ok(Cow::Borrowed(recs)),
        Some(k) => recs.top_k(k).map(Cow::Owned).map_err(|e| MetricError::Undefined {
            metric: label.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Position-based metrics need an ordered list even without truncation.
pub(crate) fn require_ordered(label: &str, recs: &ItemList) -> Result<(), MetricError> {
    if recs.is_ordered() {
        Ok(())
    } else {
        Err(MetricError::Unordered {
            metric: label.to_string(),
        })
    }
}
