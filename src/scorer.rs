//! The scorer contract consumed by the batch runner and evaluator.

use crate::data::{Dataset, Query};
use crate::error::ScorerError;
use crate::items::ItemList;
use std::fmt;
use std::sync::Arc;

/// A trainable model that scores candidate items for a query.
///
/// `train` is called once, before any scoring, and may discard earlier
/// state. `score` takes `&self` and is called from many worker threads at
/// once, so implementations must not mutate shared state while scoring.
/// Items a scorer cannot score are either omitted from the returned list or
/// given a sentinel score; which one is the scorer's own policy.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `score` needs a prior `train` call.
    fn requires_training(&self) -> bool {
        true
    }

    fn train(&mut self, data: &Dataset) -> Result<(), ScorerError>;

    /// Score `candidates` for `query`. The returned list need not be ordered.
    fn score(&self, query: &Query, candidates: &ItemList) -> Result<ItemList, ScorerError>;
}

/// Builds a fresh, untrained scorer for each configuration.
pub type ScorerFactory = Arc<dyn Fn() -> Box<dyn Scorer> + Send + Sync>;

/// One algorithm axis of a run: an ID plus a way to build its scorer.
#[derive(Clone)]
pub struct AlgorithmSpec {
    pub id: String,
    pub factory: ScorerFactory,
}

impl AlgorithmSpec {
    pub fn new<F>(id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Scorer> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            factory: Arc::new(factory),
        }
    }

    pub fn build(&self) -> Box<dyn Scorer> {
        (self.factory)()
    }
}

impl fmt::Debug for AlgorithmSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmSpec").field("id", &self.id).finish()
    }
}

/// Picks candidate items for a query when the query carries none.
#[derive(Debug, Clone)]
pub enum CandidateSelector {
    /// Every item in the training data
    AllTrainingItems(Arc<ItemList>),
    /// Training items minus the query's history
    UnratedTrainingItems(Arc<ItemList>),
}

impl CandidateSelector {
    pub fn all_training_items(data: &Dataset) -> Self {
        Self::AllTrainingItems(Arc::new(catalog(data)))
    }

    pub fn unrated_training_items(data: &Dataset) -> Self {
        Self::UnratedTrainingItems(Arc::new(catalog(data)))
    }

    pub fn select(&self, query: &Query) -> ItemList {
        if let Some(candidates) = &query.candidates {
            return candidates.clone();
        }
        match self {
            Self::AllTrainingItems(items) => items.as_ref().clone(),
            Self::UnratedTrainingItems(items) => match &query.history {
                Some(history) => items.without(history),
                None => items.as_ref().clone(),
            },
        }
    }
}

fn catalog(data: &Dataset) -> ItemList {
    // Dataset::items() is already deduplicated
    ItemList::unordered(data.items()).unwrap_or_else(|_| ItemList::empty(false))
}
