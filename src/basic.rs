//! Baseline scorers used to exercise the harness.

use crate::data::{Dataset, Query};
use crate::error::ScorerError;
use crate::items::{ItemId, ItemList};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// Scores items by how often they appear in the training data.
///
/// Candidates never seen in training are omitted.
#[derive(Debug, Default)]
pub struct PopScorer {
    counts: Option<HashMap<ItemId, usize>>,
}

impl PopScorer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl crate::scorer::Scorer for PopScorer {
    fn name(&self) -> &str {
        "pop"
    }

    fn train(&mut self, data: &Dataset) -> Result<(), ScorerError> {
        self.counts = Some(data.item_counts());
        Ok(())
    }

    fn score(&self, _query: &Query, candidates: &ItemList) -> Result<ItemList, ScorerError> {
        let counts = self
            .counts
            .as_ref()
            .ok_or_else(|| ScorerError::Untrained(self.name().to_string()))?;
        ItemList::scored(
            candidates
                .ids()
                .filter_map(|item| counts.get(item).map(|&c| (item, c as f64))),
        )
        .map_err(|e| ScorerError::Failed(e.to_string()))
    }
}

/// Uniform random scores, seeded per query so repeated runs agree.
#[derive(Debug, Clone)]
pub struct RandomScorer {
    seed: u64,
}

impl RandomScorer {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn query_seed(&self, query: &str) -> u64 {
        ahash::RandomState::with_seeds(self.seed, 0x5eed, 0, 0).hash_one(query)
    }
}

impl crate::scorer::Scorer for RandomScorer {
    fn name(&self) -> &str {
        "random"
    }

    fn requires_training(&self) -> bool {
        false
    }

    fn train(&mut self, _data: &Dataset) -> Result<(), ScorerError> {
        Ok(())
    }

    fn score(&self, query: &Query, candidates: &ItemList) -> Result<ItemList, ScorerError> {
        let mut rng = StdRng::seed_from_u64(self.query_seed(&query.id));
        ItemList::scored(candidates.ids().map(|item| (item, rng.gen::<f64>())))
            .map_err(|e| ScorerError::Failed(e.to_string()))
    }
}
