//! Beyond-accuracy metrics: popularity bias and catalog coverage.

use super::{label_at, truncate, GlobalMetric, ListMetric};
use crate::data::Dataset;
use crate::error::MetricError;
use crate::items::{ItemId, ItemList};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Mean popularity rank of the recommended items.
///
/// Ranks come from an externally supplied popularity ordering (1 = most
/// popular). Items missing from that ordering take the rank just past the
/// least popular known item. The reference list is ignored. An empty
/// recommendation list has no mean and is reported as undefined.
#[derive(Debug, Clone)]
pub struct MeanPopRank {
    k: Option<usize>,
    ranks: Arc<HashMap<ItemId, usize>>,
}

impl MeanPopRank {
    pub fn new(ranks: HashMap<ItemId, usize>) -> Self {
        Self {
            k: None,
            ranks: Arc::new(ranks),
        }
    }

    /// Popularity ordering taken from a training set's interaction counts.
    pub fn from_dataset(data: &Dataset) -> Self {
        Self::new(data.popularity_ranks())
    }

    pub fn at(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }
}

impl ListMetric for MeanPopRank {
    fn label(&self) -> String {
        label_at("MeanPopRank", self.k)
    }

    fn measure_list(&self, recs: &ItemList, _test: &ItemList) -> Result<f64, MetricError> {
        let label = self.label();
        let recs = truncate(&label, recs, self.k)?;
        if recs.is_empty() {
            return Err(MetricError::Undefined {
                metric: label,
                reason: "no recommended items".to_string(),
            });
        }
        let unknown = self.ranks.len() + 1;
        let total: usize = recs
            .ids()
            .map(|i| self.ranks.get(i).copied().unwrap_or(unknown))
            .sum();
        Ok(total as f64 / recs.len() as f64)
    }
}

/// Fraction of the catalog recommended to at least one query.
#[derive(Debug, Clone)]
pub struct ItemCoverage {
    k: Option<usize>,
    catalog: Arc<HashSet<ItemId>>,
}

impl ItemCoverage {
    pub fn new<I, S>(catalog: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ItemId>,
    {
        Self {
            k: None,
            catalog: Arc::new(catalog.into_iter().map(Into::into).collect()),
        }
    }

    pub fn from_dataset(data: &Dataset) -> Self {
        Self::new(data.items())
    }

    pub fn at(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }
}

impl GlobalMetric for ItemCoverage {
    fn label(&self) -> String {
        label_at("ItemCoverage", self.k)
    }

    fn measure_run(&self, recs: &[&ItemList], _tests: &[&ItemList]) -> Result<f64, MetricError> {
        let label = self.label();
        if self.catalog.is_empty() {
            return Err(MetricError::Undefined {
                metric: label,
                reason: "empty catalog".to_string(),
            });
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for list in recs {
            let list = truncate(&label, list, self.k)?;
            seen.extend(
                list.ids()
                    .filter_map(|item| self.catalog.get(item).map(String::as_str)),
            );
        }
        Ok(seen.len() as f64 / self.catalog.len() as f64)
    }
}
