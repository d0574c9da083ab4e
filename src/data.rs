//! In-memory carriers for training data, queries and train/test splits.
//!
//! Loading and normalizing real datasets happens elsewhere; these types are
//! the shape the engine consumes once that work is done.

use crate::error::DataError;
use crate::items::{ItemId, ItemList};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Query (usually user) identifier.
pub type QueryId = String;

/// One observed (query, item) interaction, with an optional rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub query: QueryId,
    pub item: ItemId,
    #[serde(default)]
    pub rating: Option<f64>,
}

impl Interaction {
    pub fn new(query: impl Into<QueryId>, item: impl Into<ItemId>) -> Self {
        Self {
            query: query.into(),
            item: item.into(),
            rating: None,
        }
    }

    pub fn rated(query: impl Into<QueryId>, item: impl Into<ItemId>, rating: f64) -> Self {
        Self {
            rating: Some(rating),
            ..Self::new(query, item)
        }
    }
}

/// Training data handed to [`Scorer::train`](crate::scorer::Scorer::train).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    interactions: Vec<Interaction>,
}

impl Dataset {
    pub fn new(interactions: Vec<Interaction>) -> Self {
        Self { interactions }
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Distinct items, sorted by ID.
    pub fn items(&self) -> Vec<ItemId> {
        let set: BTreeSet<&ItemId> = self.interactions.iter().map(|i| &i.item).collect();
        set.into_iter().cloned().collect()
    }

    /// Distinct queries, in first-seen order.
    pub fn queries(&self) -> Vec<QueryId> {
        let set: IndexSet<&QueryId> = self.interactions.iter().map(|i| &i.query).collect();
        set.into_iter().cloned().collect()
    }

    /// Items a query interacted with, as an unordered list scored by rating
    /// when every interaction carries one.
    pub fn query_history(&self, query: &str) -> ItemList {
        let mut seen: IndexMap<&str, Option<f64>> = IndexMap::new();
        for i in self.interactions.iter().filter(|i| i.query == query) {
            seen.entry(i.item.as_str()).or_insert(i.rating);
        }
        let ratings: Option<Vec<f64>> = seen.values().copied().collect();
        let list = ItemList::unordered(seen.keys().copied())
            .unwrap_or_else(|_| ItemList::empty(false));
        match ratings {
            Some(r) if !r.is_empty() => list.clone().with_scores(r).unwrap_or(list),
            _ => list,
        }
    }

    /// Interaction count per item.
    pub fn item_counts(&self) -> HashMap<ItemId, usize> {
        let mut counts = HashMap::new();
        for i in &self.interactions {
            *counts.entry(i.item.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Popularity rank per item: 1 is the most-interacted item, ties broken
    /// by item ID ascending.
    pub fn popularity_ranks(&self) -> HashMap<ItemId, usize> {
        let mut counts: Vec<(ItemId, usize)> = self.item_counts().into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
            .into_iter()
            .enumerate()
            .map(|(i, (item, _))| (item, i + 1))
            .collect()
    }
}

/// A query as the batch runner sees it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    /// Items the query already interacted with in training data
    #[serde(default)]
    pub history: Option<ItemList>,
    /// Explicit candidates; takes precedence over the runner's selector
    #[serde(default)]
    pub candidates: Option<ItemList>,
}

impl Query {
    pub fn new(id: impl Into<QueryId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: ItemList) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_candidates(mut self, candidates: ItemList) -> Self {
        self.candidates = Some(candidates);
        self
    }
}

/// A train/test partition.
#[derive(Debug, Clone)]
pub struct Split {
    pub id: String,
    pub train: Arc<Dataset>,
    /// Reference items per test query
    pub test: IndexMap<QueryId, ItemList>,
}

impl Split {
    pub fn new(id: impl Into<String>, train: Dataset, test: IndexMap<QueryId, ItemList>) -> Self {
        Self {
            id: id.into(),
            train: Arc::new(train),
            test,
        }
    }

    /// Build a split whose training data is `source` minus every test pair.
    pub fn from_source_and_test(
        id: impl Into<String>,
        source: &Dataset,
        test: IndexMap<QueryId, ItemList>,
    ) -> Result<Self, DataError> {
        let known: HashSet<&str> = source.interactions.iter().map(|i| i.query.as_str()).collect();
        if let Some(missing) = test.keys().find(|q| !known.contains(q.as_str())) {
            return Err(DataError::UnknownQuery(missing.clone()));
        }

        let train = source
            .interactions
            .iter()
            .filter(|i| !test.get(&i.query).is_some_and(|t| t.contains(&i.item)))
            .cloned()
            .collect();
        Ok(Self::new(id, Dataset::new(train), test))
    }

    /// Number of (query, item) test pairs.
    pub fn test_size(&self) -> usize {
        self.test.values().map(ItemList::len).sum()
    }

    /// Test queries, in test order, with their training history attached.
    pub fn queries(&self) -> Vec<Query> {
        self.test
            .keys()
            .map(|q| Query::new(q.clone()).with_history(self.train.query_history(q)))
            .collect()
    }
}

/// Something that can produce a [`Split`] when a configuration needs it.
pub trait SplitSource: Send + Sync {
    fn id(&self) -> &str;
    fn load(&self) -> Result<Split, DataError>;
}

impl SplitSource for Split {
    fn id(&self) -> &str {
        &self.id
    }

    fn load(&self) -> Result<Split, DataError> {
        Ok(self.clone())
    }
}
