//! Item lists: the unit of exchange between scorers, the batch runner and
//! metrics.
//!
//! An [`ItemList`] holds unique item IDs in sequence, optional parallel
//! score and rank arrays, and an `ordered` flag that says whether the
//! sequence is a ranking decision or just membership. Lists are immutable;
//! every derived view is a new list.

use crate::error::ItemListError;
use ahash::RandomState;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Item identifier.
pub type ItemId = String;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "RawItemList")]
pub struct ItemList {
    items: IndexSet<ItemId, RandomState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scores: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ranks: Option<Vec<u32>>,
    ordered: bool,
}

/// Serialized form, checked through the constructors on the way in.
#[derive(Deserialize)]
struct RawItemList {
    items: Vec<ItemId>,
    #[serde(default)]
    scores: Option<Vec<f64>>,
    #[serde(default)]
    ranks: Option<Vec<u32>>,
    ordered: bool,
}

impl TryFrom<RawItemList> for ItemList {
    type Error = ItemListError;

    fn try_from(raw: RawItemList) -> Result<Self, Self::Error> {
        let mut list = ItemList::new(raw.items, raw.ordered)?;
        if let Some(scores) = raw.scores {
            list = list.with_scores(scores)?;
        }
        if let Some(ranks) = raw.ranks {
            list = list.with_ranks(ranks)?;
        }
        Ok(list)
    }
}

impl ItemList {
    /// Build a list from item IDs. Duplicate IDs are rejected.
    pub fn new<I, S>(items: I, ordered: bool) -> Result<Self, ItemListError>
    where
        I: IntoIterator<Item = S>,
        S: Into<ItemId>,
    {
        let iter = items.into_iter();
        let mut set = IndexSet::with_capacity_and_hasher(iter.size_hint().0, RandomState::new());
        for item in iter {
            let item = item.into();
            if !set.insert(item.clone()) {
                return Err(ItemListError::InvalidState(format!(
                    "duplicate item '{}'",
                    item
                )));
            }
        }
        Ok(Self {
            items: set,
            scores: None,
            ranks: None,
            ordered,
        })
    }

    /// An unordered membership list.
    pub fn unordered<I, S>(items: I) -> Result<Self, ItemListError>
    where
        I: IntoIterator<Item = S>,
        S: Into<ItemId>,
    {
        Self::new(items, false)
    }

    /// An ordered list with ranks `1..=len` attached.
    pub fn ranked<I, S>(items: I) -> Result<Self, ItemListError>
    where
        I: IntoIterator<Item = S>,
        S: Into<ItemId>,
    {
        let list = Self::new(items, true)?;
        let ranks = (1..=list.len() as u32).collect();
        Ok(Self {
            ranks: Some(ranks),
            ..list
        })
    }

    /// An unordered list of `(item, score)` pairs, the shape scorers return.
    pub fn scored<I, S>(pairs: I) -> Result<Self, ItemListError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<ItemId>,
    {
        let (ids, scores): (Vec<ItemId>, Vec<f64>) =
            pairs.into_iter().map(|(i, s)| (i.into(), s)).unzip();
        Self::new(ids, false)?.with_scores(scores)
    }

    pub fn empty(ordered: bool) -> Self {
        Self {
            ordered,
            ..Self::default()
        }
    }

    /// Attach scores, one per item.
    pub fn with_scores(mut self, scores: Vec<f64>) -> Result<Self, ItemListError> {
        if scores.len() != self.items.len() {
            return Err(ItemListError::InvalidState(format!(
                "{} scores for {} items",
                scores.len(),
                self.items.len()
            )));
        }
        self.scores = Some(scores);
        Ok(self)
    }

    /// Attach ranks, one per item. On an ordered list rank `i + 1` must sit
    /// at position `i`.
    pub fn with_ranks(mut self, ranks: Vec<u32>) -> Result<Self, ItemListError> {
        if ranks.len() != self.items.len() {
            return Err(ItemListError::InvalidState(format!(
                "{} ranks for {} items",
                ranks.len(),
                self.items.len()
            )));
        }
        if self.ordered {
            if let Some(pos) = ranks.iter().enumerate().position(|(i, &r)| r as usize != i + 1) {
                return Err(ItemListError::InvalidState(format!(
                    "rank {} at position {} of an ordered list",
                    ranks[pos],
                    pos + 1
                )));
            }
        } else if ranks.iter().any(|&r| r == 0) {
            return Err(ItemListError::InvalidState("ranks start at 1".to_string()));
        }
        self.ranks = Some(ranks);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// O(1) membership test.
    pub fn contains(&self, item: &str) -> bool {
        self.items.contains(item)
    }

    pub fn ids(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.items.iter().map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.items.get_index(index).map(String::as_str)
    }

    pub fn scores(&self) -> Option<&[f64]> {
        self.scores.as_deref()
    }

    pub fn ranks(&self) -> Option<&[u32]> {
        self.ranks.as_deref()
    }

    pub fn score_of(&self, item: &str) -> Option<f64> {
        let idx = self.items.get_index_of(item)?;
        self.scores.as_ref().map(|s| s[idx])
    }

    /// 1-based rank of `item`; `None` on unordered lists or absent items.
    pub fn rank_of(&self, item: &str) -> Option<usize> {
        if !self.ordered {
            return None;
        }
        self.items.get_index_of(item).map(|i| i + 1)
    }

    /// First `k` elements as a new list.
    ///
    /// For `k >= len` this is a copy of the list, ordered or not. Truncating
    /// an unordered list below its length is undefined and rejected.
    pub fn top_k(&self, k: usize) -> Result<ItemList, ItemListError> {
        if k >= self.len() {
            return Ok(self.clone());
        }
        if !self.ordered {
            return Err(ItemListError::InvalidState(format!(
                "cannot take top {} of an unordered list of {}",
                k,
                self.len()
            )));
        }
        Ok(ItemList {
            items: self.items.iter().take(k).cloned().collect(),
            scores: self.scores.as_ref().map(|s| s[..k].to_vec()),
            ranks: self.ranks.as_ref().map(|r| r[..k].to_vec()),
            ordered: true,
        })
    }

    /// Rank by descending score and keep the first `n` (all if `None`).
    ///
    /// Ties are broken by item ID ascending and NaN scores sort last, so the
    /// result depends only on the (item, score) pairs. The returned list is
    /// ordered with ranks `1..=len`.
    pub fn rank_top_n(&self, n: Option<usize>) -> Result<ItemList, ItemListError> {
        let scores = self.scores.as_ref().ok_or_else(|| {
            ItemListError::InvalidState("ranking requires scores".to_string())
        })?;

        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| {
            compare_scores(scores[a], scores[b]).then_with(|| {
                let ia = &self.items[a];
                let ib = &self.items[b];
                ia.cmp(ib)
            })
        });
        if let Some(n) = n {
            order.truncate(n);
        }

        let items: IndexSet<ItemId, RandomState> =
            order.iter().map(|&i| self.items[i].clone()).collect();
        let len = items.len() as u32;
        Ok(ItemList {
            items,
            scores: Some(order.iter().map(|&i| scores[i]).collect()),
            ranks: Some((1..=len).collect()),
            ordered: true,
        })
    }

    /// Copy of this list keeping only items not in `exclude`.
    pub fn without(&self, exclude: &ItemList) -> ItemList {
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| !exclude.contains(&self.items[i]))
            .collect();
        ItemList {
            items: keep.iter().map(|&i| self.items[i].clone()).collect(),
            scores: self
                .scores
                .as_ref()
                .map(|s| keep.iter().map(|&i| s[i]).collect()),
            // positions shift, so ranks are only kept when recomputable
            ranks: if self.ordered && self.ranks.is_some() {
                Some((1..=keep.len() as u32).collect())
            } else {
                None
            },
            ordered: self.ordered,
        }
    }
}

/// Descending by score, NaN last.
fn compare_scores(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

impl PartialEq for ItemList {
    fn eq(&self, other: &Self) -> bool {
        if self.ordered != other.ordered || self.len() != other.len() {
            return false;
        }
        if self.ordered {
            self.items.iter().eq(other.items.iter())
        } else {
            self.items.iter().all(|i| other.items.contains(i))
        }
    }
}

impl Eq for ItemList {}

impl Hash for ItemList {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ordered.hash(state);
        self.items.len().hash(state);
        if self.ordered {
            for item in &self.items {
                item.hash(state);
            }
        } else {
            let mut sorted: Vec<&ItemId> = self.items.iter().collect();
            sorted.sort();
            sorted.hash(state);
        }
    }
}
