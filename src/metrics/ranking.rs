//! Top-N accuracy metrics.
//!
//! Relevance is binary membership in the reference list unless a metric is
//! configured to read graded gains from the reference scores. Ranks are
//! numbered from 1.

use super::{label_at, require_ordered, truncate, ListMetric};
use crate::config::DEFAULT_RBP_PATIENCE;
use crate::error::MetricError;
use crate::items::ItemList;

fn count_relevant(recs: &ItemList, test: &ItemList) -> usize {
    recs.ids().filter(|i| test.contains(i)).count()
}

/// Rank discount `log2(rank + 1)`.
#[inline]
fn discount(rank: usize) -> f64 {
    ((rank + 1) as f64).log2()
}

/// 1 if any top-k item is relevant, else 0.
#[derive(Debug, Clone, Default)]
pub struct Hit {
    k: Option<usize>,
}

impl Hit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(k: usize) -> Self {
        Self { k: Some(k) }
    }
}

impl ListMetric for Hit {
    fn label(&self) -> String {
        label_at("Hit", self.k)
    }

    fn measure_list(&self, recs: &ItemList, test: &ItemList) -> Result<f64, MetricError> {
        let recs = truncate(&self.label(), recs, self.k)?;
        let hit = recs.ids().any(|i| test.contains(i));
        Ok(if hit { 1.0 } else { 0.0 })
    }
}

/// Fraction of the top-k that is relevant.
///
/// The denominator is the truncated list length, so a list shorter than `k`
/// is not penalized for its missing slots. An empty list scores 0.
#[derive(Debug, Clone, Default)]
pub struct Precision {
    k: Option<usize>,
}

impl Precision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(k: usize) -> Self {
        Self { k: Some(k) }
    }
}

impl ListMetric for Precision {
    fn label(&self) -> String {
        label_at("Precision", self.k)
    }

    fn measure_list(&self, recs: &ItemList, test: &ItemList) -> Result<f64, MetricError> {
        let recs = truncate(&self.label(), recs, self.k)?;
        if recs.is_empty() {
            return Ok(0.0);
        }
        Ok(count_relevant(&recs, test) as f64 / recs.len() as f64)
    }
}

/// Fraction of the reference items found in the top-k; 0 for an empty
/// reference.
#[derive(Debug, Clone, Default)]
pub struct Recall {
    k: Option<usize>,
}

impl Recall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(k: usize) -> Self {
        Self { k: Some(k) }
    }
}

impl ListMetric for Recall {
    fn label(&self) -> String {
        label_at("Recall", self.k)
    }

    fn measure_list(&self, recs: &ItemList, test: &ItemList) -> Result<f64, MetricError> {
        let recs = truncate(&self.label(), recs, self.k)?;
        if test.is_empty() {
            return Ok(0.0);
        }
        Ok(count_relevant(&recs, test) as f64 / test.len() as f64)
    }
}

/// Reciprocal of the rank of the first relevant item; 0 if there is none.
#[derive(Debug, Clone, Default)]
pub struct RecipRank {
    k: Option<usize>,
}

impl RecipRank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(k: usize) -> Self {
        Self { k: Some(k) }
    }
}

impl ListMetric for RecipRank {
    fn label(&self) -> String {
        label_at("RecipRank", self.k)
    }

    fn measure_list(&self, recs: &ItemList, test: &ItemList) -> Result<f64, MetricError> {
        let label = self.label();
        require_ordered(&label, recs)?;
        let recs = truncate(&label, recs, self.k)?;
        let first = recs.ids().position(|i| test.contains(i));
        Ok(first.map(|pos| 1.0 / (pos + 1) as f64).unwrap_or(0.0))
    }
}

/// How a reference item's gain is determined for DCG-family metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Gain {
    /// 1 for every reference item
    #[default]
    Binary,
    /// The reference list's score for the item (negative scores count as 0)
    Graded,
}

impl Gain {
    fn gains_for<'t>(
        &self,
        label: &str,
        test: &'t ItemList,
    ) -> Result<Option<&'t [f64]>, MetricError> {
        match self {
            Gain::Binary => Ok(None),
            Gain::Graded => test.scores().map(Some).ok_or_else(|| MetricError::Undefined {
                metric: label.to_string(),
                reason: "graded gain needs reference scores".to_string(),
            }),
        }
    }

    fn of(&self, test: &ItemList, item: &str) -> f64 {
        match self {
            Gain::Binary => {
                if test.contains(item) {
                    1.0
                } else {
                    0.0
                }
            }
            Gain::Graded => test.score_of(item).unwrap_or(0.0).max(0.0),
        }
    }
}

fn dcg(recs: &ItemList, test: &ItemList, gain: Gain) -> f64 {
    recs.ids()
        .enumerate()
        .map(|(i, item)| gain.of(test, item) / discount(i + 1))
        .sum()
}

/// DCG of the reference list sorted by descending gain, cut at `k`.
fn ideal_dcg(test: &ItemList, gains: Option<&[f64]>, k: Option<usize>) -> f64 {
    let mut ideal: Vec<f64> = match gains {
        Some(g) => g.iter().map(|v| v.max(0.0)).collect(),
        None => vec![1.0; test.len()],
    };
    ideal.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    if let Some(k) = k {
        ideal.truncate(k);
    }
    ideal
        .iter()
        .enumerate()
        .map(|(i, g)| g / discount(i + 1))
        .sum()
}

/// Discounted cumulative gain.
///
/// ```text
/// DCG@k = Σ gain(i) / log2(i + 1)  for i in 1..=k
/// ```
#[derive(Debug, Clone, Default)]
pub struct Dcg {
    k: Option<usize>,
    gain: Gain,
}

impl Dcg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(k: usize) -> Self {
        Self {
            k: Some(k),
            ..Self::default()
        }
    }

    pub fn graded(mut self) -> Self {
        self.gain = Gain::Graded;
        self
    }
}

impl ListMetric for Dcg {
    fn label(&self) -> String {
        label_at("DCG", self.k)
    }

    fn measure_list(&self, recs: &ItemList, test: &ItemList) -> Result<f64, MetricError> {
        let label = self.label();
        require_ordered(&label, recs)?;
        self.gain.gains_for(&label, test)?;
        let recs = truncate(&label, recs, self.k)?;
        Ok(dcg(&recs, test, self.gain))
    }
}

/// Normalized DCG: DCG over the DCG of an ideal ranking of the reference
/// list. Always in `[0, 1]`; an empty reference scores 0.
#[derive(Debug, Clone, Default)]
pub struct Ndcg {
    k: Option<usize>,
    gain: Gain,
}

impl Ndcg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(k: usize) -> Self {
        Self {
            k: Some(k),
            ..Self::default()
        }
    }

    pub fn graded(mut self) -> Self {
        self.gain = Gain::Graded;
        self
    }
}

impl ListMetric for Ndcg {
    fn label(&self) -> String {
        label_at("NDCG", self.k)
    }

    fn measure_list(&self, recs: &ItemList, test: &ItemList) -> Result<f64, MetricError> {
        let label = self.label();
        require_ordered(&label, recs)?;
        let gains = self.gain.gains_for(&label, test)?;
        let recs = truncate(&label, recs, self.k)?;

        let ideal = ideal_dcg(test, gains, self.k);
        if ideal <= 0.0 {
            return Ok(0.0);
        }
        Ok((dcg(&recs, test, self.gain) / ideal).clamp(0.0, 1.0))
    }
}

/// Rank-biased precision.
///
/// ```text
/// RBP@k = (1 - p) Σ rel(i) p^(i-1)  for i in 1..=k
/// ```
///
/// With normalization the score is divided by the best RBP achievable for
/// the reference size, so a perfect ranking scores 1.
#[derive(Debug, Clone)]
pub struct Rbp {
    k: Option<usize>,
    patience: f64,
    normalize: bool,
}

impl Default for Rbp {
    fn default() -> Self {
        Self {
            k: None,
            patience: DEFAULT_RBP_PATIENCE,
            normalize: false,
        }
    }
}

impl Rbp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(k: usize) -> Self {
        Self {
            k: Some(k),
            ..Self::default()
        }
    }

    pub fn patience(mut self, patience: f64) -> Self {
        self.patience = patience;
        self
    }

    pub fn normalized(mut self) -> Self {
        self.normalize = true;
        self
    }
}

impl ListMetric for Rbp {
    fn label(&self) -> String {
        label_at("RBP", self.k)
    }

    fn measure_list(&self, recs: &ItemList, test: &ItemList) -> Result<f64, MetricError> {
        let label = self.label();
        if !(self.patience > 0.0 && self.patience < 1.0) {
            return Err(MetricError::InvalidParameter(format!(
                "{}: patience must be in (0, 1), got {}",
                label, self.patience
            )));
        }
        require_ordered(&label, recs)?;
        let recs = truncate(&label, recs, self.k)?;

        let p = self.patience;
        let score: f64 = recs
            .ids()
            .enumerate()
            .filter(|(_, item)| test.contains(item))
            .map(|(i, _)| p.powi(i as i32))
            .sum::<f64>()
            * (1.0 - p);

        if !self.normalize {
            return Ok(score);
        }
        let n_good = match self.k {
            Some(k) => test.len().min(k),
            None => test.len(),
        };
        // (1 - p) Σ_{i<n} p^i = 1 - p^n
        let max = 1.0 - p.powi(n_good as i32);
        if max <= 0.0 {
            Ok(0.0)
        } else {
            Ok(score / max)
        }
    }
}
