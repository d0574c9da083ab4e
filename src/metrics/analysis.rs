//! Measuring whole runs: every list metric over every (recs, test) pair,
//! then every global metric over the run, then per-metric summaries.

use super::Metric;
use crate::data::QueryId;
use crate::error::{EvalError, MetricError};
use crate::items::ItemList;
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Metric values for one query's list.
#[derive(Debug, Clone)]
pub struct MeasuredList {
    pub query: QueryId,
    /// `(label, value)` in metric configuration order
    pub values: Vec<(String, Result<f64, MetricError>)>,
}

/// Aggregate of one metric across a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    /// Lists with a value
    pub count: usize,
    /// Lists whose value could not be computed
    pub missing: usize,
}

impl MetricSummary {
    pub fn from_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a Result<f64, MetricError>>,
    {
        let mut present = Vec::new();
        let mut missing = 0;
        for v in values {
            match v {
                Ok(x) if x.is_finite() => present.push(*x),
                _ => missing += 1,
            }
        }
        if present.is_empty() {
            return Self {
                mean: None,
                std: None,
                count: 0,
                missing,
            };
        }
        let n = present.len() as f64;
        let mean = present.iter().sum::<f64>() / n;
        let var = present.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean: Some(mean),
            std: Some(var.sqrt()),
            count: present.len(),
            missing,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    pub lists: Vec<MeasuredList>,
    /// `(label, value)` for each global metric
    pub global: Vec<(String, Result<f64, MetricError>)>,
}

impl AnalysisResult {
    /// Per-metric summaries: list metrics averaged over queries, global
    /// metrics as a single value.
    pub fn summary(&self) -> IndexMap<String, MetricSummary> {
        let mut by_label: IndexMap<String, Vec<&Result<f64, MetricError>>> = IndexMap::new();
        for list in &self.lists {
            for (label, value) in &list.values {
                by_label.entry(label.clone()).or_default().push(value);
            }
        }
        let mut out: IndexMap<String, MetricSummary> = by_label
            .into_iter()
            .map(|(label, values)| (label, MetricSummary::from_values(values)))
            .collect();
        for (label, value) in &self.global {
            out.insert(label.clone(), MetricSummary::from_values([value]));
        }
        out
    }
}

/// A set of metrics to measure runs with.
#[derive(Clone, Default)]
pub struct RunAnalysis {
    metrics: Vec<Metric>,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl RunAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(metrics: Vec<Metric>) -> Self {
        Self {
            metrics,
            pool: None,
        }
    }

    pub fn add_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Use a dedicated rayon pool of `threads` threads (0 = rayon default).
    pub fn with_threads(mut self, threads: usize) -> Result<Self, EvalError> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if threads > 0 {
            builder = builder.num_threads(threads);
        }
        self.pool = Some(Arc::new(builder.build()?));
        Ok(self)
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn has_global_metrics(&self) -> bool {
        self.metrics.iter().any(|m| matches!(m, Metric::Global(_)))
    }

    /// Every list metric over one pair.
    pub fn measure_list(&self, query: &str, recs: &ItemList, test: &ItemList) -> MeasuredList {
        let values = self
            .metrics
            .iter()
            .filter_map(|m| match m {
                Metric::List(metric) => {
                    let value = metric.measure_list(recs, test);
                    if let Err(e) = &value {
                        debug!("{} missing for query {}: {}", metric.label(), query, e);
                    }
                    Some((metric.label(), value))
                }
                Metric::Global(_) => None,
            })
            .collect();
        MeasuredList {
            query: query.to_string(),
            values,
        }
    }

    /// Every global metric over a run's lists.
    pub fn measure_global(
        &self,
        recs: &[&ItemList],
        tests: &[&ItemList],
    ) -> Vec<(String, Result<f64, MetricError>)> {
        self.metrics
            .iter()
            .filter_map(|m| match m {
                Metric::Global(metric) => Some((metric.label(), metric.measure_run(recs, tests))),
                Metric::List(_) => None,
            })
            .collect()
    }

    /// Measure a run. Queries without a reference list are measured against
    /// an empty one; output follows `recs` order.
    pub fn measure(
        &self,
        recs: &IndexMap<QueryId, ItemList>,
        tests: &IndexMap<QueryId, ItemList>,
    ) -> AnalysisResult {
        let empty = ItemList::empty(false);
        let pairs: Vec<(&str, &ItemList, &ItemList)> = recs
            .iter()
            .map(|(q, r)| (q.as_str(), r, tests.get(q).unwrap_or(&empty)))
            .collect();

        let lists = self.measure_pairs(&pairs);

        let rec_lists: Vec<&ItemList> = pairs.iter().map(|(_, r, _)| *r).collect();
        let test_lists: Vec<&ItemList> = pairs.iter().map(|(_, _, t)| *t).collect();
        let global = self.measure_global(&rec_lists, &test_lists);

        AnalysisResult { lists, global }
    }

    /// Measure many `(query, recs, test)` pairs in parallel, in input order.
    pub fn measure_pairs(&self, pairs: &[(&str, &ItemList, &ItemList)]) -> Vec<MeasuredList> {
        let run = || {
            pairs
                .par_iter()
                .map(|(q, r, t)| self.measure_list(q, r, t))
                .collect::<Vec<_>>()
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}
