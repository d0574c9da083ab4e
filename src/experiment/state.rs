//! Per-configuration lifecycle and the reports a run produces.

use crate::metrics::MetricSummary;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identifies one configuration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigKey {
    pub algorithm: String,
    pub split: String,
}

impl ConfigKey {
    pub fn new(algorithm: impl Into<String>, split: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            split: split.into(),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.algorithm, self.split)
    }
}

/// Where a configuration was when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Loading,
    Training,
    Scoring,
    Measuring,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loading => "loading",
            Stage::Training => "training",
            Stage::Scoring => "scoring",
            Stage::Measuring => "measuring",
        };
        f.write_str(name)
    }
}

/// Pending -> Training -> Scoring -> Scored -> Aggregated, or Failed from
/// any stage. Scoring is always preceded by a completed training step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConfigState {
    Pending,
    Training,
    Scoring,
    Scored,
    Aggregated,
    Failed { stage: Stage, error: String },
}

impl ConfigState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConfigState::Aggregated | ConfigState::Failed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConfigState::Failed { .. })
    }
}

/// Outcome of one configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigReport {
    pub key: ConfigKey,
    pub state: ConfigState,
    pub n_queries: usize,
    pub n_scored: usize,
    pub n_failed: usize,
    pub duration: Duration,
    /// Per-metric summaries, empty if the configuration failed
    pub summary: IndexMap<String, MetricSummary>,
}

impl ConfigReport {
    pub(crate) fn new(key: ConfigKey) -> Self {
        Self {
            key,
            state: ConfigState::Pending,
            n_queries: 0,
            n_scored: 0,
            n_failed: 0,
            duration: Duration::ZERO,
            summary: IndexMap::new(),
        }
    }
}

/// One line of the run summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub algorithm: String,
    pub split: String,
    pub metric: String,
    #[serde(flatten)]
    pub summary: MetricSummary,
}

/// Everything a finished run reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// In (algorithm, split) configuration order
    pub configs: Vec<ConfigReport>,
    pub summary: Vec<SummaryRow>,
    pub rows_written: usize,
    pub sink_errors: usize,
    pub cancelled: bool,
}

impl RunReport {
    pub fn failed_configs(&self) -> Vec<&ConfigReport> {
        self.configs.iter().filter(|c| c.state.is_failed()).collect()
    }

    pub fn config(&self, key: &ConfigKey) -> Option<&ConfigReport> {
        self.configs.iter().find(|c| &c.key == key)
    }

    /// Every configuration aggregated and every row reached the sink.
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && self.sink_errors == 0
            && self
                .configs
                .iter()
                .all(|c| c.state == ConfigState::Aggregated)
    }

    /// Summary rows for one metric across every configuration.
    pub fn metric_rows<'a>(&'a self, metric: &'a str) -> impl Iterator<Item = &'a SummaryRow> + 'a {
        self.summary.iter().filter(move |r| r.metric == metric)
    }
}
