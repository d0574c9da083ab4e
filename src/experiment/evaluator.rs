//! Runs every (algorithm, split) configuration of a [`RunConfig`].
//!
//! Configurations run concurrently up to `max_concurrent_configs`, and all
//! of them draw training and scoring slots from one [`ScoringBudget`]. Each
//! configuration moves through [`ConfigState`]s visible via
//! [`Evaluator::status`]. A failing configuration is recorded and the rest
//! continue. Result rows stream through a bounded channel to one blocking
//! consumer that owns the sink, one query at a time as outcomes arrive.

use super::state::{ConfigKey, ConfigReport, ConfigState, RunReport, Stage, SummaryRow};
use super::{CandidateMode, RunConfig};
use crate::batch::{panic_message, BatchRunner, QueryOutcome};
use crate::config::EngineConfig;
use crate::data::{Split, SplitSource};
use crate::error::EvalError;
use crate::items::ItemList;
use crate::metrics::{AnalysisResult, MeasuredList, RunAnalysis};
use crate::pool::{CancelToken, ScoringBudget};
use crate::scorer::{AlgorithmSpec, CandidateSelector, Scorer};
use crate::sink::{ResultRow, ResultSink};
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct Evaluator {
    config: EngineConfig,
    budget: ScoringBudget,
    cancel: CancelToken,
    status: Arc<DashMap<ConfigKey, ConfigState>>,
}

impl Evaluator {
    pub fn new(config: EngineConfig) -> Result<Self, EvalError> {
        config.validate()?;
        let budget = ScoringBudget::new(config.max_concurrency);
        Ok(Self {
            config,
            budget,
            cancel: CancelToken::new(),
            status: Arc::new(DashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token that cancels the current (and any later) run of this evaluator.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Snapshot of every configuration's state, sorted by key.
    pub fn status(&self) -> Vec<(ConfigKey, ConfigState)> {
        let mut out: Vec<_> = self
            .status
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn state_of(&self, key: &ConfigKey) -> Option<ConfigState> {
        self.status.get(key).map(|s| s.value().clone())
    }

    /// Train, score and measure every configuration, streaming rows into
    /// `sink`. Fails only if the run configuration is invalid or the sink
    /// consumer is lost; configuration failures are reported, not returned.
    pub async fn run<S: ResultSink>(&self, run: RunConfig, sink: S) -> Result<RunReport, EvalError> {
        run.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let analysis = RunAnalysis::with_metrics(run.metrics.clone())
            .with_threads(self.config.metric_threads)?;

        let configs: Vec<(AlgorithmSpec, Arc<dyn SplitSource>)> = run
            .algorithms
            .iter()
            .flat_map(|a| run.splits.iter().map(move |s| (a.clone(), Arc::clone(s))))
            .collect();

        info!(
            "[Eval] Run {} started: {} algorithms x {} splits, {} metrics (budget={}, configs at once={})",
            run_id,
            run.algorithms.len(),
            run.splits.len(),
            run.metrics.len(),
            self.budget.max_concurrent(),
            self.config.max_concurrent_configs
        );

        self.status.clear();
        for (algorithm, split) in &configs {
            self.status
                .insert(ConfigKey::new(&algorithm.id, split.id()), ConfigState::Pending);
        }

        let (tx, rx) = mpsc::channel::<ResultRow>(self.config.channel_capacity);
        let consumer = tokio::task::spawn_blocking(move || consume(rx, sink));

        let ctx = Arc::new(ConfigContext {
            budget: self.budget.clone(),
            cancel: self.cancel.clone(),
            status: Arc::clone(&self.status),
            analysis,
            tx,
            outcome_capacity: self.config.channel_capacity,
            n: run.n,
            candidates: run.candidates,
            timeout: self.config.query_timeout(),
            ordered_output: self.config.ordered_output,
        });

        let slots = Arc::new(Semaphore::new(self.config.max_concurrent_configs));
        let keys: Vec<ConfigKey> = configs
            .iter()
            .map(|(a, s)| ConfigKey::new(&a.id, s.id()))
            .collect();
        let handles = configs.into_iter().map(|(algorithm, split)| {
            let ctx = Arc::clone(&ctx);
            let slots = Arc::clone(&slots);
            tokio::spawn(async move {
                let _slot = slots.acquire_owned().await.ok();
                ctx.run_config(algorithm, split).await
            })
        });
        let joined = join_all(handles).await;

        let mut reports = Vec::with_capacity(joined.len());
        for (key, result) in keys.into_iter().zip(joined) {
            let report = match result {
                Ok(report) => report,
                Err(e) => {
                    let mut report = ConfigReport::new(key);
                    ctx.fail(&mut report, Stage::Scoring, join_message(e)).await;
                    report
                }
            };
            reports.push(report);
        }

        // last sender: the consumer finishes once the channel drains
        drop(ctx);
        let stats = consumer
            .await
            .map_err(|e| EvalError::Join(join_message(e)))?;

        let summary = reports
            .iter()
            .flat_map(|r| {
                r.summary.iter().map(move |(metric, summary)| SummaryRow {
                    algorithm: r.key.algorithm.clone(),
                    split: r.key.split.clone(),
                    metric: metric.clone(),
                    summary: summary.clone(),
                })
            })
            .collect();

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            configs: reports,
            summary,
            rows_written: stats.written,
            sink_errors: stats.errors,
            cancelled: self.cancel.is_cancelled(),
        };
        info!(
            "[Eval] Run {} finished: {}/{} configs aggregated, {} rows written ({} sink errors)",
            report.run_id,
            report.configs.len() - report.failed_configs().len(),
            report.configs.len(),
            report.rows_written,
            report.sink_errors
        );
        Ok(report)
    }
}

/// Per-run state shared by every configuration task.
struct ConfigContext {
    budget: ScoringBudget,
    cancel: CancelToken,
    status: Arc<DashMap<ConfigKey, ConfigState>>,
    analysis: RunAnalysis,
    tx: mpsc::Sender<ResultRow>,
    outcome_capacity: usize,
    n: Option<usize>,
    candidates: CandidateMode,
    timeout: Option<Duration>,
    ordered_output: bool,
}

impl ConfigContext {
    async fn run_config(&self, algorithm: AlgorithmSpec, source: Arc<dyn SplitSource>) -> ConfigReport {
        let start = Instant::now();
        let key = ConfigKey::new(&algorithm.id, source.id());
        let mut report = ConfigReport::new(key.clone());

        if self.cancel.is_cancelled() {
            self.fail(&mut report, Stage::Loading, "run cancelled".to_string()).await;
            return report;
        }

        let split = match tokio::task::spawn_blocking(move || source.load()).await {
            Ok(Ok(split)) => split,
            Ok(Err(e)) => {
                self.fail(&mut report, Stage::Loading, e.to_string()).await;
                return report;
            }
            Err(e) => {
                self.fail(&mut report, Stage::Loading, join_message(e)).await;
                return report;
            }
        };

        self.set_state(&mut report, ConfigState::Training);
        let scorer = match self.train(algorithm.build(), &split).await {
            Ok(scorer) => scorer,
            Err(e) => {
                self.fail(&mut report, Stage::Training, e).await;
                return report;
            }
        };

        self.set_state(&mut report, ConfigState::Scoring);
        let selector = match self.candidates {
            CandidateMode::AllTrainingItems => CandidateSelector::all_training_items(&split.train),
            CandidateMode::UnratedTrainingItems => {
                CandidateSelector::unrated_training_items(&split.train)
            }
        };
        let queries = split.queries();
        report.n_queries = queries.len();
        let runner = BatchRunner::new(self.budget.clone())
            .with_cancel(self.cancel.clone())
            .with_timeout(self.timeout)
            .with_candidates(selector);

        // lists are measured and their rows sent while later queries still score
        let (outcome_tx, outcome_rx) = mpsc::channel(self.outcome_capacity);
        let stream = OutcomeStream {
            analysis: self.analysis.clone(),
            key: key.clone(),
            rows: self.tx.clone(),
            ordered: self.ordered_output,
            keep_lists: self.analysis.has_global_metrics(),
        };
        let measurer = tokio::task::spawn_blocking(move || stream.drain(outcome_rx, &split));
        runner
            .run_streaming(Arc::from(scorer), &queries, self.n, outcome_tx)
            .await;
        let drained = match measurer.await {
            Ok(drained) => drained,
            Err(e) => {
                self.fail(&mut report, Stage::Measuring, join_message(e)).await;
                return report;
            }
        };
        report.n_scored = drained.n_scored;
        report.n_failed = drained.n_failed;

        // rows for every finished query are already out
        if self.cancel.is_cancelled() {
            self.fail(&mut report, Stage::Scoring, "run cancelled".to_string()).await;
            return report;
        }
        self.set_state(&mut report, ConfigState::Scored);

        let Drained {
            lists, recs, tests, ..
        } = drained;
        let analysis = self.analysis.clone();
        let global = tokio::task::spawn_blocking(move || {
            let recs: Vec<&ItemList> = recs.iter().collect();
            let tests: Vec<&ItemList> = tests.iter().collect();
            analysis.measure_global(&recs, &tests)
        })
        .await;
        let global = match global {
            Ok(global) => global,
            Err(e) => {
                self.fail(&mut report, Stage::Measuring, join_message(e)).await;
                return report;
            }
        };
        for (label, value) in &global {
            self.emit(ResultRow {
                algorithm: key.algorithm.clone(),
                split: key.split.clone(),
                query: None,
                metric: Some(label.clone()),
                value: value.as_ref().ok().copied(),
                error: value.as_ref().err().map(ToString::to_string),
            })
            .await;
        }

        report.summary = AnalysisResult { lists, global }.summary();
        report.duration = start.elapsed();
        self.set_state(&mut report, ConfigState::Aggregated);
        info!(
            "[Eval] {} aggregated: {}/{} queries scored in {:?}",
            key, report.n_scored, report.n_queries, report.duration
        );
        report
    }

    /// Train on a blocking thread under one budget slot.
    async fn train(&self, mut scorer: Box<dyn Scorer>, split: &Split) -> Result<Box<dyn Scorer>, String> {
        if !scorer.requires_training() {
            debug!("[Eval] '{}' needs no training", scorer.name());
            return Ok(scorer);
        }
        let Some(permit) = self.budget.acquire(&self.cancel).await else {
            return Err("run cancelled".to_string());
        };
        let train = Arc::clone(&split.train);
        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let result = scorer.train(&train);
            (scorer, result)
        })
        .await;
        match joined {
            Ok((scorer, Ok(()))) => Ok(scorer),
            Ok((_, Err(e))) => Err(e.to_string()),
            Err(e) => Err(join_message(e)),
        }
    }

    fn set_state(&self, report: &mut ConfigReport, state: ConfigState) {
        debug!("[Eval] {} -> {:?}", report.key, state);
        self.status.insert(report.key.clone(), state.clone());
        report.state = state;
    }

    async fn fail(&self, report: &mut ConfigReport, stage: Stage, message: String) {
        error!("[Eval] {} failed during {}: {}", report.key, stage, message);
        self.emit(ResultRow {
            algorithm: report.key.algorithm.clone(),
            split: report.key.split.clone(),
            query: None,
            metric: None,
            value: None,
            error: Some(format!("{}: {}", stage, message)),
        })
        .await;
        self.set_state(
            report,
            ConfigState::Failed {
                stage,
                error: message,
            },
        );
    }

    async fn emit(&self, row: ResultRow) {
        if self.tx.send(row).await.is_err() {
            warn!("[Eval] Result consumer gone, dropping row");
        }
    }
}

/// Most outcomes measured in one parallel pass.
const MEASURE_CHUNK: usize = 64;

/// Measures a configuration's outcomes as the batch yields them and sends
/// each query's rows on. Runs on a blocking thread beside the batch.
struct OutcomeStream {
    analysis: RunAnalysis,
    key: ConfigKey,
    rows: mpsc::Sender<ResultRow>,
    ordered: bool,
    /// Keep scored lists for the global metrics
    keep_lists: bool,
}

#[derive(Debug, Default)]
struct Drained {
    lists: Vec<MeasuredList>,
    recs: Vec<ItemList>,
    tests: Vec<ItemList>,
    n_scored: usize,
    n_failed: usize,
}

impl OutcomeStream {
    fn drain(&self, mut rx: mpsc::Receiver<QueryOutcome>, split: &Split) -> Drained {
        let mut drained = Drained::default();
        let mut reorder = Reorder::default();
        while let Some(first) = rx.blocking_recv() {
            let mut chunk = vec![first];
            while chunk.len() < MEASURE_CHUNK {
                match rx.try_recv() {
                    Ok(outcome) => chunk.push(outcome),
                    Err(_) => break,
                }
            }
            if self.ordered {
                chunk = reorder.release(chunk);
            }
            self.measure_chunk(chunk, split, &mut drained);
        }
        self.measure_chunk(reorder.finish(), split, &mut drained);
        debug!(
            "[Eval] {} drained: {} scored, {} failed",
            self.key, drained.n_scored, drained.n_failed
        );
        drained
    }

    /// Measure the scored lists of `chunk` in parallel, then send rows in
    /// chunk order: a failure row or the list's metric rows per query.
    fn measure_chunk(&self, chunk: Vec<QueryOutcome>, split: &Split, drained: &mut Drained) {
        if chunk.is_empty() {
            return;
        }
        let empty = ItemList::empty(false);
        let test_for = |query: &str| split.test.get(query).unwrap_or(&empty);
        let mut measured = {
            let pairs: Vec<(&str, &ItemList, &ItemList)> = chunk
                .iter()
                .filter_map(|o| {
                    let list = o.result.as_ref().ok()?;
                    Some((o.query.as_str(), list, test_for(o.query.as_str())))
                })
                .collect();
            self.analysis.measure_pairs(&pairs)
        }
        .into_iter();

        for outcome in chunk {
            match outcome.result {
                Ok(list) => {
                    drained.n_scored += 1;
                    let Some(values) = measured.next() else {
                        continue;
                    };
                    for (label, value) in &values.values {
                        self.send(ResultRow {
                            algorithm: self.key.algorithm.clone(),
                            split: self.key.split.clone(),
                            query: Some(outcome.query.clone()),
                            metric: Some(label.clone()),
                            value: value.as_ref().ok().copied(),
                            error: value.as_ref().err().map(ToString::to_string),
                        });
                    }
                    if self.keep_lists {
                        drained.tests.push(test_for(outcome.query.as_str()).clone());
                        drained.recs.push(list);
                    }
                    drained.lists.push(values);
                }
                Err(e) => {
                    drained.n_failed += 1;
                    self.send(ResultRow {
                        algorithm: self.key.algorithm.clone(),
                        split: self.key.split.clone(),
                        query: Some(outcome.query),
                        metric: None,
                        value: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
    }

    fn send(&self, row: ResultRow) {
        if self.rows.blocking_send(row).is_err() {
            warn!("[Eval] Result consumer gone, dropping row");
        }
    }
}

/// Holds outcomes back until every earlier query has been released.
#[derive(Debug, Default)]
struct Reorder {
    next: usize,
    held: BTreeMap<usize, QueryOutcome>,
}

impl Reorder {
    fn release(&mut self, chunk: Vec<QueryOutcome>) -> Vec<QueryOutcome> {
        self.held.extend(chunk.into_iter().map(|o| (o.index, o)));
        let mut ready = Vec::new();
        while let Some(outcome) = self.held.remove(&self.next) {
            ready.push(outcome);
            self.next += 1;
        }
        ready
    }

    /// Whatever is still held, in query order.
    fn finish(self) -> Vec<QueryOutcome> {
        self.held.into_values().collect()
    }
}

#[derive(Debug, Default)]
struct SinkStats {
    written: usize,
    errors: usize,
}

/// Drain the result channel into the sink. Runs on a blocking thread.
fn consume<S: ResultSink>(mut rx: mpsc::Receiver<ResultRow>, mut sink: S) -> SinkStats {
    let mut stats = SinkStats::default();
    while let Some(row) = rx.blocking_recv() {
        match sink.write(&row) {
            Ok(()) => stats.written += 1,
            Err(e) => {
                stats.errors += 1;
                warn!("[Sink] Failed to write row for {}/{}: {}", row.algorithm, row.split, e);
            }
        }
    }
    if let Err(e) = sink.flush() {
        stats.errors += 1;
        warn!("[Sink] Flush failed: {}", e);
    }
    stats
}

fn join_message(e: JoinError) -> String {
    if e.is_panic() {
        format!("panicked: {}", panic_message(e.into_panic()))
    } else {
        e.to_string()
    }
}
