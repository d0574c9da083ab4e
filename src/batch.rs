//! Batch runner: applies a trained scorer to many queries in parallel and
//! turns each result into a ranked top-N list.
//!
//! Every query yields exactly one [`QueryOutcome`], success or failure. A
//! failing, panicking, timed-out or cancelled query is recorded and the
//! batch continues; there are no retries.

use crate::data::{Query, QueryId};
use crate::error::QueryError;
use crate::items::ItemList;
use crate::pool::{CancelToken, ScoringBudget};
use crate::scorer::{CandidateSelector, Scorer};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

/// The result of scoring one query.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// Position of the query in the input
    pub index: usize,
    pub query: QueryId,
    pub result: Result<ItemList, QueryError>,
}

/// Outcomes of a batch, one per input query, in completion order until
/// [`into_ordered`](BatchResults::into_ordered) is called.
#[derive(Debug, Clone, Default)]
pub struct BatchResults {
    outcomes: Vec<QueryOutcome>,
    // first outcome position per query ID
    positions: HashMap<QueryId, usize>,
}

impl BatchResults {
    pub fn from_outcomes(outcomes: Vec<QueryOutcome>) -> Self {
        let mut positions = HashMap::with_capacity(outcomes.len());
        for (pos, o) in outcomes.iter().enumerate() {
            positions.entry(o.query.clone()).or_insert(pos);
        }
        Self {
            outcomes,
            positions,
        }
    }

    pub fn outcomes(&self) -> &[QueryOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<QueryOutcome> {
        self.outcomes
    }

    /// Reorder outcomes to match the input query order.
    pub fn into_ordered(mut self) -> Self {
        self.outcomes.sort_by_key(|o| o.index);
        Self::from_outcomes(self.outcomes)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, query: &str) -> Option<&Result<ItemList, QueryError>> {
        self.positions
            .get(query)
            .map(|&pos| &self.outcomes[pos].result)
    }

    /// Successfully scored lists.
    pub fn lists(&self) -> IndexMap<QueryId, ItemList> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|l| (o.query.clone(), l.clone())))
            .collect()
    }

    /// Failed queries and why.
    pub fn failures(&self) -> IndexMap<QueryId, QueryError> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.query.clone(), e.clone())))
            .collect()
    }

    pub fn n_scored(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn n_failed(&self) -> usize {
        self.outcomes.len() - self.n_scored()
    }

    pub fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.n_failed() as f64 / self.outcomes.len() as f64
        }
    }
}

/// Runs a scorer over a batch of queries.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    budget: ScoringBudget,
    cancel: CancelToken,
    timeout: Option<Duration>,
    candidates: Option<CandidateSelector>,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new(ScoringBudget::default())
    }
}

impl BatchRunner {
    /// A runner drawing scoring slots from `budget`. Share one budget
    /// between runners to cap their combined concurrency.
    pub fn new(budget: ScoringBudget) -> Self {
        Self {
            budget,
            cancel: CancelToken::new(),
            timeout: None,
            candidates: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Candidate items for queries that carry none of their own.
    pub fn with_candidates(mut self, selector: CandidateSelector) -> Self {
        self.candidates = Some(selector);
        self
    }

    fn candidates_for(&self, query: &Query) -> ItemList {
        match (&query.candidates, &self.candidates) {
            (Some(c), _) => c.clone(),
            (None, Some(selector)) => selector.select(query),
            (None, None) => ItemList::empty(false),
        }
    }

    /// Score every query and keep its top `n` items (all if `None`).
    ///
    /// The scorer must already be trained and must not be retrained while
    /// the batch runs.
    pub async fn run(
        &self,
        scorer: Arc<dyn Scorer>,
        queries: &[Query],
        n: Option<usize>,
    ) -> BatchResults {
        let (tx, mut rx) = mpsc::channel(queries.len().max(1));
        let collect = async {
            let mut outcomes = Vec::with_capacity(queries.len());
            while let Some(outcome) = rx.recv().await {
                outcomes.push(outcome);
            }
            outcomes
        };
        let (_, outcomes) = tokio::join!(self.run_streaming(scorer, queries, n, tx), collect);
        BatchResults::from_outcomes(outcomes)
    }

    /// Like [`run`](Self::run), but sends each outcome on `tx` as soon as
    /// its query finishes, in completion order. Returns the number of
    /// outcomes sent, one per query unless the receiver went away.
    pub async fn run_streaming(
        &self,
        scorer: Arc<dyn Scorer>,
        queries: &[Query],
        n: Option<usize>,
        tx: mpsc::Sender<QueryOutcome>,
    ) -> usize {
        let start = Instant::now();
        info!(
            "[Batch] Scoring {} queries with '{}' (n={:?}, budget={})",
            queries.len(),
            scorer.name(),
            n,
            self.budget.max_concurrent()
        );

        let mut reported = vec![false; queries.len()];
        let mut sent = 0;
        let mut failed = 0;
        let mut tasks = JoinSet::new();

        for (index, query) in queries.iter().enumerate() {
            // waiting here keeps at most `budget` scoring calls alive at once
            let Some(permit) = self.budget.acquire(&self.cancel).await else {
                reported[index] = true;
                failed += 1;
                sent += send(&tx, QueryOutcome {
                    index,
                    query: query.id.clone(),
                    result: Err(QueryError::Cancelled),
                })
                .await;
                continue;
            };

            let scorer = Arc::clone(&scorer);
            let candidates = self.candidates_for(query);
            let query = query.clone();
            let timeout = self.timeout;
            let tx = tx.clone();

            tasks.spawn(async move {
                let id = query.id.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    // the slot is held until the call returns, even past a timeout
                    let _permit = permit;
                    score_query(scorer.as_ref(), &query, &candidates, n)
                });
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, handle).await {
                        Ok(joined) => flatten(joined),
                        Err(_) => Err(QueryError::TimedOut(limit)),
                    },
                    None => flatten(handle.await),
                };
                let ok = result.is_ok();
                let delivered = send(&tx, QueryOutcome {
                    index,
                    query: id,
                    result,
                })
                .await;
                (index, ok, delivered)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, ok, delivered)) => {
                    reported[index] = true;
                    sent += delivered;
                    if !ok {
                        failed += 1;
                    }
                }
                Err(e) => warn!("[Batch] Scoring task lost: {}", e),
            }
        }

        // any query whose task vanished is still reported once
        for (index, query) in queries.iter().enumerate().filter(|(i, _)| !reported[*i]) {
            failed += 1;
            sent += send(&tx, QueryOutcome {
                index,
                query: query.id.clone(),
                result: Err(QueryError::Panicked("scoring task aborted".to_string())),
            })
            .await;
        }

        info!(
            "[Batch] Scored {}/{} queries in {:?} ({} failed)",
            queries.len() - failed,
            queries.len(),
            start.elapsed(),
            failed
        );
        sent
    }
}

async fn send(tx: &mpsc::Sender<QueryOutcome>, outcome: QueryOutcome) -> usize {
    if let Err(e) = &outcome.result {
        warn!("[Batch] Query {} failed: {}", outcome.query, e);
    }
    match tx.send(outcome).await {
        Ok(()) => 1,
        Err(_) => 0,
    }
}

/// Score one query and rank its top `n`. Runs on a blocking thread.
fn score_query(
    scorer: &dyn Scorer,
    query: &Query,
    candidates: &ItemList,
    n: Option<usize>,
) -> Result<ItemList, QueryError> {
    debug!(
        "[Batch] Scoring query {} over {} candidates",
        query.id,
        candidates.len()
    );
    let scored = scorer.score(query, candidates)?;
    Ok(scored.rank_top_n(n)?)
}

fn flatten(joined: Result<Result<ItemList, QueryError>, JoinError>) -> Result<ItemList, QueryError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(QueryError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(QueryError::Panicked(e.to_string())),
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Recommend top-`n` lists for `queries` with a default runner.
pub async fn recommend(
    scorer: Arc<dyn Scorer>,
    queries: &[Query],
    n: Option<usize>,
) -> BatchResults {
    BatchRunner::default().run(scorer, queries, n).await
}
