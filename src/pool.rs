//! Shared concurrency budget and run-level cancellation.
//!
//! One [`ScoringBudget`] is created per run and handed to every batch
//! runner the run spawns, so nested parallelism (configurations running
//! their own query pools) never exceeds the configured number of in-flight
//! scoring calls.

use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct ScoringBudget {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl ScoringBudget {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Wait for a slot. Returns `None` if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancelToken) -> Option<OwnedSemaphorePermit> {
        if cancel.is_cancelled() {
            return None;
        }
        let mut cancel = cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for ScoringBudget {
    fn default() -> Self {
        Self::new(crate::config::EngineConfig::default().max_concurrency)
    }
}

/// Clonable run-level cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&mut self) {
        // the sender lives in self, so wait_for only fails after cancel
        let _ = self.rx.wait_for(|c| *c).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
