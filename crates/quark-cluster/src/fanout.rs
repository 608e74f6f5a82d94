//! Fan-out executor: one task per instance, joined before the next phase.
//!
//! Tasks run on a [`JoinSet`] bounded by a semaphore. Joining always
//! waits for every task, and the [`FanOutReport`] keeps every outcome so
//! the caller chooses between "first error wins" and a full report.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::warn;

use quark_core::{Error, ErrorKind, Result};

pub const DEFAULT_MAX_PARALLELISM: usize = 16;

/// Outcome of one fan-out task.
#[derive(Debug)]
pub struct Outcome<T> {
    /// Position in spawn order.
    pub index: usize,
    pub label: String,
    pub result: Result<T>,
}

pub struct FanOut<T> {
    semaphore: Arc<Semaphore>,
    set: JoinSet<Result<T>>,
    labels: HashMap<Id, (usize, String)>,
    spawned: usize,
}

impl<T: Send + 'static> Default for FanOut<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> FanOut<T> {
    pub fn new() -> Self {
        Self::with_parallelism(DEFAULT_MAX_PARALLELISM)
    }

    pub fn with_parallelism(max_parallelism: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_parallelism.max(1))),
            set: JoinSet::new(),
            labels: HashMap::new(),
            spawned: 0,
        }
    }

    /// Spawn a task now; it starts running once a permit is free.
    pub fn spawn<F>(&mut self, label: impl Into<String>, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let handle = self.set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| Error::internal("fan-out semaphore closed"))?;
            task.await
        });
        self.labels.insert(handle.id(), (self.spawned, label.into()));
        self.spawned += 1;
    }

    pub fn len(&self) -> usize {
        self.spawned
    }

    pub fn is_empty(&self) -> bool {
        self.spawned == 0
    }

    /// Wait for every task. Outcomes are kept in completion order.
    pub async fn join(mut self) -> FanOutReport<T> {
        let mut outcomes = Vec::with_capacity(self.spawned);
        while let Some(joined) = self.set.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(join_err) => {
                    let id = join_err.id();
                    let kind = if join_err.is_cancelled() {
                        ErrorKind::Cancelled
                    } else {
                        ErrorKind::Internal
                    };
                    (id, Err(Error::with_source(kind, "fan-out task aborted", join_err)))
                }
            };
            let (index, label) = self
                .labels
                .remove(&id)
                .unwrap_or_else(|| (usize::MAX, "<unknown>".to_string()));
            outcomes.push(Outcome {
                index,
                label,
                result,
            });
        }
        FanOutReport { outcomes }
    }
}

/// Every task's outcome from one fan-out phase.
#[derive(Debug)]
pub struct FanOutReport<T> {
    outcomes: Vec<Outcome<T>>,
}

impl<T> FanOutReport<T> {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn outcomes(&self) -> &[Outcome<T>] {
        &self.outcomes
    }

    /// The first failure in completion order.
    pub fn first_error(&self) -> Option<(&str, &Error)> {
        self.errors().into_iter().next()
    }

    pub fn errors(&self) -> Vec<(&str, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.label.as_str(), e)))
            .collect()
    }

    pub fn successes(&self) -> Vec<(&str, &T)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|v| (o.label.as_str(), v)))
            .collect()
    }

    /// Strict semantics: the first observed error wins; otherwise every
    /// value, in spawn order.
    pub fn into_result(self) -> Result<Vec<T>> {
        let total = self.outcomes.len();
        let failed = self.outcomes.iter().filter(|o| o.result.is_err()).count();
        let mut ok = Vec::with_capacity(total);
        for outcome in self.outcomes {
            match outcome.result {
                Ok(v) => ok.push((outcome.index, v)),
                Err(e) => {
                    if failed > 1 {
                        warn!(failed, total, "fan-out had several failures, reporting the first");
                    }
                    return Err(e.context(format!("{} failed", outcome.label)));
                }
            }
        }
        ok.sort_by_key(|(i, _)| *i);
        Ok(ok.into_iter().map(|(_, v)| v).collect())
    }

    /// Successful values in spawn order; failures are dropped.
    pub fn into_values(self) -> Vec<T> {
        let mut ok: Vec<(usize, T)> = self
            .outcomes
            .into_iter()
            .filter_map(|o| o.result.ok().map(|v| (o.index, v)))
            .collect();
        ok.sort_by_key(|(i, _)| *i);
        ok.into_iter().map(|(_, v)| v).collect()
    }
}
