//! Concurrent fan-out/collect task pool
//!
//! Units are spawned onto a tokio runtime as soon as they are submitted.
//! A barrier (`collect_all` and friends) waits for every unit submitted
//! since the previous barrier, then clears the pending registry. A failing
//! unit never aborts its siblings: its error only surfaces when its result
//! is retrieved.

use crate::error::ScoringError;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outcome delivered to a completion callback
#[derive(Debug)]
pub enum Completion<'a, T> {
    /// The unit returned a value
    Finished(&'a T),
    /// The unit returned an error
    Failed(&'a anyhow::Error),
    /// Re-notification without a result after the callback itself failed
    Bare,
}

/// Best-effort notification invoked once per finished unit
pub type CompletionCallback<T> =
    Arc<dyn Fn(Completion<'_, T>) -> anyhow::Result<()> + Send + Sync>;

/// Identifies a submitted unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    id: usize,
}

impl TaskHandle {
    pub fn id(&self) -> usize {
        self.id
    }
}

struct PendingUnit<T> {
    handle: TaskHandle,
    join: JoinHandle<anyhow::Result<T>>,
}

/// Worker pool with unbounded submission
pub struct TaskPool<T> {
    runtime: Handle,
    pending: Vec<PendingUnit<T>>,
    next_id: usize,
}

impl<T: Send + 'static> TaskPool<T> {
    /// Create a pool that schedules units on the given runtime
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: Vec::new(),
            next_id: 0,
        }
    }

    /// Schedule a unit; execution begins immediately on the runtime
    pub fn submit<F>(&mut self, unit: F) -> TaskHandle
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.spawn(unit, None)
    }

    /// Schedule a unit and notify `callback` once it finishes
    pub fn submit_with_callback<F>(&mut self, unit: F, callback: CompletionCallback<T>) -> TaskHandle
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.spawn(unit, Some(callback))
    }

    fn spawn<F>(&mut self, unit: F, callback: Option<CompletionCallback<T>>) -> TaskHandle
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let handle = TaskHandle { id: self.next_id };
        self.next_id += 1;

        let join = self.runtime.spawn(async move {
            let result = unit.await;
            if let Some(callback) = callback {
                notify(handle, &callback, &result);
            }
            result
        });

        self.pending.push(PendingUnit { handle, join });
        handle
    }

    /// Number of units submitted since the last barrier
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every pending unit and return each unit's own result
    pub async fn join_all(&mut self) -> Vec<(TaskHandle, Result<T, ScoringError>)> {
        let pending = std::mem::take(&mut self.pending);
        let mut results = Vec::with_capacity(pending.len());

        for unit in pending {
            let id = unit.handle.id;
            let result = match unit.join.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(ScoringError::PoolTask {
                    index: id,
                    message: format!("{:#}", e),
                }),
                Err(join_error) => Err(ScoringError::PoolTask {
                    index: id,
                    message: join_error.to_string(),
                }),
            };
            results.push((unit.handle, result));
        }

        results
    }

    /// Barrier returning one result per unit, in submission order
    ///
    /// Every unit runs to completion before the first failure, if any, is
    /// returned.
    pub async fn collect_all(&mut self) -> Result<Vec<T>, ScoringError> {
        self.join_all()
            .await
            .into_iter()
            .map(|(_, result)| result)
            .collect()
    }

    /// Stop tracking the pending units without waiting for them
    ///
    /// The units keep running on the runtime. Returns how many were detached.
    pub fn detach(&mut self) -> usize {
        let detached = self.pending.len();
        self.pending.clear();
        debug!(detached, "Detached pending units");
        detached
    }
}

impl<T: Send + 'static> TaskPool<Option<T>> {
    /// Barrier that drops units whose result is `None`
    pub async fn collect_non_null(&mut self) -> Result<Vec<T>, ScoringError> {
        Ok(self.collect_all().await?.into_iter().flatten().collect())
    }
}

impl<I> TaskPool<I>
where
    I: IntoIterator + Send + 'static,
{
    /// Barrier that flattens every unit's sequence into one
    pub async fn collect_merged(&mut self) -> Result<Vec<I::Item>, ScoringError> {
        Ok(self.collect_all().await?.into_iter().flatten().collect())
    }
}

fn notify<T>(handle: TaskHandle, callback: &CompletionCallback<T>, result: &anyhow::Result<T>) {
    let completion = match result {
        Ok(value) => Completion::Finished(value),
        Err(e) => Completion::Failed(e),
    };

    if let Err(e) = callback(completion) {
        warn!(task = handle.id, error = %e, "Completion callback failed, notifying without result");
        if let Err(e) = callback(Completion::Bare) {
            debug!(task = handle.id, error = %e, "Completion callback failed again");
        }
    }
}
