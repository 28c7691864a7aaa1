//! Bounded-concurrency execution of one stage over a batch of work items

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::pipeline::Stage;

/// Anything a stage can be run over; the label identifies the item in logs and failure reports.
pub trait WorkItem: Send + 'static {
    fn label(&self) -> String;
}

impl WorkItem for String {
    fn label(&self) -> String {
        self.clone()
    }
}

#[derive(Debug)]
pub struct TaskSuccess<T> {
    /// Position in the input batch
    pub index: usize,
    pub item: String,
    pub value: T,
}

#[derive(Debug)]
pub struct TaskFailure {
    pub index: usize,
    pub item: String,
    pub error: PipelineError,
}

impl TaskFailure {
    pub fn describe(&self) -> String {
        format!("{}: {}", self.item, self.error)
    }
}

/// Settled stage: successes and failures, both in original item order
#[derive(Debug)]
pub struct StageOutcome<T> {
    pub stage: Stage,
    pub total: usize,
    pub dispatched: usize,
    pub successes: Vec<TaskSuccess<T>>,
    pub failures: Vec<TaskFailure>,
}

impl<T> StageOutcome<T> {
    fn empty(stage: Stage) -> Self {
        Self {
            stage,
            total: 0,
            dispatched: 0,
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.successes.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Items were given but none of them succeeded
    pub fn is_total_failure(&self) -> bool {
        self.total > 0 && self.successes.is_empty()
    }

    pub fn summary(&self) -> StageSummary {
        StageSummary {
            stage: self.stage,
            total: self.total,
            succeeded: self.succeeded(),
            failed: self.failed(),
            failures: self.failures.iter().map(TaskFailure::describe).collect(),
        }
    }

    pub fn values(self) -> impl Iterator<Item = T> {
        self.successes.into_iter().map(|s| s.value)
    }
}

/// Per-stage counts reported at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<String>,
}

impl StageSummary {
    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            total: 0,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Run `task` over `items` with at most `max_parallelism` in flight.
///
/// A failing (or panicking) task is recorded and never stops its siblings. Once `cancel`
/// fires no further item is dispatched; in-flight tasks run to completion and the
/// undispatched items are recorded as `Cancelled` failures.
pub async fn run_stage<I, T, F, Fut>(
    stage: Stage,
    items: Vec<I>,
    task: F,
    max_parallelism: usize,
    cancel: &CancellationToken,
) -> StageOutcome<T>
where
    I: WorkItem,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        debug!("{} stage: nothing to do", stage);
        return StageOutcome::empty(stage);
    }

    let parallelism = max_parallelism.clamp(1, total);
    info!(
        "{} stage: dispatching {} item(s), parallelism {}",
        stage, total, parallelism
    );

    let semaphore = Arc::new(Semaphore::new(parallelism));
    let task = Arc::new(task);
    let labels: Vec<String> = items.iter().map(WorkItem::label).collect();
    let mut handles: Vec<(usize, JoinHandle<Result<T>>)> = Vec::with_capacity(total);

    for (index, item) in items.into_iter().enumerate() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            warn!("{} stage: cancelled after dispatching {}/{} item(s)", stage, index, total);
            break;
        };

        let task = Arc::clone(&task);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            AssertUnwindSafe(async move { task(item).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(PipelineError::Internal {
                        message: format!("task panicked: {}", panic_message(panic)),
                    })
                })
        });
        handles.push((index, handle));
    }

    let dispatched = handles.len();
    let mut successes = Vec::with_capacity(dispatched);
    let mut failures = Vec::new();

    for (index, handle) in handles {
        let outcome = handle.await.unwrap_or_else(|e| {
            Err(PipelineError::Internal {
                message: format!("task join error: {}", e),
            })
        });
        match outcome {
            Ok(value) => successes.push(TaskSuccess {
                index,
                item: labels[index].clone(),
                value,
            }),
            Err(error) => {
                warn!(
                    stage = %stage,
                    item = %labels[index],
                    kind = error.kind(),
                    "Task failed: {}",
                    error
                );
                failures.push(TaskFailure {
                    index,
                    item: labels[index].clone(),
                    error,
                });
            }
        }
    }

    for (index, label) in labels.iter().enumerate().skip(dispatched) {
        failures.push(TaskFailure {
            index,
            item: label.clone(),
            error: PipelineError::Cancelled,
        });
    }

    info!(
        "{} stage settled: total={} succeeded={} failed={}",
        stage,
        total,
        successes.len(),
        failures.len()
    );
    StageOutcome {
        stage,
        total,
        dispatched,
        successes,
        failures,
    }
}
