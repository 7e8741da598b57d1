//! Task submission and cancellation.
//!
//! Submission only validates, records and enqueues. It never touches an AI
//! engine, so it returns in constant time regardless of pipeline length.

use std::sync::Arc;

use tracing::{info, warn};

use lingo_models::{ProgressUpdate, Task, TaskId, TaskInput, TaskKind, TaskState, TaskStatus};

use crate::error::{DispatchError, DispatchResult, QueueError, RegistryError};
use crate::progress::ProgressStore;
use crate::queue::LeaseQueue;
use crate::tasks::{CancelOutcome, TaskRegistry};

/// Acknowledgement of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelAck {
    pub task_id: TaskId,
    pub outcome: CancelOutcome,
}

#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<LeaseQueue>,
    registry: Arc<TaskRegistry>,
    progress: Arc<ProgressStore>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<LeaseQueue>,
        registry: Arc<TaskRegistry>,
        progress: Arc<ProgressStore>,
    ) -> Self {
        Self {
            queue,
            registry,
            progress,
        }
    }

    /// Validate, freeze and enqueue a task.
    pub async fn submit(&self, kind: TaskKind, input: TaskInput) -> DispatchResult<TaskId> {
        input.validate(kind)?;

        let task = Task::new(kind, Arc::new(input));
        let task_id = task.id.clone();
        let video_id = task.input.video_id.clone();

        self.registry.insert(task).await;
        if let Err(e) = self
            .progress
            .record(
                &task_id,
                ProgressUpdate::lifecycle(0, TaskState::Pending, 0.0, "queued"),
            )
            .await
        {
            self.registry.remove(&task_id).await;
            return Err(e.into());
        }

        if let Err(e) = self.queue.push(task_id.clone()).await {
            self.registry.remove(&task_id).await;
            self.progress.purge(&task_id).await;
            return Err(match e {
                QueueError::Saturated { capacity } => {
                    warn!(task_id = %task_id, capacity, "Queue saturated, submission rejected");
                    DispatchError::QueueSaturated { capacity }
                }
                _ => DispatchError::ShuttingDown,
            });
        }

        info!(
            task_id = %task_id,
            kind = kind.as_str(),
            video_id = %video_id,
            "Task submitted"
        );
        Ok(task_id)
    }

    /// Cancel a task. A waiting task is removed from the queue and failed
    /// right away; a running one is signalled cooperatively.
    pub async fn cancel(&self, task_id: &TaskId) -> DispatchResult<CancelAck> {
        let removed = self.queue.remove(task_id).await;
        let outcome = match self.registry.cancel(task_id, removed).await {
            Ok(outcome) => outcome,
            Err(RegistryError::NotFound(id)) => return Err(DispatchError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };
        Ok(CancelAck {
            task_id: task_id.clone(),
            outcome,
        })
    }

    pub async fn status(&self, task_id: &TaskId) -> DispatchResult<TaskStatus> {
        self.registry
            .status(task_id)
            .await
            .ok_or_else(|| DispatchError::NotFound(task_id.clone()))
    }
}
