//! Queue, registry and dispatch error types.

use thiserror::Error;

use lingo_models::{ErrorKind, TaskId, TaskState, ValidationError};

pub type QueueResult<T> = Result<T, QueueError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
pub type ProgressResult<T> = Result<T, ProgressError>;
pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue saturated ({capacity} entries)")]
    Saturated { capacity: usize },

    #[error("Queue closed")]
    Closed,

    /// The lease expired and was handed to someone else, or was never issued.
    #[error("Unknown or expired lease for task {0}")]
    UnknownLease(TaskId),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// Write attempted with a lease token that no longer owns the task.
    #[error("Stale lease for task {0}")]
    StaleLease(TaskId),

    #[error("Task {task_id} is already {state}")]
    Terminal { task_id: TaskId, state: TaskState },

    #[error("Task {0} was cancelled before the attempt started")]
    Cancelled(TaskId),
}

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Task {0} already recorded a terminal event")]
    AfterTerminal(TaskId),

    #[error("Event for attempt {attempt} of task {task_id} is older than attempt {current}")]
    StaleAttempt {
        task_id: TaskId,
        attempt: u32,
        current: u32,
    },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Queue saturated ({capacity} entries), retry later")]
    QueueSaturated { capacity: usize },

    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Validation(_) | DispatchError::NotFound(_) => ErrorKind::Permanent,
            DispatchError::QueueSaturated { .. } | DispatchError::ShuttingDown => {
                ErrorKind::ResourceExhausted
            }
            DispatchError::Progress(_) | DispatchError::Registry(_) => ErrorKind::Permanent,
        }
    }
}
