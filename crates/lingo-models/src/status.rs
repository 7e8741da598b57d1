//! Caller-facing task status and error shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::task::{Task, TaskId, TaskKind, TaskResult, TaskState};

/// Maximum length of a user-visible error message.
pub const MAX_ERROR_MESSAGE_LEN: usize = 240;

/// Error taxonomy shared by every crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, timeout, rate limit. Retryable.
    Transient,
    /// Bad input, unsupported format. Not retryable.
    Permanent,
    /// Queue full or pool saturated. Caller backs off and resubmits.
    ResourceExhausted,
    /// Cooperative cancellation observed.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error summary recorded on a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    /// Build an error summary, keeping only the first line and capping length.
    pub fn new(kind: ErrorKind, message: impl AsRef<str>) -> Self {
        let first_line = message.as_ref().lines().next().unwrap_or("").trim();
        let message = if first_line.chars().count() > MAX_ERROR_MESSAGE_LEN {
            let truncated: String = first_line.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
            format!("{}...", truncated)
        } else {
            first_line.to_string()
        };
        Self { kind, message }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled")
    }
}

/// Point-in-time status of a task, as returned by polling or pushed to
/// subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub state: TaskState,
    /// Progress percentage (0-100)
    pub progress: f64,
    pub message: String,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub updated_at: DateTime<Utc>,
}

impl TaskStatus {
    /// Build a status from the task record and the latest progress message.
    pub fn from_task(task: &Task, message: impl Into<String>) -> Self {
        Self {
            task_id: task.id.clone(),
            kind: task.kind,
            state: task.state,
            progress: task.progress.clamp(0.0, 100.0),
            message: message.into(),
            attempt: task.attempt,
            result: if task.state == TaskState::Success {
                task.result.clone()
            } else {
                None
            },
            error: if task.state == TaskState::Failure {
                task.error.clone()
            } else {
                None
            },
            updated_at: task.updated_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskInput;
    use std::sync::Arc;

    #[test]
    fn test_error_message_is_single_line_and_capped() {
        let long = format!("boom\n   at frame 1\n{}", "x".repeat(10));
        let err = TaskError::new(ErrorKind::Transient, long);
        assert_eq!(err.message, "boom");

        let err = TaskError::new(ErrorKind::Permanent, "y".repeat(500));
        assert!(err.message.len() <= MAX_ERROR_MESSAGE_LEN + 3);
    }

    #[test]
    fn test_status_hides_result_unless_success() {
        let input = Arc::new(TaskInput::new("v", "/m.mp4", 0.0, 10.0, "u"));
        let mut task = Task::new(TaskKind::ChunkTranscription, input);
        task.result = Some(TaskResult::default());
        task.state = TaskState::Progress;
        assert!(TaskStatus::from_task(&task, "").result.is_none());

        task.state = TaskState::Success;
        assert!(TaskStatus::from_task(&task, "").result.is_some());
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::ResourceExhausted).unwrap();
        assert_eq!(json, "\"resource_exhausted\"");
        assert!(ErrorKind::Transient.is_retryable());
        assert!(!ErrorKind::Permanent.is_retryable());
    }
}
