//! Progress events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::ChunkStatus;
use crate::task::{TaskId, TaskState};

/// One immutable entry in a task's progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    /// Strictly increasing per task, starting at 1
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    /// Attempt the event belongs to (0 before any worker started)
    pub attempt: u32,
    pub state: TaskState,
    /// Chunk stage just completed, if the event comes from the pipeline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<ChunkStatus>,
    /// 1-based chunk index for pipeline events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    /// Progress percentage (0-100)
    pub percent: f64,
    pub message: String,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Fields a caller supplies when recording an event; the store assigns
/// sequence number and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub attempt: u32,
    pub state: TaskState,
    pub stage: Option<ChunkStatus>,
    pub chunk_index: Option<u32>,
    pub percent: f64,
    pub message: String,
}

impl ProgressUpdate {
    pub fn lifecycle(attempt: u32, state: TaskState, percent: f64, message: impl Into<String>) -> Self {
        Self {
            attempt,
            state,
            stage: None,
            chunk_index: None,
            percent,
            message: message.into(),
        }
    }

    pub fn stage(
        attempt: u32,
        stage: ChunkStatus,
        chunk_index: u32,
        percent: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            state: TaskState::Progress,
            stage: Some(stage),
            chunk_index: Some(chunk_index),
            percent,
            message: message.into(),
        }
    }
}

/// Percent reached after completing `step` (1..=5) of chunk `chunk_index`
/// (1-based) out of `total_chunks`.
pub fn stage_percent(chunk_index: u32, total_chunks: u32, step: u32) -> f64 {
    if total_chunks == 0 {
        return 0.0;
    }
    let total = total_chunks as f64;
    let done_chunks = chunk_index.saturating_sub(1) as f64;
    let step_fraction = step.min(5) as f64 / 5.0;
    ((done_chunks / total) * 100.0 + step_fraction / total * 100.0).clamp(0.0, 100.0)
}
