//! Shared data models for the Lingo ingestion orchestrator.
//!
//! This crate provides Serde-serializable types for:
//! - Tasks, task kinds and the task lifecycle
//! - Chunks and the per-chunk pipeline status
//! - Progress events and caller-facing status payloads
//! - Transcript segments, vocabulary, translations and subtitles

pub mod chunk;
pub mod error;
pub mod media;
pub mod progress;
pub mod status;
pub mod task;

// Re-export common types
pub use chunk::{plan_chunks, ChunkId, ChunkSpec, ChunkStatus};
pub use error::{ValidationError, ValidationResult};
pub use media::{
    ChunkSummary, Segment, SubtitleArtifact, SubtitleFormat, TranslatedSegment, TranslationRow,
    VocabularyRow, WordCandidate,
};
pub use progress::{stage_percent, ProgressEvent, ProgressUpdate};
pub use status::{ErrorKind, TaskError, TaskStatus};
pub use task::{
    EngineKind, StagePlan, Task, TaskId, TaskInput, TaskKind, TaskResult, TaskState,
    MAX_CHUNKS_PER_TASK,
};
