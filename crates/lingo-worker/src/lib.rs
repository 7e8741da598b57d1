//! Chunk pipeline worker.
//!
//! This crate provides:
//! - The pipeline stage runner and chunk state machine
//! - The worker pool with lease heartbeats, retries and a janitor
//! - Vocabulary filtering and subtitle rendering
//! - The orchestrator facade (submit, status, cancel, push updates)
//! - Structured logging and Prometheus metrics

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod state_machine;
pub mod subtitle;
pub mod vocabulary;

pub use config::{VocabularyConfig, WorkerConfig};
pub use error::{PipelineError, PipelineResult, WorkerError, WorkerResult};
pub use executor::WorkerPool;
pub use logging::TaskLogger;
pub use orchestrator::{Orchestrator, StatusStream};
pub use pipeline::{AttemptContext, PipelineRunner, StageReporter};
pub use retry::{RetryDecision, RetryPolicy};
pub use state_machine::ChunkMachine;
pub use vocabulary::DifficultyFilter;
