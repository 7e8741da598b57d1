//! Worker error types.

use thiserror::Error;

use lingo_ai::AiError;
use lingo_models::{ChunkStatus, ErrorKind};
use lingo_queue::{DispatchError, ProgressError, QueueError, RegistryError};
use lingo_store::StoreError;

pub type PipelineResult<T> = Result<T, PipelineError>;
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failure of one pipeline attempt.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("AI stage failed: {0}")]
    Ai(#[from] AiError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("cancelled")]
    Cancelled,

    #[error("Hard time limit of {limit_secs}s reached during {stage}")]
    HardTimeout { stage: &'static str, limit_secs: u64 },

    #[error("Illegal chunk transition {from} -> {to}")]
    IllegalTransition { from: ChunkStatus, to: ChunkStatus },

    #[error("Translation misaligned: expected {expected} segments, got {got}")]
    Misaligned { expected: usize, got: usize },

    /// The lease moved to another worker; this attempt must stop writing.
    #[error("Lease lost: {0}")]
    LeaseLost(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Ai(e) => e.kind(),
            PipelineError::Store(e) => e.kind(),
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::HardTimeout { .. } => ErrorKind::Transient,
            PipelineError::IllegalTransition { .. } => ErrorKind::Permanent,
            PipelineError::Misaligned { .. } => ErrorKind::Transient,
            PipelineError::LeaseLost(_) => ErrorKind::Transient,
        }
    }

    pub fn is_lease_lost(&self) -> bool {
        matches!(self, PipelineError::LeaseLost(_))
    }
}

impl From<RegistryError> for PipelineError {
    fn from(e: RegistryError) -> Self {
        PipelineError::LeaseLost(e.to_string())
    }
}

impl From<ProgressError> for PipelineError {
    fn from(e: ProgressError) -> Self {
        PipelineError::LeaseLost(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
