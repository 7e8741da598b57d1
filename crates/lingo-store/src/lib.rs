//! Durable storage for chunk records and their artifacts.
//!
//! This crate provides:
//! - The `PersistenceGateway` contract used by the pipeline runner
//! - An in-memory transactional gateway with rollback and fault injection
//! - Short bounded retry for gateway reads
//! - Gateway metrics

pub mod error;
pub mod gateway;
pub mod memory;
pub mod metrics;
pub mod retry;

pub use error::{StoreError, StoreResult};
pub use gateway::{ChunkCommit, PersistenceGateway};
pub use memory::{CommitFault, MemoryGateway};
pub use retry::{with_retry, RetryConfig};
