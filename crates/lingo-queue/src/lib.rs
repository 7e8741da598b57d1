//! Task queueing and progress tracking.
//!
//! This crate provides:
//! - A bounded lease queue with visibility timeouts
//! - The task registry with lease-token fencing
//! - The progress store (poll and push)
//! - Task submission and cancellation
//! - Progress relay via Redis Pub/Sub

pub mod dispatcher;
pub mod error;
pub mod progress;
pub mod queue;
pub mod relay;
pub mod tasks;

pub use dispatcher::{CancelAck, Dispatcher};
pub use error::{
    DispatchError, DispatchResult, ProgressError, ProgressResult, QueueError, QueueResult,
    RegistryError, RegistryResult,
};
pub use progress::{ProgressStore, ProgressSubscription, DEFAULT_PUSH_BUFFER};
pub use queue::{Lease, LeaseQueue, LeaseToken, QueueConfig};
pub use relay::RedisProgressRelay;
pub use tasks::{AttemptStart, CancelOutcome, TaskRegistry};
