//! AI stage interface and engine variants.
//!
//! This crate provides:
//! - The `AiStage` capability contract (transcribe, translate, extract vocabulary)
//! - A closed set of engines selected per task by `EngineKind`
//! - An HTTP inference service client and a sidecar-file engine
//! - Error classification into transient and permanent failures

pub mod engine;
pub mod error;
pub mod probe;
pub mod remote;
pub mod sidecar;
pub mod types;
pub mod vocabulary;

pub use engine::{AiStage, DefaultEngineFactory, EngineFactory};
pub use error::{AiError, AiResult};
pub use probe::ensure_supported_container;
pub use remote::{RemoteEngine, RemoteEngineConfig};
pub use sidecar::{SidecarConfig, SidecarEngine};
