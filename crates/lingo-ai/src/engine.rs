//! The AI stage capability contract and per-task engine construction.

use async_trait::async_trait;
use tracing::debug;

use lingo_models::{EngineKind, Segment, TaskInput, TranslatedSegment, WordCandidate};

use crate::error::AiResult;
use crate::remote::{RemoteEngine, RemoteEngineConfig};
use crate::sidecar::{SidecarConfig, SidecarEngine};
use crate::vocabulary;

/// Capabilities the pipeline needs from an AI engine.
///
/// Implementations must be safe to call repeatedly with the same input.
#[async_trait]
pub trait AiStage: Send + Sync {
    /// Engine name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Transcribe `[start, end)` of the media. Segment times are absolute.
    async fn transcribe(
        &self,
        video_path: &str,
        start: f64,
        end: f64,
        language: &str,
    ) -> AiResult<Vec<Segment>>;

    /// Translate all segments in one batched call.
    async fn translate(
        &self,
        segments: &[Segment],
        source_lang: &str,
        target_lang: &str,
    ) -> AiResult<Vec<TranslatedSegment>>;

    /// Propose vocabulary candidates. Pure computation, no I/O.
    fn extract_vocabulary(&self, segments: &[Segment], language: &str) -> Vec<WordCandidate> {
        vocabulary::extract_candidates(segments, language)
    }
}

/// Builds a fresh engine for each task attempt from the task's frozen input.
///
/// The variant is the input's [`EngineKind`] tag; it is never re-resolved
/// mid-pipeline.
pub trait EngineFactory: Send + Sync {
    fn build(&self, input: &TaskInput) -> AiResult<Box<dyn AiStage>>;
}

/// Factory for the built-in engine variants.
#[derive(Debug, Clone, Default)]
pub struct DefaultEngineFactory {
    remote: RemoteEngineConfig,
    sidecar: SidecarConfig,
}

impl DefaultEngineFactory {
    pub fn new(remote: RemoteEngineConfig, sidecar: SidecarConfig) -> Self {
        Self { remote, sidecar }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(RemoteEngineConfig::from_env(), SidecarConfig::from_env())
    }
}

impl EngineFactory for DefaultEngineFactory {
    fn build(&self, input: &TaskInput) -> AiResult<Box<dyn AiStage>> {
        debug!(engine = input.engine.as_str(), video_id = %input.video_id, "Building AI engine");
        match input.engine {
            EngineKind::Remote => Ok(Box::new(RemoteEngine::new(self.remote.clone())?)),
            EngineKind::Sidecar => Ok(Box::new(SidecarEngine::new(
                self.sidecar.clone(),
                input.video_path.clone(),
            ))),
        }
    }
}
