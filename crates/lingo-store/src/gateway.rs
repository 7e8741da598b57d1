//! The persistence gateway contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use lingo_models::{
    ChunkId, ChunkSpec, ChunkStatus, ChunkSummary, SubtitleArtifact, TranslationRow,
    VocabularyRow,
};

use crate::error::StoreResult;

/// Everything a chunk's finalize step writes, as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkCommit {
    pub chunk_id: ChunkId,
    pub subtitle: SubtitleArtifact,
    pub vocabulary: Vec<VocabularyRow>,
    pub translations: Vec<TranslationRow>,
    pub segments_count: u32,
    pub new_status: ChunkStatus,
}

impl ChunkCommit {
    pub fn summary(&self) -> ChunkSummary {
        ChunkSummary {
            vocabulary_count: self.vocabulary.len() as u32,
            segments_count: self.segments_count,
            translations_count: self.translations.len() as u32,
            subtitle_path: Some(self.subtitle.path.clone()),
        }
    }
}

/// Durable storage for chunks and their artifacts.
///
/// The pipeline runner is the only writer of chunk status.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Create the chunk record in `CREATED` if it does not exist yet and
    /// return its durable status.
    async fn ensure_chunk(&self, chunk: &ChunkSpec) -> StoreResult<ChunkStatus>;

    async fn read_chunk_status(&self, chunk_id: &ChunkId) -> StoreResult<ChunkStatus>;

    /// Counts written by the chunk's last successful commit.
    async fn read_chunk_summary(&self, chunk_id: &ChunkId) -> StoreResult<ChunkSummary>;

    /// Atomically write subtitle, vocabulary rows, translation rows and the
    /// status flip. Either all of it becomes visible or none of it does.
    async fn commit_chunk_result(&self, commit: ChunkCommit) -> StoreResult<()>;

    /// Record a permanent chunk failure. A `FINALIZED` chunk is left alone.
    async fn mark_chunk_failed(&self, chunk_id: &ChunkId) -> StoreResult<()>;
}
