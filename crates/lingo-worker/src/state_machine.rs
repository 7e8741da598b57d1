//! In-memory chunk state machine for one attempt.

use tracing::debug;

use lingo_models::{ChunkId, ChunkStatus};

use crate::error::{PipelineError, PipelineResult};

/// Tracks a chunk through its stages. Every transition is checked; an
/// illegal one is a bug and surfaces as an error instead of being skipped.
#[derive(Debug)]
pub struct ChunkMachine {
    chunk_id: ChunkId,
    status: ChunkStatus,
}

impl ChunkMachine {
    pub fn new(chunk_id: ChunkId) -> Self {
        Self {
            chunk_id,
            status: ChunkStatus::Created,
        }
    }

    pub fn status(&self) -> ChunkStatus {
        self.status
    }

    pub fn advance(&mut self, to: ChunkStatus) -> PipelineResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(PipelineError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        debug!(chunk_id = %self.chunk_id, from = %self.status, to = %to, "Chunk transition");
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walks_all_stages_in_order() {
        let mut m = ChunkMachine::new(ChunkId("c".into()));
        for stage in ChunkStatus::STAGES {
            m.advance(stage).unwrap();
        }
        assert_eq!(m.status(), ChunkStatus::Finalized);
    }

    #[test]
    fn test_rejects_skipping() {
        let mut m = ChunkMachine::new(ChunkId("c".into()));
        m.advance(ChunkStatus::Transcribing).unwrap();
        let err = m.advance(ChunkStatus::Translating).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IllegalTransition {
                from: ChunkStatus::Transcribing,
                to: ChunkStatus::Translating
            }
        ));
    }

    #[test]
    fn test_failed_reachable_until_finalized() {
        let mut m = ChunkMachine::new(ChunkId("c".into()));
        m.advance(ChunkStatus::Transcribing).unwrap();
        m.advance(ChunkStatus::Failed).unwrap();
        assert!(m.advance(ChunkStatus::Filtering).is_err());

        let mut done = ChunkMachine::new(ChunkId("d".into()));
        for stage in ChunkStatus::STAGES {
            done.advance(stage).unwrap();
        }
        assert!(done.advance(ChunkStatus::Failed).is_err());
    }
}
