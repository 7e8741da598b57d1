//! Chunk records and the per-chunk pipeline status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a chunk, derived from the video, the time range and
/// the variant of work done on it.
///
/// Two tasks share a chunk record only when they would produce the same
/// artifacts: same video range, same task kind, same language pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub String);

impl ChunkId {
    /// Build the id for a video range. Same range and variant, same id.
    pub fn for_range(video_id: &str, variant: &str, start_time: f64, end_time: f64) -> Self {
        let start_ms = (start_time * 1000.0).round() as u64;
        let end_ms = (end_time * 1000.0).round() as u64;
        Self(format!("{}:{}-{}@{}", video_id, start_ms, end_ms, variant))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline status of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    #[default]
    Created,
    Transcribing,
    Filtering,
    GeneratingSubtitles,
    Translating,
    Finalized,
    Failed,
}

impl ChunkStatus {
    /// Forward stages in execution order, excluding `Created` and `Failed`.
    pub const STAGES: [ChunkStatus; 5] = [
        ChunkStatus::Transcribing,
        ChunkStatus::Filtering,
        ChunkStatus::GeneratingSubtitles,
        ChunkStatus::Translating,
        ChunkStatus::Finalized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Created => "CREATED",
            ChunkStatus::Transcribing => "TRANSCRIBING",
            ChunkStatus::Filtering => "FILTERING",
            ChunkStatus::GeneratingSubtitles => "GENERATING_SUBTITLES",
            ChunkStatus::Translating => "TRANSLATING",
            ChunkStatus::Finalized => "FINALIZED",
            ChunkStatus::Failed => "FAILED",
        }
    }

    /// 1-based position among [`ChunkStatus::STAGES`]; 0 for `Created`/`Failed`.
    pub fn step_index(&self) -> u32 {
        match self {
            ChunkStatus::Created | ChunkStatus::Failed => 0,
            ChunkStatus::Transcribing => 1,
            ChunkStatus::Filtering => 2,
            ChunkStatus::GeneratingSubtitles => 3,
            ChunkStatus::Translating => 4,
            ChunkStatus::Finalized => 5,
        }
    }

    /// The only forward successor of this status.
    pub fn next(&self) -> Option<ChunkStatus> {
        match self {
            ChunkStatus::Created => Some(ChunkStatus::Transcribing),
            ChunkStatus::Transcribing => Some(ChunkStatus::Filtering),
            ChunkStatus::Filtering => Some(ChunkStatus::GeneratingSubtitles),
            ChunkStatus::GeneratingSubtitles => Some(ChunkStatus::Translating),
            ChunkStatus::Translating => Some(ChunkStatus::Finalized),
            ChunkStatus::Finalized | ChunkStatus::Failed => None,
        }
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(&self, to: ChunkStatus) -> bool {
        match to {
            ChunkStatus::Failed => *self != ChunkStatus::Finalized && *self != ChunkStatus::Failed,
            _ => self.next() == Some(to),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkStatus::Finalized | ChunkStatus::Failed)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub chunk_id: ChunkId,
    pub video_id: String,
    pub start_time: f64,
    pub end_time: f64,
    /// 1-based
    pub chunk_index: u32,
    pub total_chunks: u32,
}

impl ChunkSpec {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Split `[start, end)` into consecutive chunks of at most `chunk_duration`.
pub fn plan_chunks(
    video_id: &str,
    variant: &str,
    start: f64,
    end: f64,
    chunk_duration: f64,
) -> Vec<ChunkSpec> {
    if !(end > start) || !(chunk_duration > 0.0) {
        return Vec::new();
    }

    let total = ((end - start) / chunk_duration).ceil().max(1.0) as u32;
    (0..total)
        .map(|i| {
            let chunk_start = start + i as f64 * chunk_duration;
            let chunk_end = (chunk_start + chunk_duration).min(end);
            ChunkSpec {
                chunk_id: ChunkId::for_range(video_id, variant, chunk_start, chunk_end),
                video_id: video_id.to_string(),
                start_time: chunk_start,
                end_time: chunk_end,
                chunk_index: i + 1,
                total_chunks: total,
            }
        })
        .collect()
}
