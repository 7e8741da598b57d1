//! Transcript segments, vocabulary, translations and subtitle artifacts.

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkId;

/// A timed span of transcribed speech. Times are absolute seconds in the video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A segment paired with its translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedSegment {
    pub index: u32,
    pub start: f64,
    pub end: f64,
    pub source_text: String,
    pub translated_text: String,
}

/// A word proposed as vocabulary, before difficulty filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordCandidate {
    /// Normalized (lower-cased) form
    pub lemma: String,
    /// Form as it appeared in the transcript
    pub surface: String,
    pub segment_index: u32,
    /// Estimated difficulty in `[0, 1]`
    pub difficulty: f32,
}

/// Vocabulary row persisted for a chunk. Unique per `(chunk_id, word)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyRow {
    pub chunk_id: ChunkId,
    pub word: String,
    pub surface: String,
    /// Sentence the word was taken from
    pub context: String,
    pub segment_index: u32,
    pub start_time: f64,
    pub difficulty: f32,
    pub language: String,
}

/// Translation row persisted for a chunk. Unique per `(chunk_id, segment_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRow {
    pub chunk_id: ChunkId,
    pub segment_index: u32,
    pub source_text: String,
    pub translated_text: String,
    pub source_lang: String,
    pub target_lang: String,
}

/// Subtitle container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    #[default]
    Srt,
    Vtt,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "srt" => Some(SubtitleFormat::Srt),
            "vtt" | "webvtt" => Some(SubtitleFormat::Vtt),
            _ => None,
        }
    }
}

/// Rendered subtitle file for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleArtifact {
    pub chunk_id: ChunkId,
    pub format: SubtitleFormat,
    /// Storage path the artifact is addressed by
    pub path: String,
    pub content: String,
    pub cue_count: u32,
}

/// Committed outcome of a finalized chunk, read back on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChunkSummary {
    pub vocabulary_count: u32,
    pub segments_count: u32,
    pub translations_count: u32,
    pub subtitle_path: Option<String>,
}
