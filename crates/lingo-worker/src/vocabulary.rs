//! Difficulty filter turning word candidates into vocabulary rows.

use std::collections::{HashMap, HashSet};

use lingo_models::{ChunkSpec, Segment, VocabularyRow, WordCandidate};

use crate::config::VocabularyConfig;

#[derive(Debug, Clone)]
pub struct DifficultyFilter {
    min_difficulty: f32,
    max_words: usize,
    excluded: HashSet<String>,
}

impl DifficultyFilter {
    pub fn new(config: &VocabularyConfig) -> Self {
        Self {
            min_difficulty: config.min_difficulty,
            max_words: config.max_words_per_chunk,
            excluded: HashSet::new(),
        }
    }

    /// Never emit these lemmas (case-insensitive).
    pub fn with_excluded<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded
            .extend(words.into_iter().map(|w| w.as_ref().to_lowercase()));
        self
    }

    /// Select the hardest words, at most one row per lemma, ordered by where
    /// they occur in the chunk.
    pub fn apply(
        &self,
        chunk: &ChunkSpec,
        segments: &[Segment],
        candidates: Vec<WordCandidate>,
        language: &str,
    ) -> Vec<VocabularyRow> {
        let by_index: HashMap<u32, &Segment> = segments.iter().map(|s| (s.index, s)).collect();

        let mut seen = HashSet::new();
        let mut kept: Vec<WordCandidate> = candidates
            .into_iter()
            .filter(|c| c.difficulty.is_finite() && c.difficulty >= self.min_difficulty)
            .filter(|c| !self.excluded.contains(&c.lemma.to_lowercase()))
            .filter(|c| by_index.contains_key(&c.segment_index))
            .filter(|c| seen.insert(c.lemma.to_lowercase()))
            .collect();

        kept.sort_by(|a, b| {
            b.difficulty
                .total_cmp(&a.difficulty)
                .then_with(|| a.lemma.cmp(&b.lemma))
        });
        kept.truncate(self.max_words);
        kept.sort_by(|a, b| {
            a.segment_index
                .cmp(&b.segment_index)
                .then_with(|| a.lemma.cmp(&b.lemma))
        });

        kept.into_iter()
            .filter_map(|c| {
                let segment = by_index.get(&c.segment_index)?;
                Some(VocabularyRow {
                    chunk_id: chunk.chunk_id.clone(),
                    word: c.lemma.to_lowercase(),
                    surface: c.surface,
                    context: segment.text.clone(),
                    segment_index: c.segment_index,
                    start_time: segment.start,
                    difficulty: c.difficulty,
                    language: language.to_string(),
                })
            })
            .collect()
    }
}
