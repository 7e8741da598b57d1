//! Local vocabulary candidate extraction.
//!
//! Pure computation over transcript text; engines use it as the default
//! `extract_vocabulary` implementation.

use std::collections::HashSet;

use lingo_models::{Segment, WordCandidate};

/// Words shorter than this never become candidates.
pub const MIN_WORD_CHARS: usize = 3;

/// High-frequency English words that are never worth studying.
const ENGLISH_STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "day", "get", "has", "him", "his", "how", "man", "new", "now", "old",
    "see", "two", "way", "who", "boy", "did", "its", "let", "put", "say", "she", "too", "use",
    "that", "with", "have", "this", "will", "your", "from", "they", "know", "want", "been",
    "good", "much", "some", "time", "very", "when", "come", "here", "just", "like", "long",
    "make", "many", "more", "only", "over", "such", "take", "than", "them", "well", "were",
    "what", "where", "which", "there", "their", "about", "would", "these", "other", "could",
    "because", "really", "going", "think", "yeah", "okay",
];

fn is_stop_word(lemma: &str, language: &str) -> bool {
    language.starts_with("en") && ENGLISH_STOP_WORDS.contains(&lemma)
}

/// Heuristic difficulty in `[0, 1]`: longer and less common-looking words
/// score higher.
pub fn estimate_difficulty(lemma: &str) -> f32 {
    let chars = lemma.chars().count();
    let length_score = ((chars.saturating_sub(MIN_WORD_CHARS)) as f32 / 9.0).min(1.0);
    let rare_letters = lemma.chars().filter(|c| "qxzjkvw".contains(*c)).count() as f32;
    let non_ascii = if lemma.is_ascii() { 0.0 } else { 0.1 };
    (length_score * 0.8 + (rare_letters * 0.1).min(0.2) + non_ascii).min(1.0)
}

/// Tokenize segments into unique word candidates, first occurrence wins.
pub fn extract_candidates(segments: &[Segment], language: &str) -> Vec<WordCandidate> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for segment in segments {
        for surface in segment
            .text
            .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
            .map(|w| w.trim_matches(|c| c == '\'' || c == '-'))
        {
            if surface.chars().count() < MIN_WORD_CHARS {
                continue;
            }
            if surface.chars().any(|c| c.is_numeric()) {
                continue;
            }
            let lemma = surface.to_lowercase();
            if is_stop_word(&lemma, language) || !seen.insert(lemma.clone()) {
                continue;
            }
            out.push(WordCandidate {
                difficulty: estimate_difficulty(&lemma),
                lemma,
                surface: surface.to_string(),
                segment_index: segment.index,
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(index: u32, text: &str) -> Segment {
        Segment {
            index,
            start: index as f64,
            end: index as f64 + 1.0,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_extract_dedupes_and_skips_stop_words() {
        let segments = vec![
            seg(0, "The photosynthesis process, and the chloroplast."),
            seg(1, "Photosynthesis again in 2024!"),
        ];
        let words = extract_candidates(&segments, "en");
        let lemmas: Vec<_> = words.iter().map(|w| w.lemma.as_str()).collect();
        assert_eq!(lemmas, vec!["photosynthesis", "process", "chloroplast", "again"]);
        assert_eq!(words[0].segment_index, 0);
        assert_eq!(words[0].surface, "photosynthesis");
    }

    #[test]
    fn test_difficulty_grows_with_length() {
        assert!(estimate_difficulty("photosynthesis") > estimate_difficulty("cat"));
        assert!(estimate_difficulty("photosynthesis") <= 1.0);
    }

    #[test]
    fn test_non_english_keeps_short_function_words() {
        let words = extract_candidates(&[seg(0, "the über Straße")], "de");
        assert_eq!(words.len(), 3);
    }
}
