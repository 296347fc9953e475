//! Candidate extraction: raw user text → spans worth remembering.
//!
//! Text is split on runs of sentence-terminal punctuation. Spans with fewer
//! than `min_words` words are dropped; spans longer than
//! `max_candidate_chars` are split again on commas and semicolons, keeping
//! the pieces that still meet the word minimum.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::FormationConfig;

static SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("valid sentence regex"));

static CLAUSE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,;]+").expect("valid clause regex"));

/// Splits user messages into memory candidates.
#[derive(Debug, Clone)]
pub struct CandidateExtractor {
    min_words: usize,
    max_chars: usize,
}

impl CandidateExtractor {
    /// Build an extractor with explicit limits.
    #[must_use]
    pub fn new(min_words: usize, max_chars: usize) -> Self {
        Self {
            min_words: min_words.max(1),
            max_chars,
        }
    }

    /// Build from the `[formation]` config section.
    #[must_use]
    pub fn from_config(config: &FormationConfig) -> Self {
        Self::new(config.min_words, config.max_candidate_chars)
    }

    /// Extract candidate spans from `text`, in order of appearance.
    #[must_use]
    pub fn extract(&self, text: &str) -> Vec<String> {
        let mut candidates = Vec::new();
        for sentence in SENTENCE_BREAK.split(text) {
            let sentence = sentence.trim();
            if word_count(sentence) < self.min_words {
                continue;
            }
            if sentence.chars().count() > self.max_chars {
                candidates.extend(
                    CLAUSE_BREAK
                        .split(sentence)
                        .map(str::trim)
                        .filter(|part| word_count(part) >= self.min_words)
                        .map(str::to_string),
                );
            } else {
                candidates.push(sentence.to_string());
            }
        }
        candidates
    }
}

impl Default for CandidateExtractor {
    fn default() -> Self {
        Self::from_config(&FormationConfig::default())
    }
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}
