//! Per-factor scoring for retrieval candidates.
//!
//! Score = semantic × temporal × access × entity × importance
//!
//! Where:
//!   semantic   = 1 / (1 + squared L2 distance)
//!   temporal   = [`temporal_decay`] of the memory's age
//!   access     = [`access_weight`] of access count and last access
//!   entity     = [`entity_boost`] of query entities vs. stored entities
//!   importance = the multiplier assigned at formation
//!
//! The product is deliberate: one near-zero factor sinks the result.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::decay::{access_weight, temporal_decay};
use crate::types::MemoryRecord;

/// Breakdown of a retrieval score into its component factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Similarity from the index, in (0, 1].
    pub semantic: f64,
    /// Age multiplier, in [0.05, 1.0].
    pub temporal: f64,
    /// Access multiplier, in [0.7, 1.5].
    pub access: f64,
    /// Entity-match multiplier, in [1.0, 1.5].
    pub entity: f64,
    /// Importance assigned at formation.
    pub importance: f64,
}

impl ScoreBreakdown {
    /// The combined score.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.semantic * self.temporal * self.access * self.entity * self.importance
    }
}

/// Score one memory against `query` at `now`.
#[must_use]
pub fn compute_breakdown(
    memory: &MemoryRecord,
    similarity: f32,
    query: &str,
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let query_entities = extract_entities(query);
    breakdown_with_entities(memory, similarity, &query_entities, now)
}

/// [`compute_breakdown`] with the query's entities already extracted, so a
/// batch of candidates shares one extraction.
#[must_use]
pub fn breakdown_with_entities(
    memory: &MemoryRecord,
    similarity: f32,
    query_entities: &[String],
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    ScoreBreakdown {
        semantic: f64::from(similarity),
        temporal: temporal_decay(memory.created_at, now),
        access: access_weight(memory.access_count, memory.last_accessed, now),
        entity: entity_match_boost(query_entities, &memory.entities),
        importance: f64::from(memory.importance),
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Consecutive capitalised words: "New York", "Adaptive Intelligence Daemon".
static MULTI_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]*(?:\s+[A-Z][a-z]*)+\b").expect("valid entity regex"));

/// A single capitalised word of three or more letters: "Python", "Discord".
static PROPER_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]{2,}\b").expect("valid entity regex"));

/// Identifiers containing digits: "RTX-3090", "GPT-4", "Qwen2.5".
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][A-Za-z0-9\-.]+\d+[A-Za-z0-9\-.]*\b").expect("valid entity regex")
});

/// Acronyms: "NASA", "RAG".
static ACRONYM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{2,}\b").expect("valid entity regex"));

/// Capitalised function words that are never entities.
const ENTITY_STOPWORDS: &[&str] = &[
    "The", "This", "That", "These", "Those", "Here", "There", "When", "Where", "What", "Which",
    "Who", "How", "Why",
];

/// Proper-noun-like strings in `text`, deduplicated in order of first
/// appearance.
#[must_use]
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    [&*MULTI_WORD, &*PROPER_WORD, &*IDENTIFIER, &*ACRONYM]
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.as_str()))
        .filter(|entity| !ENTITY_STOPWORDS.contains(entity))
        .filter(|entity| seen.insert(*entity))
        .map(str::to_string)
        .collect()
}

/// Multiplier in [1.0, 1.5] rewarding overlap between the entities of
/// `query` and `memory_entities`.
#[must_use]
pub fn entity_boost(query: &str, memory_entities: &[String]) -> f64 {
    if memory_entities.is_empty() {
        return 1.0;
    }
    entity_match_boost(&extract_entities(query), memory_entities)
}

/// Exact (case-insensitive) matches count 1, substring overlaps count 0.5.
fn entity_match_boost(query_entities: &[String], memory_entities: &[String]) -> f64 {
    if query_entities.is_empty() || memory_entities.is_empty() {
        return 1.0;
    }

    let mut credit = 0.0;
    for q in query_entities.iter().map(|e| e.to_lowercase()) {
        for m in memory_entities.iter().map(|e| e.to_lowercase()) {
            if q == m {
                credit += 1.0;
            } else if q.contains(&m) || m.contains(&q) {
                credit += 0.5;
            }
        }
    }

    match credit {
        c if c <= 0.0 => 1.0,
        c if c < 1.0 => 1.1,
        c if c < 2.0 => 1.25,
        _ => 1.5,
    }
}
