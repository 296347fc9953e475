//! Memory retrieval: nearest-neighbour search + multiplicative re-ranking.
//!
//! Pipeline for one query:
//!   1. over-fetch `candidate_pool` neighbours from the index
//!   2. score each one (see [`scoring`])
//!   3. sort descending and drop anything under `min_score`
//!   4. single-pass dedup by word-set Jaccard similarity
//!   5. truncate to `top_k`
//!   6. bump access stats on the first `access_update_count` results only
//!
//! Step 6 is deliberately narrow: memories that were scored but never shown
//! must not gain access weight.

pub mod scoring;

use std::cmp::Reverse;
use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::index::MemoryIndex;
use crate::types::{MemoryRecord, SECONDS_PER_DAY};

pub use scoring::{ScoreBreakdown, entity_boost, extract_entities};

/// A scored retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    /// The retrieved memory.
    pub memory: MemoryRecord,
    /// Combined retrieval score.
    pub score: f64,
    /// Per-factor breakdown, kept for diagnostics.
    pub breakdown: ScoreBreakdown,
}

/// Ranks index candidates for a query.
#[derive(Debug, Clone, Default)]
pub struct RetrievalPipeline {
    config: RetrievalConfig,
}

impl RetrievalPipeline {
    /// Create a pipeline with the given configuration.
    #[must_use]
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Run the full pipeline against `index`.
    ///
    /// Never fails: an embedding failure inside the index search yields an
    /// empty result.
    pub async fn retrieve_at(
        &self,
        index: &MemoryIndex,
        query: &str,
        top_k: usize,
        now: DateTime<Utc>,
    ) -> Vec<ScoredMemory> {
        let start = Instant::now();
        let pool = self.config.candidate_pool.max(top_k);
        let candidates = index.search(query, pool).await;
        if candidates.is_empty() {
            return Vec::new();
        }
        let fetched = candidates.len();

        let mut results = self.rank(query, candidates, top_k, now);

        for result in results.iter_mut().take(self.config.access_update_count) {
            match index.update_access_stats_at(result.memory.id, now) {
                Ok(updated) => result.memory = updated,
                Err(e) => warn!(id = %result.memory.id, error = %e, "Failed to update access stats"),
            }
        }

        debug!(
            fetched,
            returned = results.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Retrieval complete"
        );
        results
    }

    /// Score, sort, filter, dedupe and truncate already-fetched candidates.
    #[must_use]
    pub fn rank(
        &self,
        query: &str,
        candidates: Vec<(MemoryRecord, f32)>,
        top_k: usize,
        now: DateTime<Utc>,
    ) -> Vec<ScoredMemory> {
        let query_entities = extract_entities(query);

        let mut scored: Vec<ScoredMemory> = candidates
            .into_iter()
            .map(|(memory, similarity)| {
                let breakdown =
                    scoring::breakdown_with_entities(&memory, similarity, &query_entities, now);
                ScoredMemory {
                    score: breakdown.score(),
                    memory,
                    breakdown,
                }
            })
            .filter(|s| s.score >= self.config.min_score)
            .collect();

        // Stable sort: equal scores keep index (nearest-first) order.
        scored.sort_by_key(|s| Reverse(OrderedFloat(s.score)));

        let mut results = deduplicate(scored, self.config.dedup_threshold);
        results.truncate(top_k);
        results
    }
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

/// Word-set Jaccard similarity of two strings, case-insensitive.
/// Returns 0.0 if either side has no words.
#[must_use]
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

/// Keep each result unless its content is at least `threshold` similar to
/// an already-kept one. Input order decides who wins, so pass results
/// sorted best-first.
#[must_use]
pub fn deduplicate(results: Vec<ScoredMemory>, threshold: f64) -> Vec<ScoredMemory> {
    let mut kept: Vec<ScoredMemory> = Vec::with_capacity(results.len());
    for candidate in results {
        let duplicate = kept
            .iter()
            .any(|k| jaccard_similarity(&k.memory.content, &candidate.memory.content) >= threshold);
        if duplicate {
            debug!(id = %candidate.memory.id, "Dropped near-duplicate memory");
        } else {
            kept.push(candidate);
        }
    }
    kept
}

// ---------------------------------------------------------------------------
// Context formatting
// ---------------------------------------------------------------------------

const CONTEXT_HEADER: &str = "[RELEVANT MEMORIES]";
const CONTEXT_INTRO: &str = "You have access to these memories from past conversations:";
const CONTEXT_GUIDANCE: &str =
    "Use relevant memories naturally. Don't announce \"I remember\" - just incorporate information.";

/// Render retrieved memories as a prompt block. Empty input gives an empty
/// string.
#[must_use]
pub fn format_memories_for_context(memories: &[ScoredMemory], now: DateTime<Utc>) -> String {
    if memories.is_empty() {
        return String::new();
    }

    let mut out = format!("{CONTEXT_HEADER}\n{CONTEXT_INTRO}\n");
    for m in memories {
        out.push_str(&format!(
            "• [Score: {:.2}, Age: {}, Used: {}×] {}\n",
            m.score,
            format_age(m.memory.created_at, now),
            m.memory.access_count,
            m.memory.content
        ));
    }
    out.push('\n');
    out.push_str(CONTEXT_GUIDANCE);
    out.push('\n');
    out
}

/// Coarse age label: `5h`, `3d`, `2w`, `4mo`, `1.5y`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = ((now - created_at).num_milliseconds() as f64 / 1000.0).max(0.0);
    let days = secs / SECONDS_PER_DAY;
    if days < 1.0 {
        format!("{}h", (secs / 3600.0) as u64)
    } else if days < 7.0 {
        format!("{}d", days as u64)
    } else if days < 30.0 {
        format!("{}w", (days / 7.0) as u64)
    } else if days < 365.0 {
        format!("{}mo", (days / 30.0) as u64)
    } else {
        format!("{:.1}y", days / 365.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryId;
    use chrono::Duration;

    fn record(id: u64, content: &str, now: DateTime<Utc>) -> MemoryRecord {
        MemoryRecord::new(MemoryId(id), content, now - Duration::days(1), 1.0, vec![])
    }

    #[test]
    fn jaccard_basics() {
        assert!((jaccard_similarity("a b c", "A B C") - 1.0).abs() < f64::EPSILON);
        assert!((jaccard_similarity("a b", "b c") - 1.0 / 3.0).abs() < 1e-9);
        assert!(jaccard_similarity("", "a").abs() < f64::EPSILON);
    }

    #[test]
    fn rank_sorts_filters_and_dedupes() {
        let now = Utc::now();
        let pipeline = RetrievalPipeline::default();
        let candidates = vec![
            (record(0, "my dog is called Rex", now), 0.4),
            (record(1, "My dog is called rex", now), 0.9),
            (record(2, "the weather was grey", now), 0.01),
            (record(3, "I planted tomatoes in May", now), 0.6),
        ];
        let ranked = pipeline.rank("dog", candidates, 15, now);
        let ids: Vec<u64> = ranked.iter().map(|s| s.memory.id.0).collect();
        // #0 duplicates the higher-scored #1; #2 is under min_score.
        assert_eq!(ids, vec![1, 3]);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn rank_truncates_to_top_k() {
        let now = Utc::now();
        let pipeline = RetrievalPipeline::default();
        let candidates = (0..10)
            .map(|i| (record(i, &format!("distinct memory number {i}"), now), 0.5))
            .collect();
        assert_eq!(pipeline.rank("q", candidates, 3, now).len(), 3);
    }

    #[test]
    fn dedup_keeps_first_of_near_duplicates() {
        let now = Utc::now();
        let make = |id, content: &str, score| ScoredMemory {
            memory: record(id, content, now),
            score,
            breakdown: ScoreBreakdown {
                semantic: score,
                temporal: 1.0,
                access: 1.0,
                entity: 1.0,
                importance: 1.0,
            },
        };
        let kept = deduplicate(
            vec![make(5, "I work as a teacher", 0.9), make(6, "i work as a TEACHER", 0.8)],
            0.95,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].memory.id, MemoryId(5));
    }

    #[test]
    fn age_labels() {
        let now = Utc::now();
        assert_eq!(format_age(now - Duration::hours(5), now), "5h");
        assert_eq!(format_age(now - Duration::days(3), now), "3d");
        assert_eq!(format_age(now - Duration::days(15), now), "2w");
        assert_eq!(format_age(now - Duration::days(95), now), "3mo");
        assert_eq!(format_age(now - Duration::days(548), now), "1.5y");
        assert_eq!(format_age(now + Duration::days(1), now), "0h");
    }

    #[test]
    fn context_block_layout() {
        let now = Utc::now();
        let memory = ScoredMemory {
            memory: MemoryRecord::new(MemoryId(0), "I work as a teacher", now - Duration::days(3), 1.0, vec![]),
            score: 0.456,
            breakdown: ScoreBreakdown {
                semantic: 0.456,
                temporal: 1.0,
                access: 1.0,
                entity: 1.0,
                importance: 1.0,
            },
        };
        let block = format_memories_for_context(&[memory], now);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines[0], "[RELEVANT MEMORIES]");
        assert_eq!(lines[2], "• [Score: 0.46, Age: 3d, Used: 1×] I work as a teacher");
        assert_eq!(lines[3], "");
        assert!(lines[4].contains("Don't announce \"I remember\""));
        assert_eq!(lines.len(), 5);
        assert!(block.ends_with("just incorporate information.\n"));
        assert!(format_memories_for_context(&[], now).is_empty());
    }
}
