//! Core type definitions for the mnemo memory system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds in one day, used for all age computations.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable identifier of a memory record.
///
/// Ids are assigned sequentially at creation and equal the record's position
/// in the metadata list. They are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub u64);

impl MemoryId {
    /// Position of this memory in the index.
    #[must_use]
    pub fn index(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Embedding
// ---------------------------------------------------------------------------

/// A dense vector embedding for semantic similarity search.
/// Typically 384 dimensions (all-MiniLM-L6-v2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Squared Euclidean distance. Returns `f32::MAX` on dimension mismatch.
    #[must_use]
    pub fn squared_l2(&self, other: &Self) -> f32 {
        if self.0.len() != other.0.len() {
            return f32::MAX;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    /// Dimensionality of the embedding.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    /// Scale to unit length. Zero vectors are returned unchanged.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let mag = self.0.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag > f32::EPSILON {
            for x in &mut self.0 {
                *x /= mag;
            }
        }
        self
    }
}

/// Convert a squared L2 distance into a similarity in (0, 1].
#[must_use]
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

// ---------------------------------------------------------------------------
// Memory record
// ---------------------------------------------------------------------------

/// A permanent memory. Only `last_accessed` and `access_count` change after
/// creation; the embedding lives in the index alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Stable id, equal to the record's position in the store.
    pub id: MemoryId,
    /// The remembered text span.
    pub content: String,
    /// When the memory was formed.
    pub created_at: DateTime<Utc>,
    /// Last time the memory was surfaced to the user.
    pub last_accessed: DateTime<Utc>,
    /// Times surfaced, starting at 1.
    pub access_count: u32,
    /// Importance multiplier, roughly 1.0–2.5.
    pub importance: f32,
    /// Proper-noun-like strings found in `content`.
    #[serde(default)]
    pub entities: Vec<String>,
}

impl MemoryRecord {
    /// Create a fresh record with `access_count = 1`.
    #[must_use]
    pub fn new(
        id: MemoryId,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
        importance: f32,
        entities: Vec<String>,
    ) -> Self {
        Self {
            id,
            content: content.into(),
            created_at,
            last_accessed: created_at,
            access_count: 1,
            importance,
            entities,
        }
    }

    /// Record that this memory reached the user.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if now > self.last_accessed {
            self.last_accessed = now;
        }
    }

    /// Age in fractional days at `now` (zero if `now` precedes creation).
    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        days_between(self.created_at, now)
    }
}

/// Fractional days from `earlier` to `later`, clamped at zero.
#[must_use]
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let secs = (later - earlier).num_milliseconds() as f64 / 1000.0;
    (secs / SECONDS_PER_DAY).max(0.0)
}

/// Snapshot statistics about a memory store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StoreStats {
    /// Number of permanent memories.
    pub total_memories: usize,
    /// Sum of access counts.
    pub total_accesses: u64,
    /// Mean access count (0 when empty).
    pub avg_accesses: f64,
    /// Number of vectors in the index (always equals `total_memories`).
    pub index_size: usize,
    /// Candidates awaiting reinforcement.
    pub tracked_candidates: usize,
}
