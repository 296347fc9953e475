//! Reinforcement gate for ordinary-importance candidates.
//!
//! A candidate becomes a memory only after it has been mentioned
//! `promotion_count` times with the first mention no older than
//! `window_days`. Entries are keyed by the normalized text (whitespace
//! collapsed, lower-cased):
//!
//! ```text
//! UNSEEN → TRACKED(1) → TRACKED(2) → … → PROMOTED (entry removed)
//!                                      ↘ EXPIRED  (removed by GC)
//! ```
//!
//! The window is measured from `first_seen`: mentions 1 and 2 can be far
//! apart as long as mention 3 lands within the window of mention 1.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ReinforcementConfig;
use crate::error::Result;
use crate::persistence::{self, LoadOutcome};
use crate::types::days_between;

/// A candidate awaiting corroboration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedCandidate {
    /// The text as first observed.
    pub original_text: String,
    /// Mentions so far (≥ 1).
    pub count: u32,
    /// First mention.
    pub first_seen: DateTime<Utc>,
    /// Most recent mention.
    pub last_seen: DateTime<Utc>,
}

/// Result of observing a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Promotion {
    /// Still waiting; `count` mentions recorded.
    Pending {
        /// Mentions so far.
        count: u32,
    },
    /// Threshold met inside the window. The entry has been removed and the
    /// caller must create the memory.
    Promoted(TrackedCandidate),
}

impl Promotion {
    /// Whether the candidate was promoted.
    #[must_use]
    pub fn is_promoted(&self) -> bool {
        matches!(self, Self::Promoted(_))
    }
}

/// Collapse whitespace and lower-case: the tracker key for `text`.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Pending candidates, keyed by normalized text.
#[derive(Debug, Clone, Default)]
pub struct ReinforcementTracker {
    entries: HashMap<String, TrackedCandidate>,
    config: ReinforcementConfig,
}

impl ReinforcementTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new(config: ReinforcementConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
        }
    }

    /// Record a mention of `candidate` at `now`.
    pub fn observe_at(&mut self, candidate: &str, now: DateTime<Utc>) -> Promotion {
        let key = normalize(candidate);

        let Some(entry) = self.entries.get_mut(&key) else {
            self.entries.insert(
                key,
                TrackedCandidate {
                    original_text: candidate.to_string(),
                    count: 1,
                    first_seen: now,
                    last_seen: now,
                },
            );
            return Promotion::Pending { count: 1 };
        };

        entry.count = entry.count.saturating_add(1);
        if now > entry.last_seen {
            entry.last_seen = now;
        }

        let count = entry.count;
        let within_window = days_between(entry.first_seen, now) <= self.config.window_days;
        if count < self.config.promotion_count || !within_window {
            return Promotion::Pending { count };
        }

        match self.entries.remove(&key) {
            Some(candidate) => {
                debug!(count, "Candidate promoted");
                Promotion::Promoted(candidate)
            }
            None => Promotion::Pending { count },
        }
    }

    /// Record a mention at the current time.
    pub fn observe(&mut self, candidate: &str) -> Promotion {
        self.observe_at(candidate, Utc::now())
    }

    /// Put back a promoted candidate whose memory could not be created, so
    /// the next mention promotes it again. Merges with any entry that
    /// appeared since.
    pub fn reinstate(&mut self, candidate: TrackedCandidate) {
        let key = normalize(&candidate.original_text);
        match self.entries.get_mut(&key) {
            Some(existing) => {
                existing.count = existing.count.saturating_add(candidate.count);
                existing.first_seen = existing.first_seen.min(candidate.first_seen);
                existing.last_seen = existing.last_seen.max(candidate.last_seen);
            }
            None => {
                self.entries.insert(key, candidate);
            }
        }
    }

    /// Drop entries whose `last_seen` is more than `max_age_days` before
    /// `now`. Returns how many were removed.
    pub fn collect_garbage_at(&mut self, now: DateTime<Utc>) -> usize {
        let max_age = self.config.max_age_days;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| days_between(entry.last_seen, now) <= max_age);
        let removed = before - self.entries.len();
        if removed > 0 {
            info!(removed, remaining = self.entries.len(), "Expired stale reinforcement entries");
        }
        removed
    }

    /// The entry tracked for `candidate`, if any.
    #[must_use]
    pub fn get(&self, candidate: &str) -> Option<&TrackedCandidate> {
        self.entries.get(&normalize(candidate))
    }

    /// Number of pending candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write the tracker as a JSON object (key → record).
    ///
    /// # Errors
    ///
    /// [`crate::MnemoError::Persist`] if the file cannot be written.
    pub fn save(&self, path: &Path, backup_count: u32) -> Result<()> {
        persistence::save_json(path, &self.entries, backup_count)?;
        debug!(entries = self.entries.len(), path = %path.display(), "Reinforcement tracker saved");
        Ok(())
    }

    /// Load a tracker, starting empty if the file is missing or malformed.
    #[must_use]
    pub fn load_or_create(path: &Path, config: ReinforcementConfig) -> (Self, LoadOutcome) {
        match persistence::load_json::<HashMap<String, TrackedCandidate>>(path) {
            Ok(Some(entries)) => {
                let count = entries.len();
                info!(count, path = %path.display(), "Reinforcement tracker loaded");
                (Self { entries, config }, LoadOutcome::Loaded { count })
            }
            Ok(None) => (Self::new(config), LoadOutcome::Absent),
            Err(reason) => {
                warn!(path = %path.display(), %reason, "Reinforcement file unreadable, starting empty");
                (Self::new(config), LoadOutcome::Corrupt { reason })
            }
        }
    }
}
