//! Memory formation: deciding which parts of a user message become memories.
//!
//! For each candidate extracted from the message:
//!
//! - importance ≥ `bypass_threshold` → stored immediately;
//! - otherwise → fed to the [`ReinforcementTracker`], stored once promoted.
//!
//! A memory that fails to store (embedding error or timeout) is skipped; if
//! it came from a promotion the tracker entry is reinstated so the next
//! mention tries again. Formation itself never fails.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::classify::ImportanceClassifier;
use crate::config::FormationConfig;
use crate::error::MnemoError;
use crate::extract::CandidateExtractor;
use crate::index::MemoryIndex;
use crate::metrics::EngineCounters;
use crate::reinforcement::{Promotion, ReinforcementTracker};
use crate::retrieval::extract_entities;
use crate::types::MemoryId;

/// What one observed interaction produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormationReport {
    /// Ids of memories created, in candidate order.
    pub created: Vec<MemoryId>,
    /// Candidates extracted from the message.
    pub candidates: usize,
}

/// Extractor + classifier + bypass policy.
#[derive(Debug, Clone)]
pub struct FormationPipeline {
    extractor: CandidateExtractor,
    classifier: ImportanceClassifier,
    bypass_threshold: f32,
}

impl Default for FormationPipeline {
    fn default() -> Self {
        Self::new(&FormationConfig::default())
    }
}

impl FormationPipeline {
    /// Build from the `[formation]` config section with the default rules.
    #[must_use]
    pub fn new(config: &FormationConfig) -> Self {
        Self::with_classifier(config, ImportanceClassifier::default())
    }

    /// Build with a custom classifier.
    #[must_use]
    pub fn with_classifier(config: &FormationConfig, classifier: ImportanceClassifier) -> Self {
        Self {
            extractor: CandidateExtractor::from_config(config),
            classifier,
            bypass_threshold: config.bypass_threshold,
        }
    }

    /// The candidate extractor.
    #[must_use]
    pub fn extractor(&self) -> &CandidateExtractor {
        &self.extractor
    }

    /// The importance classifier.
    #[must_use]
    pub fn classifier(&self) -> &ImportanceClassifier {
        &self.classifier
    }

    /// Run formation over `user_message` at `now`.
    pub async fn observe_at(
        &self,
        index: &MemoryIndex,
        tracker: &Mutex<ReinforcementTracker>,
        counters: &EngineCounters,
        user_message: &str,
        now: DateTime<Utc>,
    ) -> FormationReport {
        let candidates = self.extractor.extract(user_message);
        let mut report = FormationReport {
            created: Vec::new(),
            candidates: candidates.len(),
        };

        for candidate in &candidates {
            let importance = self.classifier.classify(user_message, candidate);

            if importance >= self.bypass_threshold {
                EngineCounters::incr(&counters.bypasses);
                if let Some(id) = create(index, counters, candidate, importance, now).await {
                    info!(id = %id, importance, "Memory formed immediately");
                    report.created.push(id);
                }
                continue;
            }

            let promotion = tracker.lock().observe_at(candidate, now);
            match promotion {
                Promotion::Pending { count } => {
                    debug!(count, "Candidate awaiting reinforcement");
                }
                Promotion::Promoted(tracked) => {
                    EngineCounters::incr(&counters.promotions);
                    match create(index, counters, candidate, importance, now).await {
                        Some(id) => {
                            info!(id = %id, mentions = tracked.count, "Memory formed by reinforcement");
                            report.created.push(id);
                        }
                        None => tracker.lock().reinstate(tracked),
                    }
                }
            }
        }
        report
    }
}

async fn create(
    index: &MemoryIndex,
    counters: &EngineCounters,
    content: &str,
    importance: f32,
    now: DateTime<Utc>,
) -> Option<MemoryId> {
    match index.add(content, now, importance, extract_entities(content)).await {
        Ok(id) => {
            EngineCounters::incr(&counters.memories_created);
            Some(id)
        }
        Err(e) => {
            match e {
                MnemoError::EmbeddingTimeout { .. } => EngineCounters::incr(&counters.embed_timeouts),
                _ => EngineCounters::incr(&counters.embed_failures),
            }
            warn!(error = %e, "Skipping memory candidate");
            None
        }
    }
}
