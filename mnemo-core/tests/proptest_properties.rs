//! Property-based tests for mnemo core.
//!
//! Uses `proptest` to check scoring, classification and deduplication
//! invariants under random inputs.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use mnemo_core::classify::{BASELINE, ImportanceClassifier, MARKER_TIER};
use mnemo_core::decay::{self, DECAY_FLOOR};
use mnemo_core::extract::CandidateExtractor;
use mnemo_core::reinforcement::normalize;
use mnemo_core::retrieval::{ScoreBreakdown, ScoredMemory, deduplicate, jaccard_similarity};
use mnemo_core::{MemoryId, MemoryRecord};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

const WORDS: &[&str] = &[
    "teacher", "python", "garden", "sister", "march", "debugging", "my", "the", "lives", "in",
    "works", "house", "cat", "Ohio", "loves", "coffee",
];

fn arb_sentence() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(WORDS), 0..10).prop_map(|w| w.join(" "))
}

fn scored(id: u64, content: String, score: f64) -> ScoredMemory {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("valid date");
    ScoredMemory {
        memory: MemoryRecord::new(MemoryId(id), content, now, 1.0, vec![]),
        score,
        breakdown: ScoreBreakdown {
            semantic: score,
            temporal: 1.0,
            access: 1.0,
            entity: 1.0,
            importance: 1.0,
        },
    }
}

// ---------------------------------------------------------------------------
// Property: temporal decay is bounded and never increases with age
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn decay_bounded_and_monotonic(a in 0.0..20_000.0f64, b in 0.0..20_000.0f64) {
        let (young, old) = if a <= b { (a, b) } else { (b, a) };
        let dy = decay::decay_for_age(young);
        let dold = decay::decay_for_age(old);
        prop_assert!(dy >= dold - 1e-12);
        prop_assert!(dold > DECAY_FLOOR - 1e-12 && dy <= 1.0);
    }
}

proptest! {
    #[test]
    fn future_timestamps_do_not_decay(hours in 0i64..10_000) {
        let now = Utc::now();
        prop_assert_eq!(decay::temporal_decay(now + Duration::hours(hours), now), 1.0);
    }
}

// ---------------------------------------------------------------------------
// Property: access weight stays within [0.7, 1.5]
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn access_weight_bounded(count in 0u32..1_000_000, idle_days in 0i64..5_000) {
        let now = Utc::now();
        let w = decay::access_weight(count, now - Duration::days(idle_days), now);
        prop_assert!((0.7 - 1e-12..=1.5 + 1e-12).contains(&w), "weight {}", w);
    }
}

// ---------------------------------------------------------------------------
// Property: classification is deterministic, at least baseline, at most the
// marker tier
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn classification_deterministic_and_bounded(message in "\\PC{0,120}") {
        let classifier = ImportanceClassifier::default();
        let candidate = message.chars().take(40).collect::<String>();
        let first = classifier.classify(&message, &candidate);
        let second = classifier.classify(&message, &candidate);
        prop_assert_eq!(first, second);
        prop_assert!((BASELINE..=MARKER_TIER).contains(&first));
    }
}

// ---------------------------------------------------------------------------
// Property: extracted candidates respect the word and length limits
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn candidates_meet_minimum_words(text in "[a-zA-Z ,.;!?]{0,400}") {
        let extractor = CandidateExtractor::default();
        for candidate in extractor.extract(&text) {
            prop_assert!(candidate.split_whitespace().count() >= 4);
            prop_assert_eq!(candidate.trim(), candidate.as_str());
        }
    }
}

proptest! {
    #[test]
    fn normalization_is_idempotent(text in "\\PC{0,80}") {
        let once = normalize(&text);
        prop_assert_eq!(normalize(&once), once);
    }
}

// ---------------------------------------------------------------------------
// Property: Jaccard similarity is symmetric and in [0, 1]
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn jaccard_symmetric_and_bounded(a in arb_sentence(), b in arb_sentence()) {
        let ab = jaccard_similarity(&a, &b);
        prop_assert!((ab - jaccard_similarity(&b, &a)).abs() < 1e-12);
        prop_assert!((0.0..=1.0).contains(&ab));
    }
}

// ---------------------------------------------------------------------------
// Property: dedup keeps order, keeps the first result, and leaves no pair
// above the threshold
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn dedup_invariants(
        sentences in prop::collection::vec(arb_sentence(), 0..12),
        threshold in 0.5..1.0f64,
    ) {
        let n = sentences.len();
        let input: Vec<ScoredMemory> = sentences
            .into_iter()
            .enumerate()
            .map(|(i, s)| scored(i as u64, s, 1.0 - i as f64 / 100.0))
            .collect();

        let kept = deduplicate(input.clone(), threshold);
        prop_assert!(kept.len() <= n);
        if n > 0 {
            prop_assert_eq!(kept[0].memory.id, MemoryId(0));
        }
        prop_assert!(kept.windows(2).all(|w| w[0].memory.id < w[1].memory.id));
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                prop_assert!(jaccard_similarity(&a.memory.content, &b.memory.content) < threshold);
            }
        }
    }
}
