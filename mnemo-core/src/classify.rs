//! Importance classification.
//!
//! Importance starts at [`BASELINE`] and is raised to the highest tier of any
//! rule that fires. Tiers never add up. Rules are plain data
//! ([`ImportanceRule`]) so the table can be inspected, replaced, or tested in
//! isolation.
//!
//! | Rule | Input | Tier |
//! |------|-------|------|
//! | memory marker ("don't forget", "remember that", …) | message | 2.0 |
//! | emotional keyword | candidate | 1.8 |
//! | identity / relationship pattern | candidate | 1.8 |
//! | correction language ("actually", "to clarify", …) | message | 1.8 |
//! | `!!!` | message or candidate | 1.5 |
//! | candidate repeated verbatim | message | 1.5 |
//! | two or more ALL-CAPS words | candidate | 1.5 |

use std::fmt;

use regex::Regex;
use tracing::trace;

/// Importance of an unremarkable statement.
pub const BASELINE: f32 = 1.0;
/// Tier for explicit requests to remember.
pub const MARKER_TIER: f32 = 2.0;
/// Tier for emotional, identity and correction statements.
pub const HIGH_TIER: f32 = 1.8;
/// Tier for emphasis.
pub const EMPHASIS_TIER: f32 = 1.5;

const MEMORY_MARKERS: &[&str] = &[
    "don't forget",
    "don’t forget",
    "dont forget",
    "remember that",
    "remember this",
    "important:",
    "note:",
    "keep in mind",
    "make sure you remember",
    "this is important",
    "pay attention",
];

const EMOTIONAL_KEYWORDS: &[&str] = &[
    "happy",
    "sad",
    "excited",
    "worried",
    "anxious",
    "proud",
    "grateful",
    "love",
    "hate",
    "miss",
    "appreciate",
    "disappointed",
    "frustrated",
    "scared",
    "nervous",
    "relieved",
    "thrilled",
    "overwhelmed",
];

const IDENTITY_PATTERNS: &[&str] = &[
    r"\bi['’]?m\s+\w+",
    r"\bmy name is\b",
    r"\bi am\s+\w+",
    r"\byou know i['’]?m\b",
    r"\bwe['’]?re\s+\w+",
];

const CORRECTION_PHRASES: &[&str] = &[
    "actually",
    "i meant",
    "correction",
    "to clarify",
    "let me rephrase",
];

// ---------------------------------------------------------------------------
// Rule table
// ---------------------------------------------------------------------------

/// What a rule looks at.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// The pattern matches somewhere in the full message.
    MessageMatches(Regex),
    /// The pattern matches somewhere in the candidate.
    CandidateMatches(Regex),
    /// The message or the candidate contains `marker`.
    ContainsLiteral(&'static str),
    /// The candidate occurs more than once in the message (case-insensitive).
    RepeatedInMessage,
    /// At least `min_words` shouted words longer than `min_len` chars.
    CapsRun {
        /// Shouted words required.
        min_words: usize,
        /// A word must be longer than this to count.
        min_len: usize,
    },
}

impl Trigger {
    fn fires(&self, message: &str, candidate: &str) -> bool {
        match self {
            Self::MessageMatches(re) => re.is_match(message),
            Self::CandidateMatches(re) => re.is_match(candidate),
            Self::ContainsLiteral(marker) => message.contains(marker) || candidate.contains(marker),
            Self::RepeatedInMessage => {
                let needle = candidate.to_lowercase();
                !needle.is_empty() && message.to_lowercase().matches(needle.as_str()).count() > 1
            }
            Self::CapsRun { min_words, min_len } => {
                candidate
                    .split_whitespace()
                    .filter(|w| w.chars().count() > *min_len && is_shouted(w))
                    .count()
                    >= *min_words
            }
        }
    }
}

/// One row of the classification table.
#[derive(Debug, Clone)]
pub struct ImportanceRule {
    /// Short identifier, used in trace logs.
    pub name: &'static str,
    /// Importance assigned when the rule fires.
    pub tier: f32,
    /// The condition.
    pub trigger: Trigger,
}

impl ImportanceRule {
    /// Build a rule.
    #[must_use]
    pub fn new(name: &'static str, tier: f32, trigger: Trigger) -> Self {
        Self { name, tier, trigger }
    }
}

/// Case-insensitive regex matching any of `words` at a word start.
fn word_start_alternation(words: &[&str]) -> Regex {
    let body = words.iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join("|");
    compile(&format!(r"(?i)\b(?:{body})"))
}

fn any_of(patterns: &[&str]) -> Regex {
    compile(&format!("(?i)(?:{})", patterns.join("|")))
}

// Inputs are the constant tables above.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in importance pattern")
}

/// A word with at least one letter and no lowercase letters.
fn is_shouted(word: &str) -> bool {
    word.chars().any(char::is_alphabetic) && !word.chars().any(char::is_lowercase)
}

/// The built-in rule table.
#[must_use]
pub fn default_rules() -> Vec<ImportanceRule> {
    vec![
        ImportanceRule::new(
            "memory_marker",
            MARKER_TIER,
            Trigger::MessageMatches(word_start_alternation(MEMORY_MARKERS)),
        ),
        ImportanceRule::new(
            "emotion",
            HIGH_TIER,
            Trigger::CandidateMatches(word_start_alternation(EMOTIONAL_KEYWORDS)),
        ),
        ImportanceRule::new(
            "identity",
            HIGH_TIER,
            Trigger::CandidateMatches(any_of(IDENTITY_PATTERNS)),
        ),
        ImportanceRule::new(
            "correction",
            HIGH_TIER,
            Trigger::MessageMatches(word_start_alternation(CORRECTION_PHRASES)),
        ),
        ImportanceRule::new("exclamation", EMPHASIS_TIER, Trigger::ContainsLiteral("!!!")),
        ImportanceRule::new("repetition", EMPHASIS_TIER, Trigger::RepeatedInMessage),
        ImportanceRule::new(
            "all_caps",
            EMPHASIS_TIER,
            Trigger::CapsRun {
                min_words: 2,
                min_len: 3,
            },
        ),
    ]
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Assigns an importance multiplier to a candidate.
#[derive(Clone)]
pub struct ImportanceClassifier {
    rules: Vec<ImportanceRule>,
}

impl fmt::Debug for ImportanceClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.rules.iter().map(|r| (r.name, r.tier))).finish()
    }
}

impl Default for ImportanceClassifier {
    fn default() -> Self {
        Self::with_rules(default_rules())
    }
}

impl ImportanceClassifier {
    /// Use a custom rule table.
    #[must_use]
    pub fn with_rules(rules: Vec<ImportanceRule>) -> Self {
        Self { rules }
    }

    /// The active rules.
    #[must_use]
    pub fn rules(&self) -> &[ImportanceRule] {
        &self.rules
    }

    /// Importance of `candidate` as it appeared in `full_message`.
    /// Always at least [`BASELINE`].
    #[must_use]
    pub fn classify(&self, full_message: &str, candidate: &str) -> f32 {
        self.rules
            .iter()
            .filter(|rule| rule.trigger.fires(full_message, candidate))
            .inspect(|rule| trace!(rule = rule.name, tier = rule.tier, "Importance rule fired"))
            .fold(BASELINE, |best, rule| best.max(rule.tier))
    }

    /// Names of the rules that fire for this input.
    #[must_use]
    pub fn explain(&self, full_message: &str, candidate: &str) -> Vec<&'static str> {
        self.rules
            .iter()
            .filter(|rule| rule.trigger.fires(full_message, candidate))
            .map(|rule| rule.name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(message: &str) -> f32 {
        ImportanceClassifier::default().classify(message, message)
    }

    #[test]
    fn plain_statement_is_baseline() {
        assert!((classify("I work as a teacher") - BASELINE).abs() < f32::EPSILON);
    }

    #[test]
    fn memory_marker_reaches_top_tier() {
        let message = "Don't forget, my birthday is March 3rd";
        assert!(classify(message) >= MARKER_TIER);
        let clf = ImportanceClassifier::default();
        assert!(clf.explain(message, message).contains(&"memory_marker"));
    }

    #[test]
    fn marker_in_message_lifts_every_candidate() {
        let clf = ImportanceClassifier::default();
        let message = "Remember that. The meeting moved to Thursday afternoon";
        assert!(clf.classify(message, "The meeting moved to Thursday afternoon") >= MARKER_TIER);
    }

    #[test]
    fn emotion_and_identity_reach_high_tier() {
        assert!((classify("I really miss my grandmother's cooking") - HIGH_TIER).abs() < f32::EPSILON);
        assert!((classify("My name is Dee and I fly planes") - HIGH_TIER).abs() < f32::EPSILON);
        assert!((classify("I'm a nurse at the county hospital") - HIGH_TIER).abs() < f32::EPSILON);
    }

    #[test]
    fn keywords_only_match_at_word_starts() {
        // "whatever" contains "hate" mid-word.
        assert!((classify("whatever you think about the bus schedule") - BASELINE).abs() < f32::EPSILON);
    }

    #[test]
    fn emotion_elsewhere_in_message_does_not_lift_candidate() {
        let clf = ImportanceClassifier::default();
        let message = "I was so happy today. The car needs new tires soon";
        assert!((clf.classify(message, "The car needs new tires soon") - BASELINE).abs() < f32::EPSILON);
    }

    #[test]
    fn correction_language_reaches_high_tier() {
        assert!((classify("Actually the appointment is on Friday") - HIGH_TIER).abs() < f32::EPSILON);
    }

    #[test]
    fn emphasis_signals() {
        assert!((classify("The game starts at noon!!!") - EMPHASIS_TIER).abs() < f32::EPSILON);
        assert!((classify("the game is VERY VERY close") - EMPHASIS_TIER).abs() < f32::EPSILON);
        // Short shouted words don't count.
        assert!((classify("the dog is OK at the VET") - BASELINE).abs() < f32::EPSILON);

        let clf = ImportanceClassifier::default();
        let message = "call the plumber on monday. call the plumber on monday";
        assert!((clf.classify(message, "call the plumber on monday") - EMPHASIS_TIER).abs() < f32::EPSILON);
    }

    #[test]
    fn tiers_take_the_max_not_the_sum() {
        let score = classify("Don't forget I'm so proud of my daughter!!! Actually VERY VERY proud");
        assert!((score - MARKER_TIER).abs() < f32::EPSILON);
    }

    #[test]
    fn custom_rule_table() {
        let clf = ImportanceClassifier::with_rules(vec![ImportanceRule::new(
            "allergy",
            2.5,
            Trigger::CandidateMatches(compile(r"(?i)\ballerg")),
        )]);
        assert!((clf.classify("x", "I am allergic to peanuts") - 2.5).abs() < f32::EPSILON);
        assert!((clf.classify("x", "I love peanuts") - BASELINE).abs() < f32::EPSILON);
        assert_eq!(clf.rules().len(), 1);
    }
}
