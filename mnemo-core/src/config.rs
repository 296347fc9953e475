//! Configuration for the mnemo memory engine.
//!
//! Maps directly to `mnemo.toml`. Every field has a default, so a partial
//! file (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MnemoError, Result};

/// Top-level mnemo configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MnemoConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Where and how the store is persisted.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Nearest-neighbour index tuning.
    #[serde(default)]
    pub index: IndexConfig,
    /// Candidate extraction and bypass settings.
    #[serde(default)]
    pub formation: FormationConfig,
    /// Reinforcement gate settings.
    #[serde(default)]
    pub reinforcement: ReinforcementConfig,
    /// Retrieval pipeline settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl MnemoConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `MnemoError::Config` if the TOML is invalid or fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| MnemoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reject values outside their meaningful domain.
    ///
    /// # Errors
    /// Returns `MnemoError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let bad = |field: &str, why: &str| Err(MnemoError::Config(format!("{field}: {why}")));

        if self.embedding.dimensions == 0 {
            return bad("embedding.dimensions", "must be > 0");
        }
        if self.embedding.timeout_ms == 0 {
            return bad("embedding.timeout_ms", "must be > 0");
        }
        if self.retrieval.candidate_pool == 0 {
            return bad("retrieval.candidate_pool", "must be > 0");
        }
        if !(0.0..=1.0).contains(&self.retrieval.dedup_threshold) {
            return bad("retrieval.dedup_threshold", "must be within [0, 1]");
        }
        if self.retrieval.min_score < 0.0 {
            return bad("retrieval.min_score", "must be >= 0");
        }
        if self.reinforcement.promotion_count < 2 {
            return bad("reinforcement.promotion_count", "must be >= 2");
        }
        if self.formation.bypass_threshold < 1.0 {
            return bad("formation.bypass_threshold", "must be >= 1.0 (the baseline importance)");
        }
        if self.formation.min_words == 0 {
            return bad("formation.min_words", "must be > 0");
        }
        if !(0.0..=1.0).contains(&self.index.rebuild_fraction) {
            return bad("index.rebuild_fraction", "must be within [0, 1]");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Persisted artifact locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding all persisted files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Vector index file name.
    #[serde(default = "default_index_file")]
    pub index_file: String,
    /// Metadata sidecar file name.
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,
    /// Reinforcement tracking file name.
    #[serde(default = "default_reinforcement_file")]
    pub reinforcement_file: String,
    /// Persist the index after each formation batch that created memories.
    #[serde(default = "default_true")]
    pub autosave: bool,
    /// Number of rotated `.bak.N` copies kept per file (0 disables).
    #[serde(default = "default_2")]
    pub backup_count: u32,
}

impl StorageConfig {
    /// Full path of the vector index file.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(&self.index_file)
    }

    /// Full path of the metadata sidecar.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(&self.metadata_file)
    }

    /// Full path of the reinforcement tracking file.
    #[must_use]
    pub fn reinforcement_path(&self) -> PathBuf {
        self.data_dir.join(&self.reinforcement_file)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            index_file: default_index_file(),
            metadata_file: default_metadata_file(),
            reinforcement_file: default_reinforcement_file(),
            autosave: true,
            backup_count: 2,
        }
    }
}

/// Embedding provider selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: "hashing", "stub", "ollama", "openai", "onnx".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name passed to remote providers.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Base URL for remote providers.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// API key for OpenAI-compatible providers.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Embedding vector dimensions.
    #[serde(default = "default_384")]
    pub dimensions: usize,
    /// Hard timeout for a single embedding call in milliseconds.
    #[serde(default = "default_5000")]
    pub timeout_ms: u64,
    /// Retries for remote providers before giving up.
    #[serde(default = "default_1_u32")]
    pub max_retries: u32,
    /// Query embeddings kept in the LRU cache (0 disables).
    #[serde(default = "default_256")]
    pub cache_size: usize,
}

impl EmbeddingConfig {
    /// The timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            base_url: default_ollama_url(),
            api_key: None,
            dimensions: 384,
            timeout_ms: 5000,
            max_retries: 1,
            cache_size: 256,
        }
    }
}

/// Nearest-neighbour index tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Below this many vectors, search is an exact linear scan.
    #[serde(default = "default_100")]
    pub brute_force_limit: usize,
    /// HNSW `ef_construction` (higher = more accurate build, slower).
    #[serde(default = "default_100")]
    pub ef_construction: usize,
    /// HNSW `ef_search` (higher = more accurate search, slower).
    #[serde(default = "default_64")]
    pub ef_search: usize,
    /// Rebuild the graph once unindexed vectors exceed this share of the total.
    #[serde(default = "default_0_2")]
    pub rebuild_fraction: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            brute_force_limit: 100,
            ef_construction: 100,
            ef_search: 64,
            rebuild_fraction: 0.2,
        }
    }
}

/// Candidate extraction and the reinforcement bypass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormationConfig {
    /// Spans with fewer words are discarded.
    #[serde(default = "default_4")]
    pub min_words: usize,
    /// Spans longer than this (chars) are split on `,`/`;`.
    #[serde(default = "default_300")]
    pub max_candidate_chars: usize,
    /// Importance at or above which a candidate skips reinforcement.
    #[serde(default = "default_1_8")]
    pub bypass_threshold: f32,
}

impl Default for FormationConfig {
    fn default() -> Self {
        Self {
            min_words: 4,
            max_candidate_chars: 300,
            bypass_threshold: 1.8,
        }
    }
}

/// Reinforcement gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinforcementConfig {
    /// Mentions required before promotion.
    #[serde(default = "default_3")]
    pub promotion_count: u32,
    /// Promotion only if the first mention is at most this many days old.
    #[serde(default = "default_30")]
    pub window_days: f64,
    /// GC removes candidates not seen for longer than this.
    #[serde(default = "default_30")]
    pub max_age_days: f64,
}

impl Default for ReinforcementConfig {
    fn default() -> Self {
        Self {
            promotion_count: 3,
            window_days: 30.0,
            max_age_days: 30.0,
        }
    }
}

/// Retrieval pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Memories returned per query.
    #[serde(default = "default_15")]
    pub top_k: usize,
    /// Results scoring below this are dropped.
    #[serde(default = "default_0_05")]
    pub min_score: f64,
    /// Nearest neighbours fetched before re-ranking.
    #[serde(default = "default_50")]
    pub candidate_pool: usize,
    /// Word-set Jaccard similarity at which a result counts as a duplicate.
    #[serde(default = "default_0_95")]
    pub dedup_threshold: f64,
    /// How many of the top results get their access stats bumped.
    #[serde(default = "default_5")]
    pub access_update_count: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 15,
            min_score: 0.05,
            candidate_pool: 50,
            dedup_threshold: 0.95,
            access_update_count: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_data_dir() -> PathBuf { PathBuf::from("mnemo_data") }
fn default_index_file() -> String { "memory_index.bin".to_string() }
fn default_metadata_file() -> String { "memory_metadata.json".to_string() }
fn default_reinforcement_file() -> String { "reinforcement_tracking.json".to_string() }
fn default_provider() -> String { "hashing".to_string() }
fn default_embedding_model() -> String { "all-minilm".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_0_05() -> f64 { 0.05 }
fn default_0_2() -> f32 { 0.2 }
fn default_0_95() -> f64 { 0.95 }
fn default_1_8() -> f32 { 1.8 }
fn default_1_u32() -> u32 { 1 }
fn default_2() -> u32 { 2 }
fn default_3() -> u32 { 3 }
fn default_4() -> usize { 4 }
fn default_5() -> usize { 5 }
fn default_15() -> usize { 15 }
fn default_30() -> f64 { 30.0 }
fn default_50() -> usize { 50 }
fn default_64() -> usize { 64 }
fn default_100() -> usize { 100 }
fn default_256() -> usize { 256 }
fn default_300() -> usize { 300 }
fn default_384() -> usize { 384 }
fn default_5000() -> u64 { 5000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config = MnemoConfig::from_toml("").expect("parse");
        assert_eq!(config.retrieval.top_k, 15);
        assert_eq!(config.reinforcement.promotion_count, 3);
        assert_eq!(config.embedding.dimensions, 384);
        assert!((config.formation.bypass_threshold - 1.8).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = MnemoConfig::from_toml(
            r#"
            [storage]
            data_dir = "/var/lib/mnemo"

            [retrieval]
            top_k = 8
            "#,
        )
        .expect("parse");
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.retrieval.candidate_pool, 50);
        assert_eq!(
            config.storage.metadata_path(),
            PathBuf::from("/var/lib/mnemo/memory_metadata.json")
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = MnemoConfig::from_toml("[embedding]\ndimensions = 0\n").expect_err("invalid");
        assert!(err.to_string().contains("embedding.dimensions"));

        let err = MnemoConfig::from_toml("[retrieval]\ndedup_threshold = 1.5\n").expect_err("invalid");
        assert!(err.to_string().contains("dedup_threshold"));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = MnemoConfig::from_toml("[retrieval\ntop_k = ").expect_err("malformed");
        assert!(matches!(err, MnemoError::Config(_)));
    }
}
