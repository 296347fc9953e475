//! Vector embedding abstraction layer.
//!
//! The engine consumes exactly one upstream capability: turning text into a
//! fixed-length vector. Providers implement [`EmbeddingProvider`]; the engine
//! only ever calls them through [`Embedder`], which bounds every call with a
//! timeout, checks dimensionality, and caches query embeddings.
//!
//! Providers shipped here:
//! - [`HashingEmbeddingProvider`]: deterministic bag-of-words feature
//!   hashing. Needs no model; used offline and in tests.
//! - [`StubEmbeddingProvider`]: zero vectors.
//! - `OnnxEmbeddingProvider`: all-MiniLM-L6-v2 via `fastembed`
//!   (feature `onnx`).
//!
//! HTTP providers live in the `mnemo-embed` crate.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{MnemoError, Result};
use crate::types::Embedding;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Generate vector embeddings from text.
///
/// Implementations must be `Send + Sync`; calls may be cancelled at any
/// `.await` point when the engine's timeout elapses.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string.
    ///
    /// # Errors
    ///
    /// Returns [`MnemoError::Embedding`] if the model fails to produce a
    /// vector.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// The dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// A human-readable name for the model (e.g. `"all-MiniLM-L6-v2"`).
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Embedder
// ---------------------------------------------------------------------------

/// Timeout-bounded front for an [`EmbeddingProvider`].
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
    cache: Option<Mutex<LruCache<String, Embedding>>>,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.provider.model_name())
            .field("dimensions", &self.provider.dimensions())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Embedder {
    /// Wrap `provider`. A `cache_size` of 0 disables the query cache.
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout: Duration, cache_size: usize) -> Self {
        let cache = NonZeroUsize::new(cache_size).map(|cap| Mutex::new(LruCache::new(cap)));
        Self {
            provider,
            timeout,
            cache,
        }
    }

    /// Dimensionality every returned vector is guaranteed to have.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Name of the underlying model.
    #[must_use]
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed `text`, giving up after the configured timeout.
    ///
    /// # Errors
    ///
    /// [`MnemoError::EmbeddingTimeout`] when the bound elapses (the provider
    /// future is dropped), [`MnemoError::DimensionMismatch`] for a vector of
    /// the wrong length, or whatever the provider reported.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        let start = Instant::now();
        let embedding = match tokio::time::timeout(self.timeout, self.provider.embed(text)).await {
            Ok(result) => result?,
            Err(_) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    model = self.provider.model_name(),
                    timeout_ms,
                    "Embedding call timed out"
                );
                return Err(MnemoError::EmbeddingTimeout { timeout_ms });
            }
        };

        let expected = self.provider.dimensions();
        if embedding.dimensions() != expected {
            return Err(MnemoError::DimensionMismatch {
                expected,
                actual: embedding.dimensions(),
            });
        }

        debug!(
            chars = text.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Embedded text"
        );
        Ok(embedding)
    }

    /// Like [`embed`](Self::embed), but serves repeated queries from the LRU
    /// cache. Failures are not cached.
    ///
    /// # Errors
    ///
    /// Same as [`embed`](Self::embed).
    pub async fn embed_query(&self, query: &str) -> Result<Embedding> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().get(query) {
                return Ok(hit.clone());
            }
        }

        let embedding = self.embed(query).await?;

        if let Some(cache) = &self.cache {
            cache.lock().put(query.to_string(), embedding.clone());
        }
        Ok(embedding)
    }
}

// ---------------------------------------------------------------------------
// Hashing provider (offline default & tests)
// ---------------------------------------------------------------------------

/// Deterministic bag-of-words embeddings via signed feature hashing.
///
/// Texts sharing words land close together, which is enough to exercise
/// ranking without a neural model. Output is L2-normalized.
pub struct HashingEmbeddingProvider {
    dims: usize,
}

impl HashingEmbeddingProvider {
    /// Create a provider producing `dimensions`-length vectors.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dims: dimensions.max(1),
        }
    }

    /// Synchronous core, shared with benches.
    #[must_use]
    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut v = vec![0.0_f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a_64(token.to_lowercase().as_bytes());
            let bucket = usize::try_from(h % self.dims as u64).unwrap_or(0);
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        Embedding(v).normalized()
    }
}

/// 64-bit FNV-1a. Stored vectors depend on it, so the constants are fixed.
#[must_use]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;
    bytes.iter().fold(OFFSET_BASIS, |h, &b| (h ^ u64::from(b)).wrapping_mul(PRIME))
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "feature-hashing-bow"
    }
}

// ---------------------------------------------------------------------------
// Stub provider
// ---------------------------------------------------------------------------

/// A stub embedding provider that returns zero-vectors.
pub struct StubEmbeddingProvider {
    dims: usize,
}

impl StubEmbeddingProvider {
    /// Create a new stub provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl Default for StubEmbeddingProvider {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbeddingProvider {
    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Ok(Embedding(vec![0.0; self.dims]))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "stub-zero-vector"
    }
}

// ---------------------------------------------------------------------------
// ONNX provider
// ---------------------------------------------------------------------------

/// all-MiniLM-L6-v2 (384 dims) running locally through ONNX Runtime.
///
/// Inference is CPU-bound, so it runs on the blocking pool; the engine's
/// timeout still bounds how long a caller waits.
#[cfg(feature = "onnx")]
pub struct OnnxEmbeddingProvider {
    model: Arc<fastembed::TextEmbedding>,
}

#[cfg(feature = "onnx")]
impl OnnxEmbeddingProvider {
    /// Load (downloading on first use) the model.
    ///
    /// # Errors
    ///
    /// Returns [`MnemoError::Embedding`] if the model cannot be loaded.
    pub fn new() -> Result<Self> {
        let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2);
        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| MnemoError::Embedding(format!("failed to load ONNX model: {e}")))?;
        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[cfg(feature = "onnx")]
#[async_trait]
impl EmbeddingProvider for OnnxEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();
        let mut vectors = tokio::task::spawn_blocking(move || model.embed(vec![text], None))
            .await
            .map_err(|e| MnemoError::Embedding(format!("embedding task failed: {e}")))?
            .map_err(|e| MnemoError::Embedding(e.to_string()))?;
        vectors
            .pop()
            .map(Embedding)
            .ok_or_else(|| MnemoError::Embedding("model returned no vector".to_string()))
    }

    fn dimensions(&self) -> usize {
        384
    }

    fn model_name(&self) -> &str {
        "all-MiniLM-L6-v2"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
