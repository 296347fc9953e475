//! The memory store: records, their embeddings, and nearest-neighbour
//! search over them.
//!
//! Records and vectors are parallel lists behind one `RwLock`; position `i`
//! in both is memory `i`. Searches take the read lock. Appends and access
//! updates take the write lock. The embedding for a new memory is computed
//! before the lock is taken, and both lists are extended inside a single
//! critical section, so a failed or timed-out embedding leaves the store
//! untouched.

pub mod hnsw;

use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{IndexConfig, StorageConfig};
use crate::embedding::Embedder;
use crate::error::{MnemoError, Result};
use crate::persistence::{self, LoadOutcome, StoreSnapshot};
use crate::types::{Embedding, MemoryId, MemoryRecord, StoreStats, distance_to_similarity};

pub use hnsw::{Neighbor, VectorIndex};

struct IndexState {
    vectors: VectorIndex,
    records: Vec<MemoryRecord>,
}

/// Owns every permanent memory and its embedding.
pub struct MemoryIndex {
    embedder: Embedder,
    state: RwLock<IndexState>,
    storage: Option<StorageConfig>,
    persist_lock: Mutex<()>,
}

impl std::fmt::Debug for MemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIndex")
            .field("embedder", &self.embedder)
            .field("len", &self.len())
            .field("storage", &self.storage.as_ref().map(|s| s.data_dir.clone()))
            .finish_non_exhaustive()
    }
}

impl MemoryIndex {
    /// An empty, memory-only index. [`persist`](Self::persist) is a no-op.
    #[must_use]
    pub fn new(embedder: Embedder, config: IndexConfig) -> Self {
        let vectors = VectorIndex::new(embedder.dimensions(), config);
        Self::from_parts(embedder, vectors, Vec::new(), None)
    }

    /// Load the store under `storage`, or start empty if it is missing or
    /// unusable. Never fails.
    #[must_use]
    pub fn load_or_create(
        embedder: Embedder,
        config: IndexConfig,
        storage: StorageConfig,
    ) -> (Self, LoadOutcome) {
        let dims = embedder.dimensions();
        let (StoreSnapshot { records, vectors }, outcome) = persistence::load_store(&storage, dims);

        let (vectors, records, outcome) = match VectorIndex::from_vectors(dims, vectors, config.clone()) {
            Ok(index) => (index, records, outcome),
            Err(e) => {
                warn!(error = %e, "Stored vectors rejected, starting fresh");
                (
                    VectorIndex::new(dims, config),
                    Vec::new(),
                    LoadOutcome::Corrupt {
                        reason: e.to_string(),
                    },
                )
            }
        };
        (Self::from_parts(embedder, vectors, records, Some(storage)), outcome)
    }

    fn from_parts(
        embedder: Embedder,
        vectors: VectorIndex,
        records: Vec<MemoryRecord>,
        storage: Option<StorageConfig>,
    ) -> Self {
        Self {
            embedder,
            state: RwLock::new(IndexState { vectors, records }),
            storage,
            persist_lock: Mutex::new(()),
        }
    }

    /// The embedder used for content and queries.
    #[must_use]
    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Embed `content` and append it as a new memory.
    ///
    /// # Errors
    ///
    /// [`MnemoError::EmbeddingTimeout`], [`MnemoError::Embedding`] or
    /// [`MnemoError::DimensionMismatch`]. Nothing is written on error.
    pub async fn add(
        &self,
        content: &str,
        timestamp: DateTime<Utc>,
        importance: f32,
        entities: Vec<String>,
    ) -> Result<MemoryId> {
        let embedding = match self.embedder.embed(content).await {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Memory not created: embedding failed");
                return Err(e);
            }
        };

        let mut state = self.state.write();
        state.vectors.check(&embedding)?;
        let id = MemoryId(state.records.len() as u64);
        state.vectors.push(embedding)?;
        state
            .records
            .push(MemoryRecord::new(id, content, timestamp, importance, entities));
        drop(state);

        debug!(id = %id, importance, "Memory added");
        Ok(id)
    }

    /// Record that memory `id` was surfaced at `now`. Returns the updated
    /// record.
    ///
    /// # Errors
    ///
    /// [`MnemoError::MemoryNotFound`] for an unknown id.
    pub fn update_access_stats_at(&self, id: MemoryId, now: DateTime<Utc>) -> Result<MemoryRecord> {
        let mut state = self.state.write();
        let record = state
            .records
            .get_mut(id.index())
            .ok_or(MnemoError::MemoryNotFound(id))?;
        record.record_access(now);
        Ok(record.clone())
    }

    /// [`update_access_stats_at`](Self::update_access_stats_at) with the
    /// current time.
    ///
    /// # Errors
    ///
    /// [`MnemoError::MemoryNotFound`] for an unknown id.
    pub fn update_access_stats(&self, id: MemoryId) -> Result<MemoryRecord> {
        self.update_access_stats_at(id, Utc::now())
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// The `top_k` memories nearest to `query`, with similarity in (0, 1].
    /// Empty if the index is empty or the query cannot be embedded.
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<(MemoryRecord, f32)> {
        if top_k == 0 || self.is_empty() {
            return Vec::new();
        }
        match self.embedder.embed_query(query).await {
            Ok(embedding) => self.search_by_embedding(&embedding, top_k),
            Err(e) => {
                warn!(error = %e, "Search skipped: query embedding failed");
                Vec::new()
            }
        }
    }

    /// Nearest neighbours of an already-computed embedding.
    #[must_use]
    pub fn search_by_embedding(&self, embedding: &Embedding, top_k: usize) -> Vec<(MemoryRecord, f32)> {
        let start = Instant::now();
        let state = self.state.read();
        let hits: Vec<(MemoryRecord, f32)> = state
            .vectors
            .search(embedding, top_k)
            .into_iter()
            .filter_map(|n| {
                state
                    .records
                    .get(n.position)
                    .map(|r| (r.clone(), distance_to_similarity(n.distance)))
            })
            .collect();
        debug!(
            hits = hits.len(),
            total = state.records.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Index search"
        );
        hits
    }

    /// Memories closest to memory `id`, excluding `id` itself.
    ///
    /// # Errors
    ///
    /// [`MnemoError::MemoryNotFound`] for an unknown id.
    pub fn find_related(&self, id: MemoryId, top_k: usize) -> Result<Vec<(MemoryRecord, f32)>> {
        let embedding = self.embedding(id).ok_or(MnemoError::MemoryNotFound(id))?;
        let mut related = self.search_by_embedding(&embedding, top_k.saturating_add(1));
        related.retain(|(r, _)| r.id != id);
        related.truncate(top_k);
        Ok(related)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// A copy of memory `id`.
    #[must_use]
    pub fn get_memory(&self, id: MemoryId) -> Option<MemoryRecord> {
        self.state.read().records.get(id.index()).cloned()
    }

    /// The stored embedding of memory `id`.
    #[must_use]
    pub fn embedding(&self, id: MemoryId) -> Option<Embedding> {
        self.state
            .read()
            .vectors
            .vector(id.index())
            .map(|v| Embedding(v.to_vec()))
    }

    /// Copies of every memory, in id order.
    #[must_use]
    pub fn all_memories(&self) -> Vec<MemoryRecord> {
        self.state.read().records.clone()
    }

    /// Number of memories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding dimensionality.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Store statistics. `tracked_candidates` is left at zero.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let state = self.state.read();
        let total_memories = state.records.len();
        let total_accesses: u64 = state.records.iter().map(|r| u64::from(r.access_count)).sum();
        #[allow(clippy::cast_precision_loss)]
        let avg_accesses = if total_memories == 0 {
            0.0
        } else {
            total_accesses as f64 / total_memories as f64
        };
        StoreStats {
            total_memories,
            total_accesses,
            avg_accesses,
            index_size: state.vectors.len(),
            tracked_candidates: 0,
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write a full snapshot of the store. No-op for memory-only indexes.
    ///
    /// Encoding happens under the read lock; file I/O does not.
    ///
    /// # Errors
    ///
    /// [`MnemoError::Persist`] if a file cannot be written. The in-memory
    /// state is unaffected and the call can be retried.
    pub fn persist(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock();
        let start = Instant::now();

        let encoded = {
            let state = self.state.read();
            persistence::encode_store(&state.records, state.vectors.vectors(), self.dimensions())?
        };
        persistence::write_store(storage, &encoded)?;

        info!(
            count = encoded.count(),
            elapsed_ms = start.elapsed().as_millis(),
            "Memory store persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProvider, HashingEmbeddingProvider};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    fn embedder() -> Embedder {
        Embedder::new(Arc::new(HashingEmbeddingProvider::new(64)), Duration::from_secs(1), 16)
    }

    struct Failing;

    #[async_trait]
    impl EmbeddingProvider for Failing {
        async fn embed(&self, _text: &str) -> Result<Embedding> {
            Err(MnemoError::Embedding("model unavailable".into()))
        }
        fn dimensions(&self) -> usize {
            64
        }
        fn model_name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn add_assigns_sequential_ids() {
        let index = MemoryIndex::new(embedder(), IndexConfig::default());
        let now = Utc::now();
        let a = index.add("I work as a teacher", now, 1.0, vec![]).await.expect("add");
        let b = index.add("my sister lives in Ohio", now, 1.8, vec!["Ohio".into()]).await.expect("add");
        assert_eq!((a, b), (MemoryId(0), MemoryId(1)));
        assert_eq!(index.len(), 2);
        assert_eq!(index.stats().index_size, 2);
        assert_eq!(index.get_memory(b).map(|r| r.entities), Some(vec!["Ohio".to_string()]));
    }

    #[tokio::test]
    async fn failed_embedding_writes_nothing() {
        let failing = Embedder::new(Arc::new(Failing), Duration::from_secs(1), 0);
        let index = MemoryIndex::new(failing, IndexConfig::default());
        assert!(index.add("anything at all here", Utc::now(), 1.0, vec![]).await.is_err());
        assert!(index.is_empty());
        assert_eq!(index.stats().index_size, 0);
        assert!(index.search("anything", 5).await.is_empty());
    }

    #[tokio::test]
    async fn search_ranks_similar_content_first() {
        let index = MemoryIndex::new(embedder(), IndexConfig::default());
        let now = Utc::now();
        index.add("I love hiking in the mountains", now, 1.0, vec![]).await.expect("add");
        index.add("my favourite food is ramen", now, 1.0, vec![]).await.expect("add");

        let hits = index.search("hiking in the mountains", 2).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.id, MemoryId(0));
        assert!(hits[0].1 > hits[1].1);
        assert!(hits.iter().all(|(_, s)| *s > 0.0 && *s <= 1.0));
    }

    #[tokio::test]
    async fn access_updates_are_targeted() {
        let index = MemoryIndex::new(embedder(), IndexConfig::default());
        let now = Utc::now();
        let id = index.add("I play the cello", now, 1.0, vec![]).await.expect("add");
        let later = now + chrono::Duration::days(1);
        let updated = index.update_access_stats_at(id, later).expect("update");
        assert_eq!(updated.access_count, 2);
        assert_eq!(updated.last_accessed, later);
        assert!(matches!(
            index.update_access_stats(MemoryId(9)),
            Err(MnemoError::MemoryNotFound(MemoryId(9)))
        ));
    }

    #[tokio::test]
    async fn find_related_excludes_self() {
        let index = MemoryIndex::new(embedder(), IndexConfig::default());
        let now = Utc::now();
        let id = index.add("my dog Rex loves the beach", now, 1.0, vec![]).await.expect("add");
        index.add("Rex the dog swims at the beach", now, 1.0, vec![]).await.expect("add");
        index.add("quarterly tax forms are due", now, 1.0, vec![]).await.expect("add");

        let related = index.find_related(id, 1).expect("related");
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].0.id, MemoryId(1));
        assert!(index.find_related(MemoryId(42), 3).is_err());
    }

    #[tokio::test]
    async fn persist_and_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            ..StorageConfig::default()
        };
        let (index, outcome) = MemoryIndex::load_or_create(embedder(), IndexConfig::default(), storage.clone());
        assert_eq!(outcome, LoadOutcome::Absent);
        index.add("I work as a teacher", Utc::now(), 1.0, vec![]).await.expect("add");
        index.persist().expect("persist");

        let (reloaded, outcome) = MemoryIndex::load_or_create(embedder(), IndexConfig::default(), storage);
        assert_eq!(outcome, LoadOutcome::Loaded { count: 1 });
        assert_eq!(reloaded.all_memories(), index.all_memories());
        assert_eq!(reloaded.embedding(MemoryId(0)), index.embedding(MemoryId(0)));
    }
}
