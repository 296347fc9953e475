//! The [`MemoryEngine`]: the single entry point the conversation layer uses.
//!
//! One engine owns one store. Construct it once and share it by reference
//! (or `Arc`) across conversation turns; every method takes `&self`.
//!
//! Autosaves inside `observe_interaction` do synchronous file I/O. On a
//! multi-thread Tokio runtime they run under `block_in_place`, so other
//! tasks move off the worker while the write completes. HNSW rebuilds
//! happen inline in the append that triggers them; their cost is amortized
//! by `index.rebuild_fraction`.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use mnemo_core::{MemoryEngine, MnemoConfig};
//! # use mnemo_core::embedding::HashingEmbeddingProvider;
//! # async fn demo() -> mnemo_core::error::Result<()> {
//! let engine = MemoryEngine::open(MnemoConfig::default(), Arc::new(HashingEmbeddingProvider::default()))?;
//! engine.observe_interaction("Don't forget, my birthday is March 3rd", None).await;
//! let memories = engine.retrieve_memories("when is my birthday?", 15).await;
//! let context = engine.format_memories_for_context(&memories);
//! engine.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{EmbeddingConfig, MnemoConfig};
use crate::embedding::{Embedder, EmbeddingProvider, HashingEmbeddingProvider, StubEmbeddingProvider};
use crate::error::{MnemoError, Result};
use crate::formation::FormationPipeline;
use crate::index::MemoryIndex;
use crate::metrics::{CounterSnapshot, EngineCounters};
use crate::persistence::LoadOutcome;
use crate::reinforcement::ReinforcementTracker;
use crate::retrieval::{RetrievalPipeline, ScoredMemory, format_memories_for_context};
use crate::types::{MemoryId, MemoryRecord, StoreStats};

/// What [`MemoryEngine::open`] found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReport {
    /// Outcome for the index + metadata pair.
    pub store: LoadOutcome,
    /// Outcome for the reinforcement file.
    pub tracker: LoadOutcome,
}

/// Episodic memory engine: formation, retrieval and persistence.
pub struct MemoryEngine {
    config: MnemoConfig,
    index: MemoryIndex,
    tracker: Mutex<ReinforcementTracker>,
    /// Serializes tracker writes; the snapshot is taken while holding it.
    tracker_save_lock: Mutex<()>,
    formation: FormationPipeline,
    retrieval: RetrievalPipeline,
    counters: EngineCounters,
    persistent: bool,
    open_report: OpenReport,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("index", &self.index)
            .field("tracked", &self.tracker.lock().len())
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Open (or create) the store under `config.storage.data_dir`.
    ///
    /// Missing or corrupt files never fail this call; see
    /// [`open_report`](Self::open_report) for what was found.
    ///
    /// # Errors
    ///
    /// [`MnemoError::Config`] if `config` does not validate.
    pub fn open(config: MnemoConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate()?;
        let embedder = make_embedder(&config.embedding, provider);

        let (index, store) = MemoryIndex::load_or_create(
            embedder,
            config.index.clone(),
            config.storage.clone(),
        );
        let (tracker, tracker_outcome) = ReinforcementTracker::load_or_create(
            &config.storage.reinforcement_path(),
            config.reinforcement.clone(),
        );

        info!(
            memories = index.len(),
            tracked = tracker.len(),
            model = index.embedder().model_name(),
            dir = %config.storage.data_dir.display(),
            "Memory engine opened"
        );

        Ok(Self::assemble(
            config,
            index,
            tracker,
            true,
            OpenReport {
                store,
                tracker: tracker_outcome,
            },
        ))
    }

    /// An engine that never touches disk. `persist` and `shutdown` are
    /// no-ops.
    ///
    /// # Errors
    ///
    /// [`MnemoError::Config`] if `config` does not validate.
    pub fn in_memory(config: MnemoConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate()?;
        let embedder = make_embedder(&config.embedding, provider);
        let index = MemoryIndex::new(embedder, config.index.clone());
        let tracker = ReinforcementTracker::new(config.reinforcement.clone());
        Ok(Self::assemble(
            config,
            index,
            tracker,
            false,
            OpenReport {
                store: LoadOutcome::Absent,
                tracker: LoadOutcome::Absent,
            },
        ))
    }

    fn assemble(
        config: MnemoConfig,
        index: MemoryIndex,
        tracker: ReinforcementTracker,
        persistent: bool,
        open_report: OpenReport,
    ) -> Self {
        Self {
            formation: FormationPipeline::new(&config.formation),
            retrieval: RetrievalPipeline::new(config.retrieval.clone()),
            config,
            index,
            tracker: Mutex::new(tracker),
            tracker_save_lock: Mutex::new(()),
            counters: EngineCounters::new(),
            persistent,
            open_report,
        }
    }

    // ------------------------------------------------------------------
    // Formation
    // ------------------------------------------------------------------

    /// Observe one conversation turn and form any memories it warrants.
    /// Returns the ids of memories created (often none).
    pub async fn observe_interaction(
        &self,
        user_message: &str,
        agent_response: Option<&str>,
    ) -> Vec<MemoryId> {
        self.observe_interaction_at(user_message, agent_response, Utc::now()).await
    }

    /// [`observe_interaction`](Self::observe_interaction) at an explicit time.
    pub async fn observe_interaction_at(
        &self,
        user_message: &str,
        agent_response: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<MemoryId> {
        debug!(
            message_chars = user_message.len(),
            response_chars = agent_response.map_or(0, str::len),
            "Observing interaction"
        );
        let report = self
            .formation
            .observe_at(&self.index, &self.tracker, &self.counters, user_message, now)
            .await;

        if report.candidates > 0 {
            if let Err(e) = blocking_io(|| self.save_tracker()) {
                EngineCounters::incr(&self.counters.persist_failures);
                warn!(error = %e, "Reinforcement tracker not saved");
            }
        }
        if !report.created.is_empty() && self.config.storage.autosave {
            if let Err(e) = blocking_io(|| self.persist_index()) {
                warn!(error = %e, created = report.created.len(), "Autosave failed");
            }
        }
        report.created
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    /// The `top_k` memories most relevant to `query`, best first. Empty on
    /// an empty store or an embedding failure.
    pub async fn retrieve_memories(&self, query: &str, top_k: usize) -> Vec<ScoredMemory> {
        self.retrieve_memories_at(query, top_k, Utc::now()).await
    }

    /// [`retrieve_memories`](Self::retrieve_memories) at an explicit time.
    pub async fn retrieve_memories_at(
        &self,
        query: &str,
        top_k: usize,
        now: DateTime<Utc>,
    ) -> Vec<ScoredMemory> {
        let start = Instant::now();
        let results = self.retrieval.retrieve_at(&self.index, query, top_k, now).await;
        EngineCounters::incr(&self.counters.retrievals);
        EngineCounters::add(
            &self.counters.retrieval_us,
            u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX),
        );
        results
    }

    /// Retrieve with the configured `top_k`.
    pub async fn retrieve(&self, query: &str) -> Vec<ScoredMemory> {
        self.retrieve_memories(query, self.config.retrieval.top_k).await
    }

    /// Render memories as a prompt block (empty string for no memories).
    #[must_use]
    pub fn format_memories_for_context(&self, memories: &[ScoredMemory]) -> String {
        format_memories_for_context(memories, Utc::now())
    }

    /// Memories most similar to memory `id`, excluding itself.
    ///
    /// # Errors
    ///
    /// [`MnemoError::MemoryNotFound`] for an unknown id.
    pub fn find_related(&self, id: MemoryId, top_k: usize) -> Result<Vec<(MemoryRecord, f32)>> {
        self.index.find_related(id, top_k)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// A copy of memory `id`.
    #[must_use]
    pub fn get_memory(&self, id: MemoryId) -> Option<MemoryRecord> {
        self.index.get_memory(id)
    }

    /// Copies of every memory, in id order.
    #[must_use]
    pub fn all_memories(&self) -> Vec<MemoryRecord> {
        self.index.all_memories()
    }

    /// Store statistics, including pending reinforcement candidates.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            tracked_candidates: self.tracker.lock().len(),
            ..self.index.stats()
        }
    }

    /// Event counters since the engine was built.
    #[must_use]
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// What was found on disk at open.
    #[must_use]
    pub fn open_report(&self) -> &OpenReport {
        &self.open_report
    }

    /// The underlying store.
    #[must_use]
    pub fn index(&self) -> &MemoryIndex {
        &self.index
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &MnemoConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Write the store and the tracker.
    ///
    /// # Errors
    ///
    /// [`MnemoError::Persist`] if either write fails; retryable.
    pub fn persist(&self) -> Result<()> {
        self.persist_index()?;
        self.save_tracker().inspect_err(|_| {
            EngineCounters::incr(&self.counters.persist_failures);
        })
    }

    /// Expire stale reinforcement entries. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// [`MnemoError::Persist`] if the tracker file cannot be rewritten.
    pub fn collect_garbage(&self) -> Result<usize> {
        self.collect_garbage_at(Utc::now())
    }

    /// [`collect_garbage`](Self::collect_garbage) at an explicit time.
    ///
    /// # Errors
    ///
    /// [`MnemoError::Persist`] if the tracker file cannot be rewritten.
    pub fn collect_garbage_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.tracker.lock().collect_garbage_at(now);
        EngineCounters::add(&self.counters.gc_removed, removed as u64);
        if removed > 0 {
            self.save_tracker()?;
        }
        Ok(removed)
    }

    /// Final persist before the process exits.
    ///
    /// # Errors
    ///
    /// [`MnemoError::Persist`] if the final write fails.
    pub fn shutdown(&self) -> Result<()> {
        self.persist()?;
        let counters = self.counters();
        info!(
            memories = self.index.len(),
            created = counters.memories_created,
            retrievals = counters.retrievals,
            "Memory engine shut down"
        );
        Ok(())
    }

    fn persist_index(&self) -> Result<()> {
        if !self.persistent {
            return Ok(());
        }
        match self.index.persist() {
            Ok(()) => {
                EngineCounters::incr(&self.counters.persists);
                Ok(())
            }
            Err(e) => {
                EngineCounters::incr(&self.counters.persist_failures);
                Err(e)
            }
        }
    }

    fn save_tracker(&self) -> Result<()> {
        if !self.persistent {
            return Ok(());
        }
        let _guard = self.tracker_save_lock.lock();
        let snapshot = self.tracker.lock().clone();
        snapshot.save(
            &self.config.storage.reinforcement_path(),
            self.config.storage.backup_count,
        )
    }
}

/// Run blocking file I/O from async code. On a multi-thread runtime the
/// worker hands its other tasks off first; elsewhere `f` runs inline.
fn blocking_io<R>(f: impl FnOnce() -> R) -> R {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Wrap `provider` with the configured timeout and query cache.
fn make_embedder(config: &EmbeddingConfig, provider: Arc<dyn EmbeddingProvider>) -> Embedder {
    if provider.dimensions() != config.dimensions {
        warn!(
            configured = config.dimensions,
            provider = provider.dimensions(),
            "Configured dimensions differ from the provider; using the provider's"
        );
    }
    Embedder::new(provider, config.timeout(), config.cache_size)
}

/// Build one of the in-process providers named by `config.provider`.
///
/// # Errors
///
/// [`MnemoError::Config`] for HTTP providers (those live in `mnemo-embed`)
/// or unknown names, and [`MnemoError::Embedding`] if a local model fails
/// to load.
pub fn local_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbeddingProvider::new(config.dimensions))),
        "stub" => Ok(Arc::new(StubEmbeddingProvider::new(config.dimensions))),
        #[cfg(feature = "onnx")]
        "onnx" => Ok(Arc::new(crate::embedding::OnnxEmbeddingProvider::new()?)),
        other => Err(MnemoError::Config(format!(
            "embedding.provider: '{other}' is not an in-process provider"
        ))),
    }
}
