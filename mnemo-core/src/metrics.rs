//! Runtime counters for the memory engine.
//!
//! Lock-free `AtomicU64` counters incremented on the hot path, read as a
//! [`CounterSnapshot`] for logging or Prometheus text export.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Engine event counters.
#[derive(Debug, Default)]
pub struct EngineCounters {
    /// Permanent memories created.
    pub memories_created: AtomicU64,
    /// Candidates that skipped reinforcement on importance alone.
    pub bypasses: AtomicU64,
    /// Candidates promoted by reinforcement.
    pub promotions: AtomicU64,
    /// Embedding calls that returned an error.
    pub embed_failures: AtomicU64,
    /// Embedding calls that hit the timeout.
    pub embed_timeouts: AtomicU64,
    /// Retrieval calls.
    pub retrievals: AtomicU64,
    /// Cumulative retrieval latency in microseconds.
    pub retrieval_us: AtomicU64,
    /// Successful store snapshots.
    pub persists: AtomicU64,
    /// Failed store or tracker writes.
    pub persist_failures: AtomicU64,
    /// Reinforcement entries expired by GC.
    pub gc_removed: AtomicU64,
}

impl EngineCounters {
    /// Zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one to `counter`.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` to `counter`.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read every counter.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            memories_created: load(&self.memories_created),
            bypasses: load(&self.bypasses),
            promotions: load(&self.promotions),
            embed_failures: load(&self.embed_failures),
            embed_timeouts: load(&self.embed_timeouts),
            retrievals: load(&self.retrievals),
            retrieval_us: load(&self.retrieval_us),
            persists: load(&self.persists),
            persist_failures: load(&self.persist_failures),
            gc_removed: load(&self.gc_removed),
        }
    }
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Permanent memories created.
    pub memories_created: u64,
    /// Reinforcement bypasses.
    pub bypasses: u64,
    /// Reinforcement promotions.
    pub promotions: u64,
    /// Embedding errors.
    pub embed_failures: u64,
    /// Embedding timeouts.
    pub embed_timeouts: u64,
    /// Retrieval calls.
    pub retrievals: u64,
    /// Cumulative retrieval latency (µs).
    pub retrieval_us: u64,
    /// Successful persists.
    pub persists: u64,
    /// Failed writes.
    pub persist_failures: u64,
    /// GC removals.
    pub gc_removed: u64,
}

impl CounterSnapshot {
    /// Mean retrieval latency in microseconds (0 before the first call).
    #[must_use]
    pub fn mean_retrieval_us(&self) -> u64 {
        self.retrieval_us.checked_div(self.retrievals).unwrap_or(0)
    }

    /// Format as Prometheus text exposition.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows: [(&str, &str, u64); 10] = [
            ("memories_created_total", "Permanent memories created", self.memories_created),
            ("bypasses_total", "Candidates stored without reinforcement", self.bypasses),
            ("promotions_total", "Candidates promoted by reinforcement", self.promotions),
            ("embed_failures_total", "Embedding calls that failed", self.embed_failures),
            ("embed_timeouts_total", "Embedding calls that timed out", self.embed_timeouts),
            ("retrievals_total", "Retrieval calls", self.retrievals),
            ("retrieval_microseconds_total", "Cumulative retrieval latency", self.retrieval_us),
            ("persists_total", "Store snapshots written", self.persists),
            ("persist_failures_total", "Failed store or tracker writes", self.persist_failures),
            ("gc_removed_total", "Reinforcement entries expired", self.gc_removed),
        ];
        let mut out = String::new();
        for (name, help, value) in rows {
            out.push_str(&format!(
                "# HELP mnemo_{name} {help}\n# TYPE mnemo_{name} counter\nmnemo_{name} {value}\n"
            ));
        }
        out
    }
}
