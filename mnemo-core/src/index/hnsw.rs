//! Nearest-neighbour search over memory embeddings.
//!
//! Wraps `instant-distance` with squared-Euclidean distance. Small indexes
//! are scanned exactly; once the vector count reaches the configured
//! brute-force limit an HNSW graph is built over a prefix of the vectors,
//! and anything appended since the last build is scanned linearly and merged
//! in. The graph is rebuilt when that unindexed tail grows past
//! `rebuild_fraction` of the total.
//!
//! Vector positions are stable: position `i` always holds memory `i`.

use instant_distance::{Builder, HnswMap, Point, Search};

use crate::config::IndexConfig;
use crate::error::{MnemoError, Result};
use crate::types::Embedding;

/// A point in the graph, compared by squared L2 distance.
#[derive(Clone, Debug)]
struct IndexPoint(Vec<f32>);

impl Point for IndexPoint {
    fn distance(&self, other: &Self) -> f32 {
        if self.0.len() != other.0.len() {
            return f32::MAX;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

/// A single nearest-neighbour hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the vector (equal to the memory id).
    pub position: usize,
    /// Squared L2 distance to the query.
    pub distance: f32,
}

/// Append-only vector index.
pub struct VectorIndex {
    dims: usize,
    points: Vec<IndexPoint>,
    /// Graph over `points[..built_len]`; values are positions.
    graph: Option<HnswMap<IndexPoint, usize>>,
    built_len: usize,
    config: IndexConfig,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dims", &self.dims)
            .field("len", &self.points.len())
            .field("built_len", &self.built_len)
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Create an empty index for `dims`-dimensional vectors.
    #[must_use]
    pub fn new(dims: usize, config: IndexConfig) -> Self {
        Self {
            dims,
            points: Vec::new(),
            graph: None,
            built_len: 0,
            config,
        }
    }

    /// Rebuild an index from persisted vectors, in position order.
    ///
    /// # Errors
    ///
    /// [`MnemoError::DimensionMismatch`] if any vector has the wrong length.
    pub fn from_vectors(dims: usize, vectors: Vec<Vec<f32>>, config: IndexConfig) -> Result<Self> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(MnemoError::DimensionMismatch {
                expected: dims,
                actual: bad.len(),
            });
        }
        let mut index = Self::new(dims, config);
        index.points = vectors.into_iter().map(IndexPoint).collect();
        if index.points.len() >= index.config.brute_force_limit {
            index.build();
        }
        Ok(index)
    }

    /// Check that `embedding` could be appended, without appending it.
    ///
    /// # Errors
    ///
    /// [`MnemoError::DimensionMismatch`] on a length mismatch.
    pub fn check(&self, embedding: &Embedding) -> Result<()> {
        if embedding.dimensions() == self.dims {
            Ok(())
        } else {
            Err(MnemoError::DimensionMismatch {
                expected: self.dims,
                actual: embedding.dimensions(),
            })
        }
    }

    /// Append a vector at position `len()`. Rebuilds the graph if due.
    ///
    /// # Errors
    ///
    /// [`MnemoError::DimensionMismatch`]; nothing is appended in that case.
    pub fn push(&mut self, embedding: Embedding) -> Result<usize> {
        self.check(&embedding)?;
        let position = self.points.len();
        self.points.push(IndexPoint(embedding.0));
        if self.needs_rebuild() {
            self.build();
        }
        Ok(position)
    }

    /// Number of vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the index holds no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Vector dimensionality.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dims
    }

    /// The vector stored at `position`.
    #[must_use]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.points.get(position).map(|p| p.0.as_slice())
    }

    /// All vectors in position order (for snapshots).
    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.points.iter().map(|p| p.0.as_slice())
    }

    /// Whether the graph is missing or stale enough to rebuild.
    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        let total = self.points.len();
        if total < self.config.brute_force_limit {
            return false;
        }
        if self.graph.is_none() {
            return true;
        }
        let unindexed = total - self.built_len;
        unindexed as f32 / total as f32 > self.config.rebuild_fraction
    }

    /// Build (or rebuild) the graph over every current vector.
    pub fn build(&mut self) {
        if self.points.is_empty() {
            return;
        }
        let builder = Builder::default()
            .ef_construction(self.config.ef_construction)
            .ef_search(self.config.ef_search)
            .seed(42);
        let positions: Vec<usize> = (0..self.points.len()).collect();
        self.graph = Some(builder.build(self.points.clone(), positions));
        self.built_len = self.points.len();
    }

    /// Whether a graph currently exists.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.graph.is_some()
    }

    /// The `k` nearest vectors to `query`, closest first.
    #[must_use]
    pub fn search(&self, query: &Embedding, k: usize) -> Vec<Neighbor> {
        if k == 0 || self.points.is_empty() || query.dimensions() != self.dims {
            return Vec::new();
        }
        let k = k.min(self.points.len());
        let query = IndexPoint(query.0.clone());

        let mut hits: Vec<Neighbor> = Vec::with_capacity(k.saturating_mul(2));
        let tail_start = match &self.graph {
            // The graph yields at most `ef_search` neighbours; larger requests scan exactly.
            Some(graph) if k <= self.config.ef_search => {
                let mut search = Search::default();
                hits.extend(graph.search(&query, &mut search).take(k).map(|item| Neighbor {
                    position: *item.value,
                    distance: item.distance,
                }));
                self.built_len
            }
            _ => 0,
        };

        hits.extend(
            self.points[tail_start..]
                .iter()
                .enumerate()
                .map(|(offset, point)| Neighbor {
                    position: tail_start + offset,
                    distance: query.distance(point),
                }),
        );

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.position.cmp(&b.position)));
        hits.truncate(k);
        hits
    }
}
