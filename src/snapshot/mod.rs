//! Immutable serving snapshots.
//!
//! A [`ServingSnapshot`] is a frozen rendering of an index: liveness flags,
//! CSR edge lists and raw vectors in one flat buffer. It is
//! either owned on the heap or memory-mapped from disk, shared across
//! threads behind an `Arc`, and never mutated. [`SnapshotHolder`] swaps the
//! current snapshot atomically so readers always see one complete version.

mod layout;

use crate::error::{Error, Result};
use crate::graph::distance::{oracle_for, prepare, DistanceOracle};
use crate::graph::node::{Edge, ProximityGraph, VectorId};
use crate::graph::search::{greedy_search, GraphView, SearchRequest, SearchResult};
use crate::index::IndexConfig;
use crate::storage::persistence::write_atomic;
use crate::storage::vectors::VectorStore;
use arc_swap::ArcSwap;
use layout::Layout;
use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

enum Bytes {
    Heap(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Bytes::Heap(v) => v,
            Bytes::Mapped(m) => m,
        }
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Bytes::Heap(_) => "heap",
            Bytes::Mapped(_) => "mapped",
        };
        write!(f, "Bytes({kind}, {} bytes)", self.len())
    }
}

#[derive(Debug)]
struct SnapshotInner {
    bytes: Bytes,
    layout: Layout,
    oracle: Arc<dyn DistanceOracle>,
}

impl GraphView for SnapshotInner {
    fn capacity(&self) -> usize {
        self.layout.node_count
    }

    fn is_live(&self, id: VectorId) -> bool {
        self.layout.is_live(&self.bytes, id)
    }

    fn neighbors_into(&self, id: VectorId, limit: usize, out: &mut Vec<VectorId>) {
        out.extend(
            self.layout
                .edge_range(&self.bytes, id)
                .take(limit)
                .map(|i| self.layout.edge_target(&self.bytes, i)),
        );
    }

    fn first_live(&self) -> Option<VectorId> {
        self.layout.first_live
    }
}

/// Read-only, thread-shareable frozen index. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct ServingSnapshot {
    inner: Arc<SnapshotInner>,
}

impl ServingSnapshot {
    /// Freeze `graph` and `store` into a heap-owned snapshot.
    pub fn freeze(
        graph: &ProximityGraph,
        store: &VectorStore,
        config: &IndexConfig,
        oracle: Arc<dyn DistanceOracle>,
    ) -> Result<Self> {
        let bytes = layout::encode(graph, store, config)?;
        Self::from_bytes_with_oracle(bytes, oracle)
    }

    /// Validate an in-memory snapshot, using the built-in oracle named by
    /// its configuration.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let layout = layout::parse(&bytes)?;
        let oracle = oracle_for(layout.config.metric, layout.config.kernel);
        Ok(Self::assemble(Bytes::Heap(bytes), layout, oracle))
    }

    pub fn from_bytes_with_oracle(bytes: Vec<u8>, oracle: Arc<dyn DistanceOracle>) -> Result<Self> {
        let layout = layout::parse(&bytes)?;
        Ok(Self::assemble(Bytes::Heap(bytes), layout, oracle))
    }

    /// Memory-map and validate a snapshot file.
    pub fn load(path: &Path) -> Result<Self> {
        let (bytes, layout) = Self::map(path)?;
        let oracle = oracle_for(layout.config.metric, layout.config.kernel);
        Ok(Self::assemble(bytes, layout, oracle))
    }

    pub fn load_with_oracle(path: &Path, oracle: Arc<dyn DistanceOracle>) -> Result<Self> {
        let (bytes, layout) = Self::map(path)?;
        Ok(Self::assemble(bytes, layout, oracle))
    }

    fn map(path: &Path) -> Result<(Bytes, Layout)> {
        let file = File::open(path)?;
        // SAFETY: snapshot files are written once through a rename and never
        // modified in place.
        let mmap = unsafe { Mmap::map(&file)? };
        let layout = layout::parse(&mmap)?;
        tracing::info!(
            "Loaded snapshot {:?} ({} nodes, {} live, {} bytes)",
            path,
            layout.node_count,
            layout.live_count,
            mmap.len()
        );
        Ok((Bytes::Mapped(mmap), layout))
    }

    fn assemble(bytes: Bytes, layout: Layout, oracle: Arc<dyn DistanceOracle>) -> Self {
        if let Some(metric) = oracle.metric() {
            if metric != layout.config.metric {
                tracing::warn!(
                    "snapshot was built with {:?} but is served with {:?}",
                    layout.config.metric,
                    metric
                );
            }
        }
        Self {
            inner: Arc::new(SnapshotInner {
                bytes,
                layout,
                oracle,
            }),
        }
    }

    /// Write the snapshot bytes to `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.inner.bytes)?;
        tracing::info!(
            "Saved snapshot {:?} ({} nodes, {} bytes)",
            path,
            self.inner.layout.node_count,
            self.inner.bytes.len()
        );
        Ok(())
    }

    /// k-NN search with the configured exploration coefficient.
    pub fn search(&self, query: &[f32], k: usize) -> Result<SearchResult> {
        self.search_with(SearchRequest::new(query, k))
    }

    pub fn search_with(&self, request: SearchRequest<'_>) -> Result<SearchResult> {
        let inner = &*self.inner;
        let config = &inner.layout.config;
        Error::check_dimension(config.dimension, request.query.len())?;
        let coefficient = request
            .exploration_coefficient
            .unwrap_or(config.exploration_coefficient);
        let mut params = config.traversal(request.k, coefficient)?;
        params.radius = request.checked_radius()?;
        if request.k == 0 {
            return Ok(SearchResult::default());
        }

        let query = prepare(inner.oracle.metric(), request.query);
        let precision = config.precision;
        let mut scratch = Vec::with_capacity(config.dimension);
        let (mut neighbors, stats) = greedy_search(
            inner,
            &params,
            |id| {
                precision.decode_le(inner.layout.vector_bytes(&inner.bytes, id), &mut scratch);
                inner.oracle.distance(&query, &scratch)
            },
            request.cancel,
        );
        neighbors.truncate(request.k);
        Ok(SearchResult { neighbors, stats })
    }

    /// Out-edges of `id` in stored order. Empty for unknown ids.
    pub fn edges(&self, id: VectorId) -> Vec<Edge> {
        let inner = &*self.inner;
        inner
            .layout
            .edge_range(&inner.bytes, id)
            .map(|i| inner.layout.edge(&inner.bytes, i))
            .collect()
    }

    /// Stored vector of a live id, widened to f32.
    pub fn vector(&self, id: VectorId) -> Result<Vec<f32>> {
        let inner = &*self.inner;
        if !inner.layout.is_live(&inner.bytes, id) {
            return Err(Error::NotFound(id));
        }
        let mut out = Vec::with_capacity(inner.layout.config.dimension);
        inner
            .layout
            .config
            .precision
            .decode_le(inner.layout.vector_bytes(&inner.bytes, id), &mut out);
        Ok(out)
    }

    pub fn is_live(&self, id: VectorId) -> bool {
        self.inner.layout.is_live(&self.inner.bytes, id)
    }

    pub fn dimension(&self) -> usize {
        self.inner.layout.config.dimension
    }

    /// Number of allocated ids, including tombstoned ones.
    pub fn len(&self) -> usize {
        self.inner.layout.node_count
    }

    pub fn is_empty(&self) -> bool {
        self.inner.layout.node_count == 0
    }

    pub fn live_count(&self) -> usize {
        self.inner.layout.live_count
    }

    pub fn edge_count(&self) -> usize {
        self.inner.layout.edge_count
    }

    pub fn config(&self) -> &IndexConfig {
        &self.inner.layout.config
    }

    /// Whether the snapshot is backed by a memory-mapped file.
    pub fn is_mapped(&self) -> bool {
        matches!(self.inner.bytes, Bytes::Mapped(_))
    }

    /// The encoded snapshot.
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner.bytes
    }
}

/// Holder of the current serving snapshot with atomic promotion.
///
/// Readers that called [`load`](Self::load) before a promotion keep the
/// snapshot they got until they drop it.
pub struct SnapshotHolder {
    current: ArcSwap<SnapshotInner>,
    generation: AtomicU64,
}

impl SnapshotHolder {
    pub fn new(snapshot: ServingSnapshot) -> Self {
        Self {
            current: ArcSwap::new(snapshot.inner),
            generation: AtomicU64::new(0),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> ServingSnapshot {
        ServingSnapshot {
            inner: self.current.load_full(),
        }
    }

    /// Atomically replace the current snapshot. Returns the new generation.
    pub fn promote(&self, snapshot: ServingSnapshot) -> u64 {
        self.current.store(snapshot.inner);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(generation, "promoted serving snapshot");
        generation
    }

    /// Number of promotions since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SnapshotHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotHolder")
            .field("generation", &self.generation())
            .finish()
    }
}
