//! Index facade.
//!
//! [`Index`] ties the vector store, the proximity graph, a distance oracle
//! and an optional quantizer together behind one mutable API. Mutation
//! takes `&mut self`; search takes `&self`. [`SharedIndex`] adds a
//! read-write lock for concurrent writers plus a promoted serving snapshot
//! for lock-free readers.

use crate::config;
use crate::error::{Error, Result};
use crate::graph::build::{link_node, purge_dangling};
use crate::graph::distance::{oracle_for, prepare, DistanceMetric, DistanceOracle, KernelTier};
use crate::graph::node::{ProximityGraph, VectorId};
use crate::graph::search::{
    exhaustive_search, greedy_search, rerank, result_bound, Neighbor, SearchRequest,
    SearchResult, SearchStats, TraversalParams,
};
use crate::quantization::{
    ProductQuantizer, QuantizedVectors, QuantizerKind, ScalarQuantizer, TrainedQuantizer,
};
use crate::snapshot::{ServingSnapshot, SnapshotHolder};
use crate::storage::persistence::{load_checkpoint, save_checkpoint};
use crate::storage::vectors::{PrecisionMode, VectorStore};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration of one index. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Length of every stored vector.
    pub dimension: usize,
    /// Maximum out-edges per node.
    pub max_edges: usize,
    /// Storage precision of vector components.
    pub precision: PrecisionMode,
    /// Built-in metric used when no custom oracle is supplied.
    pub metric: DistanceMetric,
    /// Kernel implementation of the built-in oracle.
    pub kernel: KernelTier,
    /// Query-time result-set multiplier (>= 1.0).
    pub exploration_coefficient: f64,
    /// Insertion-time result-set multiplier (>= `exploration_coefficient`).
    pub insertion_exploration_coefficient: f64,
    /// Maximum out-edges followed per expanded node.
    pub search_edge_limit: usize,
    /// Maximum number of entry nodes per traversal.
    pub seed_size: usize,
    /// Seed for entry-node selection.
    pub seed: u64,
    /// Track visited nodes in a hash set instead of a dense array.
    pub large_dataset: bool,
    /// With a quantizer, re-rank this many candidates with exact distances
    /// (0 disables re-ranking).
    pub rerank: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 0,
            max_edges: config::DEFAULT_MAX_EDGES,
            precision: PrecisionMode::Full,
            metric: DistanceMetric::L2,
            kernel: KernelTier::Auto,
            exploration_coefficient: config::DEFAULT_EXPLORATION_COEFFICIENT,
            insertion_exploration_coefficient: config::DEFAULT_INSERTION_EXPLORATION_COEFFICIENT,
            search_edge_limit: config::DEFAULT_SEARCH_EDGE_LIMIT,
            seed_size: config::DEFAULT_SEED_SIZE,
            seed: config::DEFAULT_SEED,
            large_dataset: false,
            rerank: 0,
        }
    }
}

impl IndexConfig {
    /// Defaults for vectors of length `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 || self.dimension > config::MAX_DIMENSION {
            return Err(Error::InvalidConfig(format!(
                "dimension must be in 1..={}, got {}",
                config::MAX_DIMENSION,
                self.dimension
            )));
        }
        if self.max_edges == 0 || self.max_edges > config::MAX_EDGES_LIMIT {
            return Err(Error::InvalidConfig(format!(
                "max_edges must be in 1..={}, got {}",
                config::MAX_EDGES_LIMIT,
                self.max_edges
            )));
        }
        result_bound(1, self.exploration_coefficient)?;
        result_bound(1, self.insertion_exploration_coefficient)?;
        if self.insertion_exploration_coefficient < self.exploration_coefficient {
            return Err(Error::InvalidConfig(format!(
                "insertion exploration coefficient {} is below the query coefficient {}",
                self.insertion_exploration_coefficient, self.exploration_coefficient
            )));
        }
        if self.search_edge_limit == 0 {
            return Err(Error::InvalidConfig(
                "search_edge_limit must be at least 1".to_string(),
            ));
        }
        if self.seed_size == 0 {
            return Err(Error::InvalidConfig("seed_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Traversal parameters for a `k`-result query at `coefficient`.
    pub fn traversal(&self, k: usize, coefficient: f64) -> Result<TraversalParams> {
        if k > config::MAX_K {
            return Err(Error::InvalidConfig(format!(
                "k must be at most {}, got {k}",
                config::MAX_K
            )));
        }
        Ok(TraversalParams {
            result_bound: result_bound(k, coefficient)?,
            edge_limit: self.search_edge_limit,
            seed_size: self.seed_size,
            seed: self.seed,
            hashed_visited: self.large_dataset,
            radius: None,
        })
    }
}

/// Outcome of [`Index::repair`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Edges removed because their target was tombstoned.
    pub purged_edges: usize,
    /// Live nodes that lost edges and were re-linked.
    pub reconnected_nodes: usize,
}

/// Serialized state of an index. The oracle is supplied at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexData {
    config: IndexConfig,
    store: VectorStore,
    graph: ProximityGraph,
    quantized: Option<QuantizedVectors>,
}

impl IndexData {
    fn validate(&self) -> Result<()> {
        self.config
            .validate()
            .map_err(|e| Error::Corrupt(format!("checkpoint config rejected: {e}")))?;
        if self.store.dimension() != self.config.dimension {
            return Err(Error::Corrupt(format!(
                "store dimension {} != config dimension {}",
                self.store.dimension(),
                self.config.dimension
            )));
        }
        if self.store.precision() != self.config.precision {
            return Err(Error::Corrupt(format!(
                "store precision {:?} != config precision {:?}",
                self.store.precision(),
                self.config.precision
            )));
        }
        if self.store.len() != self.graph.len() {
            return Err(Error::Corrupt(format!(
                "store has {} vectors but graph has {} nodes",
                self.store.len(),
                self.graph.len()
            )));
        }
        self.store.validate()?;
        self.graph.validate(self.config.max_edges)?;
        let mismatch = self
            .store
            .live_flags()
            .iter()
            .enumerate()
            .find(|&(i, &live)| live != self.graph.is_live(VectorId(i as u32)));
        if let Some((i, _)) = mismatch {
            return Err(Error::Corrupt(format!(
                "liveness of vector {i} differs between store and graph"
            )));
        }
        if let Some(quantized) = &self.quantized {
            quantized.validate(self.store.len(), self.config.dimension)?;
        }
        Ok(())
    }
}

/// Distance between two stored vectors.
fn stored_pair<'a>(
    oracle: &'a dyn DistanceOracle,
    store: &'a VectorStore,
) -> impl FnMut(VectorId, VectorId) -> f64 + 'a {
    let mut a = Vec::with_capacity(store.dimension());
    let mut b = Vec::with_capacity(store.dimension());
    move |x, y| oracle.distance(store.read(x, &mut a), store.read(y, &mut b))
}

/// Mutable proximity-graph index.
#[derive(Debug)]
pub struct Index {
    data: IndexData,
    oracle: Arc<dyn DistanceOracle>,
}

impl Index {
    /// Create an empty index with a caller-supplied distance oracle.
    pub fn create(config: IndexConfig, oracle: Arc<dyn DistanceOracle>) -> Result<Self> {
        config.validate()?;
        debug!(?config, "creating index");
        Ok(Self {
            data: IndexData {
                store: VectorStore::new(config.dimension, config.precision),
                graph: ProximityGraph::new(),
                quantized: None,
                config,
            },
            oracle,
        })
    }

    /// Create an empty index using the built-in oracle for `config.metric`.
    pub fn with_config(config: IndexConfig) -> Result<Self> {
        let oracle = oracle_for(config.metric, config.kernel);
        Self::create(config, oracle)
    }

    pub fn new(
        dimension: usize,
        max_edges: usize,
        precision: PrecisionMode,
        metric: DistanceMetric,
    ) -> Result<Self> {
        Self::with_config(IndexConfig {
            dimension,
            max_edges,
            precision,
            metric,
            ..IndexConfig::default()
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.data.config
    }

    pub fn dimension(&self) -> usize {
        self.data.config.dimension
    }

    pub fn graph(&self) -> &ProximityGraph {
        &self.data.graph
    }

    pub fn store(&self) -> &VectorStore {
        &self.data.store
    }

    pub fn oracle(&self) -> &Arc<dyn DistanceOracle> {
        &self.oracle
    }

    /// Quantized codes, once [`train_quantizer`](Self::train_quantizer) ran.
    pub fn quantized(&self) -> Option<&QuantizedVectors> {
        self.data.quantized.as_ref()
    }

    /// Number of allocated ids, including removed ones.
    pub fn len(&self) -> usize {
        self.data.store.len()
    }

    pub fn live_count(&self) -> usize {
        self.data.store.live_count()
    }

    /// `true` when no live vector is stored.
    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    /// Stored vector of a live id (after normalization and precision loss).
    pub fn get_vector(&self, id: VectorId) -> Result<Vec<f32>> {
        self.data.store.get(id)
    }

    /// Change the query-time exploration coefficient.
    pub fn set_exploration_coefficient(&mut self, coefficient: f64) -> Result<()> {
        let mut updated = self.data.config.clone();
        updated.exploration_coefficient = coefficient;
        updated.validate()?;
        self.data.config = updated;
        Ok(())
    }

    /// Rough heap footprint in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.data.store.memory_bytes()
            + self.data.graph.memory_bytes()
            + self
                .data
                .quantized
                .as_ref()
                .map_or(0, QuantizedVectors::memory_bytes)
    }

    fn exact_traversal(
        &self,
        query: &[f32],
        params: &TraversalParams,
        cancel: Option<&AtomicBool>,
    ) -> (Vec<Neighbor>, SearchStats) {
        let store = &self.data.store;
        let oracle = &self.oracle;
        let mut scratch = Vec::with_capacity(store.dimension());
        greedy_search(
            &self.data.graph,
            params,
            |id| oracle.distance(query, store.read(id, &mut scratch)),
            cancel,
        )
    }

    fn insertion_candidates(&self, vector: &[f32]) -> Result<Vec<Neighbor>> {
        let config = &self.data.config;
        let params = config.traversal(
            config.max_edges + 1,
            config.insertion_exploration_coefficient,
        )?;
        let (candidates, _) = self.exact_traversal(vector, &params, None);
        Ok(candidates)
    }

    /// Store `vector` and wire it into the graph. Returns its new id.
    pub fn insert(&mut self, vector: &[f32]) -> Result<VectorId> {
        Error::check_dimension(self.data.config.dimension, vector.len())?;
        VectorId::from_index(self.data.store.len())?;
        let vector = prepare(self.oracle.metric(), vector);
        let candidates = if self.data.graph.live_count() == 0 {
            Vec::new()
        } else {
            self.insertion_candidates(&vector)?
        };

        let data = &mut self.data;
        if let Some(quantized) = &mut data.quantized {
            quantized.push(&vector)?;
        }
        let id = data.store.put(&vector)?;
        let node = data.graph.push_node()?;
        debug_assert_eq!(id, node);

        let mut pair = stored_pair(self.oracle.as_ref(), &data.store);
        let report = link_node(
            &mut data.graph,
            id,
            &candidates,
            data.config.max_edges,
            &mut pair,
        );
        debug!(
            id = %id,
            candidates = candidates.len(),
            added = report.added,
            reverse = report.reverse,
            pruned = report.pruned,
            "inserted vector"
        );
        Ok(id)
    }

    /// Insert every vector in order. Nothing is inserted unless all of them
    /// have the right dimension.
    pub fn batch_insert(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<VectorId>> {
        let dimension = self.data.config.dimension;
        for vector in vectors {
            Error::check_dimension(dimension, vector.len())?;
        }
        let ids = vectors
            .iter()
            .map(|v| self.insert(v))
            .collect::<Result<Vec<_>>>()?;
        info!("Inserted batch of {} vectors", ids.len());
        Ok(ids)
    }

    /// Tombstone `id`. Edges pointing at it stay until [`repair`](Self::repair).
    pub fn remove(&mut self, id: VectorId) -> Result<()> {
        self.data.graph.tombstone(id)?;
        self.data.store.tombstone(id)?;
        debug!(id = %id, "removed vector");
        Ok(())
    }

    /// k-NN search with the configured exploration coefficient.
    pub fn search(&self, query: &[f32], k: usize) -> Result<SearchResult> {
        self.search_with(SearchRequest::new(query, k))
    }

    /// k-NN search with per-request overrides.
    ///
    /// With a trained quantizer the traversal uses approximate distances;
    /// when `rerank > 0` the best `max(k, rerank)` candidates are re-scored
    /// exactly before truncation to `k`, and the radius applies to the
    /// exact distances.
    pub fn search_with(&self, request: SearchRequest<'_>) -> Result<SearchResult> {
        let config = &self.data.config;
        Error::check_dimension(config.dimension, request.query.len())?;
        let radius = request.checked_radius()?;
        let coefficient = request
            .exploration_coefficient
            .unwrap_or(config.exploration_coefficient);
        let k = request.k;
        let query = prepare(self.oracle.metric(), request.query);

        let Some(quantized) = &self.data.quantized else {
            let mut params = config.traversal(k, coefficient)?;
            params.radius = radius;
            if k == 0 {
                return Ok(SearchResult::default());
            }
            let (mut neighbors, stats) = self.exact_traversal(&query, &params, request.cancel);
            neighbors.truncate(k);
            return Ok(SearchResult { neighbors, stats });
        };

        let depth = if config.rerank > 0 {
            k.max(config.rerank)
        } else {
            k
        };
        let mut params = config.traversal(depth, coefficient)?;
        if config.rerank == 0 {
            params.radius = radius;
        }
        if k == 0 {
            return Ok(SearchResult::default());
        }
        let mut eval = quantized.evaluator(self.oracle.as_ref(), &query);
        let (mut candidates, mut stats) =
            greedy_search(&self.data.graph, &params, |id| eval(id), request.cancel);
        if config.rerank == 0 {
            candidates.truncate(k);
            return Ok(SearchResult {
                neighbors: candidates,
                stats,
            });
        }
        candidates.truncate(depth);
        let store = &self.data.store;
        let mut scratch = Vec::with_capacity(store.dimension());
        let mut neighbors = rerank(
            &candidates,
            k,
            |id| self.oracle.distance(&query, store.read(id, &mut scratch)),
            &mut stats,
        );
        if let Some(r) = radius {
            neighbors.retain(|n| n.distance <= r);
        }
        Ok(SearchResult { neighbors, stats })
    }

    /// Exact k-NN by scanning every live vector.
    pub fn linear_search(&self, query: &[f32], k: usize) -> Result<SearchResult> {
        Error::check_dimension(self.data.config.dimension, query.len())?;
        let query = prepare(self.oracle.metric(), query);
        let store = &self.data.store;
        let mut scratch = Vec::with_capacity(store.dimension());
        Ok(exhaustive_search(&self.data.graph, k, |id| {
            self.oracle.distance(&query, store.read(id, &mut scratch))
        }))
    }

    /// Freeze the current graph and vectors into a serving snapshot.
    ///
    /// Quantizer codes are not part of the snapshot; it searches with exact
    /// distances over the stored vectors.
    pub fn snapshot(&self) -> Result<ServingSnapshot> {
        ServingSnapshot::freeze(
            &self.data.graph,
            &self.data.store,
            &self.data.config,
            Arc::clone(&self.oracle),
        )
    }

    /// Build a quantizer over the stored vectors and encode every allocated id.
    /// Later inserts are encoded automatically.
    pub fn train_quantizer(&mut self, kind: QuantizerKind) -> Result<()> {
        let dimension = self.data.config.dimension;
        let metric = match self.oracle.metric() {
            Some(metric) => metric,
            None => {
                debug!("custom oracle: quantized codes are decoded and scored by the oracle");
                self.data.config.metric
            }
        };
        let trained = match kind {
            QuantizerKind::Scalar => TrainedQuantizer::Scalar(ScalarQuantizer::new(dimension, metric)),
            QuantizerKind::Product { subspaces } => {
                let sample = self.training_sample();
                TrainedQuantizer::Product(ProductQuantizer::train(
                    &sample,
                    dimension,
                    subspaces,
                    metric,
                    config::PQ_TRAINING_SEED,
                )?)
            }
        };

        let store = &self.data.store;
        let mut quantized = QuantizedVectors::new(trained);
        let mut scratch = Vec::with_capacity(dimension);
        for raw in 0..store.len() as u32 {
            quantized.push(store.read(VectorId(raw), &mut scratch))?;
        }
        info!(
            "Trained {:?} quantizer over {} vectors ({} bytes of codes)",
            kind,
            quantized.len(),
            quantized.memory_bytes()
        );
        self.data.quantized = Some(quantized);
        Ok(())
    }

    /// Drop the quantizer; search goes back to exact distances.
    pub fn clear_quantizer(&mut self) {
        self.data.quantized = None;
    }

    /// Live vectors, flattened, evenly strided down to the training cap.
    fn training_sample(&self) -> Vec<f32> {
        let store = &self.data.store;
        let live: Vec<VectorId> = self.data.graph.live_ids().collect();
        let step = live.len().div_ceil(config::PQ_MAX_TRAINING_VECTORS).max(1);
        let mut sample = Vec::with_capacity((live.len() / step + 1) * store.dimension());
        let mut scratch = Vec::with_capacity(store.dimension());
        for &id in live.iter().step_by(step) {
            sample.extend_from_slice(store.read(id, &mut scratch));
        }
        sample
    }

    /// Remove edges that point at removed vectors and re-link the live nodes
    /// that lost them.
    pub fn repair(&mut self) -> Result<RepairReport> {
        let (purged_edges, affected) = purge_dangling(&mut self.data.graph);
        let mut reconnected_nodes = 0;
        for id in affected {
            let vector = self.data.store.get(id)?;
            let candidates = self.insertion_candidates(&vector)?;
            let data = &mut self.data;
            let mut pair = stored_pair(self.oracle.as_ref(), &data.store);
            let report = link_node(
                &mut data.graph,
                id,
                &candidates,
                data.config.max_edges,
                &mut pair,
            );
            if report.added > 0 {
                reconnected_nodes += 1;
            }
        }
        info!(
            "Repaired graph: purged {} dangling edges, re-linked {} nodes",
            purged_edges, reconnected_nodes
        );
        Ok(RepairReport {
            purged_edges,
            reconnected_nodes,
        })
    }

    /// Write a checksummed checkpoint of the whole index.
    pub fn save(&self, path: &Path) -> Result<()> {
        save_checkpoint(&self.data, path)?;
        Ok(())
    }

    /// Load a checkpoint, using the built-in oracle named by its configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let data = Self::load_data(path)?;
        let oracle = oracle_for(data.config.metric, data.config.kernel);
        Ok(Self { data, oracle })
    }

    pub fn load_with_oracle(path: &Path, oracle: Arc<dyn DistanceOracle>) -> Result<Self> {
        let data = Self::load_data(path)?;
        Ok(Self { data, oracle })
    }

    fn load_data(path: &Path) -> Result<IndexData> {
        let data: IndexData = load_checkpoint(path)?;
        data.validate()?;
        info!(
            "Loaded index {:?} ({} vectors, {} live, {} edges)",
            path,
            data.store.len(),
            data.store.live_count(),
            data.graph.edge_count()
        );
        Ok(data)
    }
}

/// An [`Index`] shared between threads.
///
/// Writers and consistent readers go through the lock. Serving readers use
/// the last published snapshot and never touch the lock.
#[derive(Debug, Clone)]
pub struct SharedIndex {
    index: Arc<RwLock<Index>>,
    serving: Arc<SnapshotHolder>,
}

impl SharedIndex {
    /// Wrap `index` and publish its current state.
    pub fn new(index: Index) -> Result<Self> {
        let snapshot = index.snapshot()?;
        Ok(Self {
            index: Arc::new(RwLock::new(index)),
            serving: Arc::new(SnapshotHolder::new(snapshot)),
        })
    }

    pub fn insert(&self, vector: &[f32]) -> Result<VectorId> {
        self.index.write().insert(vector)
    }

    pub fn remove(&self, id: VectorId) -> Result<()> {
        self.index.write().remove(id)
    }

    /// Search the live index under the read lock.
    pub fn search(&self, query: &[f32], k: usize) -> Result<SearchResult> {
        self.index.read().search(query, k)
    }

    /// Freeze the live index and promote it to serving. Returns the new
    /// serving generation.
    pub fn publish(&self) -> Result<u64> {
        let snapshot = self.index.read().snapshot()?;
        Ok(self.serving.promote(snapshot))
    }

    /// Last published snapshot.
    pub fn serving(&self) -> ServingSnapshot {
        self.serving.load()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write()
    }
}
