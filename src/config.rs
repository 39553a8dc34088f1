//! Global configuration constants for navgraph.
//!
//! Defaults for graph construction and search, input validation limits, and
//! quantization parameters. Per-index runtime configuration lives in
//! [`IndexConfig`](crate::index::IndexConfig), which starts from these values.

/// Default maximum number of out-edges per node.
///
/// Higher values improve recall but increase memory and build time.
pub const DEFAULT_MAX_EDGES: usize = 10;

/// Default exploration coefficient for queries.
///
/// The retained result set holds `ceil(k * coefficient)` entries. 1.0 is a
/// pure greedy walk; larger values widen the frontier and improve recall.
pub const DEFAULT_EXPLORATION_COEFFICIENT: f64 = 1.1;

/// Default exploration coefficient used while inserting.
///
/// Must be at least the query coefficient: construction-time search has to be
/// at least as thorough as query-time search to produce a good graph.
pub const DEFAULT_INSERTION_EXPLORATION_COEFFICIENT: f64 = 1.1;

/// Default cap on the number of edges followed per expanded node during search.
pub const DEFAULT_SEARCH_EDGE_LIMIT: usize = 40;

/// Default number of entry nodes used to seed each traversal.
pub const DEFAULT_SEED_SIZE: usize = 10;

/// Default seed for entry-node selection. Fixed so search output is reproducible.
pub const DEFAULT_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 65_536;

/// Maximum allowed `max_edges`.
pub const MAX_EDGES_LIMIT: usize = 1_024;

/// Maximum number of results (`k`) per search request.
pub const MAX_K: usize = 100_000;

/// Documented per-component relative error bound of half-precision storage.
///
/// `f16` keeps an 11-bit significand, so round-to-nearest stays below
/// 2^-11 (about 0.049%) for values in the normal range \[6.1e-5, 65504\].
pub const HALF_PRECISION_RELATIVE_ERROR: f32 = 1e-3;

/// Number of centroids per product-quantization subspace (one byte per code).
pub const PQ_NUM_CENTROIDS: usize = 256;

/// Lloyd iterations after k-means++ initialization.
pub const PQ_KMEANS_ITERATIONS: usize = 20;

/// Maximum number of vectors sampled to train a product quantizer.
pub const PQ_MAX_TRAINING_VECTORS: usize = 65_536;

/// Seed for product-quantizer training.
pub const PQ_TRAINING_SEED: u64 = 0x517c_c1b7_2722_0a95;
