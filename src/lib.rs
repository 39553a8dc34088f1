//! # navgraph
//!
//! Proximity-graph approximate nearest neighbor index.
//!
//! ## Features
//!
//! - **Navigable proximity graph** with bounded out-degree and diversity pruning
//! - **Greedy best-first search** with a tunable exploration coefficient
//! - **Reduced-precision storage**: full `f32`, half `f16`, or byte components
//! - **Quantization**: scalar (u8 min/scale) and product quantizers with exact re-ranking
//! - **Serving snapshots**: immutable, memory-mappable CSR rendering with atomic promotion
//! - **Tombstone-tolerant removal**: dangling edges are skipped, never fatal
//!
//! ## Architecture
//!
//! ```text
//! Index → { VectorStore, ProximityGraph, DistanceOracle, Quantizer? }
//!       → insert: greedy search → diversity pruning → reverse edges
//!       → search: greedy best-first traversal → optional exact re-rank
//! Serving: Index::snapshot() → ServingSnapshot (heap or mmap) → SnapshotHolder (ArcSwap)
//! Persistence: snapshot layout + CRC32 footer, bincode index checkpoints
//! ```

/// Global configuration constants: defaults, limits, and tuning parameters.
pub mod config;
/// Error taxonomy shared by every component.
pub mod error;
/// Proximity graph: node/edge model, distance oracles, builder, and search engine.
pub mod graph;
/// Index facade: configuration, mutation, search, checkpoints, and shared serving.
pub mod index;
/// Vector quantization: scalar and product quantizers with approximate distances.
pub mod quantization;
/// Serving snapshots: frozen binary layout, mapped loading, and atomic promotion.
pub mod snapshot;
/// Storage layer: vector arena and index checkpoint persistence.
pub mod storage;
/// Recall measurement, brute-force ground truth, and exploration-coefficient tuning.
pub mod tuning;

pub use error::{Error, Result};
pub use graph::distance::{DistanceMetric, DistanceOracle, KernelTier};
pub use graph::node::{Edge, Node, ProximityGraph, VectorId};
pub use graph::search::{Neighbor, SearchRequest, SearchResult, SearchStats};
pub use index::{Index, IndexConfig, RepairReport, SharedIndex};
pub use quantization::{Quantizer, QuantizerKind};
pub use snapshot::{ServingSnapshot, SnapshotHolder};
pub use storage::{PrecisionMode, VectorStore};
