pub mod build;
pub mod distance;
pub mod node;
pub mod search;
pub mod simd;
pub mod visited;

pub use build::{link_node, prune_node, purge_dangling, select_diverse, LinkReport};
pub use distance::{oracle_for, DistanceMetric, DistanceOracle, KernelTier, MetricOracle};
pub use node::{Edge, Node, ProximityGraph, VectorId};
pub use search::{
    exhaustive_search, greedy_search, result_bound, select_seeds, GraphView, Neighbor,
    SearchRequest, SearchResult, SearchStats, TraversalParams,
};
