//! Greedy best-first traversal.
//!
//! One engine serves every graph representation: the mutable
//! [`ProximityGraph`], a frozen snapshot, and quantized distance spaces.
//! Topology comes from a [`GraphView`]; distances come from a per-query
//! closure, so the engine never sees how vectors are stored.

use crate::error::{Error, Result};
use crate::graph::node::{ProximityGraph, VectorId};
use crate::graph::visited::with_visited;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Read-only topology a traversal walks over.
pub trait GraphView {
    /// Number of allocated ids, live or not.
    fn capacity(&self) -> usize;

    fn is_live(&self, id: VectorId) -> bool;

    /// Append up to `limit` out-neighbors of `id`, nearest first.
    fn neighbors_into(&self, id: VectorId, limit: usize, out: &mut Vec<VectorId>);

    /// Lowest live id, used as the fixed entry node.
    fn first_live(&self) -> Option<VectorId>;
}

impl GraphView for ProximityGraph {
    fn capacity(&self) -> usize {
        self.len()
    }

    fn is_live(&self, id: VectorId) -> bool {
        ProximityGraph::is_live(self, id)
    }

    fn neighbors_into(&self, id: VectorId, limit: usize, out: &mut Vec<VectorId>) {
        out.extend(self.edges(id).iter().take(limit).map(|e| e.target));
    }

    fn first_live(&self) -> Option<VectorId> {
        ProximityGraph::first_live(self)
    }
}

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: VectorId,
    pub distance: f64,
}

impl Neighbor {
    #[inline]
    fn key(&self) -> (OrderedFloat<f64>, VectorId) {
        (OrderedFloat(self.distance), self.id)
    }
}

/// Work counters for one traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    /// Number of distance evaluations.
    pub distance_computations: u64,
    /// Number of nodes whose out-edges were expanded.
    pub expanded: u64,
    /// `true` if the traversal stopped early because cancellation was requested.
    pub cancelled: bool,
}

/// Answer to a k-NN query: up to `k` neighbors, ascending by distance,
/// ties broken by ascending id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub neighbors: Vec<Neighbor>,
    pub stats: SearchStats,
}

impl SearchResult {
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn ids(&self) -> Vec<VectorId> {
        self.neighbors.iter().map(|n| n.id).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Neighbor> {
        self.neighbors.iter()
    }
}

/// A k-NN query with optional per-call overrides.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub query: &'a [f32],
    pub k: usize,
    /// Overrides the configured exploration coefficient.
    pub exploration_coefficient: Option<f64>,
    /// Checked once per frontier pop; when set the traversal stops and
    /// returns what it has.
    pub cancel: Option<&'a AtomicBool>,
    /// Nodes farther than this are neither returned nor expanded.
    pub radius: Option<f64>,
}

impl<'a> SearchRequest<'a> {
    pub fn new(query: &'a [f32], k: usize) -> Self {
        Self {
            query,
            k,
            exploration_coefficient: None,
            cancel: None,
            radius: None,
        }
    }

    pub fn exploration_coefficient(mut self, coefficient: f64) -> Self {
        self.exploration_coefficient = Some(coefficient);
        self
    }

    pub fn cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn radius(mut self, radius: f64) -> Self {
        self.radius = Some(radius);
        self
    }

    /// The radius bound, rejected when it is NaN or negative.
    pub fn checked_radius(&self) -> Result<Option<f64>> {
        match self.radius {
            Some(r) if r.is_nan() || r < 0.0 => Err(Error::InvalidConfig(format!(
                "search radius must be >= 0, got {r}"
            ))),
            radius => Ok(radius),
        }
    }
}

/// Size of the retained result set for `k` results: `ceil(k * coefficient)`,
/// never below `k`.
pub fn result_bound(k: usize, coefficient: f64) -> Result<usize> {
    if !coefficient.is_finite() || coefficient < 1.0 {
        return Err(Error::InvalidConfig(format!(
            "exploration coefficient must be a finite value >= 1.0, got {coefficient}"
        )));
    }
    let bound = (k as f64 * coefficient).ceil();
    if bound >= usize::MAX as f64 {
        return Ok(usize::MAX);
    }
    Ok((bound as usize).max(k))
}

/// Parameters of one traversal.
#[derive(Debug, Clone, Copy)]
pub struct TraversalParams {
    /// Retained result-set size.
    pub result_bound: usize,
    /// Maximum out-edges followed per expanded node.
    pub edge_limit: usize,
    /// Maximum number of entry nodes.
    pub seed_size: usize,
    pub seed: u64,
    /// Track visited nodes in a hash set instead of a dense array.
    pub hashed_visited: bool,
    /// Upper bound on retained distances.
    pub radius: Option<f64>,
}

/// Pick up to `seed_size` distinct live entry nodes. The lowest live id is
/// always first; the rest are drawn from a generator seeded with `seed`, so
/// the same graph state always yields the same seeds.
pub fn select_seeds<G: GraphView + ?Sized>(
    graph: &G,
    seed_size: usize,
    seed: u64,
) -> Vec<VectorId> {
    let Some(first) = graph.first_live() else {
        return Vec::new();
    };
    let mut seeds = Vec::with_capacity(seed_size.min(graph.capacity()).max(1));
    seeds.push(first);
    let capacity = graph.capacity() as u32;
    if seed_size <= 1 || capacity <= 1 {
        return seeds;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let attempts = seed_size * 4;
    for _ in 0..attempts {
        if seeds.len() >= seed_size {
            break;
        }
        let id = VectorId(rng.gen_range(0..capacity));
        if graph.is_live(id) && !seeds.contains(&id) {
            seeds.push(id);
        }
    }
    seeds
}

/// Greedy best-first search.
///
/// Returns the full retained result set (at most `params.result_bound`
/// entries) sorted ascending by `(distance, id)`, plus work counters.
/// Only live nodes with finite distances within `params.radius` are
/// retained, and only retained nodes are expanded. Tombstoned targets are
/// never expanded and never returned.
pub fn greedy_search<G, D>(
    graph: &G,
    params: &TraversalParams,
    mut distance: D,
    cancel: Option<&AtomicBool>,
) -> (Vec<Neighbor>, SearchStats)
where
    G: GraphView + ?Sized,
    D: FnMut(VectorId) -> f64,
{
    let mut stats = SearchStats::default();
    let bound = params.result_bound;
    let radius = params.radius;
    if bound == 0 {
        return (Vec::new(), stats);
    }
    let seeds = select_seeds(graph, params.seed_size, params.seed);
    if seeds.is_empty() {
        return (Vec::new(), stats);
    }

    let capacity = graph.capacity();
    let reserve = bound.min(capacity);
    with_visited(capacity, params.hashed_visited, |visited| {
        // Frontier: min-heap on (distance, id). Results: max-heap on (distance, id).
        let mut frontier: BinaryHeap<Reverse<(OrderedFloat<f64>, VectorId)>> =
            BinaryHeap::with_capacity(reserve * 2);
        let mut results: BinaryHeap<(OrderedFloat<f64>, VectorId)> =
            BinaryHeap::with_capacity(reserve + 1);
        // Cached worst retained key, valid once the result set is full.
        let mut worst: Option<(OrderedFloat<f64>, VectorId)> = None;
        let mut scratch: Vec<VectorId> = Vec::with_capacity(params.edge_limit.min(256));

        let offer = |id: VectorId,
                         dist: f64,
                         frontier: &mut BinaryHeap<Reverse<(OrderedFloat<f64>, VectorId)>>,
                         results: &mut BinaryHeap<(OrderedFloat<f64>, VectorId)>,
                         worst: &mut Option<(OrderedFloat<f64>, VectorId)>| {
            if !dist.is_finite() || radius.is_some_and(|r| dist > r) {
                return;
            }
            let key = (OrderedFloat(dist), id);
            let should_add = results.len() < bound || worst.map_or(true, |w| key < w);
            if !should_add {
                return;
            }
            frontier.push(Reverse(key));
            results.push(key);
            if results.len() > bound {
                results.pop();
            }
            if results.len() >= bound {
                *worst = results.peek().copied();
            }
        };

        for &seed in &seeds {
            if !visited.insert(seed.0) {
                continue;
            }
            let dist = distance(seed);
            stats.distance_computations += 1;
            offer(seed, dist, &mut frontier, &mut results, &mut worst);
        }

        while let Some(Reverse((dist, id))) = frontier.pop() {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                stats.cancelled = true;
                break;
            }
            if let Some((worst_dist, _)) = worst {
                if results.len() >= bound && dist > worst_dist {
                    break;
                }
            }

            stats.expanded += 1;
            scratch.clear();
            graph.neighbors_into(id, params.edge_limit, &mut scratch);
            for &next in &scratch {
                if !graph.is_live(next) || !visited.insert(next.0) {
                    continue;
                }
                let d = distance(next);
                stats.distance_computations += 1;
                offer(next, d, &mut frontier, &mut results, &mut worst);
            }
        }

        let neighbors = results
            .into_sorted_vec()
            .into_iter()
            .map(|(d, id)| Neighbor {
                id,
                distance: d.0,
            })
            .collect();
        (neighbors, stats)
    })
}

/// Exact k-NN by scanning every live node. Ground truth for recall
/// measurement and a fallback for tiny graphs.
pub fn exhaustive_search<G, D>(graph: &G, k: usize, mut distance: D) -> SearchResult
where
    G: GraphView + ?Sized,
    D: FnMut(VectorId) -> f64,
{
    let mut stats = SearchStats::default();
    if k == 0 {
        return SearchResult {
            neighbors: Vec::new(),
            stats,
        };
    }
    let mut heap: BinaryHeap<(OrderedFloat<f64>, VectorId)> =
        BinaryHeap::with_capacity(k.min(graph.capacity()) + 1);
    for raw in 0..graph.capacity() as u32 {
        let id = VectorId(raw);
        if !graph.is_live(id) {
            continue;
        }
        let dist = distance(id);
        stats.distance_computations += 1;
        if !dist.is_finite() {
            continue;
        }
        heap.push((OrderedFloat(dist), id));
        if heap.len() > k {
            heap.pop();
        }
    }
    let neighbors = heap
        .into_sorted_vec()
        .into_iter()
        .map(|(d, id)| Neighbor {
            id,
            distance: d.0,
        })
        .collect();
    SearchResult { neighbors, stats }
}

/// Re-score `candidates` with `exact`, keep the best `k`.
pub(crate) fn rerank<D>(
    candidates: &[Neighbor],
    k: usize,
    mut exact: D,
    stats: &mut SearchStats,
) -> Vec<Neighbor>
where
    D: FnMut(VectorId) -> f64,
{
    let mut rescored: Vec<Neighbor> = candidates
        .iter()
        .map(|n| {
            stats.distance_computations += 1;
            Neighbor {
                id: n.id,
                distance: exact(n.id),
            }
        })
        .filter(|n| n.distance.is_finite())
        .collect();
    rescored.sort_unstable_by_key(Neighbor::key);
    rescored.truncate(k);
    rescored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::distance::DistanceMetric;

    /// Fully connected graph over `points`, edges sorted by distance.
    fn complete_graph(points: &[Vec<f32>]) -> ProximityGraph {
        let mut graph = ProximityGraph::new();
        for _ in points {
            graph.push_node().unwrap();
        }
        for (i, p) in points.iter().enumerate() {
            let node = graph.node_mut(VectorId(i as u32)).unwrap();
            for (j, q) in points.iter().enumerate() {
                if i != j {
                    node.push_edge(VectorId(j as u32), DistanceMetric::L2.distance(p, q) as f32);
                }
            }
        }
        graph
    }

    fn params(bound: usize) -> TraversalParams {
        TraversalParams {
            result_bound: bound,
            edge_limit: 64,
            seed_size: 1,
            seed: 7,
            hashed_visited: false,
            radius: None,
        }
    }

    fn line_points(n: usize) -> Vec<Vec<f32>> {
        (0..n).map(|i| vec![i as f32, 0.0]).collect()
    }

    #[test]
    fn test_result_bound() {
        assert_eq!(result_bound(10, 1.0).unwrap(), 10);
        assert_eq!(result_bound(10, 1.1).unwrap(), 11);
        assert_eq!(result_bound(3, 1.5).unwrap(), 5);
        assert_eq!(result_bound(0, 2.0).unwrap(), 0);
        assert!(result_bound(10, 0.5).is_err());
        assert!(result_bound(10, f64::NAN).is_err());
        assert!(result_bound(10, f64::INFINITY).is_err());
    }

    #[test]
    fn test_empty_graph_returns_nothing() {
        let graph = ProximityGraph::new();
        let (hits, stats) = greedy_search(&graph, &params(4), |_| 0.0, None);
        assert!(hits.is_empty());
        assert_eq!(stats.distance_computations, 0);
    }

    #[test]
    fn test_finds_nearest_on_complete_graph() {
        let points = line_points(20);
        let graph = complete_graph(&points);
        let query = [12.2f32, 0.0];
        let (hits, stats) = greedy_search(
            &graph,
            &params(3),
            |id| DistanceMetric::L2.distance(&query, &points[id.index()]),
            None,
        );
        let ids: Vec<u32> = hits.iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![12, 13, 11]);
        assert!(stats.expanded > 0);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let points = vec![vec![1.0f32], vec![-1.0], vec![1.0], vec![5.0]];
        let graph = complete_graph(&points);
        let (hits, _) = greedy_search(
            &graph,
            &params(3),
            |id| DistanceMetric::L2.distance(&[0.0], &points[id.index()]),
            None,
        );
        let ids: Vec<u32> = hits.iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_skips_tombstoned_targets() {
        let points = line_points(6);
        let mut graph = complete_graph(&points);
        graph.tombstone(VectorId(3)).unwrap();
        let query = [3.0f32, 0.0];
        let (hits, _) = greedy_search(
            &graph,
            &params(2),
            |id| DistanceMetric::L2.distance(&query, &points[id.index()]),
            None,
        );
        assert!(hits.iter().all(|n| n.id != VectorId(3)));
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_non_finite_distances_are_not_returned() {
        let points = line_points(5);
        let graph = complete_graph(&points);
        let (hits, _) = greedy_search(
            &graph,
            &params(5),
            |id| if id.0 == 2 { f64::NAN } else { id.0 as f64 },
            None,
        );
        let ids: Vec<u32> = hits.iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_radius_bounds_results() {
        let points = line_points(20);
        let graph = complete_graph(&points);
        let query = [0.0f32, 0.0];
        let dist = |id: VectorId| DistanceMetric::L2.distance(&query, &points[id.index()]);
        let mut p = params(10);
        p.radius = Some(2.5);
        let (hits, _) = greedy_search(&graph, &p, dist, None);
        let ids: Vec<u32> = hits.iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);

        // Inclusive bound.
        p.radius = Some(2.0);
        let (hits, _) = greedy_search(&graph, &p, dist, None);
        assert_eq!(hits.len(), 3);

        let shifted = [0.5f32, 0.0];
        p.radius = Some(0.25);
        let (hits, stats) = greedy_search(
            &graph,
            &p,
            |id| DistanceMetric::L2.distance(&shifted, &points[id.index()]),
            None,
        );
        assert!(hits.is_empty());
        assert_eq!(stats.expanded, 0);
    }

    #[test]
    fn test_checked_radius() {
        let q = [0.0f32];
        assert_eq!(SearchRequest::new(&q, 1).checked_radius().unwrap(), None);
        assert_eq!(
            SearchRequest::new(&q, 1).radius(0.0).checked_radius().unwrap(),
            Some(0.0)
        );
        assert!(SearchRequest::new(&q, 1).radius(-1.0).checked_radius().is_err());
        assert!(SearchRequest::new(&q, 1).radius(f64::NAN).checked_radius().is_err());
    }

    #[test]
    fn test_cancellation_stops_early() {
        let points = line_points(50);
        let graph = complete_graph(&points);
        let flag = AtomicBool::new(true);
        let (hits, stats) = greedy_search(
            &graph,
            &params(10),
            |id| DistanceMetric::L2.distance(&[40.0, 0.0], &points[id.index()]),
            Some(&flag),
        );
        assert!(stats.cancelled);
        assert_eq!(stats.expanded, 0);
        // The seed was scored before the first pop.
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_seeds_are_deterministic_and_live() {
        let points = line_points(100);
        let mut graph = complete_graph(&points);
        graph.tombstone(VectorId(0)).unwrap();
        let a = select_seeds(&graph, 8, 42);
        let b = select_seeds(&graph, 8, 42);
        assert_eq!(a, b);
        assert_eq!(a[0], VectorId(1));
        assert!(a.iter().all(|&id| graph.is_live(id)));
        let mut dedup = a.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), a.len());
    }

    #[test]
    fn test_hashed_visited_gives_same_answer() {
        let points = line_points(30);
        let graph = complete_graph(&points);
        let query = [7.4f32, 0.0];
        let dist = |id: VectorId| DistanceMetric::L2.distance(&query, &points[id.index()]);
        let (dense, _) = greedy_search(&graph, &params(4), dist, None);
        let mut p = params(4);
        p.hashed_visited = true;
        let (hashed, _) = greedy_search(&graph, &p, dist, None);
        assert_eq!(dense, hashed);
    }

    #[test]
    fn test_exhaustive_search() {
        let points = line_points(10);
        let mut graph = ProximityGraph::new();
        for _ in &points {
            graph.push_node().unwrap();
        }
        graph.tombstone(VectorId(5)).unwrap();
        let res = exhaustive_search(&graph, 3, |id| {
            DistanceMetric::L2.distance(&[5.0, 0.0], &points[id.index()])
        });
        assert_eq!(
            res.ids(),
            vec![VectorId(4), VectorId(6), VectorId(3)]
        );
        assert_eq!(res.stats.distance_computations, 9);
    }

    #[test]
    fn test_rerank_reorders_and_truncates() {
        let candidates = vec![
            Neighbor { id: VectorId(0), distance: 0.1 },
            Neighbor { id: VectorId(1), distance: 0.2 },
            Neighbor { id: VectorId(2), distance: 0.3 },
        ];
        let mut stats = SearchStats::default();
        let out = rerank(&candidates, 2, |id| 10.0 - id.0 as f64, &mut stats);
        let ids: Vec<u32> = out.iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(stats.distance_computations, 3);
    }
}
