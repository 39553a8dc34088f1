//! Graph construction: diversity pruning, edge wiring, and repair.
//!
//! The functions here only touch topology. Candidate discovery is a
//! [`greedy_search`](crate::graph::search::greedy_search) run by the caller,
//! and stored-vector distances come in through a `pair` closure, so the same
//! code serves full, half, and byte precision stores.

use crate::graph::node::{Edge, ProximityGraph, VectorId};
use crate::graph::search::Neighbor;
use ordered_float::OrderedFloat;
use std::collections::HashSet;
use tracing::debug;

/// Diversity-aware neighbor selection.
///
/// Walks `candidates` by ascending `(distance, id)` and accepts a candidate
/// unless an already accepted one is strictly closer to it than it is to the
/// base vector. Stops after `max_edges` acceptances. Non-finite distances are
/// never accepted. Remaining slots are left empty.
pub fn select_diverse<P>(
    candidates: &[Neighbor],
    max_edges: usize,
    pair: &mut P,
) -> Vec<Neighbor>
where
    P: FnMut(VectorId, VectorId) -> f64,
{
    let mut sorted: Vec<Neighbor> = candidates
        .iter()
        .copied()
        .filter(|c| c.distance.is_finite())
        .collect();
    sorted.sort_by_key(|c| (OrderedFloat(c.distance), c.id));

    let mut selected: Vec<Neighbor> = Vec::with_capacity(max_edges.min(sorted.len()));
    for candidate in sorted {
        if selected.len() >= max_edges {
            break;
        }
        if selected.iter().any(|s| s.id == candidate.id) {
            continue;
        }
        let dominated = selected
            .iter()
            .any(|s| pair(candidate.id, s.id) < candidate.distance);
        if !dominated {
            selected.push(candidate);
        }
    }
    selected
}

/// Re-apply [`select_diverse`] to a node's own edge list.
///
/// Edges to tombstoned targets are dropped first. Kept edges retain their
/// original rank and cached distance. Returns the number of edges removed.
pub fn prune_node<P>(
    graph: &mut ProximityGraph,
    id: VectorId,
    max_edges: usize,
    pair: &mut P,
) -> usize
where
    P: FnMut(VectorId, VectorId) -> f64,
{
    let Some(node) = graph.node(id) else {
        return 0;
    };
    let existing: Vec<Edge> = node
        .edges()
        .iter()
        .copied()
        .filter(|e| graph.is_live(e.target))
        .collect();
    let before = node.degree();

    let candidates: Vec<Neighbor> = existing
        .iter()
        .map(|e| Neighbor {
            id: e.target,
            distance: e.distance as f64,
        })
        .collect();
    let kept: HashSet<VectorId> = select_diverse(&candidates, max_edges, pair)
        .into_iter()
        .map(|n| n.id)
        .collect();
    let edges: Vec<Edge> = existing
        .into_iter()
        .filter(|e| kept.contains(&e.target))
        .collect();
    let after = edges.len();

    if let Some(node) = graph.node_mut(id) {
        node.set_edges(edges);
    }
    debug!(node = %id, before, after, "pruned edge list");
    before - after
}

/// Outcome of wiring one node into the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkReport {
    /// Out-edges added to the node itself.
    pub added: usize,
    /// Reverse edges added on neighbors.
    pub reverse: usize,
    /// Neighbor edges dropped by the one-hop pruning cascade.
    pub pruned: usize,
}

/// Wire `id` to the best diverse subset of its current edges plus
/// `candidates`, then add reverse edges.
///
/// New edges get fresh ranks; surviving edges keep theirs. A neighbor pushed
/// over `max_edges` by its reverse edge is pruned with the same rule, one hop
/// only.
pub fn link_node<P>(
    graph: &mut ProximityGraph,
    id: VectorId,
    candidates: &[Neighbor],
    max_edges: usize,
    pair: &mut P,
) -> LinkReport
where
    P: FnMut(VectorId, VectorId) -> f64,
{
    let mut report = LinkReport::default();
    let Some(node) = graph.node(id) else {
        return report;
    };
    let existing: Vec<Edge> = node
        .edges()
        .iter()
        .copied()
        .filter(|e| graph.is_live(e.target))
        .collect();

    let mut pool: Vec<Neighbor> = existing
        .iter()
        .map(|e| Neighbor {
            id: e.target,
            distance: e.distance as f64,
        })
        .collect();
    pool.extend(
        candidates
            .iter()
            .filter(|c| c.id != id && graph.is_live(c.id))
            .filter(|c| !existing.iter().any(|e| e.target == c.id)),
    );
    let selected = select_diverse(&pool, max_edges, pair);

    let Some(node) = graph.node_mut(id) else {
        return report;
    };
    let mut edges = Vec::with_capacity(selected.len());
    let mut fresh = Vec::new();
    for n in &selected {
        match existing.iter().find(|e| e.target == n.id) {
            Some(e) => edges.push(*e),
            None => {
                edges.push(Edge {
                    target: n.id,
                    distance: n.distance as f32,
                    rank: node.allocate_rank(),
                });
                fresh.push(*n);
            }
        }
    }
    node.set_edges(edges);
    report.added = fresh.len();

    for n in fresh {
        let overflow = match graph.node_mut(n.id) {
            Some(neighbor) => {
                if neighbor.push_edge(id, n.distance as f32) {
                    report.reverse += 1;
                }
                neighbor.degree() > max_edges
            }
            None => false,
        };
        if overflow {
            report.pruned += prune_node(graph, n.id, max_edges, pair);
        }
    }
    report
}

/// Remove every edge pointing at a tombstoned node and clear the edge lists
/// of tombstoned nodes. Returns the number of edges removed and the live
/// nodes that lost at least one edge.
pub fn purge_dangling(graph: &mut ProximityGraph) -> (usize, Vec<VectorId>) {
    let dead: HashSet<VectorId> = (0..graph.len() as u32)
        .map(VectorId)
        .filter(|&id| !graph.is_live(id))
        .collect();
    if dead.is_empty() {
        return (0, Vec::new());
    }

    let mut purged = 0;
    let mut affected = Vec::new();
    for raw in 0..graph.len() as u32 {
        let id = VectorId(raw);
        let live = graph.is_live(id);
        let Some(node) = graph.node_mut(id) else {
            continue;
        };
        let removed = if live {
            node.retain_edges(|e| !dead.contains(&e.target))
        } else {
            node.retain_edges(|_| false)
        };
        purged += removed;
        if live && removed > 0 {
            affected.push(id);
        }
    }
    (purged, affected)
}
