//! Proximity graph node and edge model.
//!
//! Nodes live in a dense arena indexed by [`VectorId`]; edges refer to their
//! targets by id rather than by reference, so the graph owns no cycles and
//! can be copied into a frozen snapshot without fix-ups.

use crate::error::{Error, Result};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, dense, never-reused handle for one stored vector.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VectorId(pub u32);

impl VectorId {
    /// Position of this id in dense arenas.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Id for arena position `index`. `u32::MAX` is never handed out, so an
    /// arena length always fits in a `u32`.
    pub fn from_index(index: usize) -> Result<Self> {
        match u32::try_from(index) {
            Ok(raw) if raw < u32::MAX => Ok(Self(raw)),
            _ => Err(Error::CapacityExceeded(index)),
        }
    }
}

impl From<u32> for VectorId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for VectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directed edge to an approximate nearest neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub target: VectorId,
    /// Distance between the owning node and `target`, cached at wiring time.
    pub distance: f32,
    /// Per-node insertion sequence number of this edge.
    pub rank: u32,
}

impl Edge {
    /// Sort key: ascending distance, ties broken by ascending target id.
    #[inline]
    pub fn order_key(&self) -> (OrderedFloat<f32>, VectorId) {
        (OrderedFloat(self.distance), self.target)
    }
}

/// A graph node: liveness bit plus an ordered, capacity-bounded edge list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    edges: Vec<Edge>,
    live: bool,
    next_rank: u32,
}

impl Node {
    fn new_live() -> Self {
        Self {
            edges: Vec::new(),
            live: true,
            next_rank: 0,
        }
    }

    /// Out-edges, ascending by `(distance, target)`.
    #[inline]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[inline]
    pub fn degree(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Rank the next inserted edge will receive.
    pub fn next_rank(&self) -> u32 {
        self.next_rank
    }

    /// Returns `true` if this node already has an edge to `target`.
    pub fn has_edge(&self, target: VectorId) -> bool {
        self.edges.iter().any(|e| e.target == target)
    }

    /// Insert an edge keeping the list ordered. Duplicate targets are ignored.
    /// Returns `true` if the edge was added.
    pub(crate) fn push_edge(&mut self, target: VectorId, distance: f32) -> bool {
        if self.has_edge(target) {
            return false;
        }
        let edge = Edge {
            target,
            distance,
            rank: self.next_rank,
        };
        self.next_rank = self.next_rank.wrapping_add(1);
        let key = edge.order_key();
        let pos = self.edges.partition_point(|e| e.order_key() < key);
        self.edges.insert(pos, edge);
        true
    }

    /// Replace the edge list. The caller passes edges whose ranks were
    /// already assigned; the list is re-sorted into canonical order.
    pub(crate) fn set_edges(&mut self, mut edges: Vec<Edge>) {
        edges.sort_by_key(|e| e.order_key());
        if let Some(max_rank) = edges.iter().map(|e| e.rank).max() {
            self.next_rank = self.next_rank.max(max_rank.wrapping_add(1));
        }
        self.edges = edges;
    }

    /// Allocate a rank for an edge that will be passed to [`Node::set_edges`].
    pub(crate) fn allocate_rank(&mut self) -> u32 {
        let rank = self.next_rank;
        self.next_rank = self.next_rank.wrapping_add(1);
        rank
    }

    /// Drop edges for which `keep` returns `false`. Returns how many were removed.
    pub(crate) fn retain_edges<F: FnMut(&Edge) -> bool>(&mut self, keep: F) -> usize {
        let before = self.edges.len();
        self.edges.retain(keep);
        before - self.edges.len()
    }
}

/// Directed proximity graph over a dense id space.
///
/// Edges need not be symmetric. Tombstoned nodes keep their slot (ids are
/// never reused) and may still be the target of other nodes' edges until
/// [`Index::repair`](crate::index::Index::repair) purges them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProximityGraph {
    nodes: Vec<Node>,
    live_count: usize,
    /// Lowest live id.
    first_live: Option<VectorId>,
}

impl ProximityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocated ids, including tombstoned ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live nodes.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Returns `true` if the graph holds no live node.
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    #[inline]
    pub fn node(&self, id: VectorId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, id: VectorId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    /// Returns `true` if `id` is allocated and not tombstoned.
    #[inline]
    pub fn is_live(&self, id: VectorId) -> bool {
        self.nodes.get(id.index()).is_some_and(|n| n.live)
    }

    /// Out-edges of `id`, or an empty slice for unknown ids.
    #[inline]
    pub fn edges(&self, id: VectorId) -> &[Edge] {
        self.nodes.get(id.index()).map_or(&[], |n| n.edges())
    }

    /// Lowest live id, if any node is live.
    #[inline]
    pub fn first_live(&self) -> Option<VectorId> {
        self.first_live
    }

    /// Append an isolated live node and return its id.
    pub(crate) fn push_node(&mut self) -> Result<VectorId> {
        let id = VectorId::from_index(self.nodes.len())?;
        self.nodes.push(Node::new_live());
        self.live_count += 1;
        if self.first_live.is_none() {
            self.first_live = Some(id);
        }
        Ok(id)
    }

    /// Mark a node as removed. Incoming edges are left in place.
    pub(crate) fn tombstone(&mut self, id: VectorId) -> Result<()> {
        match self.nodes.get_mut(id.index()) {
            Some(node) if node.live => {
                node.live = false;
                self.live_count -= 1;
            }
            _ => return Err(Error::NotFound(id)),
        }
        if self.first_live == Some(id) {
            // Ids below `id` are already dead, so the scan only moves forward.
            self.first_live = self.nodes[id.index() + 1..]
                .iter()
                .position(|n| n.live)
                .map(|offset| VectorId(id.0 + 1 + offset as u32));
        }
        Ok(())
    }

    /// Iterate over the ids of all live nodes in ascending order.
    pub fn live_ids(&self) -> impl Iterator<Item = VectorId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.live)
            .map(|(i, _)| VectorId(i as u32))
    }

    /// All nodes, indexed by id.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Total number of edges across all nodes.
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(Node::degree).sum()
    }

    /// Largest out-degree in the graph.
    pub fn max_degree(&self) -> usize {
        self.nodes.iter().map(Node::degree).max().unwrap_or(0)
    }

    /// Number of edges held by live nodes that point at tombstoned targets.
    pub fn dangling_edge_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.live)
            .flat_map(|n| n.edges.iter())
            .filter(|e| !self.is_live(e.target))
            .count()
    }

    /// Structural validation used after deserialization.
    pub(crate) fn validate(&self, max_edges: usize) -> Result<()> {
        let n = self.nodes.len();
        let live = self.nodes.iter().filter(|n| n.live).count();
        if live != self.live_count {
            return Err(Error::Corrupt(format!(
                "live_count {} != counted live nodes {}",
                self.live_count, live
            )));
        }
        if n > 0 {
            VectorId::from_index(n - 1)
                .map_err(|_| Error::Corrupt(format!("{n} nodes exceed the id space")))?;
        }
        let first = self.nodes.iter().position(|n| n.live).map(|i| VectorId(i as u32));
        if first != self.first_live {
            return Err(Error::Corrupt(format!(
                "cached first live id {:?} != actual {:?}",
                self.first_live, first
            )));
        }
        for (node_id, node) in self.nodes.iter().enumerate() {
            if node.edges.len() > max_edges {
                return Err(Error::Corrupt(format!(
                    "node {} has {} edges (max_edges={})",
                    node_id,
                    node.edges.len(),
                    max_edges
                )));
            }
            for edge in &node.edges {
                if edge.target.index() >= n {
                    return Err(Error::Corrupt(format!(
                        "edge target {} out of bounds (node_count={}) at node {}",
                        edge.target, n, node_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Rough heap footprint in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.edges.capacity() * std::mem::size_of::<Edge>())
            .sum::<usize>()
            + self.nodes.capacity() * std::mem::size_of::<Node>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_edge_keeps_order_and_ranks() {
        let mut node = Node::new_live();
        assert!(node.push_edge(VectorId(3), 2.0));
        assert!(node.push_edge(VectorId(1), 1.0));
        assert!(node.push_edge(VectorId(2), 2.0));
        let targets: Vec<u32> = node.edges().iter().map(|e| e.target.0).collect();
        assert_eq!(targets, vec![1, 2, 3]);
        let ranks: Vec<u32> = node.edges().iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 0]);
    }

    #[test]
    fn test_push_edge_ignores_duplicates() {
        let mut node = Node::new_live();
        assert!(node.push_edge(VectorId(5), 1.0));
        assert!(!node.push_edge(VectorId(5), 0.5));
        assert_eq!(node.degree(), 1);
        assert_eq!(node.next_rank(), 1);
    }

    #[test]
    fn test_tombstone_twice_is_not_found() {
        let mut graph = ProximityGraph::new();
        let a = graph.push_node().unwrap();
        let b = graph.push_node().unwrap();
        assert_eq!(graph.live_count(), 2);
        graph.tombstone(a).unwrap();
        assert!(!graph.is_live(a));
        assert!(graph.is_live(b));
        assert_eq!(graph.live_count(), 1);
        assert!(matches!(graph.tombstone(a), Err(Error::NotFound(id)) if id == a));
        assert!(matches!(
            graph.tombstone(VectorId(9)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_first_live_follows_removals() {
        let mut graph = ProximityGraph::new();
        assert_eq!(graph.first_live(), None);
        let ids: Vec<VectorId> = (0..4).map(|_| graph.push_node().unwrap()).collect();
        assert_eq!(graph.first_live(), Some(ids[0]));
        graph.tombstone(ids[2]).unwrap();
        assert_eq!(graph.first_live(), Some(ids[0]));
        graph.tombstone(ids[0]).unwrap();
        assert_eq!(graph.first_live(), Some(ids[1]));
        graph.tombstone(ids[1]).unwrap();
        assert_eq!(graph.first_live(), Some(ids[3]));
        graph.tombstone(ids[3]).unwrap();
        assert_eq!(graph.first_live(), None);
        let fresh = graph.push_node().unwrap();
        assert_eq!(graph.first_live(), Some(fresh));
        assert!(graph.validate(4).is_ok());
    }

    #[test]
    fn test_id_space_is_bounded() {
        assert_eq!(VectorId::from_index(5).unwrap(), VectorId(5));
        assert_eq!(
            VectorId::from_index(u32::MAX as usize - 1).unwrap(),
            VectorId(u32::MAX - 1)
        );
        assert!(matches!(
            VectorId::from_index(u32::MAX as usize),
            Err(Error::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_dangling_edges_counted() {
        let mut graph = ProximityGraph::new();
        let a = graph.push_node().unwrap();
        let b = graph.push_node().unwrap();
        graph.node_mut(a).unwrap().push_edge(b, 1.0);
        assert_eq!(graph.dangling_edge_count(), 0);
        graph.tombstone(b).unwrap();
        assert_eq!(graph.dangling_edge_count(), 1);
        assert_eq!(graph.live_ids().collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn test_validate_rejects_out_of_range_target() {
        let mut graph = ProximityGraph::new();
        let a = graph.push_node().unwrap();
        graph.node_mut(a).unwrap().push_edge(VectorId(42), 1.0);
        assert!(matches!(graph.validate(4), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_node() {
        let mut graph = ProximityGraph::new();
        let ids: Vec<VectorId> = (0..4).map(|_| graph.push_node().unwrap()).collect();
        for &t in &ids[1..] {
            graph.node_mut(ids[0]).unwrap().push_edge(t, 1.0);
        }
        assert!(graph.validate(3).is_ok());
        assert!(graph.validate(2).is_err());
    }
}
