//! Flat binary layout of a serving snapshot.
//!
//! ```text
//! "NGSNAP01" | header_len u32 LE | bincode SnapshotHeader
//! | live flags (1 byte per node) | offsets (u64 LE x (n + 1))
//! | edges (u32 target, f32 distance, u32 rank; LE) | vectors (LE, n x dim)
//! | "NGC1" | CRC32 BE over everything before the footer
//! ```
//!
//! Sections are read in place, so the same code serves heap buffers and
//! memory-mapped files.

use crate::error::{Error, Result};
use crate::graph::node::{Edge, ProximityGraph, VectorId};
use crate::index::IndexConfig;
use crate::storage::vectors::VectorStore;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Leading magic of every snapshot file.
pub(crate) const SNAPSHOT_MAGIC: &[u8; 8] = b"NGSNAP01";

/// Magic bytes written before the CRC32 footer.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"NGC1";

const FORMAT_VERSION: u32 = 1;
const EDGE_BYTES: usize = 12;
const FOOTER_BYTES: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotHeader {
    version: u32,
    config: IndexConfig,
    node_count: u64,
    live_count: u64,
    edge_count: u64,
}

/// Parsed section boundaries of a validated snapshot buffer.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    pub config: IndexConfig,
    pub node_count: usize,
    pub live_count: usize,
    pub edge_count: usize,
    /// Lowest live id, found once at parse time.
    pub first_live: Option<VectorId>,
    live: Range<usize>,
    offsets: Range<usize>,
    edges: Range<usize>,
    vectors: Range<usize>,
    vector_bytes: usize,
}

#[inline]
fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[inline]
fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn corrupt(msg: impl Into<String>) -> Error {
    Error::Corrupt(msg.into())
}

/// Render `graph` and `store` into snapshot bytes.
pub(crate) fn encode(
    graph: &ProximityGraph,
    store: &VectorStore,
    config: &IndexConfig,
) -> Result<Vec<u8>> {
    if graph.len() != store.len() {
        return Err(corrupt(format!(
            "graph has {} nodes but store has {} vectors",
            graph.len(),
            store.len()
        )));
    }
    let n = graph.len();
    let header = SnapshotHeader {
        version: FORMAT_VERSION,
        config: config.clone(),
        node_count: n as u64,
        live_count: graph.live_count() as u64,
        edge_count: graph.edge_count() as u64,
    };
    let header_bytes =
        bincode::serialize(&header).map_err(|e| corrupt(format!("encode failed: {e}")))?;

    let total = SNAPSHOT_MAGIC.len()
        + 4
        + header_bytes.len()
        + n
        + (n + 1) * 8
        + graph.edge_count() * EDGE_BYTES
        + store.data_bytes()
        + FOOTER_BYTES;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(SNAPSHOT_MAGIC);
    out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_bytes);

    out.extend(graph.nodes().iter().map(|node| node.is_live() as u8));

    let mut offset = 0u64;
    out.extend_from_slice(&offset.to_le_bytes());
    for node in graph.nodes() {
        offset += node.degree() as u64;
        out.extend_from_slice(&offset.to_le_bytes());
    }

    for edge in graph.nodes().iter().flat_map(|node| node.edges()) {
        out.extend_from_slice(&edge.target.0.to_le_bytes());
        out.extend_from_slice(&edge.distance.to_le_bytes());
        out.extend_from_slice(&edge.rank.to_le_bytes());
    }

    store.write_le(&mut out);

    let crc = crc32fast::hash(&out);
    out.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    out.extend_from_slice(&crc.to_be_bytes());
    debug_assert_eq!(out.len(), total);
    Ok(out)
}

/// Validate `bytes` and locate every section.
///
/// Every structural problem (bad magic, checksum, truncated or oversized
/// sections, out-of-range edge targets, degree over the bound) is reported
/// as [`Error::Corrupt`].
pub(crate) fn parse(bytes: &[u8]) -> Result<Layout> {
    let prefix = SNAPSHOT_MAGIC.len() + 4;
    if bytes.len() < prefix + FOOTER_BYTES {
        return Err(corrupt(format!("snapshot too short ({} bytes)", bytes.len())));
    }
    if &bytes[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
        return Err(corrupt("bad snapshot magic"));
    }
    let body_end = bytes.len() - FOOTER_BYTES;
    if &bytes[body_end..body_end + 4] != SNAPSHOT_CRC_MAGIC {
        return Err(corrupt("missing snapshot footer"));
    }
    let stored_crc = u32::from_be_bytes([
        bytes[body_end + 4],
        bytes[body_end + 5],
        bytes[body_end + 6],
        bytes[body_end + 7],
    ]);
    let computed_crc = crc32fast::hash(&bytes[..body_end]);
    if stored_crc != computed_crc {
        return Err(corrupt(format!(
            "snapshot CRC32 mismatch: expected {stored_crc:#010x}, got {computed_crc:#010x}"
        )));
    }

    let header_len = read_u32(bytes, SNAPSHOT_MAGIC.len()) as usize;
    let header_end = prefix
        .checked_add(header_len)
        .filter(|&end| end <= body_end)
        .ok_or_else(|| corrupt("snapshot header overruns the file"))?;
    let header: SnapshotHeader = bincode::deserialize(&bytes[prefix..header_end])
        .map_err(|e| corrupt(format!("snapshot header decode failed: {e}")))?;
    if header.version != FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported snapshot version {}",
            header.version
        )));
    }
    header
        .config
        .validate()
        .map_err(|e| corrupt(format!("snapshot config rejected: {e}")))?;

    let n = usize::try_from(header.node_count).map_err(|_| corrupt("node count overflow"))?;
    if n > 0 {
        VectorId::from_index(n - 1).map_err(|_| corrupt(format!("{n} nodes exceed the id space")))?;
    }
    let live_count =
        usize::try_from(header.live_count).map_err(|_| corrupt("live count overflow"))?;
    let edge_count =
        usize::try_from(header.edge_count).map_err(|_| corrupt("edge count overflow"))?;
    let vector_bytes = header
        .config
        .dimension
        .checked_mul(header.config.precision.element_size())
        .ok_or_else(|| corrupt("vector size overflow"))?;

    let section = |start: usize, len: Option<usize>| -> Result<Range<usize>> {
        len.and_then(|len| start.checked_add(len))
            .filter(|&end| end <= body_end)
            .map(|end| start..end)
            .ok_or_else(|| corrupt("snapshot section overruns the file"))
    };
    let live = section(header_end, Some(n))?;
    let offsets = section(
        live.end,
        n.checked_add(1).and_then(|count| count.checked_mul(8)),
    )?;
    let edges = section(offsets.end, edge_count.checked_mul(EDGE_BYTES))?;
    let vectors = section(edges.end, n.checked_mul(vector_bytes))?;
    if vectors.end != body_end {
        return Err(corrupt(format!(
            "snapshot has {} trailing bytes",
            body_end - vectors.end
        )));
    }

    let first_live = bytes[live.clone()]
        .iter()
        .position(|&flag| flag == 1)
        .map(|i| VectorId(i as u32));
    let layout = Layout {
        config: header.config,
        node_count: n,
        live_count,
        edge_count,
        first_live,
        live,
        offsets,
        edges,
        vectors,
        vector_bytes,
    };
    layout.check_topology(bytes)?;
    Ok(layout)
}

impl Layout {
    fn check_topology(&self, bytes: &[u8]) -> Result<()> {
        let flags = &bytes[self.live.clone()];
        if let Some(pos) = flags.iter().position(|&b| b > 1) {
            return Err(corrupt(format!("bad live flag {} at node {pos}", flags[pos])));
        }
        let live = flags.iter().filter(|&&b| b == 1).count();
        if live != self.live_count {
            return Err(corrupt(format!(
                "live count {} != counted live nodes {live}",
                self.live_count
            )));
        }

        let max_edges = self.config.max_edges as u64;
        let mut prev = self.offset(bytes, 0);
        if prev != 0 {
            return Err(corrupt("first edge offset is not zero"));
        }
        for i in 1..=self.node_count {
            let next = self.offset(bytes, i);
            if next < prev || next - prev > max_edges {
                return Err(corrupt(format!(
                    "node {} has bad edge range {prev}..{next} (max_edges={max_edges})",
                    i - 1
                )));
            }
            prev = next;
        }
        if prev != self.edge_count as u64 {
            return Err(corrupt(format!(
                "edge offsets end at {prev}, expected {}",
                self.edge_count
            )));
        }

        for i in 0..self.edge_count {
            let edge = self.edge(bytes, i);
            if edge.target.index() >= self.node_count {
                return Err(corrupt(format!(
                    "edge target {} out of bounds (node_count={})",
                    edge.target, self.node_count
                )));
            }
            if edge.distance.is_nan() {
                return Err(corrupt(format!("edge {i} has a NaN distance")));
            }
        }
        Ok(())
    }

    #[inline]
    fn offset(&self, bytes: &[u8], i: usize) -> u64 {
        read_u64(bytes, self.offsets.start + i * 8)
    }

    #[inline]
    pub fn is_live(&self, bytes: &[u8], id: VectorId) -> bool {
        id.index() < self.node_count && bytes[self.live.start + id.index()] == 1
    }

    /// Positions of `id`'s edges in the edge section. Empty for unknown ids.
    #[inline]
    pub fn edge_range(&self, bytes: &[u8], id: VectorId) -> Range<usize> {
        if id.index() >= self.node_count {
            return 0..0;
        }
        let start = self.offset(bytes, id.index()) as usize;
        let end = self.offset(bytes, id.index() + 1) as usize;
        start..end
    }

    #[inline]
    pub fn edge_target(&self, bytes: &[u8], i: usize) -> VectorId {
        VectorId(read_u32(bytes, self.edges.start + i * EDGE_BYTES))
    }

    pub fn edge(&self, bytes: &[u8], i: usize) -> Edge {
        let at = self.edges.start + i * EDGE_BYTES;
        Edge {
            target: VectorId(read_u32(bytes, at)),
            distance: f32::from_bits(read_u32(bytes, at + 4)),
            rank: read_u32(bytes, at + 8),
        }
    }

    /// Raw little-endian components of `id`. `id` must be below `node_count`.
    #[inline]
    pub fn vector_bytes<'b>(&self, bytes: &'b [u8], id: VectorId) -> &'b [u8] {
        let start = self.vectors.start + id.index() * self.vector_bytes;
        &bytes[start..start + self.vector_bytes]
    }
}
