//! Contiguous vector arena.
//!
//! Vectors are appended to one flat buffer in the precision chosen at
//! creation. Ids are positions in that buffer, so growth never invalidates
//! an issued id.

use crate::error::{Error, Result};
use crate::graph::node::VectorId;
use half::f16;
use serde::{Deserialize, Serialize};

/// Storage precision for vector components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrecisionMode {
    /// 32-bit floats, lossless.
    #[default]
    Full,
    /// IEEE half precision. Relative error per component stays below
    /// [`HALF_PRECISION_RELATIVE_ERROR`](crate::config::HALF_PRECISION_RELATIVE_ERROR)
    /// for normal-range values.
    Half,
    /// One unsigned byte per component; values are rounded and clamped to `0..=255`.
    Byte,
}

impl PrecisionMode {
    /// Bytes per stored component.
    pub fn element_size(self) -> usize {
        match self {
            PrecisionMode::Full => 4,
            PrecisionMode::Half => 2,
            PrecisionMode::Byte => 1,
        }
    }

    /// Decode little-endian stored components into `out`.
    pub(crate) fn decode_le(self, bytes: &[u8], out: &mut Vec<f32>) {
        out.clear();
        match self {
            PrecisionMode::Full => out.extend(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            ),
            PrecisionMode::Half => out.extend(
                bytes
                    .chunks_exact(2)
                    .map(|c| f16::from_bits(u16::from_le_bytes([c[0], c[1]])).to_f32()),
            ),
            PrecisionMode::Byte => out.extend(bytes.iter().map(|&b| b as f32)),
        }
    }
}

fn to_byte(x: f32) -> u8 {
    // NaN maps to 0 through the saturating cast.
    x.round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Arena {
    Full(Vec<f32>),
    Half(Vec<f16>),
    Byte(Vec<u8>),
}

impl Arena {
    fn new(precision: PrecisionMode) -> Self {
        match precision {
            PrecisionMode::Full => Arena::Full(Vec::new()),
            PrecisionMode::Half => Arena::Half(Vec::new()),
            PrecisionMode::Byte => Arena::Byte(Vec::new()),
        }
    }

    fn precision(&self) -> PrecisionMode {
        match self {
            Arena::Full(_) => PrecisionMode::Full,
            Arena::Half(_) => PrecisionMode::Half,
            Arena::Byte(_) => PrecisionMode::Byte,
        }
    }

    fn len(&self) -> usize {
        match self {
            Arena::Full(v) => v.len(),
            Arena::Half(v) => v.len(),
            Arena::Byte(v) => v.len(),
        }
    }

    fn push(&mut self, vector: &[f32]) {
        match self {
            Arena::Full(v) => v.extend_from_slice(vector),
            Arena::Half(v) => v.extend(vector.iter().map(|&x| f16::from_f32(x))),
            Arena::Byte(v) => v.extend(vector.iter().map(|&x| to_byte(x))),
        }
    }

    fn capacity_bytes(&self) -> usize {
        match self {
            Arena::Full(v) => v.capacity() * 4,
            Arena::Half(v) => v.capacity() * 2,
            Arena::Byte(v) => v.capacity(),
        }
    }
}

/// Append-only store of fixed-dimension vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStore {
    dimension: usize,
    arena: Arena,
    live: Vec<bool>,
    live_count: usize,
}

impl VectorStore {
    pub fn new(dimension: usize, precision: PrecisionMode) -> Self {
        Self {
            dimension,
            arena: Arena::new(precision),
            live: Vec::new(),
            live_count: 0,
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn precision(&self) -> PrecisionMode {
        self.arena.precision()
    }

    /// Number of allocated ids, including tombstoned ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    #[inline]
    pub fn is_live(&self, id: VectorId) -> bool {
        self.live.get(id.index()).copied().unwrap_or(false)
    }

    /// Append a vector and return its id.
    pub fn put(&mut self, vector: &[f32]) -> Result<VectorId> {
        Error::check_dimension(self.dimension, vector.len())?;
        let id = VectorId::from_index(self.live.len())?;
        self.arena.push(vector);
        self.live.push(true);
        self.live_count += 1;
        Ok(id)
    }

    /// Copy of the stored vector, widened to f32.
    pub fn get(&self, id: VectorId) -> Result<Vec<f32>> {
        let mut out = vec![0.0f32; self.dimension];
        self.get_into(id, &mut out)?;
        Ok(out)
    }

    /// Write the stored vector into `out` without allocating.
    pub fn get_into(&self, id: VectorId, out: &mut [f32]) -> Result<()> {
        if !self.is_live(id) {
            return Err(Error::NotFound(id));
        }
        Error::check_dimension(self.dimension, out.len())?;
        let range = self.range(id);
        match &self.arena {
            Arena::Full(v) => out.copy_from_slice(&v[range]),
            Arena::Half(v) => {
                for (o, h) in out.iter_mut().zip(&v[range]) {
                    *o = h.to_f32();
                }
            }
            Arena::Byte(v) => {
                for (o, &b) in out.iter_mut().zip(&v[range]) {
                    *o = b as f32;
                }
            }
        }
        Ok(())
    }

    /// Borrow a stored vector as f32, decoding into `scratch` when the
    /// arena is not full precision. Ignores liveness; `id` must be allocated.
    #[inline]
    pub(crate) fn read<'s>(&'s self, id: VectorId, scratch: &'s mut Vec<f32>) -> &'s [f32] {
        let range = self.range(id);
        match &self.arena {
            Arena::Full(v) => &v[range],
            Arena::Half(v) => {
                scratch.clear();
                scratch.extend(v[range].iter().map(|h| h.to_f32()));
                scratch
            }
            Arena::Byte(v) => {
                scratch.clear();
                scratch.extend(v[range].iter().map(|&b| b as f32));
                scratch
            }
        }
    }

    #[inline]
    fn range(&self, id: VectorId) -> std::ops::Range<usize> {
        let start = id.index() * self.dimension;
        start..start + self.dimension
    }

    pub fn tombstone(&mut self, id: VectorId) -> Result<()> {
        match self.live.get_mut(id.index()) {
            Some(flag) if *flag => {
                *flag = false;
                self.live_count -= 1;
                Ok(())
            }
            _ => Err(Error::NotFound(id)),
        }
    }

    /// Liveness flags indexed by id.
    pub(crate) fn live_flags(&self) -> &[bool] {
        &self.live
    }

    /// Append every stored component, little endian, in id order.
    pub(crate) fn write_le(&self, out: &mut Vec<u8>) {
        match &self.arena {
            Arena::Full(v) => {
                out.reserve(v.len() * 4);
                for x in v {
                    out.extend_from_slice(&x.to_le_bytes());
                }
            }
            Arena::Half(v) => {
                out.reserve(v.len() * 2);
                for h in v {
                    out.extend_from_slice(&h.to_bits().to_le_bytes());
                }
            }
            Arena::Byte(v) => out.extend_from_slice(v),
        }
    }

    /// Size in bytes of the component section written by `write_le`.
    pub(crate) fn data_bytes(&self) -> usize {
        self.arena.len() * self.precision().element_size()
    }

    /// Rough heap footprint in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.arena.capacity_bytes() + self.live.capacity()
    }

    /// Structural validation used after deserialization.
    pub(crate) fn validate(&self) -> Result<()> {
        let expected = self.live.len() * self.dimension;
        if self.arena.len() != expected {
            return Err(Error::Corrupt(format!(
                "vector arena has {} components, expected {} ({} ids x dim {})",
                self.arena.len(),
                expected,
                self.live.len(),
                self.dimension
            )));
        }
        let live = self.live.iter().filter(|&&l| l).count();
        if live != self.live_count {
            return Err(Error::Corrupt(format!(
                "vector store live_count {} != counted {}",
                self.live_count, live
            )));
        }
        Ok(())
    }
}
