//! Vector quantization for approximate distance evaluation.
//!
//! A [`Quantizer`] maps vectors to compact byte codes and evaluates
//! approximate distances against them without full reconstruction. The
//! index keeps one code per allocated id in a [`QuantizedVectors`] arena and
//! re-ranks with exact distances when asked to.

/// Product quantization: per-subspace k-means codebooks with lookup tables.
pub mod pq;
/// Scalar quantization: per-vector min/scale u8 codes.
pub mod scalar;

pub use pq::ProductQuantizer;
pub use scalar::ScalarQuantizer;

use crate::error::{Error, Result};
use crate::graph::distance::{DistanceMetric, DistanceOracle};
use crate::graph::node::VectorId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compressed representation of vectors with approximate distances.
pub trait Quantizer: Send + Sync + fmt::Debug {
    fn dimension(&self) -> usize;

    /// Bytes per code.
    fn code_size(&self) -> usize;

    /// Compress a vector. Fails with `DimensionMismatch` on wrong length.
    fn encode(&self, vector: &[f32]) -> Result<Vec<u8>>;

    /// Lossy reconstruction of an encoded vector.
    fn decode(&self, code: &[u8]) -> Vec<f32>;

    /// Approximate distance between an encoded vector and a full query.
    fn approx_distance(&self, code: &[u8], query: &[f32]) -> f64;

    /// Reusable evaluator for one query. Precomputes whatever per-query
    /// state the quantizer needs (lookup tables, scratch buffers).
    fn query_distance<'a>(&'a self, query: &'a [f32]) -> Box<dyn FnMut(&[u8]) -> f64 + 'a>;
}

/// Which quantizer [`Index::train_quantizer`](crate::index::Index::train_quantizer) builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantizerKind {
    /// Per-vector min/scale u8 codes (`8 + dimension` bytes).
    Scalar,
    /// Product quantization with `subspaces` bytes per vector.
    Product { subspaces: usize },
}

/// A quantizer built for a specific index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedQuantizer {
    Scalar(ScalarQuantizer),
    Product(ProductQuantizer),
}

impl TrainedQuantizer {
    fn inner(&self) -> &dyn Quantizer {
        match self {
            TrainedQuantizer::Scalar(q) => q,
            TrainedQuantizer::Product(q) => q,
        }
    }

    /// Metric the quantizer's native distances estimate.
    pub fn metric(&self) -> DistanceMetric {
        match self {
            TrainedQuantizer::Scalar(q) => q.metric(),
            TrainedQuantizer::Product(q) => q.metric(),
        }
    }

    pub fn kind(&self) -> QuantizerKind {
        match self {
            TrainedQuantizer::Scalar(_) => QuantizerKind::Scalar,
            TrainedQuantizer::Product(q) => QuantizerKind::Product {
                subspaces: q.num_subspaces(),
            },
        }
    }
}

impl Quantizer for TrainedQuantizer {
    fn dimension(&self) -> usize {
        self.inner().dimension()
    }

    fn code_size(&self) -> usize {
        self.inner().code_size()
    }

    fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        self.inner().encode(vector)
    }

    fn decode(&self, code: &[u8]) -> Vec<f32> {
        self.inner().decode(code)
    }

    fn approx_distance(&self, code: &[u8], query: &[f32]) -> f64 {
        self.inner().approx_distance(code, query)
    }

    fn query_distance<'a>(&'a self, query: &'a [f32]) -> Box<dyn FnMut(&[u8]) -> f64 + 'a> {
        self.inner().query_distance(query)
    }
}

/// Quantizer plus one code per allocated id, in id order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizedVectors {
    quantizer: TrainedQuantizer,
    codes: Vec<u8>,
}

impl QuantizedVectors {
    pub fn new(quantizer: TrainedQuantizer) -> Self {
        Self {
            quantizer,
            codes: Vec::new(),
        }
    }

    pub fn quantizer(&self) -> &TrainedQuantizer {
        &self.quantizer
    }

    /// Number of stored codes.
    pub fn len(&self) -> usize {
        let size = self.quantizer.code_size();
        if size == 0 {
            0
        } else {
            self.codes.len() / size
        }
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Encode and append the code for the next id.
    pub fn push(&mut self, vector: &[f32]) -> Result<()> {
        let code = self.quantizer.encode(vector)?;
        self.codes.extend_from_slice(&code);
        Ok(())
    }

    #[inline]
    pub fn code(&self, id: VectorId) -> &[u8] {
        let size = self.quantizer.code_size();
        let start = id.index() * size;
        &self.codes[start..start + size]
    }

    /// Per-query distance from `query` to the code of each id.
    ///
    /// Native evaluators (lookup tables, fused decode) are used only when
    /// `oracle` is the built-in metric the quantizer was trained for.
    /// Any other oracle scores the decoded code itself.
    pub fn evaluator<'a>(
        &'a self,
        oracle: &'a dyn DistanceOracle,
        query: &'a [f32],
    ) -> Box<dyn FnMut(VectorId) -> f64 + 'a> {
        if oracle.metric() == Some(self.quantizer.metric()) {
            let mut eval = self.quantizer.query_distance(query);
            Box::new(move |id| eval(self.code(id)))
        } else {
            Box::new(move |id| oracle.distance(query, &self.quantizer.decode(self.code(id))))
        }
    }

    pub fn memory_bytes(&self) -> usize {
        self.codes.capacity()
    }

    /// Check that exactly `expected` codes are stored.
    pub(crate) fn validate(&self, expected: usize, dimension: usize) -> Result<()> {
        if self.quantizer.dimension() != dimension {
            return Err(Error::Corrupt(format!(
                "quantizer dimension {} != index dimension {}",
                self.quantizer.dimension(),
                dimension
            )));
        }
        let size = self.quantizer.code_size();
        if self.codes.len() != expected * size {
            return Err(Error::Corrupt(format!(
                "quantized arena has {} bytes, expected {} ({} codes x {} bytes)",
                self.codes.len(),
                expected * size,
                expected,
                size
            )));
        }
        Ok(())
    }
}
