//! Scalar quantization.
//!
//! Each vector is compressed to one byte per component by finding its min
//! and max, then linearly mapping every component to \[0, 255\]. The code
//! carries its own calibration: `[min f32 LE][scale f32 LE][dim bytes]`.
//! Reconstruction error per component is at most `scale / 2`.

use super::Quantizer;
use crate::error::{Error, Result};
use crate::graph::distance::DistanceMetric;
use serde::{Deserialize, Serialize};

const HEADER: usize = 8;

/// Per-vector min/scale u8 quantizer. Needs no training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    dimension: usize,
    metric: DistanceMetric,
}

impl ScalarQuantizer {
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self { dimension, metric }
    }

    /// Metric the approximate distances estimate.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    #[inline]
    fn calibration(code: &[u8]) -> (f32, f32) {
        let min = f32::from_le_bytes([code[0], code[1], code[2], code[3]]);
        let scale = f32::from_le_bytes([code[4], code[5], code[6], code[7]]);
        (min, scale)
    }

    fn decode_into(&self, code: &[u8], out: &mut Vec<f32>) {
        debug_assert_eq!(code.len(), self.code_size());
        let (min, scale) = Self::calibration(code);
        out.clear();
        out.extend(code[HEADER..].iter().map(|&q| min + q as f32 * scale));
    }
}

impl Quantizer for ScalarQuantizer {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn code_size(&self) -> usize {
        HEADER + self.dimension
    }

    fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        Error::check_dimension(self.dimension, vector.len())?;
        let mut code = Vec::with_capacity(self.code_size());
        if vector.is_empty() {
            code.extend_from_slice(&0f32.to_le_bytes());
            code.extend_from_slice(&0f32.to_le_bytes());
            return Ok(code);
        }

        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for &v in vector {
            min = min.min(v);
            max = max.max(v);
        }

        let range = max - min;
        if !range.is_finite() || range < f32::EPSILON {
            // Constant vector (or non-finite range): every component decodes to `min`.
            code.extend_from_slice(&min.to_le_bytes());
            code.extend_from_slice(&0f32.to_le_bytes());
            code.resize(self.code_size(), 128);
            return Ok(code);
        }

        let scale = range / 255.0;
        let inv_scale = 255.0 / range;
        code.extend_from_slice(&min.to_le_bytes());
        code.extend_from_slice(&scale.to_le_bytes());
        code.extend(
            vector
                .iter()
                .map(|&v| ((v - min) * inv_scale).round().clamp(0.0, 255.0) as u8),
        );
        Ok(code)
    }

    fn decode(&self, code: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimension);
        self.decode_into(code, &mut out);
        out
    }

    fn approx_distance(&self, code: &[u8], query: &[f32]) -> f64 {
        let mut eval = self.query_distance(query);
        eval(code)
    }

    fn query_distance<'a>(&'a self, query: &'a [f32]) -> Box<dyn FnMut(&[u8]) -> f64 + 'a> {
        match self.metric {
            DistanceMetric::L2 => Box::new(move |code: &[u8]| {
                let (min, scale) = Self::calibration(code);
                let mut sum = 0.0f32;
                for (&q, &c) in query.iter().zip(&code[HEADER..]) {
                    let d = q - (min + c as f32 * scale);
                    sum += d * d;
                }
                (sum as f64).sqrt()
            }),
            DistanceMetric::L1 => Box::new(move |code: &[u8]| {
                let (min, scale) = Self::calibration(code);
                query
                    .iter()
                    .zip(&code[HEADER..])
                    .map(|(&q, &c)| (q - (min + c as f32 * scale)).abs())
                    .sum::<f32>() as f64
            }),
            metric => {
                let mut scratch = Vec::with_capacity(self.dimension);
                Box::new(move |code: &[u8]| {
                    self.decode_into(code, &mut scratch);
                    metric.distance(query, &scratch)
                })
            }
        }
    }
}
