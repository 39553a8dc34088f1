//! Distance oracles.
//!
//! The graph builder and the search engine only ever see a
//! [`DistanceOracle`]. [`DistanceMetric`] is the built-in family; it is
//! paired with a [`KernelTier`] to pick scalar or vectorized kernels.
//! All metrics return a dissimilarity where **lower is better**.

use crate::graph::simd;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Capability computing a dissimilarity between two equal-length vectors.
///
/// Implementations must be pure: the same inputs always produce the same
/// output. Non-finite results are allowed; traversal treats them as
/// unreachable and never returns them.
pub trait DistanceOracle: Send + Sync + fmt::Debug {
    fn distance(&self, a: &[f32], b: &[f32]) -> f64;

    /// Metric this oracle evaluates, when it is one of the built-ins.
    ///
    /// Used to pick quantizer lookup tables and input normalization.
    fn metric(&self) -> Option<DistanceMetric> {
        None
    }
}

/// Built-in metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Manhattan distance.
    L1,
    /// Euclidean distance (not squared).
    #[default]
    L2,
    /// Angle between the vectors in radians. Range: \[0, π\].
    Angle,
    /// `1 - cosine_similarity`. Range: \[0, 2\].
    Cosine,
    /// Angle, with vectors normalized to unit length on insertion and query.
    NormalizedAngle,
    /// Cosine distance, with vectors normalized on insertion and query.
    NormalizedCosine,
    /// Euclidean distance between unit-normalized vectors.
    NormalizedL2,
    /// Bit-level Hamming distance; components are read as `u8`.
    Hamming,
    /// Bit-level Jaccard distance; components are read as `u8`.
    Jaccard,
    /// Hyperbolic distance in the Poincaré ball model.
    Poincare,
    /// Hyperbolic distance in the Lorentz (hyperboloid) model.
    Lorentz,
}

impl DistanceMetric {
    /// Whether vectors are normalized to unit length before they are stored
    /// or searched.
    pub fn normalizes_input(self) -> bool {
        matches!(
            self,
            DistanceMetric::NormalizedAngle
                | DistanceMetric::NormalizedCosine
                | DistanceMetric::NormalizedL2
        )
    }

    /// Distance using the vectorized kernels where available.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        self.evaluate(a, b, &VECTORIZED)
    }

    /// Distance using plain scalar loops only.
    pub fn distance_scalar(self, a: &[f32], b: &[f32]) -> f64 {
        self.evaluate(a, b, &SCALAR)
    }

    fn evaluate(self, a: &[f32], b: &[f32], k: &Kernels) -> f64 {
        match self {
            DistanceMetric::L1 => (k.l1)(a, b) as f64,
            DistanceMetric::L2 => ((k.l2_sq)(a, b) as f64).sqrt(),
            DistanceMetric::Angle => {
                let (dot, na, nb) = (k.dot_and_norms)(a, b);
                cosine_similarity(dot, na, nb).acos()
            }
            DistanceMetric::Cosine => {
                let (dot, na, nb) = (k.dot_and_norms)(a, b);
                1.0 - cosine_similarity(dot, na, nb)
            }
            DistanceMetric::NormalizedAngle => {
                ((k.dot)(a, b) as f64).clamp(-1.0, 1.0).acos()
            }
            DistanceMetric::NormalizedCosine => 1.0 - ((k.dot)(a, b) as f64).clamp(-1.0, 1.0),
            DistanceMetric::NormalizedL2 => {
                let dot = ((k.dot)(a, b) as f64).clamp(-1.0, 1.0);
                (2.0 - 2.0 * dot).max(0.0).sqrt()
            }
            DistanceMetric::Hamming => hamming(a, b),
            DistanceMetric::Jaccard => jaccard(a, b),
            DistanceMetric::Poincare => {
                let diff = (k.l2_sq)(a, b) as f64;
                let (_, na, nb) = (k.dot_and_norms)(a, b);
                let denom = (1.0 - na as f64) * (1.0 - nb as f64);
                if denom <= 0.0 {
                    return f64::INFINITY;
                }
                (1.0 + 2.0 * diff / denom).acosh()
            }
            DistanceMetric::Lorentz => lorentz(a, b),
        }
    }
}

fn cosine_similarity(dot: f32, norm_a_sq: f32, norm_b_sq: f32) -> f64 {
    let denom = (norm_a_sq as f64).sqrt() * (norm_b_sq as f64).sqrt();
    if denom < 1e-20 {
        return 0.0;
    }
    (dot as f64 / denom).clamp(-1.0, 1.0)
}

#[inline]
fn as_bits(x: f32) -> u8 {
    x.clamp(0.0, 255.0) as u8
}

fn hamming(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (as_bits(x) ^ as_bits(y)).count_ones())
        .sum::<u32>() as f64
}

fn jaccard(a: &[f32], b: &[f32]) -> f64 {
    let (mut both, mut either) = (0u32, 0u32);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (as_bits(x), as_bits(y));
        both += (x & y).count_ones();
        either += (x | y).count_ones();
    }
    if either == 0 {
        return 0.0;
    }
    1.0 - both as f64 / either as f64
}

fn lorentz(a: &[f32], b: &[f32]) -> f64 {
    let Some((&a0, a_rest)) = a.split_first() else {
        return 0.0;
    };
    let Some((&b0, b_rest)) = b.split_first() else {
        return 0.0;
    };
    let spatial: f64 = a_rest
        .iter()
        .zip(b_rest)
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum();
    let inner = a0 as f64 * b0 as f64 - spatial;
    // Rounding can push identical points just below 1.
    inner.max(1.0).acosh()
}

/// Scales `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = simd::dot_f32(v, v).sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// `v` as it should be stored or searched under `metric`: a normalized
/// copy for the normalized metrics, the input itself otherwise.
pub fn prepare(metric: Option<DistanceMetric>, v: &[f32]) -> Cow<'_, [f32]> {
    match metric {
        Some(m) if m.normalizes_input() => {
            let mut owned = v.to_vec();
            normalize(&mut owned);
            Cow::Owned(owned)
        }
        _ => Cow::Borrowed(v),
    }
}

struct Kernels {
    l2_sq: fn(&[f32], &[f32]) -> f32,
    l1: fn(&[f32], &[f32]) -> f32,
    dot: fn(&[f32], &[f32]) -> f32,
    dot_and_norms: fn(&[f32], &[f32]) -> (f32, f32, f32),
}

const SCALAR: Kernels = Kernels {
    l2_sq: simd::scalar_l2_sq_f32,
    l1: simd::scalar_l1_f32,
    dot: simd::scalar_dot_f32,
    dot_and_norms: simd::scalar_dot_and_norms_f32,
};

const VECTORIZED: Kernels = Kernels {
    l2_sq: simd::l2_sq_f32,
    l1: simd::l1_f32,
    dot: simd::dot_f32,
    dot_and_norms: simd::dot_and_norms_f32,
};

/// Which kernel implementation a built-in oracle uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KernelTier {
    /// Portable scalar loops.
    Scalar,
    /// NEON or AVX2+FMA when the CPU supports it, scalar otherwise.
    #[default]
    Auto,
}

/// Built-in oracle: a metric evaluated with a fixed kernel tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricOracle {
    metric: DistanceMetric,
    tier: KernelTier,
}

impl MetricOracle {
    pub fn new(metric: DistanceMetric, tier: KernelTier) -> Self {
        Self { metric, tier }
    }

    pub fn tier(&self) -> KernelTier {
        self.tier
    }
}

impl DistanceOracle for MetricOracle {
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self.tier {
            KernelTier::Scalar => self.metric.distance_scalar(a, b),
            KernelTier::Auto => self.metric.distance(a, b),
        }
    }

    fn metric(&self) -> Option<DistanceMetric> {
        Some(self.metric)
    }
}

/// Shared oracle for a built-in metric.
pub fn oracle_for(metric: DistanceMetric, tier: KernelTier) -> Arc<dyn DistanceOracle> {
    Arc::new(MetricOracle::new(metric, tier))
}
