//! Product quantization.
//!
//! Splits vectors into `m` subspaces and learns up to 256 centroids per
//! subspace with k-means++ and Lloyd iterations. Each vector becomes `m`
//! bytes (one centroid id per subspace). For L2 and L1 a per-query lookup
//! table turns distance evaluation into `m` table reads; other metrics are
//! evaluated on the reconstruction.

use super::Quantizer;
use crate::config;
use crate::error::{Error, Result};
use crate::graph::distance::DistanceMetric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Trained product quantizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dimension: usize,
    num_subspaces: usize,
    sub_dim: usize,
    /// Centroids per subspace (at most 256, fewer when trained on fewer vectors).
    num_centroids: usize,
    /// Flat centroids: `centroids[(m * K + k) * sub_dim .. + sub_dim]`.
    centroids: Vec<f32>,
    metric: DistanceMetric,
}

impl ProductQuantizer {
    /// Train on a contiguous arena of `vectors.len() / dimension` vectors.
    pub fn train(
        vectors: &[f32],
        dimension: usize,
        num_subspaces: usize,
        metric: DistanceMetric,
        seed: u64,
    ) -> Result<Self> {
        if num_subspaces == 0 || dimension == 0 || dimension % num_subspaces != 0 {
            return Err(Error::InvalidConfig(format!(
                "dimension {dimension} must be a non-zero multiple of num_subspaces {num_subspaces}"
            )));
        }
        if vectors.len() % dimension != 0 {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: vectors.len() % dimension,
            });
        }
        let n = vectors.len() / dimension;
        if n == 0 {
            return Err(Error::InvalidConfig(
                "need at least one vector to train a product quantizer".to_string(),
            ));
        }

        let sub_dim = dimension / num_subspaces;
        let k = config::PQ_NUM_CENTROIDS.min(n);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut centroids = Vec::with_capacity(num_subspaces * k * sub_dim);
        let mut sub_vectors = vec![0.0f32; n * sub_dim];

        for sub in 0..num_subspaces {
            for i in 0..n {
                let src = i * dimension + sub * sub_dim;
                sub_vectors[i * sub_dim..(i + 1) * sub_dim]
                    .copy_from_slice(&vectors[src..src + sub_dim]);
            }
            centroids.extend(kmeans(&sub_vectors, sub_dim, k, &mut rng));
        }

        Ok(Self {
            dimension,
            num_subspaces,
            sub_dim,
            num_centroids: k,
            centroids,
            metric,
        })
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn num_subspaces(&self) -> usize {
        self.num_subspaces
    }

    pub fn num_centroids(&self) -> usize {
        self.num_centroids
    }

    #[inline]
    fn centroid(&self, subspace: usize, index: usize) -> &[f32] {
        let start = (subspace * self.num_centroids + index) * self.sub_dim;
        &self.centroids[start..start + self.sub_dim]
    }

    #[inline]
    fn nearest_centroid(&self, subspace: usize, sub_vec: &[f32]) -> u8 {
        let mut best_idx = 0usize;
        let mut best_dist = f32::MAX;
        for ci in 0..self.num_centroids {
            let d = sq_dist(sub_vec, self.centroid(subspace, ci));
            if d < best_dist {
                best_dist = d;
                best_idx = ci;
            }
        }
        best_idx as u8
    }

    /// Per-query table of partial distances, `[m][K]`.
    fn distance_table(&self, query: &[f32], partial: fn(&[f32], &[f32]) -> f32) -> Vec<f32> {
        let k = self.num_centroids;
        let mut table = vec![0.0f32; self.num_subspaces * k];
        for sub in 0..self.num_subspaces {
            let q_sub = &query[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            for ci in 0..k {
                table[sub * k + ci] = partial(q_sub, self.centroid(sub, ci));
            }
        }
        table
    }
}

impl Quantizer for ProductQuantizer {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn code_size(&self) -> usize {
        self.num_subspaces
    }

    fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        Error::check_dimension(self.dimension, vector.len())?;
        Ok((0..self.num_subspaces)
            .map(|sub| {
                self.nearest_centroid(sub, &vector[sub * self.sub_dim..(sub + 1) * self.sub_dim])
            })
            .collect())
    }

    fn decode(&self, code: &[u8]) -> Vec<f32> {
        debug_assert_eq!(code.len(), self.num_subspaces);
        let mut out = Vec::with_capacity(self.dimension);
        for (sub, &c) in code.iter().enumerate() {
            let ci = (c as usize).min(self.num_centroids - 1);
            out.extend_from_slice(self.centroid(sub, ci));
        }
        out
    }

    fn approx_distance(&self, code: &[u8], query: &[f32]) -> f64 {
        let mut eval = self.query_distance(query);
        eval(code)
    }

    fn query_distance<'a>(&'a self, query: &'a [f32]) -> Box<dyn FnMut(&[u8]) -> f64 + 'a> {
        let k = self.num_centroids;
        match self.metric {
            DistanceMetric::L2 => {
                let table = self.distance_table(query, sq_dist);
                Box::new(move |code: &[u8]| (table_sum(&table, k, code) as f64).sqrt())
            }
            DistanceMetric::L1 => {
                let table = self.distance_table(query, abs_dist);
                Box::new(move |code: &[u8]| table_sum(&table, k, code) as f64)
            }
            metric => Box::new(move |code: &[u8]| metric.distance(query, &self.decode(code))),
        }
    }
}

#[inline]
fn table_sum(table: &[f32], k: usize, code: &[u8]) -> f32 {
    code.iter()
        .enumerate()
        .map(|(m, &c)| table[m * k + (c as usize).min(k - 1)])
        .sum()
}

#[inline]
fn sq_dist(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[inline]
fn abs_dist(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// K-means with k-means++ initialization. Returns `k * sub_dim` centroids.
fn kmeans(data: &[f32], sub_dim: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = data.len() / sub_dim;
    if n <= k {
        // Every point is its own centroid.
        return data[..k * sub_dim].to_vec();
    }

    let mut centroids = vec![0.0f32; k * sub_dim];
    let first = rng.gen_range(0..n);
    centroids[..sub_dim].copy_from_slice(&data[first * sub_dim..(first + 1) * sub_dim]);

    let mut min_dists = vec![f32::MAX; n];
    for ci in 1..k {
        let last = &centroids[(ci - 1) * sub_dim..ci * sub_dim];
        let mut total = 0.0f64;
        for i in 0..n {
            let d = sq_dist(&data[i * sub_dim..(i + 1) * sub_dim], last);
            if d < min_dists[i] {
                min_dists[i] = d;
            }
            total += min_dists[i] as f64;
        }

        let chosen = if total < 1e-30 {
            // All points coincide with existing centroids.
            rng.gen_range(0..n)
        } else {
            let threshold = rng.gen::<f64>() * total;
            let mut cumulative = 0.0f64;
            let mut chosen = n - 1;
            for (i, &d) in min_dists.iter().enumerate() {
                cumulative += d as f64;
                if cumulative >= threshold {
                    chosen = i;
                    break;
                }
            }
            chosen
        };
        centroids[ci * sub_dim..(ci + 1) * sub_dim]
            .copy_from_slice(&data[chosen * sub_dim..(chosen + 1) * sub_dim]);
    }

    let mut assignments = vec![0usize; n];
    let mut counts = vec![0u32; k];
    let mut sums = vec![0.0f32; k * sub_dim];
    for _ in 0..config::PQ_KMEANS_ITERATIONS {
        let mut changed = false;
        for i in 0..n {
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for ci in 0..k {
                let d = sq_dist(point, &centroids[ci * sub_dim..(ci + 1) * sub_dim]);
                if d < best_dist {
                    best_dist = d;
                    best = ci;
                }
            }
            changed |= assignments[i] != best;
            assignments[i] = best;
        }

        counts.fill(0);
        sums.fill(0.0);
        for i in 0..n {
            let ci = assignments[i];
            counts[ci] += 1;
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            for (s, p) in sums[ci * sub_dim..(ci + 1) * sub_dim].iter_mut().zip(point) {
                *s += p;
            }
        }
        // Empty clusters keep their previous centroid.
        for ci in 0..k {
            if counts[ci] > 0 {
                let inv = 1.0 / counts[ci] as f32;
                for d in 0..sub_dim {
                    centroids[ci * sub_dim + d] = sums[ci * sub_dim + d] * inv;
                }
            }
        }
        if !changed {
            break;
        }
    }

    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered_data(n: usize, dim: usize) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(11);
        let mut data = Vec::with_capacity(n * dim);
        for i in 0..n {
            let center = (i % 4) as f32 * 10.0;
            for _ in 0..dim {
                data.push(center + rng.gen_range(-0.5..0.5));
            }
        }
        data
    }

    #[test]
    fn test_train_rejects_bad_subspaces() {
        let data = clustered_data(10, 6);
        assert!(matches!(
            ProductQuantizer::train(&data, 6, 4, DistanceMetric::L2, 1),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            ProductQuantizer::train(&[], 6, 3, DistanceMetric::L2, 1),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_few_vectors_reconstruct_exactly() {
        let data = clustered_data(5, 4);
        let pq = ProductQuantizer::train(&data, 4, 2, DistanceMetric::L2, 1).unwrap();
        assert_eq!(pq.num_centroids(), 5);
        for v in data.chunks(4) {
            let code = pq.encode(v).unwrap();
            assert_eq!(code.len(), 2);
            assert_eq!(pq.decode(&code), v.to_vec());
        }
    }

    #[test]
    fn test_table_distance_matches_reconstruction() {
        let data = clustered_data(400, 8);
        for metric in [DistanceMetric::L2, DistanceMetric::L1] {
            let pq = ProductQuantizer::train(&data, 8, 4, metric, 3).unwrap();
            let query: Vec<f32> = (0..8).map(|i| i as f32 * 0.5).collect();
            let v = &data[16..24];
            let code = pq.encode(v).unwrap();
            let table = pq.approx_distance(&code, &query);
            let recon = metric.distance(&query, &pq.decode(&code));
            assert!((table - recon).abs() < 1e-3, "{metric:?}: {table} vs {recon}");
        }
    }

    #[test]
    fn test_reconstruction_error_is_small_on_clustered_data() {
        let data = clustered_data(400, 8);
        let pq = ProductQuantizer::train(&data, 8, 4, DistanceMetric::L2, 5).unwrap();
        for v in data.chunks(8).take(50) {
            let recon = pq.decode(&pq.encode(v).unwrap());
            let err = DistanceMetric::L2.distance(v, &recon);
            // Points sit within ±0.5 of their cluster center in every component.
            assert!(err < 1.5, "reconstruction error {err}");
        }
    }

    #[test]
    fn test_training_is_deterministic() {
        let data = clustered_data(300, 4);
        let a = ProductQuantizer::train(&data, 4, 2, DistanceMetric::L2, 9).unwrap();
        let b = ProductQuantizer::train(&data, 4, 2, DistanceMetric::L2, 9).unwrap();
        assert_eq!(a.centroids, b.centroids);
    }

    #[test]
    fn test_other_metrics_use_reconstruction() {
        let data = clustered_data(50, 4);
        let pq = ProductQuantizer::train(&data, 4, 2, DistanceMetric::Cosine, 2).unwrap();
        let v = &data[..4];
        let code = pq.encode(v).unwrap();
        let approx = pq.approx_distance(&code, v);
        assert!((0.0..0.01).contains(&approx), "got {approx}");
    }
}
