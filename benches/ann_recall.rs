//! ANN Benchmark: synthetic clustered data, L2
//! Measures build rate, Recall@10 and QPS against brute-force ground truth,
//! across exploration coefficients and storage modes.
//!
//! Usage: cargo bench --bench ann_recall
//! Set RUST_LOG=navgraph=debug for build and training logs.

use navgraph::quantization::QuantizerKind;
use navgraph::tuning::{recall, tune_exploration_coefficient};
use navgraph::{DistanceMetric, Index, IndexConfig, PrecisionMode, SearchRequest};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const NUM_VECTORS: usize = 20_000;
const NUM_QUERIES: usize = 500;
const DIMENSION: usize = 32;
const NUM_CLUSTERS: usize = 64;
const K: usize = 10;

/// Gaussian-ish blobs around random centers.
fn clustered(n: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers: Vec<Vec<f32>> = (0..NUM_CLUSTERS)
        .map(|_| (0..DIMENSION).map(|_| rng.gen_range(-10.0f32..10.0)).collect())
        .collect();
    (0..n)
        .map(|_| {
            let c = &centers[rng.gen_range(0..NUM_CLUSTERS)];
            c.iter()
                .map(|&x| {
                    let noise: f32 = (0..4).map(|_| rng.gen_range(-1.0f32..1.0)).sum();
                    x + noise
                })
                .collect()
        })
        .collect()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                "navgraph=warn"
                    .parse()
                    .unwrap_or_else(|e| panic!("bad directive: {e}")),
            ),
        )
        .init();

    println!("=== ANN Benchmark: synthetic clustered L2 ({DIMENSION}d) ===");
    println!();

    let train = clustered(NUM_VECTORS, 1);
    let queries = clustered(NUM_QUERIES, 2);

    for precision in [PrecisionMode::Full, PrecisionMode::Half] {
        println!("--- Index Construction ({precision:?}) ---");
        let mut index = Index::with_config(IndexConfig {
            max_edges: 16,
            precision,
            metric: DistanceMetric::L2,
            insertion_exploration_coefficient: 4.0,
            ..IndexConfig::new(DIMENSION)
        })
        .unwrap_or_else(|e| panic!("config rejected: {e}"));

        let t0 = Instant::now();
        for (i, v) in train.iter().enumerate() {
            index.insert(v).unwrap_or_else(|e| panic!("insert failed: {e}"));
            if (i + 1) % 5_000 == 0 {
                let rate = (i + 1) as f64 / t0.elapsed().as_secs_f64();
                println!("  inserted {}/{NUM_VECTORS} ({rate:.0} vec/s)", i + 1);
            }
        }
        let build = t0.elapsed();
        println!(
            "  Build time: {:.2}s ({:.0} inserts/s), {} edges, {:.1} MiB",
            build.as_secs_f64(),
            NUM_VECTORS as f64 / build.as_secs_f64(),
            index.graph().edge_count(),
            index.memory_bytes() as f64 / (1024.0 * 1024.0)
        );

        let truth: Vec<_> = queries
            .iter()
            .map(|q| index.linear_search(q, K))
            .collect::<Result<_, _>>()
            .unwrap_or_else(|e| panic!("linear search failed: {e}"));

        println!();
        println!("  coefficient | Recall@10 |    QPS    | dist/query");
        println!("  ------------+-----------+-----------+-----------");
        for coefficient in [1.0, 1.5, 2.0, 4.0, 8.0, 16.0] {
            let t0 = Instant::now();
            let mut total_recall = 0.0;
            let mut distances = 0u64;
            for (q, exact) in queries.iter().zip(&truth) {
                let res = index
                    .search_with(SearchRequest::new(q, K).exploration_coefficient(coefficient))
                    .unwrap_or_else(|e| panic!("search failed: {e}"));
                distances += res.stats.distance_computations;
                total_recall += recall(&res, exact);
            }
            let elapsed = t0.elapsed().as_secs_f64();
            println!(
                "  {:>11.1} | {:.4}    | {:>9.1} | {:>9.0}",
                coefficient,
                total_recall / NUM_QUERIES as f64,
                NUM_QUERIES as f64 / elapsed,
                distances as f64 / NUM_QUERIES as f64
            );
        }

        let report =
            tune_exploration_coefficient(&index, &queries[..100], K, 0.95, &[1.0, 2.0, 4.0, 8.0, 16.0])
                .unwrap_or_else(|e| panic!("tuning failed: {e}"));
        println!(
            "  tuned coefficient for recall 0.95: {} (recall {:.4}, reached: {})",
            report.coefficient, report.recall, report.reached_target
        );

        if precision == PrecisionMode::Full {
            println!();
            println!("--- Product quantization (8 subspaces, no rerank) ---");
            let t0 = Instant::now();
            index
                .train_quantizer(QuantizerKind::Product { subspaces: 8 })
                .unwrap_or_else(|e| panic!("training failed: {e}"));
            println!("  Training: {:.2}s", t0.elapsed().as_secs_f64());
            let t0 = Instant::now();
            let mut total_recall = 0.0;
            for (q, exact) in queries.iter().zip(&truth) {
                let res = index
                    .search_with(SearchRequest::new(q, K).exploration_coefficient(2.0))
                    .unwrap_or_else(|e| panic!("search failed: {e}"));
                total_recall += recall(&res, exact);
            }
            println!(
                "  Recall@10 {:.4}, {:.1} QPS",
                total_recall / NUM_QUERIES as f64,
                NUM_QUERIES as f64 / t0.elapsed().as_secs_f64()
            );
        }
        println!();
    }

    println!("=== Benchmark complete ===");
}
