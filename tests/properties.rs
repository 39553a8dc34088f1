use navgraph::config::HALF_PRECISION_RELATIVE_ERROR;
use navgraph::quantization::QuantizerKind;
use navgraph::tuning::{mean_recall, recall};
use navgraph::{
    DistanceMetric, DistanceOracle, Error, Index, IndexConfig, PrecisionMode, SearchRequest,
    VectorId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn random_vectors(n: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dimension).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect()
}

fn build(config: IndexConfig, vectors: &[Vec<f32>]) -> Index {
    let mut index = Index::with_config(config).unwrap();
    index.batch_insert(vectors).unwrap();
    index
}

#[test]
fn empty_index_search_returns_nothing() {
    let index = Index::new(4, 8, PrecisionMode::Full, DistanceMetric::L2).unwrap();
    let res = index.search(&[0.1, 0.2, 0.3, 0.4], 5).unwrap();
    assert!(res.is_empty());
    assert_eq!(res.stats.distance_computations, 0);
}

#[test]
fn three_points_nearest_is_origin() {
    let mut index = Index::new(2, 2, PrecisionMode::Full, DistanceMetric::L2).unwrap();
    let origin = index.insert(&[0.0, 0.0]).unwrap();
    index.insert(&[1.0, 0.0]).unwrap();
    index.insert(&[5.0, 5.0]).unwrap();
    let res = index.search(&[0.0, 0.0], 1).unwrap();
    assert_eq!(res.ids(), vec![origin]);
    assert_eq!(res.neighbors[0].distance, 0.0);
}

#[test]
fn degree_never_exceeds_max_edges() {
    let vectors = random_vectors(600, 6, 11);
    let mut index = Index::with_config(IndexConfig {
        max_edges: 5,
        ..IndexConfig::new(6)
    })
    .unwrap();
    for (i, v) in vectors.iter().enumerate() {
        index.insert(v).unwrap();
        if i % 50 == 0 {
            assert!(index.graph().max_degree() <= 5);
        }
    }
    assert!(index.graph().max_degree() <= 5);
    for node in index.graph().nodes() {
        let keys: Vec<_> = node.edges().iter().map(|e| e.order_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted, "edges must stay ordered by (distance, id)");
    }
}

#[test]
fn identical_inputs_give_identical_output() {
    let vectors = random_vectors(300, 8, 5);
    let config = IndexConfig {
        max_edges: 8,
        ..IndexConfig::new(8)
    };
    let a = build(config.clone(), &vectors);
    let b = build(config, &vectors);
    for query in random_vectors(20, 8, 99) {
        let first = a.search(&query, 10).unwrap();
        assert_eq!(first, a.search(&query, 10).unwrap());
        assert_eq!(first, b.search(&query, 10).unwrap());
    }
}

#[test]
fn distance_ties_are_ordered_by_id() {
    let mut index = Index::new(1, 4, PrecisionMode::Full, DistanceMetric::L2).unwrap();
    for x in [2.0f32, -2.0, 2.0, 0.5, -2.0] {
        index.insert(&[x]).unwrap();
    }
    let res = index
        .search_with(SearchRequest::new(&[0.0], 5).exploration_coefficient(4.0))
        .unwrap();
    let ids: Vec<u32> = res.ids().iter().map(|id| id.0).collect();
    assert_eq!(ids, vec![3, 0, 1, 2, 4]);
}

#[test]
fn every_vector_finds_itself_in_a_small_graph() {
    // n <= max_edges + 1: no edge is ever pruned, so the graph stays
    // strongly connected and a wide traversal reaches every node.
    let vectors = random_vectors(13, 5, 3);
    let mut index = Index::with_config(IndexConfig {
        max_edges: 12,
        ..IndexConfig::new(5)
    })
    .unwrap();
    for v in &vectors {
        let id = index.insert(v).unwrap();
        let res = index
            .search_with(SearchRequest::new(v, 1).exploration_coefficient(16.0))
            .unwrap();
        assert_eq!(res.ids(), vec![id]);
    }
}

#[test]
fn inserted_vectors_are_found_right_after_insert() {
    let vectors = random_vectors(800, 4, 21);
    let mut index = Index::with_config(IndexConfig {
        max_edges: 10,
        insertion_exploration_coefficient: 4.0,
        ..IndexConfig::new(4)
    })
    .unwrap();
    let mut found = 0;
    for v in &vectors {
        let id = index.insert(v).unwrap();
        let res = index
            .search_with(SearchRequest::new(v, 1).exploration_coefficient(4.0))
            .unwrap();
        if res.ids() == vec![id] {
            found += 1;
        }
    }
    let rate = found as f64 / vectors.len() as f64;
    assert!(rate >= 0.95, "self-find rate {rate}");
}

#[test]
fn inserted_vectors_are_found_at_the_default_coefficient() {
    // Default config, k = 1: the retained set holds only two nodes, so this
    // is close to a pure greedy walk. 80% is the floor for it.
    let vectors = random_vectors(1000, 4, 61);
    let mut index = Index::with_config(IndexConfig::new(4)).unwrap();
    let mut found = 0;
    for v in &vectors {
        let id = index.insert(v).unwrap();
        if index.search(v, 1).unwrap().ids() == vec![id] {
            found += 1;
        }
    }
    let rate = found as f64 / vectors.len() as f64;
    assert!(rate >= 0.8, "self-find rate at the default coefficient {rate}");
}

#[test]
fn recall_does_not_drop_as_coefficient_grows() {
    let vectors = random_vectors(1000, 8, 7);
    let index = build(
        IndexConfig {
            max_edges: 8,
            insertion_exploration_coefficient: 2.0,
            seed_size: 4,
            ..IndexConfig::new(8)
        },
        &vectors,
    );
    let queries = random_vectors(60, 8, 1234);
    let mut previous = 0.0;
    let mut recalls = Vec::new();
    for coefficient in [1.0, 2.0, 4.0, 8.0, 16.0] {
        let r = mean_recall(&index, &queries, 10, coefficient).unwrap();
        assert!(
            r + 0.02 >= previous,
            "recall fell from {previous} to {r} at coefficient {coefficient}"
        );
        previous = r;
        recalls.push(r);
    }
    assert!(recalls[4] >= recalls[0]);
    assert!(recalls[4] > 0.9, "recall at 16.0 was {}", recalls[4]);
}

#[test]
fn half_precision_error_is_bounded() {
    let mut index = Index::new(5, 4, PrecisionMode::Half, DistanceMetric::L2).unwrap();
    let v = [0.125f32, -7.77, 1000.5, 3.3e-3, 42.0];
    let id = index.insert(&v).unwrap();
    let back = index.get_vector(id).unwrap();
    for (orig, got) in v.iter().zip(&back) {
        let rel = ((orig - got) / orig).abs();
        assert!(rel < HALF_PRECISION_RELATIVE_ERROR, "{orig} -> {got}");
    }
    assert_eq!(index.search(&v, 1).unwrap().ids(), vec![id]);
}

#[test]
fn removed_vectors_never_come_back() {
    let vectors = random_vectors(400, 6, 17);
    let mut index = build(
        IndexConfig {
            max_edges: 6,
            ..IndexConfig::new(6)
        },
        &vectors,
    );
    let removed: HashSet<VectorId> = (0..400u32).step_by(3).map(VectorId).collect();
    for &id in &removed {
        index.remove(id).unwrap();
    }
    assert!(index.graph().dangling_edge_count() > 0);
    for query in vectors.iter().take(60) {
        let res = index
            .search_with(SearchRequest::new(query, 10).exploration_coefficient(3.0))
            .unwrap();
        assert!(!res.is_empty());
        assert!(res.iter().all(|n| !removed.contains(&n.id)));
    }
    let id = VectorId(3);
    assert!(matches!(index.remove(id), Err(Error::NotFound(_))));
    assert!(matches!(index.get_vector(id), Err(Error::NotFound(_))));
}

#[test]
fn repair_leaves_no_dangling_edges() {
    let vectors = random_vectors(300, 4, 23);
    let mut index = build(
        IndexConfig {
            max_edges: 6,
            ..IndexConfig::new(4)
        },
        &vectors,
    );
    for raw in (0..300u32).filter(|i| i % 4 == 1) {
        index.remove(VectorId(raw)).unwrap();
    }
    let report = index.repair().unwrap();
    assert!(report.purged_edges > 0);
    assert!(report.reconnected_nodes > 0);
    assert_eq!(index.graph().dangling_edge_count(), 0);
    assert!(index.graph().max_degree() <= 6);
    let queries = random_vectors(30, 4, 77);
    assert!(mean_recall(&index, &queries, 5, 4.0).unwrap() > 0.8);
}

#[test]
fn batch_with_a_bad_vector_inserts_nothing() {
    let mut index = Index::new(3, 4, PrecisionMode::Full, DistanceMetric::L2).unwrap();
    let batch = vec![vec![1.0, 2.0, 3.0], vec![1.0, 2.0], vec![0.0, 0.0, 0.0]];
    assert!(matches!(
        index.batch_insert(&batch),
        Err(Error::DimensionMismatch {
            expected: 3,
            actual: 2
        })
    ));
    assert_eq!(index.len(), 0);
    assert!(index.search(&[1.0, 2.0, 3.0], 1).unwrap().is_empty());
}

#[test]
fn quantized_search_with_rerank_finds_self() {
    let vectors = random_vectors(400, 8, 31);
    for kind in [QuantizerKind::Scalar, QuantizerKind::Product { subspaces: 4 }] {
        let mut index = build(
            IndexConfig {
                max_edges: 10,
                insertion_exploration_coefficient: 4.0,
                rerank: 40,
                ..IndexConfig::new(8)
            },
            &vectors,
        );
        index.train_quantizer(kind).unwrap();
        let mut found = 0;
        for (i, v) in vectors.iter().enumerate().take(50) {
            let res = index
                .search_with(SearchRequest::new(v, 1).exploration_coefficient(2.0))
                .unwrap();
            if res.ids() == vec![VectorId(i as u32)] {
                assert!(res.neighbors[0].distance < 1e-6);
                found += 1;
            }
        }
        assert!(found >= 45, "{kind:?}: found {found}/50");
    }
}

#[test]
fn hashed_visited_set_matches_dense() {
    let vectors = random_vectors(300, 6, 41);
    let dense = build(IndexConfig::new(6), &vectors);
    let hashed = build(
        IndexConfig {
            large_dataset: true,
            ..IndexConfig::new(6)
        },
        &vectors,
    );
    for query in random_vectors(20, 6, 43) {
        assert_eq!(
            dense.search(&query, 5).unwrap(),
            hashed.search(&query, 5).unwrap()
        );
    }
}

#[test]
fn cancelled_search_reports_it() {
    let vectors = random_vectors(200, 4, 51);
    let index = build(IndexConfig::new(4), &vectors);
    let flag = AtomicBool::new(true);
    let res = index
        .search_with(SearchRequest::new(&vectors[0], 5).cancel(&flag))
        .unwrap();
    assert!(res.stats.cancelled);
    assert_eq!(res.stats.expanded, 0);
    assert!(res.len() <= 5);

    let flag = AtomicBool::new(false);
    let res = index
        .search_with(SearchRequest::new(&vectors[0], 5).cancel(&flag))
        .unwrap();
    assert!(!res.stats.cancelled);
    let exact = index.linear_search(&vectors[0], 5).unwrap();
    assert!(recall(&res, &exact) > 0.0);
}

/// Distance along the first axis only.
#[derive(Debug)]
struct FirstAxis;

impl DistanceOracle for FirstAxis {
    fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        (a[0] - b[0]).abs() as f64
    }
}

#[test]
fn quantized_search_respects_a_custom_oracle() {
    let mut index = Index::create(IndexConfig::new(2), Arc::new(FirstAxis)).unwrap();
    for i in 0..60 {
        let y = if i % 2 == 0 { 0.0 } else { 100.0 };
        index.insert(&[i as f32, y]).unwrap();
    }
    let query = [31.0f32, 0.0];
    let request = SearchRequest::new(&query, 3).exploration_coefficient(4.0);
    let exact = index.search_with(request).unwrap();
    assert_eq!(exact.ids()[0], VectorId(31));

    index.train_quantizer(QuantizerKind::Scalar).unwrap();
    let res = index.search_with(request).unwrap();
    let mut ids: Vec<u32> = res.ids().iter().map(|id| id.0).collect();
    assert_eq!(ids[0], 31);
    ids.sort();
    assert_eq!(ids, vec![30, 31, 32]);
    for (n, want) in res.iter().zip(exact.iter()) {
        assert!((n.distance - want.distance).abs() < 1e-3, "{n:?} vs {want:?}");
    }
}

#[test]
fn radius_cuts_the_result_list() {
    let mut index = Index::new(1, 4, PrecisionMode::Full, DistanceMetric::L2).unwrap();
    for x in [0.5f32, 1.0, 2.0, 3.0, 4.0] {
        index.insert(&[x]).unwrap();
    }
    let res = index
        .search_with(SearchRequest::new(&[0.0], 5).radius(1.5))
        .unwrap();
    assert_eq!(res.ids(), vec![VectorId(0), VectorId(1)]);
    assert!(res.iter().all(|n| n.distance <= 1.5));

    let res = index
        .search_with(SearchRequest::new(&[0.0], 5).radius(0.4))
        .unwrap();
    assert!(res.is_empty());

    let unbounded = index.search_with(SearchRequest::new(&[0.0], 5)).unwrap();
    assert_eq!(unbounded.len(), 5);

    index.train_quantizer(QuantizerKind::Scalar).unwrap();
    let res = index
        .search_with(SearchRequest::new(&[0.0], 5).radius(1.5))
        .unwrap();
    assert_eq!(res.ids(), vec![VectorId(0), VectorId(1)]);

    assert!(matches!(
        index.search_with(SearchRequest::new(&[0.0], 5).radius(f64::NAN)),
        Err(Error::InvalidConfig(_))
    ));
}
