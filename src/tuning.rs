//! Recall measurement and exploration-coefficient calibration.
//!
//! Ground truth comes from [`Index::linear_search`]. The tuner walks a list
//! of candidate coefficients in ascending order and stops at the first one
//! whose mean recall reaches the target.

use crate::error::{Error, Result};
use crate::graph::search::{SearchRequest, SearchResult};
use crate::index::Index;
use std::collections::HashSet;
use tracing::info;

/// Fraction of `exact`'s neighbors that `approx` also returned.
///
/// An empty `exact` result counts as perfect recall.
pub fn recall(approx: &SearchResult, exact: &SearchResult) -> f64 {
    if exact.is_empty() {
        return 1.0;
    }
    let found: HashSet<_> = approx.iter().map(|n| n.id).collect();
    let hits = exact.iter().filter(|n| found.contains(&n.id)).count();
    hits as f64 / exact.len() as f64
}

/// Mean recall@k of `index` over `queries` at `coefficient`.
pub fn mean_recall(index: &Index, queries: &[Vec<f32>], k: usize, coefficient: f64) -> Result<f64> {
    if queries.is_empty() {
        return Ok(1.0);
    }
    let mut total = 0.0;
    for query in queries {
        let exact = index.linear_search(query, k)?;
        let approx =
            index.search_with(SearchRequest::new(query, k).exploration_coefficient(coefficient))?;
        total += recall(&approx, &exact);
    }
    Ok(total / queries.len() as f64)
}

/// Recall measured for one candidate coefficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoefficientRecall {
    pub coefficient: f64,
    pub recall: f64,
}

/// Outcome of [`tune_exploration_coefficient`].
#[derive(Debug, Clone, PartialEq)]
pub struct TuningReport {
    /// Smallest candidate meeting the target, or the largest one tried.
    pub coefficient: f64,
    /// Mean recall at `coefficient`.
    pub recall: f64,
    pub reached_target: bool,
    /// Every candidate evaluated, in the order tried.
    pub evaluated: Vec<CoefficientRecall>,
}

/// Find the smallest coefficient in `candidates` whose mean recall@k over
/// `queries` reaches `target_recall`.
///
/// Candidates are sorted ascending before evaluation. If none reaches the
/// target the largest is reported with `reached_target = false`.
pub fn tune_exploration_coefficient(
    index: &Index,
    queries: &[Vec<f32>],
    k: usize,
    target_recall: f64,
    candidates: &[f64],
) -> Result<TuningReport> {
    if !(0.0..=1.0).contains(&target_recall) {
        return Err(Error::InvalidConfig(format!(
            "target recall must be in [0, 1], got {target_recall}"
        )));
    }
    let mut sorted = candidates.to_vec();
    if sorted.iter().any(|c| !c.is_finite() || *c < 1.0) {
        return Err(Error::InvalidConfig(
            "candidate coefficients must be finite and >= 1.0".to_string(),
        ));
    }
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    if sorted.is_empty() {
        return Err(Error::InvalidConfig("no candidate coefficients".to_string()));
    }

    let mut evaluated = Vec::with_capacity(sorted.len());
    for &coefficient in &sorted {
        let recall = mean_recall(index, queries, k, coefficient)?;
        evaluated.push(CoefficientRecall {
            coefficient,
            recall,
        });
        if recall >= target_recall {
            info!(
                "Exploration coefficient {} reaches recall {:.4} (target {})",
                coefficient, recall, target_recall
            );
            return Ok(TuningReport {
                coefficient,
                recall,
                reached_target: true,
                evaluated,
            });
        }
    }

    let best = evaluated[evaluated.len() - 1];
    tracing::warn!(
        "No candidate coefficient reached recall {}; best was {:.4} at {}",
        target_recall,
        best.recall,
        best.coefficient
    );
    Ok(TuningReport {
        coefficient: best.coefficient,
        recall: best.recall,
        reached_target: false,
        evaluated,
    })
}
