//! Bayesian-blocks changepoint segmentation for weighted event data
//!
//! Optimal partitioning by dynamic programming over the N unique points:
//! for every right endpoint `k` the best block ending there is chosen among
//! all left endpoints `r <= k`, scoring each block with the Cash-like
//! fitness `N_k * ln(N_k / T_k)` plus a constant prior per extra block.
//! The run time is O(N^2), so callers merge duplicate values beforehand and
//! keep N bounded.

use crate::error::{Error, Result};

/// Default false-positive rate for the block prior
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Log prior added for every block, from the calibration in Scargle et al. (2013).
pub fn block_prior(n_points: usize, false_positive_rate: f64) -> f64 {
    (73.53 * false_positive_rate * (n_points as f64).powf(-0.478)).ln() - 4.0
}

/// Block fitness for `count` weighted entries spread over `width`.
#[inline]
fn fitness(count: f64, width: f64) -> f64 {
    count * (count / width).ln()
}

/// Compute Bayesian-blocks bin edges for weighted values.
///
/// # Arguments
/// * `values` - Observed values, sorted or not; must be unique
/// * `weights` - Positive weight of each value (duplicates merged by summing)
/// * `false_positive_rate` - Prior false-positive probability per changepoint
///
/// # Returns
/// Edges starting at the smallest value and ending at the largest, with
/// interior edges at midpoints between neighbouring values.
pub fn bayesian_blocks(values: &[f64], weights: &[f64], false_positive_rate: f64) -> Result<Vec<f64>> {
    if values.is_empty() {
        return Err(Error::InvalidInput("no values to segment".to_string()));
    }
    if values.len() != weights.len() {
        return Err(Error::InvalidInput(format!(
            "{} values but {} weights",
            values.len(),
            weights.len()
        )));
    }
    if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w <= 0.0) {
        return Err(Error::InvalidInput(format!(
            "weights must be finite and positive, found {}",
            w
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidInput("values must be finite".to_string()));
    }

    let mut points: Vec<(f64, f64)> = values.iter().copied().zip(weights.iter().copied()).collect();
    if !points.windows(2).all(|p| p[0].0 <= p[1].0) {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
    }
    if let Some(dup) = points.windows(2).find(|p| p[0].0 == p[1].0) {
        return Err(Error::InvalidInput(format!(
            "duplicate value {}; merge duplicates by accumulating their weight",
            dup[0].0
        )));
    }

    let n = points.len();
    if n == 1 {
        return Ok(vec![points[0].0, points[0].0]);
    }

    // Cell edges: first/last value at the ends, midpoints in between
    let mut edges = Vec::with_capacity(n + 1);
    edges.push(points[0].0);
    edges.extend(points.windows(2).map(|p| 0.5 * (p[0].0 + p[1].0)));
    edges.push(points[n - 1].0);

    let mut cumulative = Vec::with_capacity(n + 1);
    cumulative.push(0.0);
    let mut running = 0.0;
    for (_, w) in &points {
        running += w;
        cumulative.push(running);
    }

    let prior = block_prior(n, false_positive_rate);

    let mut best = vec![0.0f64; n];
    let mut last = vec![0usize; n];

    for k in 0..n {
        let mut best_score = f64::NEG_INFINITY;
        let mut best_left = 0;
        for r in 0..=k {
            let count = cumulative[k + 1] - cumulative[r];
            let width = edges[k + 1] - edges[r];
            let previous = if r > 0 { best[r - 1] } else { 0.0 };
            let score = fitness(count, width) + prior + previous;
            if score > best_score {
                best_score = score;
                best_left = r;
            }
        }
        best[k] = best_score;
        last[k] = best_left;
    }

    // Walk the optimal-left-endpoint chain back from the final point
    let mut change_points = Vec::new();
    let mut ind = n;
    loop {
        change_points.push(ind);
        if ind == 0 {
            break;
        }
        ind = last[ind - 1];
    }
    change_points.reverse();

    Ok(change_points.into_iter().map(|i| edges[i]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_equal_weight_points_single_block() {
        let edges = bayesian_blocks(&[0.0, 1.0], &[1.0, 1.0], 0.01).unwrap();
        assert_eq!(edges, vec![0.0, 1.0]);

        // Deterministic for fixed input
        let again = bayesian_blocks(&[1.0, 0.0], &[1.0, 1.0], 0.01).unwrap();
        assert_eq!(edges, again);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(bayesian_blocks(&[], &[], 0.01).is_err());
        assert!(bayesian_blocks(&[1.0, 2.0], &[1.0], 0.01).is_err());
        assert!(bayesian_blocks(&[1.0, 2.0], &[1.0, 0.0], 0.01).is_err());
        assert!(bayesian_blocks(&[1.0, 2.0], &[1.0, -1.0], 0.01).is_err());

        let dup = bayesian_blocks(&[1.0, 2.0, 1.0], &[1.0, 1.0, 1.0], 0.01);
        assert!(dup.unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_detects_density_change() {
        // Dense cluster in [0, 0.5), sparse tail in [10, 60)
        let mut values: Vec<f64> = (0..50).map(|i| i as f64 * 0.01).collect();
        values.extend((0..50).map(|i| 10.0 + i as f64));
        let weights = vec![1.0; values.len()];

        let edges = bayesian_blocks(&values, &weights, 0.01).unwrap();

        assert_eq!(edges[0], 0.0);
        assert_eq!(*edges.last().unwrap(), 59.0);
        assert!(edges.len() >= 3, "expected a changepoint, got {:?}", edges);
        assert!(
            edges.iter().any(|&e| e > 0.4 && e < 10.0),
            "expected an edge between the cluster and the tail: {:?}",
            edges
        );
        assert!(edges.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_prior_decreases_with_size() {
        assert!(block_prior(1000, 0.01) < block_prior(10, 0.01));
        assert!(block_prior(100, 0.05) > block_prior(100, 0.01));
    }
}
