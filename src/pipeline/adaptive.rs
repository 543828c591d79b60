//! Adaptive bin edge selection under a minimum effective-count constraint
//!
//! The orchestrator scans the binned column across every sample node into a
//! weighted summary, places edges with the configured strategy inside the
//! declared domain of the original binning, then merges bins until each one
//! holds at least the requested effective number of entries.

use tracing::{debug, info, warn};

use crate::error::Result;

use super::bayesian_blocks::bayesian_blocks;
use super::binning::{find_bin, next_representable_above, BinningDefinition, BinningStrategy};
use super::config::BinningConfig;
use super::frame::SampleFrame;
use super::summary::{effective_count, SummaryCache, WeightedPoint};

/// Relative tolerance when comparing cumulative weights and effective counts
const RELATIVE_TOLERANCE: f64 = 1e-9;

/// Edges chosen for a variable plus the statistics behind them
#[derive(Debug, Clone)]
pub struct BinningOutcome {
    pub binning: BinningDefinition,
    /// Effective entries per bin (zero for out-of-range bins)
    pub effective_counts: Vec<f64>,
    /// Effective entries across the declared domain
    pub total_effective_count: f64,
    /// Summed weight below / above the declared domain
    pub below_domain_weight: f64,
    pub above_domain_weight: f64,
}

/// Compute data-driven edges for `original_binning`'s expression.
///
/// # Arguments
/// * `nodes` - Sample nodes scanned for the column; the first decides its type
/// * `original_binning` - Declared domain, expression, label and stratum key
/// * `weight_column` - Per-event weight column
/// * `config` - Strategy, effective-count threshold and related knobs
/// * `cache` - Weighted summaries shared across calls in the same run
///
/// # Returns
/// A binning whose first and last in-domain edges equal the declared domain.
pub fn calculate(
    nodes: &[SampleFrame],
    original_binning: &BinningDefinition,
    weight_column: &str,
    config: &BinningConfig,
    cache: &SummaryCache,
) -> Result<BinningDefinition> {
    Ok(calculate_with_stats(nodes, original_binning, weight_column, config, cache)?.binning)
}

/// [`calculate`] returning the per-bin statistics as well
pub fn calculate_with_stats(
    nodes: &[SampleFrame],
    original_binning: &BinningDefinition,
    weight_column: &str,
    config: &BinningConfig,
    cache: &SummaryCache,
) -> Result<BinningOutcome> {
    let column = original_binning.expression();
    let Some(first) = nodes.first() else {
        warn!(column, "no sample nodes to bin, keeping a single bin over the domain");
        return single_bin_outcome(original_binning);
    };

    let kind = first.column_kind(column)?;
    let summary = cache.get_or_build(nodes, column, weight_column, &kind, config.quantization_resolution)?;
    let domain = original_binning.domain();

    let split = split_domain(summary.points(), domain);
    if split.below > 0.0 || split.above > 0.0 {
        debug!(
            column,
            below = split.below,
            above = split.above,
            "weight outside the declared domain excluded from edge placement"
        );
    }

    let edges = compute_edges(&split.inside, domain, config)?;
    let binning = original_binning.with_edges(edges)?;
    let effective_counts = bin_effective_counts(binning.edges(), &split.inside);
    info!(
        column,
        strategy = %config.strategy,
        bins = binning.n_bins(),
        "adaptive binning complete"
    );

    Ok(BinningOutcome {
        binning,
        effective_counts,
        total_effective_count: total_effective_count(&split.inside),
        below_domain_weight: split.below,
        above_domain_weight: split.above,
    })
}

fn single_bin_outcome(original: &BinningDefinition) -> Result<BinningOutcome> {
    let (lo, hi) = original.domain();
    Ok(BinningOutcome {
        binning: original.with_edges(vec![lo, hi])?,
        effective_counts: vec![0.0],
        total_effective_count: 0.0,
        below_domain_weight: 0.0,
        above_domain_weight: 0.0,
    })
}

struct DomainSplit {
    inside: Vec<WeightedPoint>,
    below: f64,
    above: f64,
}

fn split_domain(points: &[WeightedPoint], (lo, hi): (f64, f64)) -> DomainSplit {
    let mut split = DomainSplit {
        inside: Vec::with_capacity(points.len()),
        below: 0.0,
        above: 0.0,
    };
    for p in points {
        if p.value < lo {
            split.below += p.sum_w;
        } else if p.value >= hi {
            split.above += p.sum_w;
        } else {
            split.inside.push(*p);
        }
    }
    split
}

fn total_effective_count(points: &[WeightedPoint]) -> f64 {
    let (w, w2) = points
        .iter()
        .fold((0.0, 0.0), |(w, w2), p| (w + p.sum_w, w2 + p.sum_w2));
    effective_count(w, w2)
}

/// Place edges over sorted in-domain points.
///
/// Falls back to the single bin `[lo, hi]` for fewer than two points or a
/// non-positive total weight.
pub fn compute_edges(points: &[WeightedPoint], (lo, hi): (f64, f64), config: &BinningConfig) -> Result<Vec<f64>> {
    let total_weight: f64 = points.iter().map(|p| p.sum_w).sum();
    if points.len() < 2 || !(total_weight > 0.0) {
        warn!(
            points = points.len(),
            total_weight, "too little data for adaptive binning, using a single bin"
        );
        return Ok(vec![lo, hi]);
    }

    let target = target_bins(total_effective_count(points), config.min_effective_count, points.len());
    let interior = match config.strategy {
        BinningStrategy::EqualWeight => equal_weight_cuts(points, target),
        BinningStrategy::UniformWidth => uniform_cuts(lo, hi, target),
        BinningStrategy::BayesianBlocks => {
            if points.len() > config.max_unique_points {
                warn!(
                    unique = points.len(),
                    cap = config.max_unique_points,
                    "too many unique values for Bayesian blocks, using equal-weight bins"
                );
                equal_weight_cuts(points, target)
            } else {
                block_cuts(points, config.false_positive_rate)?
            }
        }
    };

    // Domain bounds are forced; cuts outside the open domain are discarded
    let mut edges = Vec::with_capacity(interior.len() + 2);
    edges.push(lo);
    edges.extend(interior.into_iter().filter(|&c| c > lo && c < hi));
    edges.push(hi);
    edges = enforce_monotonic(edges);

    let mut edges = merge_deficient_bins(edges, points, config.min_effective_count);

    if config.include_out_of_range_bins && edges.len() >= 2 {
        let n = edges.len();
        let first_width = edges[1] - edges[0];
        let last_width = edges[n - 1] - edges[n - 2];
        edges.insert(0, lo - 0.5 * first_width);
        edges.push(hi + 0.5 * last_width);
    }

    let edges = enforce_monotonic(edges);
    if edges.len() < 2 {
        return Ok(vec![lo, hi]);
    }
    Ok(edges)
}

/// `floor(neff / min)`, at least one bin and at most one per point
fn target_bins(neff: f64, min_effective_count: f64, n_points: usize) -> usize {
    if !(min_effective_count > 0.0) {
        return n_points;
    }
    let bins = (neff / min_effective_count.max(f64::MIN_POSITIVE)).floor();
    (bins as usize).clamp(1, n_points.max(1))
}

/// Interior cuts splitting the cumulative weight into `target` equal parts.
///
/// A threshold crossed at point `i` puts the cut on point `i + 1`, so the
/// crossing point stays in the lower bin.
fn equal_weight_cuts(points: &[WeightedPoint], target: usize) -> Vec<f64> {
    let total: f64 = points.iter().map(|p| p.sum_w).sum();
    let tolerance = RELATIVE_TOLERANCE * total;
    let mut cuts = Vec::with_capacity(target.saturating_sub(1));
    let mut next = 1;
    let mut cumulative = 0.0;

    for (i, p) in points.iter().enumerate() {
        cumulative += p.sum_w;
        while next < target && cumulative >= total * next as f64 / target as f64 - tolerance {
            if let Some(above) = points.get(i + 1) {
                if cuts.last() != Some(&above.value) {
                    cuts.push(above.value);
                }
            }
            next += 1;
        }
        if next >= target {
            break;
        }
    }
    cuts
}

fn uniform_cuts(lo: f64, hi: f64, target: usize) -> Vec<f64> {
    let width = (hi - lo) / target as f64;
    (1..target).map(|k| lo + k as f64 * width).collect()
}

fn block_cuts(points: &[WeightedPoint], false_positive_rate: f64) -> Result<Vec<f64>> {
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    let weights: Vec<f64> = points.iter().map(|p| p.sum_w).collect();
    let edges = bayesian_blocks(&values, &weights, false_positive_rate)?;
    // Outer block edges sit on the extreme values; the domain replaces them
    let n = edges.len();
    Ok(if n > 2 { edges[1..n - 1].to_vec() } else { Vec::new() })
}

/// Effective entries of each bin from the points it contains
pub fn bin_effective_counts(edges: &[f64], points: &[WeightedPoint]) -> Vec<f64> {
    let n_bins = edges.len().saturating_sub(1);
    let mut sums = vec![(0.0, 0.0); n_bins];
    for p in points {
        if let Some(bin) = find_bin(edges, p.value) {
            sums[bin].0 += p.sum_w;
            sums[bin].1 += p.sum_w2;
        }
    }
    sums.into_iter().map(|(w, w2)| effective_count(w, w2)).collect()
}

/// Merge bins below `min_effective_count` into a neighbour until none remain.
///
/// Scans left to right for the first deficient bin. An edge bin merges
/// inward; an interior bin merges with whichever neighbour has the smaller
/// effective count (the left one on ties). Greedy, not globally optimal, and
/// a no-op on its own output.
pub fn merge_deficient_bins(mut edges: Vec<f64>, points: &[WeightedPoint], min_effective_count: f64) -> Vec<f64> {
    let threshold = min_effective_count * (1.0 - RELATIVE_TOLERANCE);
    loop {
        let n_bins = edges.len().saturating_sub(1);
        if n_bins <= 1 {
            return edges;
        }
        let counts = bin_effective_counts(&edges, points);
        let Some(deficient) = counts.iter().position(|&c| c < threshold) else {
            return edges;
        };

        let drop_edge = if deficient == 0 {
            1
        } else if deficient == n_bins - 1 {
            deficient
        } else if counts[deficient - 1] <= counts[deficient + 1] {
            deficient
        } else {
            deficient + 1
        };
        debug!(
            bin = deficient,
            effective_count = counts[deficient],
            edge = edges[drop_edge],
            "merging deficient bin"
        );
        edges.remove(drop_edge);
    }
}

/// Drop exact duplicates and non-finite edges, then nudge any edge that does
/// not exceed its predecessor to the next representable value above it.
fn enforce_monotonic(mut edges: Vec<f64>) -> Vec<f64> {
    edges.retain(|e| e.is_finite());
    edges.dedup();
    for i in 1..edges.len() {
        if edges[i] <= edges[i - 1] {
            edges[i] = next_representable_above(edges[i - 1]);
        }
    }
    edges
}
