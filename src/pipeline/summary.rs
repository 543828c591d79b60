//! Compact weighted summaries of a column across samples
//!
//! The adaptive binning works on a sorted list of unique values with their
//! accumulated weight and squared weight. For high-cardinality columns the
//! values are first quantised into a fixed number of cells between the
//! observed minimum and maximum; each cell is represented by the smallest
//! value that fell into it, so edges placed on representatives never split a
//! cell's events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::Result;

use super::frame::{flatten_observations, weight_values, ColumnKind, SampleFrame};

/// Default number of quantisation cells
pub const DEFAULT_QUANTIZATION_RESOLUTION: usize = 10_000;

const VALUE: &str = "__value";
const WEIGHT: &str = "__weight";

/// `(sum w)^2 / sum w^2`, guarded against a zero denominator
#[inline]
pub fn effective_count(sum_w: f64, sum_w2: f64) -> f64 {
    (sum_w * sum_w) / sum_w2.max(f64::MIN_POSITIVE)
}

/// A unique value (or quantisation cell) with its accumulated weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedPoint {
    pub value: f64,
    pub sum_w: f64,
    pub sum_w2: f64,
}

/// Why observations were left out of a summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DroppedObservations {
    pub non_finite: usize,
    pub non_positive_weight: usize,
    pub sentinel: usize,
}

impl DroppedObservations {
    pub fn total(&self) -> usize {
        self.non_finite + self.non_positive_weight + self.sentinel
    }
}

/// Sorted unique weighted values of one column
#[derive(Debug, Clone, Default)]
pub struct WeightedSummary {
    points: Vec<WeightedPoint>,
    dropped: DroppedObservations,
    quantized: bool,
}

impl WeightedSummary {
    /// Build a summary from raw `(value, weight)` observations.
    ///
    /// Observations with a non-finite value or weight, a non-positive weight,
    /// or a value equal to one of the `sentinels` are dropped.
    pub fn from_observations(
        observations: &[(f64, f64)],
        sentinels: (f64, f64),
        resolution: Option<usize>,
    ) -> Self {
        let mut dropped = DroppedObservations::default();
        let mut kept: Vec<(f64, f64)> = Vec::with_capacity(observations.len());
        for &(value, weight) in observations {
            if !value.is_finite() || !weight.is_finite() {
                dropped.non_finite += 1;
            } else if weight <= 0.0 {
                dropped.non_positive_weight += 1;
            } else if value == sentinels.0 || value == sentinels.1 {
                dropped.sentinel += 1;
            } else {
                kept.push((value, weight));
            }
        }

        if dropped.total() > 0 {
            warn!(
                non_finite = dropped.non_finite,
                non_positive_weight = dropped.non_positive_weight,
                sentinel = dropped.sentinel,
                "dropped observations from weighted summary"
            );
        }

        match resolution {
            Some(cells) if cells > 0 && kept.len() > 1 => Self {
                points: quantize(&kept, cells),
                dropped,
                quantized: true,
            },
            _ => Self {
                points: merge_duplicates(kept),
                dropped,
                quantized: false,
            },
        }
    }

    pub fn points(&self) -> &[WeightedPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dropped(&self) -> DroppedObservations {
        self.dropped
    }

    pub fn is_quantized(&self) -> bool {
        self.quantized
    }

    pub fn total_weight(&self) -> f64 {
        self.points.iter().map(|p| p.sum_w).sum()
    }

    pub fn effective_count(&self) -> f64 {
        let (w, w2) = self
            .points
            .iter()
            .fold((0.0, 0.0), |(w, w2), p| (w + p.sum_w, w2 + p.sum_w2));
        effective_count(w, w2)
    }
}

fn merge_duplicates(mut kept: Vec<(f64, f64)>) -> Vec<WeightedPoint> {
    kept.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut points: Vec<WeightedPoint> = Vec::new();
    for (value, weight) in kept {
        match points.last_mut() {
            Some(last) if last.value == value => {
                last.sum_w += weight;
                last.sum_w2 += weight * weight;
            }
            _ => points.push(WeightedPoint {
                value,
                sum_w: weight,
                sum_w2: weight * weight,
            }),
        }
    }
    points
}

fn quantize(kept: &[(f64, f64)], cells: usize) -> Vec<WeightedPoint> {
    let (min, max) = kept
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(v, _)| (lo.min(v), hi.max(v)));
    if !(max > min) {
        return merge_duplicates(kept.to_vec());
    }

    let span = max - min;
    let mut grid: Vec<Option<WeightedPoint>> = vec![None; cells];
    for &(value, weight) in kept {
        let cell = (((value - min) / span) * cells as f64).floor() as usize;
        let cell = cell.min(cells - 1);
        match &mut grid[cell] {
            Some(p) => {
                p.value = p.value.min(value);
                p.sum_w += weight;
                p.sum_w2 += weight * weight;
            }
            slot @ None => {
                *slot = Some(WeightedPoint {
                    value,
                    sum_w: weight,
                    sum_w2: weight * weight,
                })
            }
        }
    }
    grid.into_iter().flatten().collect()
}

/// Scan `column` with `weight` across all nodes into one summary.
///
/// Each node is collected on the rayon pool; weights include the node's
/// scale so samples with different exposures combine correctly.
pub fn build_summary(
    nodes: &[SampleFrame],
    column: &str,
    weight: &str,
    kind: &ColumnKind,
    resolution: Option<usize>,
) -> Result<WeightedSummary> {
    let per_node: Vec<Vec<(f64, f64)>> = nodes
        .par_iter()
        .map(|node| -> Result<Vec<(f64, f64)>> {
            let df = node
                .lazy()
                .select([
                    kind.cast_expr(column).alias(VALUE),
                    col(weight).cast(DataType::Float64).alias(WEIGHT),
                ])
                .collect()?;
            let scale = node.scale();
            let weights: Vec<f64> = weight_values(&df, WEIGHT)?
                .into_iter()
                .map(|w| w * scale)
                .collect();
            flatten_observations(&df, VALUE, kind, &weights)
        })
        .collect::<Result<_>>()?;

    let observations: Vec<(f64, f64)> = per_node.into_iter().flatten().collect();
    let summary = WeightedSummary::from_observations(&observations, kind.sentinels(), resolution);
    debug!(
        column,
        observations = observations.len(),
        points = summary.len(),
        quantized = summary.is_quantized(),
        "built weighted summary"
    );
    Ok(summary)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SummaryKey {
    column: String,
    weight: String,
    resolution: Option<usize>,
}

/// Weighted summaries reused across binning calls within one analysis run.
///
/// Entries are never invalidated implicitly: call [`SummaryCache::clear`]
/// when the underlying samples change.
#[derive(Debug, Default)]
pub struct SummaryCache {
    entries: Mutex<HashMap<SummaryKey, Arc<WeightedSummary>>>,
}

impl SummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached summary for `(column, weight, resolution)`, built on a miss.
    ///
    /// The lock is not held while scanning the nodes.
    pub fn get_or_build(
        &self,
        nodes: &[SampleFrame],
        column: &str,
        weight: &str,
        kind: &ColumnKind,
        resolution: Option<usize>,
    ) -> Result<Arc<WeightedSummary>> {
        let key = SummaryKey {
            column: column.to_string(),
            weight: weight.to_string(),
            resolution,
        };
        if let Some(hit) = self.lock().get(&key) {
            debug!(column, "weighted summary cache hit");
            return Ok(Arc::clone(hit));
        }

        let summary = Arc::new(build_summary(nodes, column, weight, kind, resolution)?);
        self.lock().insert(key, Arc::clone(&summary));
        Ok(summary)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SummaryKey, Arc<WeightedSummary>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
