//! Deferred histograms: booked fills that run only when materialised
//!
//! Booking a histogram records *what* to fill (lazy frame, value column,
//! weight recipe, binning) without touching the data. Pending histograms
//! with unit scale can be summed without running anything; the sum simply
//! concatenates their fill sources. [`materialize_all`] is the flush point
//! that evaluates a batch of handles on the rayon pool.

use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::Result;

use super::binning::{find_bin, BinningDefinition};
use super::frame::{flatten_observations, weight_values, ColumnKind};
use super::histogram::BinnedHistogram;

const VALUE: &str = "__value";
const WEIGHT: &str = "__weight";
const FACTOR: &str = "__factor";

/// Replica weight ratios beyond this magnitude are reported
pub const EXTREME_REPLICA_RATIO: f64 = 1000.0;

/// Extra per-event factor applied on top of the nominal weight
#[derive(Debug, Clone, PartialEq)]
pub enum WeightFactor {
    /// Nominal weight only
    None,
    /// Multiply by another scalar column (e.g. an up/down reweighting)
    Column(String),
    /// Multiply by `replicas[index] / mean(replicas)` of a list column
    Replica { column: String, index: usize },
}

/// How each event's fill weight is computed
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSpec {
    nominal: String,
    factor: WeightFactor,
}

impl WeightSpec {
    pub fn nominal(column: impl Into<String>) -> Self {
        Self {
            nominal: column.into(),
            factor: WeightFactor::None,
        }
    }

    pub fn times_column(mut self, column: impl Into<String>) -> Self {
        self.factor = WeightFactor::Column(column.into());
        self
    }

    pub fn times_replica(mut self, column: impl Into<String>, index: usize) -> Self {
        self.factor = WeightFactor::Replica {
            column: column.into(),
            index,
        };
        self
    }

    pub fn nominal_column(&self) -> &str {
        &self.nominal
    }

    pub fn factor(&self) -> &WeightFactor {
        &self.factor
    }
}

/// One booked fill over one lazy frame
#[derive(Clone)]
pub struct FillSource {
    sample: String,
    frame: LazyFrame,
    value: String,
    kind: ColumnKind,
    weight: WeightSpec,
}

impl FillSource {
    pub(crate) fn new(
        sample: impl Into<String>,
        frame: LazyFrame,
        value: impl Into<String>,
        kind: ColumnKind,
        weight: WeightSpec,
    ) -> Self {
        Self {
            sample: sample.into(),
            frame,
            value: value.into(),
            kind,
            weight,
        }
    }

    /// Run the fill, returning per-bin `(sum w, sum w^2)`.
    fn fill(&self, binning: &BinningDefinition) -> Result<(Vec<f64>, Vec<f64>)> {
        let mut exprs = vec![
            self.kind.cast_expr(&self.value).alias(VALUE),
            col(self.weight.nominal.as_str()).cast(DataType::Float64).alias(WEIGHT),
        ];
        match &self.weight.factor {
            WeightFactor::None => {}
            WeightFactor::Column(column) => {
                exprs.push(col(column.as_str()).cast(DataType::Float64).alias(FACTOR));
            }
            WeightFactor::Replica { column, .. } => {
                exprs.push(
                    col(column.as_str())
                        .cast(DataType::List(Box::new(DataType::Float64)))
                        .alias(FACTOR),
                );
            }
        }

        let df = self.frame.clone().select(exprs).collect()?;
        let mut weights = weight_values(&df, WEIGHT)?;

        match &self.weight.factor {
            WeightFactor::None => {}
            WeightFactor::Column(_) => {
                let factors = weight_values(&df, FACTOR)?;
                for (w, f) in weights.iter_mut().zip(factors) {
                    *w *= f;
                }
            }
            WeightFactor::Replica { column, index } => {
                let factors = self.replica_factors(&df, column, *index)?;
                for (w, f) in weights.iter_mut().zip(factors) {
                    *w *= f;
                }
            }
        }

        let observations = flatten_observations(&df, VALUE, &self.kind, &weights)?;

        let n = binning.n_bins();
        let mut sum_w = vec![0.0; n];
        let mut sum_w2 = vec![0.0; n];
        let mut skipped = 0usize;
        for (value, w) in observations {
            if !w.is_finite() {
                skipped += 1;
                continue;
            }
            if let Some(bin) = find_bin(binning.edges(), value) {
                sum_w[bin] += w;
                sum_w2[bin] += w * w;
            }
        }

        if skipped > 0 {
            debug!(
                sample = %self.sample,
                column = %self.value,
                skipped,
                "skipped entries with non-finite or null weight"
            );
        }

        Ok((sum_w, sum_w2))
    }

    /// Per-event `replicas[index] / mean(replicas)`.
    ///
    /// Events whose replica mean is zero (or that have no replicas) fall back
    /// to a factor of 1. Extreme ratios are kept but reported.
    fn replica_factors(&self, df: &DataFrame, column: &str, index: usize) -> Result<Vec<f64>> {
        let lists = df.column(FACTOR)?.list()?;
        let mut factors = Vec::with_capacity(lists.len());
        let mut zero_mean = 0usize;
        let mut missing = 0usize;
        let mut extreme = 0usize;

        for row in lists.into_iter() {
            let Some(replicas) = row else {
                missing += 1;
                factors.push(1.0);
                continue;
            };
            let ca = replicas.f64()?;
            let (sum, count) = ca
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            let mean = if count > 0 { sum / count as f64 } else { 0.0 };
            if mean == 0.0 || !mean.is_finite() {
                zero_mean += 1;
                factors.push(1.0);
                continue;
            }
            let replica = if index < ca.len() { ca.get(index) } else { None };
            match replica {
                Some(r) => {
                    let ratio = r / mean;
                    if ratio.abs() > EXTREME_REPLICA_RATIO {
                        extreme += 1;
                    }
                    factors.push(ratio);
                }
                None => {
                    missing += 1;
                    factors.push(1.0);
                }
            }
        }

        if zero_mean > 0 {
            warn!(
                sample = %self.sample,
                column,
                index,
                events = zero_mean,
                "replica weights average to zero, using weight 1"
            );
        }
        if missing > 0 {
            warn!(
                sample = %self.sample,
                column,
                index,
                events = missing,
                "replica weight missing, using weight 1"
            );
        }
        if extreme > 0 {
            warn!(
                sample = %self.sample,
                column,
                index,
                events = extreme,
                "replica weight ratio exceeds {}",
                EXTREME_REPLICA_RATIO
            );
        }

        Ok(factors)
    }
}

/// A pending histogram: one or more fill sources bound to a binning
#[derive(Clone)]
pub struct HistogramFuture {
    binning: BinningDefinition,
    sources: Vec<FillSource>,
}

impl HistogramFuture {
    pub fn new(binning: BinningDefinition, source: FillSource) -> Self {
        Self {
            binning,
            sources: vec![source],
        }
    }

    pub fn binning(&self) -> &BinningDefinition {
        &self.binning
    }

    /// Number of fills that run when this future is computed
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Handle-level sum; `None` when the binnings differ.
    pub fn combine(&self, other: &HistogramFuture) -> Option<HistogramFuture> {
        if self.binning != other.binning {
            return None;
        }
        let mut sources = self.sources.clone();
        sources.extend(other.sources.iter().cloned());
        Some(Self {
            binning: self.binning.clone(),
            sources,
        })
    }

    fn compute(&self) -> Result<BinnedHistogram> {
        let n = self.binning.n_bins();
        let mut sum_w = vec![0.0; n];
        let mut sum_w2 = vec![0.0; n];
        for source in &self.sources {
            let (w, w2) = source.fill(&self.binning)?;
            for i in 0..n {
                sum_w[i] += w[i];
                sum_w2[i] += w2[i];
            }
        }
        BinnedHistogram::from_fill(self.binning.clone(), sum_w, &sum_w2)
    }
}

/// Either a booked fill with a pending scale, or a materialised histogram
#[derive(Clone)]
pub enum DeferredHistogram {
    Pending { future: HistogramFuture, scale: f64 },
    Resolved(BinnedHistogram),
}

impl std::fmt::Debug for DeferredHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferredHistogram::Pending { future, scale } => f
                .debug_struct("Pending")
                .field("bins", &future.binning.n_bins())
                .field("sources", &future.sources.len())
                .field("scale", scale)
                .finish(),
            DeferredHistogram::Resolved(h) => f.debug_tuple("Resolved").field(h).finish(),
        }
    }
}

impl From<BinnedHistogram> for DeferredHistogram {
    fn from(histogram: BinnedHistogram) -> Self {
        DeferredHistogram::Resolved(histogram)
    }
}

impl DeferredHistogram {
    pub fn pending(future: HistogramFuture) -> Self {
        DeferredHistogram::Pending { future, scale: 1.0 }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, DeferredHistogram::Pending { .. })
    }

    pub fn binning(&self) -> &BinningDefinition {
        match self {
            DeferredHistogram::Pending { future, .. } => &future.binning,
            DeferredHistogram::Resolved(h) => h.binning(),
        }
    }

    /// Multiply by `factor`; pending handles only accumulate the factor.
    pub fn scaled(&self, factor: f64) -> DeferredHistogram {
        match self {
            DeferredHistogram::Pending { future, scale } => DeferredHistogram::Pending {
                future: future.clone(),
                scale: scale * factor,
            },
            DeferredHistogram::Resolved(h) => DeferredHistogram::Resolved(h.scaled(factor)),
        }
    }

    /// Sum of two histograms.
    ///
    /// Two pending unit-scale handles over the same binning stay pending;
    /// any other combination materialises both operands.
    pub fn add(&self, other: &DeferredHistogram) -> Result<DeferredHistogram> {
        if let (
            DeferredHistogram::Pending { future: a, scale: sa },
            DeferredHistogram::Pending { future: b, scale: sb },
        ) = (self, other)
        {
            if *sa == 1.0 && *sb == 1.0 {
                if let Some(future) = a.combine(b) {
                    return Ok(DeferredHistogram::pending(future));
                }
            }
        }
        Ok(DeferredHistogram::Resolved(self.resolve()?.add(&other.resolve()?)?))
    }

    /// Compute the histogram, applying the pending scale.
    pub fn resolve(&self) -> Result<BinnedHistogram> {
        match self {
            DeferredHistogram::Pending { future, scale } => {
                let histogram = future.compute()?;
                Ok(if *scale == 1.0 {
                    histogram
                } else {
                    histogram.scaled(*scale)
                })
            }
            DeferredHistogram::Resolved(h) => Ok(h.clone()),
        }
    }

    /// A resolved copy; resolving an already resolved value is a clone.
    pub fn materialize(&self) -> Result<DeferredHistogram> {
        Ok(DeferredHistogram::Resolved(self.resolve()?))
    }
}

/// Flush point: materialise every histogram in parallel.
///
/// Results keep the input order. Already-resolved entries are cloned.
pub fn materialize_all(histograms: &[DeferredHistogram]) -> Vec<Result<DeferredHistogram>> {
    let pending = histograms.iter().filter(|h| h.is_pending()).count();
    debug!(pending, total = histograms.len(), "flushing booked histograms");
    histograms.par_iter().map(|h| h.materialize()).collect()
}
