//! Booking and evaluation of one variable across all samples
//!
//! Samples are booked in parallel: simulated samples fill the prediction and
//! its strata, data samples the observed histogram, and every sample is
//! offered to the systematics processor. A single flush then materialises
//! all nominal handles before the systematics run.

use std::collections::BTreeMap;

use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;

use super::binning::BinningDefinition;
use super::deferred::{materialize_all, DeferredHistogram, WeightSpec};
use super::frame::{DeferredScalar, SampleFrame, SampleOrigin};
use super::histogram::BinnedHistogram;
use super::result::VariableResult;
use super::systematics::SystematicsProcessor;

/// One value of the stratification column and its display label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratumSpec {
    pub value: i64,
    pub label: String,
}

/// What to fill: binning, per-event weight column and strata
#[derive(Debug, Clone)]
pub struct HistogramModel {
    binning: BinningDefinition,
    weight_column: String,
    strata: Vec<StratumSpec>,
}

impl HistogramModel {
    pub fn new(binning: BinningDefinition, weight_column: impl Into<String>) -> Self {
        Self {
            binning,
            weight_column: weight_column.into(),
            strata: Vec::new(),
        }
    }

    pub fn with_strata(mut self, strata: Vec<StratumSpec>) -> Self {
        self.strata = strata;
        self
    }

    pub fn binning(&self) -> &BinningDefinition {
        &self.binning
    }

    pub fn weight_column(&self) -> &str {
        &self.weight_column
    }

    pub fn strata(&self) -> &[StratumSpec] {
        &self.strata
    }

    /// Nominal per-event weight
    pub fn weight_spec(&self) -> WeightSpec {
        WeightSpec::nominal(self.weight_column.as_str())
    }
}

enum Booking {
    Data {
        histogram: DeferredHistogram,
    },
    Simulation {
        sample: String,
        histogram: DeferredHistogram,
        strata: Vec<(String, DeferredHistogram)>,
        total_weight: DeferredScalar,
    },
    Variation,
}

fn book_sample(sample: &SampleFrame, model: &HistogramModel, systematics: &SystematicsProcessor) -> Result<Booking> {
    systematics.book_systematics(sample, model);

    match sample.origin() {
        SampleOrigin::Data => Ok(Booking::Data {
            histogram: sample.book_histogram(model.binning(), model.weight_spec())?,
        }),
        SampleOrigin::MonteCarlo => {
            let histogram = sample.book_histogram(model.binning(), model.weight_spec())?;
            let strata = book_strata(sample, model)?;
            Ok(Booking::Simulation {
                sample: sample.id().to_string(),
                histogram,
                strata,
                total_weight: sample.sum(model.weight_column()),
            })
        }
        SampleOrigin::DetectorVariation { .. } => Ok(Booking::Variation),
    }
}

fn book_strata(sample: &SampleFrame, model: &HistogramModel) -> Result<Vec<(String, DeferredHistogram)>> {
    if model.strata().is_empty() {
        return Ok(Vec::new());
    }
    let Some(key) = model.binning().stratum_key() else {
        warn!(
            variable = model.binning().expression(),
            "strata requested but the binning has no stratum key"
        );
        return Ok(Vec::new());
    };
    model
        .strata()
        .iter()
        .map(|stratum| -> Result<(String, DeferredHistogram)> {
            let subset = sample.filter(col(key).eq(lit(stratum.value)));
            Ok((stratum.label.clone(), subset.book_histogram(model.binning(), model.weight_spec())?))
        })
        .collect()
}

/// Book, flush and evaluate one variable.
///
/// # Arguments
/// * `region` - Name of the selection region, carried into the result
/// * `samples` - All samples; their origin decides what they fill
/// * `model` - Binning, weight column and strata
/// * `systematics` - Strategy set; its booked variations are consumed
///
/// # Returns
/// The filled result. Failures of nominal fills are errors; failed
/// variations only lose their contribution. On error the variations booked
/// for this variable are discarded.
pub fn process_variable(
    region: &str,
    samples: &[SampleFrame],
    model: &HistogramModel,
    systematics: &SystematicsProcessor,
) -> Result<VariableResult> {
    let outcome = evaluate_variable(region, samples, model, systematics);
    if outcome.is_err() {
        systematics.discard_booked();
    }
    outcome
}

fn evaluate_variable(
    region: &str,
    samples: &[SampleFrame],
    model: &HistogramModel,
    systematics: &SystematicsProcessor,
) -> Result<VariableResult> {
    let variable = model.binning().expression().to_string();
    let bookings: Vec<Booking> = samples
        .par_iter()
        .map(|sample| book_sample(sample, model, systematics))
        .collect::<Result<_>>()?;

    // Flatten every nominal handle into one batch for the flush
    let mut handles: Vec<DeferredHistogram> = Vec::new();
    for booking in &bookings {
        match booking {
            Booking::Data { histogram } => handles.push(histogram.clone()),
            Booking::Simulation { histogram, strata, .. } => {
                handles.push(histogram.clone());
                handles.extend(strata.iter().map(|(_, h)| h.clone()));
            }
            Booking::Variation => {}
        }
    }
    debug!(%variable, handles = handles.len(), variations = systematics.booked(), "booked variable");

    let mut resolved = materialize_all(&handles)
        .into_iter()
        .map(|h| h.and_then(|h| h.resolve()))
        .collect::<Result<Vec<BinnedHistogram>>>()?
        .into_iter();

    let mut data: Option<BinnedHistogram> = None;
    let mut per_sample: BTreeMap<String, BinnedHistogram> = BTreeMap::new();
    let mut strata: BTreeMap<String, BinnedHistogram> = BTreeMap::new();
    let mut yields: Vec<(String, DeferredScalar)> = Vec::new();

    for booking in bookings {
        match booking {
            Booking::Data { .. } => {
                if let Some(h) = resolved.next() {
                    data = Some(accumulate(data, h)?);
                }
            }
            Booking::Simulation {
                sample,
                strata: booked_strata,
                total_weight,
                ..
            } => {
                if let Some(h) = resolved.next() {
                    per_sample.insert(sample.clone(), h);
                }
                for (label, _) in booked_strata {
                    if let Some(h) = resolved.next() {
                        let merged = accumulate(strata.remove(&label), h)?;
                        strata.insert(label, merged);
                    }
                }
                yields.push((sample, total_weight));
            }
            Booking::Variation => {}
        }
    }

    let mut nominal: Option<BinnedHistogram> = None;
    for h in per_sample.values() {
        nominal = Some(accumulate(nominal, h.clone())?);
    }
    let nominal = match nominal {
        Some(h) => h,
        None => {
            warn!(%variable, "no simulated samples, nominal prediction is empty");
            BinnedHistogram::zeros(model.binning().clone())
        }
    };

    let yields = yields
        .par_iter()
        .map(|(sample, scalar)| -> Result<(String, f64)> { Ok((sample.clone(), scalar.value()?)) })
        .collect::<Result<BTreeMap<String, f64>>>()?;

    let mut result = VariableResult::new(region, variable.as_str(), nominal);
    result.data = data;
    result.samples = per_sample;
    result.strata = strata;
    result.yields = yields;

    systematics.process_systematics(&mut result)?;
    info!(
        region,
        %variable,
        bins = result.binning.n_bins(),
        total = result.nominal.sum(),
        "variable processed"
    );
    Ok(result)
}

fn accumulate(acc: Option<BinnedHistogram>, h: BinnedHistogram) -> Result<BinnedHistogram> {
    match acc {
        Some(acc) => acc.add(&h),
        None => Ok(h),
    }
}
