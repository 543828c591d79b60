//! Up/down reweighting knobs

use std::sync::Mutex;

use faer::Mat;
use tracing::warn;

use crate::error::Result;
use crate::pipeline::config::KnobConfig;
use crate::pipeline::frame::SampleFrame;
use crate::pipeline::histogram::BinnedHistogram;
use crate::pipeline::result::VariableResult;
use crate::pipeline::variable::HistogramModel;

use super::{book_variation, require_columns, VariationFutures};

/// A systematic described by two alternate per-event weight factors.
///
/// The covariance is diagonal: half the up/down spread per bin, squared.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightKnob {
    name: String,
    up_column: String,
    down_column: String,
}

impl WeightKnob {
    pub fn new(name: impl Into<String>, up_column: impl Into<String>, down_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up_column: up_column.into(),
            down_column: down_column.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn up_key(&self) -> String {
        format!("{}_up", self.name)
    }

    pub fn down_key(&self) -> String {
        format!("{}_down", self.name)
    }

    /// Book the up and down fills for a simulated sample.
    pub fn book_variations(&self, sample: &SampleFrame, model: &HistogramModel, futures: &Mutex<VariationFutures>) {
        if !sample.is_monte_carlo() {
            return;
        }
        if !require_columns(sample, &self.name, &[&self.up_column, &self.down_column]) {
            return;
        }
        let up = model.weight_spec().times_column(self.up_column.as_str());
        let down = model.weight_spec().times_column(self.down_column.as_str());
        book_variation(futures, self.up_key(), sample, model, up);
        book_variation(futures, self.down_key(), sample, model, down);
    }

    fn keys(&self) -> [String; 2] {
        [self.up_key(), self.down_key()]
    }

    /// Both totals run over the same samples; a sample with only one of its
    /// fills contributes its nominal histogram to each.
    pub fn compute_covariance(&self, result: &VariableResult, futures: &VariationFutures) -> Result<Mat<f64>> {
        let n = result.nominal.n_bins();
        let Some(totals) = futures.matched_totals(&self.keys(), result)? else {
            warn!(knob = %self.name, "no up/down histograms booked, contributing zero covariance");
            return Ok(Mat::zeros(n, n));
        };
        let [up, down] = totals.as_slice() else {
            return Err(crate::error::Error::ShapeMismatch {
                expected: 2,
                found: totals.len(),
            });
        };
        knob_covariance(up.counts(), down.counts(), n)
    }

    pub fn varied_histograms(
        &self,
        result: &VariableResult,
        futures: &VariationFutures,
    ) -> Result<Vec<(String, BinnedHistogram)>> {
        let keys = self.keys();
        let Some(totals) = futures.matched_totals(&keys, result)? else {
            return Ok(Vec::new());
        };
        Ok(keys.into_iter().zip(totals).collect())
    }
}

impl From<&KnobConfig> for WeightKnob {
    fn from(config: &KnobConfig) -> Self {
        WeightKnob::new(config.name.as_str(), config.up.as_str(), config.down.as_str())
    }
}

/// `diag((0.5 * (up - down))^2)`
pub fn knob_covariance(up: &[f64], down: &[f64], n_bins: usize) -> Result<Mat<f64>> {
    for found in [up.len(), down.len()] {
        if found != n_bins {
            return Err(crate::error::Error::ShapeMismatch {
                expected: n_bins,
                found,
            });
        }
    }
    Ok(Mat::from_fn(n_bins, n_bins, |i, j| {
        if i == j {
            let half_spread = 0.5 * (up[i] - down[i]);
            half_spread * half_spread
        } else {
            0.0
        }
    }))
}
