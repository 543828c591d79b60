//! Detector-variation systematics from alternate simulation samples
//!
//! Every variant is compared with the central-value detector sample, not with
//! the nominal prediction: the per-bin transfer ratio `variant / CV` is
//! projected onto the nominal histogram and the shift from nominal enters
//! the covariance as an outer product.

use std::sync::Mutex;

use faer::Mat;
use tracing::warn;

use crate::error::{Error, Result};
use crate::pipeline::config::DetectorConfig;
use crate::pipeline::frame::{SampleFrame, SampleOrigin};
use crate::pipeline::histogram::{outer_product, BinnedHistogram};
use crate::pipeline::result::VariableResult;
use crate::pipeline::variable::HistogramModel;

use super::{book_variation, VariationFutures};

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorVariation {
    name: String,
    central_variant: String,
}

impl DetectorVariation {
    pub fn new(name: impl Into<String>, central_variant: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            central_variant: central_variant.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variant_key(&self, variant: &str) -> String {
        format!("{}/{}", self.name, variant)
    }

    fn variant_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.name.as_str())?.strip_prefix('/')
    }

    /// Book the nominal-weight fill of a detector-variation sample.
    pub fn book_variations(&self, sample: &SampleFrame, model: &HistogramModel, futures: &Mutex<VariationFutures>) {
        if let SampleOrigin::DetectorVariation { variant } = sample.origin() {
            book_variation(futures, self.variant_key(variant), sample, model, model.weight_spec());
        }
    }

    /// Per-variant totals, central value included
    fn variant_totals(&self, futures: &VariationFutures) -> Result<Vec<(String, BinnedHistogram)>> {
        let mut totals = Vec::new();
        for key in futures.systematics() {
            if let Some(variant) = self.variant_from_key(key) {
                if let Some(h) = futures.total(key)? {
                    totals.push((variant.to_string(), h));
                }
            }
        }
        Ok(totals)
    }

    pub fn compute_covariance(&self, result: &VariableResult, futures: &VariationFutures) -> Result<Mat<f64>> {
        let nominal = result.nominal.counts();
        let n = nominal.len();
        let totals = self.variant_totals(futures)?;
        if totals.is_empty() {
            return Ok(Mat::zeros(n, n));
        }
        let Some((_, central)) = totals.iter().find(|(v, _)| *v == self.central_variant) else {
            warn!(
                detector = %self.name,
                central = %self.central_variant,
                "no central-value detector sample, contributing zero covariance"
            );
            return Ok(Mat::zeros(n, n));
        };

        let variants: Vec<Vec<f64>> = totals
            .iter()
            .filter(|(v, _)| *v != self.central_variant)
            .map(|(_, h)| h.counts().to_vec())
            .collect();
        detector_covariance(nominal, central.counts(), &variants)
    }

    /// Variants projected onto the nominal histogram
    pub fn varied_histograms(
        &self,
        result: &VariableResult,
        futures: &VariationFutures,
    ) -> Result<Vec<(String, BinnedHistogram)>> {
        let totals = self.variant_totals(futures)?;
        let Some((_, central)) = totals.iter().find(|(v, _)| *v == self.central_variant) else {
            return Ok(Vec::new());
        };
        let mut varied = Vec::new();
        for (variant, h) in totals.iter().filter(|(v, _)| *v != self.central_variant) {
            let projected = project(result.nominal.counts(), central.counts(), h.counts())?;
            let histogram = BinnedHistogram::new(
                result.binning.clone(),
                projected,
                Mat::zeros(result.binning.n_bins(), result.binning.n_bins()),
            )?;
            varied.push((self.variant_key(variant), histogram));
        }
        Ok(varied)
    }
}

impl From<&DetectorConfig> for DetectorVariation {
    fn from(config: &DetectorConfig) -> Self {
        DetectorVariation::new(config.name.as_str(), config.central_variant.as_str())
    }
}

/// `nominal * variant / central` per bin; bins with an empty central value
/// keep the nominal content.
fn project(nominal: &[f64], central: &[f64], variant: &[f64]) -> Result<Vec<f64>> {
    for found in [central.len(), variant.len()] {
        if found != nominal.len() {
            return Err(Error::ShapeMismatch {
                expected: nominal.len(),
                found,
            });
        }
    }
    Ok(nominal
        .iter()
        .zip(central.iter().zip(variant.iter()))
        .map(|(&n, (&cv, &v))| {
            let ratio = if cv > 0.0 { v / cv } else { 1.0 };
            ratio * n
        })
        .collect())
}

/// Sum over variants of `(projected - nominal)(projected - nominal)^T`
pub fn detector_covariance(nominal: &[f64], central: &[f64], variants: &[Vec<f64>]) -> Result<Mat<f64>> {
    let n = nominal.len();
    let mut covariance = Mat::<f64>::zeros(n, n);
    for variant in variants {
        let projected = project(nominal, central, variant)?;
        let shift: Vec<f64> = projected.iter().zip(nominal.iter()).map(|(p, n)| p - n).collect();
        covariance = &covariance + &outer_product(&shift, &shift);
    }
    Ok(covariance)
}
