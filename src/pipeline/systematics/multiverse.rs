//! Many-replica (multiverse) reweighting ensembles
//!
//! Each event carries a list of replica weights. Universe `u` is filled with
//! the nominal weight times `replica[u] / mean(replica)`, and the covariance
//! is the spread of the universe histograms about the nominal histogram.

use std::sync::Mutex;

use faer::Mat;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pipeline::config::MultiverseConfig;
use crate::pipeline::frame::SampleFrame;
use crate::pipeline::histogram::BinnedHistogram;
use crate::pipeline::result::VariableResult;
use crate::pipeline::variable::HistogramModel;

use super::{book_variation, require_columns, VariationFutures};

#[derive(Debug, Clone, PartialEq)]
pub struct Multiverse {
    name: String,
    column: String,
    universes: usize,
    retain_universes: bool,
}

impl Multiverse {
    pub fn new(name: impl Into<String>, column: impl Into<String>, universes: usize) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            universes,
            retain_universes: false,
        }
    }

    /// Keep the universe histograms for diagnostic export
    pub fn retaining_universes(mut self, retain: bool) -> Self {
        self.retain_universes = retain;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn universes(&self) -> usize {
        self.universes
    }

    pub fn universe_key(&self, universe: usize) -> String {
        format!("{}_{}", self.name, universe)
    }

    pub fn universe_keys(&self) -> Vec<String> {
        (0..self.universes).map(|u| self.universe_key(u)).collect()
    }

    pub fn book_variations(&self, sample: &SampleFrame, model: &HistogramModel, futures: &Mutex<VariationFutures>) {
        if !sample.is_monte_carlo() {
            return;
        }
        if !require_columns(sample, &self.name, &[&self.column]) {
            return;
        }
        for u in 0..self.universes {
            let weight = model.weight_spec().times_replica(self.column.as_str(), u);
            book_variation(futures, self.universe_key(u), sample, model, weight);
        }
        debug!(
            multiverse = %self.name,
            sample = sample.id(),
            universes = self.universes,
            "booked universes"
        );
    }

    /// Universes are compared with the nominal over the same sample set: a
    /// simulated sample without replica fills enters every universe through
    /// its nominal histogram.
    pub fn compute_covariance(&self, result: &VariableResult, futures: &VariationFutures) -> Result<Mat<f64>> {
        let nominal = result.nominal.counts();
        let universes: Vec<Vec<f64>> = match futures.matched_totals(&self.universe_keys(), result)? {
            Some(totals) => totals.iter().map(|h| h.counts().to_vec()).collect(),
            None => {
                warn!(multiverse = %self.name, "no universes booked, contributing zero covariance");
                Vec::new()
            }
        };
        universe_covariance(nominal, &universes)
    }

    pub fn varied_histograms(
        &self,
        result: &VariableResult,
        futures: &VariationFutures,
    ) -> Result<Vec<(String, BinnedHistogram)>> {
        if !self.retain_universes {
            return Ok(Vec::new());
        }
        let keys = self.universe_keys();
        let Some(totals) = futures.matched_totals(&keys, result)? else {
            return Ok(Vec::new());
        };
        Ok(keys.into_iter().zip(totals).collect())
    }
}

impl From<&MultiverseConfig> for Multiverse {
    fn from(config: &MultiverseConfig) -> Self {
        Multiverse::new(config.name.as_str(), config.column.as_str(), config.universes)
            .retaining_universes(config.retain_universes)
    }
}

/// Covariance of universe histograms about `nominal`, divided by the number
/// of universes.
///
/// Zero universes give a zero matrix.
pub fn universe_covariance(nominal: &[f64], universes: &[Vec<f64>]) -> Result<Mat<f64>> {
    let n_bins = nominal.len();
    let n_universes = universes.len();
    if n_universes == 0 {
        return Ok(Mat::zeros(n_bins, n_bins));
    }
    if let Some(bad) = universes.iter().find(|u| u.len() != n_bins) {
        return Err(Error::ShapeMismatch {
            expected: n_bins,
            found: bad.len(),
        });
    }

    // Rows pre-scaled by 1/sqrt(N) so D^T D is already normalised
    let norm = 1.0 / (n_universes as f64).sqrt();
    let mut deltas = Mat::<f64>::zeros(n_universes, n_bins);
    for (row, universe) in universes.iter().enumerate() {
        for (bin, (&value, &central)) in universe.iter().zip(nominal.iter()).enumerate() {
            deltas[(row, bin)] = (value - central) * norm;
        }
    }

    let covariance = deltas.transpose() * &deltas;
    Ok(covariance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_covariance_divides_by_count() {
        let nominal = [10.0, 20.0];
        let universes = vec![vec![11.0, 22.0], vec![9.0, 18.0]];
        let cov = universe_covariance(&nominal, &universes).unwrap();
        // Deltas (1, 2) and (-1, -2): sum of outer products / 2
        assert!((cov[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((cov[(0, 1)] - 2.0).abs() < 1e-12);
        assert!((cov[(1, 0)] - 2.0).abs() < 1e-12);
        assert!((cov[(1, 1)] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_universes_is_zero() {
        let cov = universe_covariance(&[1.0, 2.0, 3.0], &[]).unwrap();
        assert_eq!(cov.nrows(), 3);
        assert!((0..3).all(|i| (0..3).all(|j| cov[(i, j)] == 0.0)));
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(universe_covariance(&[1.0, 2.0], &[vec![1.0]]).is_err());
    }

    #[test]
    fn test_universe_keys() {
        let mv = Multiverse::new("flux", "flux_w", 3);
        assert_eq!(mv.universe_key(2), "flux_2");
        assert_eq!(mv.universes(), 3);
    }
}
