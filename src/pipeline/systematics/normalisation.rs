//! Flat fractional normalisation uncertainty

use faer::Mat;

use crate::pipeline::config::NormalisationConfig;
use crate::pipeline::histogram::outer_product;
use crate::pipeline::result::VariableResult;

/// A single fully correlated fractional uncertainty on every bin
#[derive(Debug, Clone, PartialEq)]
pub struct FlatNormalisation {
    name: String,
    fraction: f64,
}

impl FlatNormalisation {
    pub fn new(name: impl Into<String>, fraction: f64) -> Self {
        Self {
            name: name.into(),
            fraction,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// `(f * n_i) * (f * n_j)`
    pub fn compute_covariance(&self, result: &VariableResult) -> Mat<f64> {
        normalisation_covariance(result.nominal.counts(), self.fraction)
    }
}

impl From<&NormalisationConfig> for FlatNormalisation {
    fn from(config: &NormalisationConfig) -> Self {
        FlatNormalisation::new(config.name.as_str(), config.fraction)
    }
}

pub fn normalisation_covariance(nominal: &[f64], fraction: f64) -> Mat<f64> {
    let shifted: Vec<f64> = nominal.iter().map(|n| fraction * n).collect();
    outer_product(&shifted, &shifted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fully_correlated() {
        let cov = normalisation_covariance(&[10.0, 20.0], 0.03);
        let expected = [[0.09, 0.18], [0.18, 0.36]];
        for i in 0..2 {
            for j in 0..2 {
                assert!((cov[(i, j)] - expected[i][j]).abs() < 1e-12);
            }
        }
    }
}
