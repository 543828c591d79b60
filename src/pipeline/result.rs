//! Per-variable histograms and covariance matrices

use std::collections::BTreeMap;

use faer::Mat;
use serde::{Serialize, Serializer};

use super::binning::BinningDefinition;
use super::histogram::{matrix_rows, BinnedHistogram};

/// Everything computed for one (region, variable) pair
#[derive(Debug, Clone, Serialize)]
pub struct VariableResult {
    pub region: String,
    pub variable: String,
    pub binning: BinningDefinition,
    /// Total simulated prediction (sum of Monte-Carlo samples)
    pub nominal: BinnedHistogram,
    /// Observed data, when any data sample was supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<BinnedHistogram>,
    /// Per-sample simulated histograms
    pub samples: BTreeMap<String, BinnedHistogram>,
    /// Simulated prediction split by stratum label
    pub strata: BTreeMap<String, BinnedHistogram>,
    /// Scaled sum of weights per sample
    pub yields: BTreeMap<String, f64>,
    /// Covariance contribution per systematic
    #[serde(serialize_with = "serialize_matrix_map")]
    pub covariances: BTreeMap<String, Mat<f64>>,
    /// Nominal statistical covariance plus every systematic contribution
    #[serde(serialize_with = "serialize_matrix")]
    pub total_covariance: Mat<f64>,
    /// Nominal counts carrying the total covariance
    pub nominal_with_band: BinnedHistogram,
    /// Diagnostic variations (knob up/down, retained universes, detector variants)
    pub varied: BTreeMap<String, BinnedHistogram>,
}

impl VariableResult {
    /// A result with only the nominal histogram; the total covariance starts
    /// as its statistical covariance.
    pub fn new(region: impl Into<String>, variable: impl Into<String>, nominal: BinnedHistogram) -> Self {
        Self {
            region: region.into(),
            variable: variable.into(),
            binning: nominal.binning().clone(),
            total_covariance: nominal.covariance().clone(),
            nominal_with_band: nominal.clone(),
            nominal,
            data: None,
            samples: BTreeMap::new(),
            strata: BTreeMap::new(),
            yields: BTreeMap::new(),
            covariances: BTreeMap::new(),
            varied: BTreeMap::new(),
        }
    }

    pub fn systematic_names(&self) -> impl Iterator<Item = &str> {
        self.covariances.keys().map(String::as_str)
    }

    /// sqrt of one systematic's covariance diagonal over the nominal content
    pub fn fractional_uncertainties(&self, systematic: &str) -> Option<Vec<f64>> {
        self.covariances
            .get(systematic)
            .map(|cov| fractional_diagonal(cov, self.nominal.counts()))
    }

    pub fn total_fractional_uncertainties(&self) -> Vec<f64> {
        fractional_diagonal(&self.total_covariance, self.nominal.counts())
    }

    /// Per-bin error from the total covariance
    pub fn total_errors(&self) -> Vec<f64> {
        self.nominal_with_band.bin_errors()
    }
}

fn fractional_diagonal(covariance: &Mat<f64>, counts: &[f64]) -> Vec<f64> {
    counts
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let variance = if i < covariance.nrows() && i < covariance.ncols() {
                covariance[(i, i)].max(0.0)
            } else {
                0.0
            };
            if c != 0.0 {
                variance.sqrt() / c.abs()
            } else {
                0.0
            }
        })
        .collect()
}

fn serialize_matrix<S: Serializer>(matrix: &Mat<f64>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    matrix_rows(matrix).serialize(serializer)
}

fn serialize_matrix_map<S: Serializer>(
    matrices: &BTreeMap<String, Mat<f64>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let rows: BTreeMap<&str, Vec<Vec<f64>>> = matrices
        .iter()
        .map(|(name, m)| (name.as_str(), matrix_rows(m)))
        .collect();
    rows.serialize(serializer)
}
