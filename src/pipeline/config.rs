//! Binning and systematics configuration
//!
//! Every struct deserialises from JSON with missing fields taking their
//! defaults, so a configuration file only needs to name what it changes.

use serde::{Deserialize, Serialize};

use super::bayesian_blocks::DEFAULT_FALSE_POSITIVE_RATE;
use super::binning::BinningStrategy;
use super::summary::DEFAULT_QUANTIZATION_RESOLUTION;

/// Unique-point count above which Bayesian blocks falls back to equal weight
pub const DEFAULT_MAX_UNIQUE_POINTS: usize = 30_000;

/// Default minimum effective entries per bin
pub const DEFAULT_MIN_EFFECTIVE_COUNT: f64 = 25.0;

/// Default flat normalisation uncertainty (3%)
pub const DEFAULT_NORMALISATION_FRACTION: f64 = 0.03;

/// Configuration for the adaptive binning orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    pub strategy: BinningStrategy,
    /// Bins below this effective count are merged into a neighbour
    pub min_effective_count: f64,
    /// Add half-width underflow/overflow bins outside the declared domain
    pub include_out_of_range_bins: bool,
    /// Cells of the working histogram; `None` keeps every unique value
    pub quantization_resolution: Option<usize>,
    /// Prior false-positive rate for Bayesian blocks
    pub false_positive_rate: f64,
    pub max_unique_points: usize,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            strategy: BinningStrategy::EqualWeight,
            min_effective_count: DEFAULT_MIN_EFFECTIVE_COUNT,
            include_out_of_range_bins: false,
            quantization_resolution: Some(DEFAULT_QUANTIZATION_RESOLUTION),
            false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
            max_unique_points: DEFAULT_MAX_UNIQUE_POINTS,
        }
    }
}

/// An up/down reweighting pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnobConfig {
    pub name: String,
    /// Column holding the per-event "up" weight factor
    pub up: String,
    /// Column holding the per-event "down" weight factor
    pub down: String,
}

/// A replica-weight ensemble stored as one list column per event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiverseConfig {
    pub name: String,
    pub column: String,
    pub universes: usize,
    /// Keep the per-universe histograms in the result for export
    #[serde(default)]
    pub retain_universes: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub name: String,
    /// Variant name of the central-value detector sample
    pub central_variant: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            name: "detector".to_string(),
            central_variant: "CV".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalisationConfig {
    pub name: String,
    pub fraction: f64,
}

impl Default for NormalisationConfig {
    fn default() -> Self {
        Self {
            name: "normalisation".to_string(),
            fraction: DEFAULT_NORMALISATION_FRACTION,
        }
    }
}

/// All systematic sources evaluated for a variable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystematicsConfig {
    pub knobs: Vec<KnobConfig>,
    pub multiverses: Vec<MultiverseConfig>,
    pub detector: DetectorConfig,
    pub normalisation: NormalisationConfig,
}
