//! Bin edge definitions and binning strategy selection

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Strategy used by the adaptive binning orchestrator to place edges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BinningStrategy {
    /// Equal-weight quantile partition (default)
    #[default]
    EqualWeight,
    /// Equal-width bins over the declared domain
    UniformWidth,
    /// Changepoint segmentation (Bayesian blocks)
    BayesianBlocks,
}

impl std::fmt::Display for BinningStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinningStrategy::EqualWeight => write!(f, "equal-weight"),
            BinningStrategy::UniformWidth => write!(f, "uniform"),
            BinningStrategy::BayesianBlocks => write!(f, "bayesian-blocks"),
        }
    }
}

impl std::str::FromStr for BinningStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "equal-weight" | "equalweight" | "quantile" => Ok(BinningStrategy::EqualWeight),
            "uniform" | "uniform-width" | "uniformwidth" => Ok(BinningStrategy::UniformWidth),
            "bayesian-blocks" | "bayesianblocks" | "blocks" => Ok(BinningStrategy::BayesianBlocks),
            _ => Err(Error::UnknownStrategy(s.to_string())),
        }
    }
}

impl TryFrom<String> for BinningStrategy {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BinningStrategy> for String {
    fn from(value: BinningStrategy) -> Self {
        value.to_string()
    }
}

/// Bin edges for one histogram axis plus the metadata needed to fill it.
///
/// Edges are strictly increasing and there are at least two of them, so every
/// definition has at least one bin. Bins are half-open `[lo, hi)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBinning")]
pub struct BinningDefinition {
    edges: Vec<f64>,
    expression: String,
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stratum_key: Option<String>,
}

#[derive(Deserialize)]
struct RawBinning {
    edges: Vec<f64>,
    expression: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    stratum_key: Option<String>,
}

impl TryFrom<RawBinning> for BinningDefinition {
    type Error = Error;

    fn try_from(raw: RawBinning) -> Result<Self> {
        let binning = BinningDefinition::new(raw.edges, raw.expression, raw.label)?;
        Ok(match raw.stratum_key {
            Some(key) => binning.with_stratum_key(key),
            None => binning,
        })
    }
}

impl BinningDefinition {
    /// Build a definition, rejecting fewer than two edges, non-finite edges
    /// and edges that are not strictly increasing.
    pub fn new(
        edges: Vec<f64>,
        expression: impl Into<String>,
        label: impl Into<String>,
    ) -> Result<Self> {
        validate_edges(&edges)?;
        Ok(Self {
            edges,
            expression: expression.into(),
            label: label.into(),
            stratum_key: None,
        })
    }

    /// A single bin spanning `[lo, hi)`.
    pub fn single_bin(
        lo: f64,
        hi: f64,
        expression: impl Into<String>,
        label: impl Into<String>,
    ) -> Result<Self> {
        Self::new(vec![lo, hi], expression, label)
    }

    /// Same expression, label and stratification with different edges.
    pub fn with_edges(&self, edges: Vec<f64>) -> Result<Self> {
        validate_edges(&edges)?;
        Ok(Self {
            edges,
            expression: self.expression.clone(),
            label: self.label.clone(),
            stratum_key: self.stratum_key.clone(),
        })
    }

    pub fn with_stratum_key(mut self, key: impl Into<String>) -> Self {
        self.stratum_key = Some(key.into());
        self
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Column expression the histogram is filled from
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stratum_key(&self) -> Option<&str> {
        self.stratum_key.as_deref()
    }

    /// Declared domain `(first edge, last edge)`
    pub fn domain(&self) -> (f64, f64) {
        (self.edges[0], self.edges[self.edges.len() - 1])
    }

    /// Index of the bin containing `value`, or `None` outside `[lo, hi)`.
    pub fn find_bin(&self, value: f64) -> Option<usize> {
        find_bin(&self.edges, value)
    }

    /// Width of every bin
    pub fn widths(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

fn validate_edges(edges: &[f64]) -> Result<()> {
    if edges.len() < 2 {
        return Err(Error::InvalidBinning(format!(
            "at least 2 edges are required, got {}",
            edges.len()
        )));
    }
    if let Some(bad) = edges.iter().find(|e| !e.is_finite()) {
        return Err(Error::InvalidBinning(format!("non-finite edge {}", bad)));
    }
    if let Some(i) = edges.windows(2).position(|w| w[1] <= w[0]) {
        return Err(Error::InvalidBinning(format!(
            "edges must be strictly increasing: edge {} ({}) >= edge {} ({})",
            i,
            edges[i],
            i + 1,
            edges[i + 1]
        )));
    }
    Ok(())
}

/// Bin lookup on raw edges with half-open bins.
pub(crate) fn find_bin(edges: &[f64], value: f64) -> Option<usize> {
    let n = edges.len();
    if n < 2 || !(value >= edges[0] && value < edges[n - 1]) {
        return None;
    }
    // partition_point returns the first edge strictly above value
    Some(edges.partition_point(|&e| e <= value) - 1)
}

/// Smallest representable f64 strictly greater than `x` (finite input).
pub(crate) fn next_representable_above(x: f64) -> f64 {
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}
