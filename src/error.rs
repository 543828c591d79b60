//! Error types for histsys
//!
//! Only conditions with no safe local recovery surface as errors: malformed
//! configuration, unsupported column types and engine failures. Data-quality
//! problems (non-finite values, missing systematic columns, empty bins) are
//! logged and recovered where they occur.

use polars::prelude::PolarsError;
use thiserror::Error;

/// histsys error type
#[derive(Error, Debug)]
pub enum Error {
    /// Bin edges that cannot define a histogram axis
    #[error("Invalid binning: {0}")]
    InvalidBinning(String),

    /// Unknown binning strategy or systematic kind
    #[error("Unknown strategy: '{0}'")]
    UnknownStrategy(String),

    /// Rejected input to a numerical routine
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Column whose element type has no histogram fill
    #[error("Column '{column}' has unsupported type {dtype}")]
    UnsupportedColumnType { column: String, dtype: String },

    /// Column required for a nominal fill is absent
    #[error("Column '{column}' not found in sample '{sample}'")]
    MissingColumn { column: String, sample: String },

    /// Histograms or matrices with incompatible bin counts
    #[error("Shape mismatch: expected {expected} bins, found {found}")]
    ShapeMismatch { expected: usize, found: usize },

    /// Failure inside the lazy engine while materialising a handle
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
