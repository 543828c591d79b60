//! histsys: adaptive binning and systematic covariance for weighted samples
//!
//! Builds histogram binnings from weighted event samples (equal-weight,
//! uniform-width or Bayesian-blocks edges with a minimum effective count per
//! bin), fills histograms lazily over those samples, and turns booked
//! variations into per-systematic covariance matrices.

pub mod cli;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod utils;

pub use error::{Error, Result};
