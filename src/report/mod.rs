//! Report module - terminal tables and JSON export

pub mod binning_table;
pub mod covariance_table;
pub mod export;

pub use binning_table::*;
pub use covariance_table::*;
pub use export::*;
