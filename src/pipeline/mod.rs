//! Pipeline module - adaptive binning, deferred histograms and systematics

pub mod adaptive;
pub mod bayesian_blocks;
pub mod binning;
pub mod config;
pub mod deferred;
pub mod frame;
pub mod histogram;
pub mod loader;
pub mod result;
pub mod summary;
pub mod systematics;
pub mod variable;

pub use adaptive::{calculate, calculate_with_stats, BinningOutcome};
pub use bayesian_blocks::bayesian_blocks;
pub use binning::{BinningDefinition, BinningStrategy};
pub use config::{BinningConfig, SystematicsConfig};
pub use deferred::{materialize_all, DeferredHistogram, WeightSpec};
pub use frame::{SampleFrame, SampleOrigin};
pub use histogram::BinnedHistogram;
pub use loader::*;
pub use result::VariableResult;
pub use summary::SummaryCache;
pub use systematics::{SystematicStrategy, SystematicsProcessor, VariationFutures};
pub use variable::{process_variable, HistogramModel, StratumSpec};
