//! CLI module - argument parsing

mod args;

pub use args::{BinArgs, Cli, Commands, CovarianceArgs, SampleArg, ScaleArg};
