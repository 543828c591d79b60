//! Command-line argument definitions using clap

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::pipeline::config::{DetectorConfig, KnobConfig, MultiverseConfig, NormalisationConfig};
use crate::pipeline::{BinningConfig, BinningStrategy, StratumSpec, SystematicsConfig};

/// histsys - Adaptive binning and systematic covariance for binned measurements
#[derive(Parser, Debug)]
#[command(name = "histsys")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides this.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Number of rows to use for CSV schema inference.
    /// Use 0 for full table scan (very slow for large files).
    #[arg(long, default_value = "10000", global = true)]
    pub infer_schema_length: usize,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute data-driven bin edges for one column
    Bin(BinArgs),

    /// Fill a variable and evaluate its systematic covariance matrices
    Covariance(CovarianceArgs),
}

/// A sample given as `ID=PATH`
#[derive(Debug, Clone, PartialEq)]
pub struct SampleArg {
    pub id: String,
    pub path: PathBuf,
}

/// A per-sample scale given as `ID=FACTOR`
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleArg {
    pub id: String,
    pub factor: f64,
}

#[derive(Args, Debug)]
pub struct BinArgs {
    /// Input files (CSV or Parquet); each is one sample node
    #[arg(short, long, required = true)]
    pub input: Vec<PathBuf>,

    /// Column (or list column) to bin
    #[arg(short, long)]
    pub column: String,

    /// Per-event weight column
    #[arg(short = 'w', long, default_value = "weight")]
    pub weight_column: String,

    /// Lower edge of the declared domain
    #[arg(long, allow_hyphen_values = true)]
    pub lo: f64,

    /// Upper edge of the declared domain
    #[arg(long, allow_hyphen_values = true)]
    pub hi: f64,

    /// Axis label stored with the binning (defaults to the column name)
    #[arg(long)]
    pub label: Option<String>,

    /// Edge placement strategy: "equal-weight" (default), "uniform" or "bayesian-blocks"
    #[arg(long, default_value = "equal-weight", value_parser = parse_strategy)]
    pub strategy: BinningStrategy,

    /// Minimum effective number of entries per bin
    #[arg(long, default_value = "25.0", value_parser = validate_min_effective_count)]
    pub min_effective_count: f64,

    /// Add half-width underflow and overflow bins outside the domain
    #[arg(long, default_value = "false")]
    pub out_of_range_bins: bool,

    /// Cells of the working histogram used to summarise the column
    #[arg(long, default_value = "10000")]
    pub resolution: usize,

    /// Keep every unique value instead of quantising
    #[arg(long, default_value = "false")]
    pub no_quantize: bool,

    /// False-positive rate of the Bayesian-blocks prior (0 to 1, exclusive)
    #[arg(long, default_value = "0.01", value_parser = validate_false_positive_rate)]
    pub false_positive_rate: f64,

    /// Unique values above which Bayesian blocks falls back to equal weight
    #[arg(long, default_value = "30000")]
    pub max_unique_points: usize,

    /// JSON file with binning settings; flags above are ignored when given
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stratification column recorded in the binning
    #[arg(long)]
    pub stratum_key: Option<String>,

    /// Write the binning as JSON to this path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl BinArgs {
    /// Binning settings assembled from the flags
    pub fn binning_config(&self) -> BinningConfig {
        BinningConfig {
            strategy: self.strategy,
            min_effective_count: self.min_effective_count,
            include_out_of_range_bins: self.out_of_range_bins,
            quantization_resolution: if self.no_quantize {
                None
            } else {
                Some(self.resolution)
            },
            false_positive_rate: self.false_positive_rate,
            max_unique_points: self.max_unique_points,
        }
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.column)
    }
}

#[derive(Args, Debug)]
pub struct CovarianceArgs {
    /// Binning JSON (a definition or the output of `histsys bin`)
    #[arg(short, long)]
    pub binning: PathBuf,

    /// Simulated sample as ID=PATH (repeatable)
    #[arg(long = "mc", value_parser = parse_sample, required = true)]
    pub mc: Vec<SampleArg>,

    /// Data sample as ID=PATH (repeatable)
    #[arg(long = "data", value_parser = parse_sample)]
    pub data: Vec<SampleArg>,

    /// Detector-variation sample as VARIANT=PATH (repeatable)
    #[arg(long = "detector", value_parser = parse_sample)]
    pub detector: Vec<SampleArg>,

    /// Exposure scale for a sample as ID=FACTOR (repeatable)
    #[arg(long = "scale", value_parser = parse_scale)]
    pub scale: Vec<ScaleArg>,

    /// Per-event weight column
    #[arg(short = 'w', long, default_value = "weight")]
    pub weight_column: String,

    /// Region name recorded in the result
    #[arg(long, default_value = "inclusive")]
    pub region: String,

    /// Systematics configuration JSON; replaces the flags below
    #[arg(long)]
    pub systematics: Option<PathBuf>,

    /// Weight knob as NAME:UP_COLUMN:DOWN_COLUMN (repeatable)
    #[arg(long = "knob")]
    pub knobs: Vec<String>,

    /// Multiverse as NAME:LIST_COLUMN:UNIVERSES (repeatable)
    #[arg(long = "multiverse")]
    pub multiverses: Vec<String>,

    /// Keep universe histograms in the exported result
    #[arg(long, default_value = "false")]
    pub retain_universes: bool,

    /// Variant name of the central-value detector sample
    #[arg(long, default_value = "CV")]
    pub central_variant: String,

    /// Flat fractional normalisation uncertainty
    #[arg(long, default_value = "0.03", value_parser = validate_fraction)]
    pub normalisation: f64,

    /// Stratum as VALUE=LABEL over the binning's stratum key (repeatable)
    #[arg(long = "stratum", value_parser = parse_stratum)]
    pub strata: Vec<StratumSpec>,

    /// Write the variable result as JSON to this path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl CovarianceArgs {
    /// Scale for a sample id, 1.0 when none was given
    pub fn scale_for(&self, id: &str) -> f64 {
        self.scale
            .iter()
            .rev()
            .find(|s| s.id == id)
            .map(|s| s.factor)
            .unwrap_or(1.0)
    }

    /// Systematics assembled from `--knob`, `--multiverse` and related flags
    pub fn systematics_from_flags(&self) -> Result<SystematicsConfig, String> {
        let knobs = self
            .knobs
            .iter()
            .map(|k| parse_knob(k))
            .collect::<Result<Vec<_>, _>>()?;
        let multiverses = self
            .multiverses
            .iter()
            .map(|m| parse_multiverse(m, self.retain_universes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SystematicsConfig {
            knobs,
            multiverses,
            detector: DetectorConfig {
                central_variant: self.central_variant.clone(),
                ..DetectorConfig::default()
            },
            normalisation: NormalisationConfig {
                fraction: self.normalisation,
                ..NormalisationConfig::default()
            },
        })
    }
}

fn parse_knob(s: &str) -> Result<KnobConfig, String> {
    match s.split(':').collect::<Vec<_>>().as_slice() {
        [name, up, down] if !name.is_empty() && !up.is_empty() && !down.is_empty() => Ok(KnobConfig {
            name: name.to_string(),
            up: up.to_string(),
            down: down.to_string(),
        }),
        _ => Err(format!("expected knob as NAME:UP_COLUMN:DOWN_COLUMN, got '{}'", s)),
    }
}

fn parse_multiverse(s: &str, retain_universes: bool) -> Result<MultiverseConfig, String> {
    match s.split(':').collect::<Vec<_>>().as_slice() {
        [name, column, universes] if !name.is_empty() && !column.is_empty() => {
            let universes: usize = universes
                .parse()
                .map_err(|_| format!("'{}' is not a valid universe count", universes))?;
            Ok(MultiverseConfig {
                name: name.to_string(),
                column: column.to_string(),
                universes,
                retain_universes,
            })
        }
        _ => Err(format!("expected multiverse as NAME:LIST_COLUMN:UNIVERSES, got '{}'", s)),
    }
}

fn split_pair<'a>(s: &'a str, what: &str) -> Result<(&'a str, &'a str), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => Ok((key, value)),
        _ => Err(format!("expected {} as KEY=VALUE, got '{}'", what, s)),
    }
}

fn parse_sample(s: &str) -> Result<SampleArg, String> {
    let (id, path) = split_pair(s, "sample")?;
    Ok(SampleArg {
        id: id.to_string(),
        path: PathBuf::from(path),
    })
}

fn parse_scale(s: &str) -> Result<ScaleArg, String> {
    let (id, factor) = split_pair(s, "scale")?;
    let factor: f64 = factor
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", factor))?;
    if !factor.is_finite() || factor < 0.0 {
        return Err(format!("scale must be finite and non-negative, got {}", factor));
    }
    Ok(ScaleArg {
        id: id.to_string(),
        factor,
    })
}

fn parse_stratum(s: &str) -> Result<StratumSpec, String> {
    let (value, label) = split_pair(s, "stratum")?;
    let value: i64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a valid integer", value))?;
    Ok(StratumSpec {
        value,
        label: label.to_string(),
    })
}

fn parse_strategy(s: &str) -> Result<BinningStrategy, String> {
    s.parse().map_err(|e: crate::error::Error| e.to_string())
}

/// Validator for min_effective_count parameter
fn validate_min_effective_count(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;

    if !value.is_finite() || value <= 0.0 {
        Err(format!("min_effective_count must be positive, got {}", value))
    } else {
        Ok(value)
    }
}

/// Validator for false_positive_rate parameter
fn validate_false_positive_rate(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;

    if !(value > 0.0 && value < 1.0) {
        Err(format!(
            "false_positive_rate must be between 0.0 and 1.0 (exclusive), got {}",
            value
        ))
    } else {
        Ok(value)
    }
}

/// Validator for normalisation fraction
fn validate_fraction(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;

    if !(0.0..=1.0).contains(&value) {
        Err(format!("normalisation must be between 0.0 and 1.0, got {}", value))
    } else {
        Ok(value)
    }
}
