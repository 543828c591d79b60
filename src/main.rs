//! histsys: adaptive binning and systematic covariance CLI
//!
//! `histsys bin` derives bin edges for one column from weighted samples.
//! `histsys covariance` fills a variable over simulated, data and
//! detector-variation samples and evaluates its systematic covariances.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use histsys::cli::{BinArgs, Cli, Commands, CovarianceArgs, SampleArg};
use histsys::pipeline::{
    calculate_with_stats, load_sample, process_variable, sample_rows, BinningConfig, BinningDefinition,
    HistogramModel, SampleFrame, SampleOrigin, SummaryCache, SystematicsConfig,
    SystematicsProcessor,
};
use histsys::report::{display_binning, display_covariance, export_binning, export_variable_result, read_binning, ExportMetadata};
use histsys::utils::{
    create_progress_bar, create_spinner, describe_inputs, finish_with_success, finish_with_warning,
    format_bins, init_tracing, print_banner, print_completion, print_config, print_info,
    print_saved, print_step_header, print_success, print_warning,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    print_banner(env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Bin(args) => run_bin(args, cli.infer_schema_length),
        Commands::Covariance(args) => run_covariance(args, cli.infer_schema_length),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} file {}", what, path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid {} in {}", what, path.display()))
}

fn run_bin(args: &BinArgs, infer_schema_length: usize) -> Result<()> {
    let config: BinningConfig = match &args.config {
        Some(path) => read_json(path, "binning configuration")?,
        None => args.binning_config(),
    };
    let inputs: Vec<&Path> = args.input.iter().map(PathBuf::as_path).collect();

    print_config(
        "Binning",
        &[
            ("Inputs", describe_inputs(&inputs)),
            ("Column", args.column.clone()),
            ("Weight", args.weight_column.clone()),
            ("Domain", format!("[{}, {})", args.lo, args.hi)),
            ("Strategy", config.strategy.to_string()),
            ("Min N_eff", format!("{}", config.min_effective_count)),
        ],
    );

    print_step_header(1, "Load Samples");
    let nodes = args
        .input
        .iter()
        .enumerate()
        .map(|(i, path)| {
            load_sample(
                &format!("node{}", i),
                path,
                SampleOrigin::MonteCarlo,
                1.0,
                infer_schema_length,
            )
        })
        .collect::<Result<Vec<_>>>()?;
    print_success(&format!("{} sample node(s) ready", nodes.len()));

    print_step_header(2, "Compute Edges");
    let mut original = BinningDefinition::single_bin(args.lo, args.hi, &args.column, args.label())?;
    if let Some(key) = &args.stratum_key {
        original = original.with_stratum_key(key);
    }

    let step_start = Instant::now();
    let spinner = create_spinner(&format!("Binning {}...", args.column));
    let cache = SummaryCache::new();
    let outcome = calculate_with_stats(&nodes, &original, &args.weight_column, &config, &cache)?;
    let n_bins = outcome.binning.n_bins();
    if n_bins > 1 {
        finish_with_success(&spinner, &format_bins(n_bins));
    } else {
        finish_with_warning(&spinner, "Single bin over the domain");
    }
    debug!(elapsed = ?step_start.elapsed(), edges = ?outcome.binning.edges(), "binning finished");

    display_binning(&outcome, config.min_effective_count);

    if let Some(output) = &args.output {
        let metadata = ExportMetadata::new(&inputs, &args.weight_column, Some(config.strategy.to_string()));
        export_binning(&outcome, metadata, output)?;
        print_saved(output);
    }

    print_completion("Binning");
    Ok(())
}

fn run_covariance(args: &CovarianceArgs, infer_schema_length: usize) -> Result<()> {
    let binning = read_binning(&args.binning)?;
    let systematics: SystematicsConfig = match &args.systematics {
        Some(path) => read_json(path, "systematics configuration")?,
        None => args.systematics_from_flags().map_err(|e| anyhow!(e))?,
    };
    let processor = SystematicsProcessor::new(&systematics).context("Invalid systematics configuration")?;

    let all_samples: Vec<(&SampleArg, SampleOrigin)> = args
        .mc
        .iter()
        .map(|s| (s, SampleOrigin::MonteCarlo))
        .chain(args.data.iter().map(|s| (s, SampleOrigin::Data)))
        .chain(args.detector.iter().map(|s| {
            (
                s,
                SampleOrigin::DetectorVariation {
                    variant: s.id.clone(),
                },
            )
        }))
        .collect();
    let inputs: Vec<&Path> = all_samples.iter().map(|(s, _)| s.path.as_path()).collect();

    print_config(
        "Covariance",
        &[
            ("Binning", format!("{} ({})", binning.label(), format_bins(binning.n_bins()))),
            ("Samples", describe_inputs(&inputs)),
            ("Weight", args.weight_column.clone()),
            ("Region", args.region.clone()),
            ("Knobs", systematics.knobs.len().to_string()),
            ("Multiverses", systematics.multiverses.len().to_string()),
        ],
    );

    print_step_header(1, "Load Samples");
    let pb = create_progress_bar(all_samples.len() as u64, "Loading samples");
    let mut samples: Vec<SampleFrame> = Vec::with_capacity(all_samples.len());
    let mut total_rows = 0usize;
    for (sample, origin) in &all_samples {
        // Detector variants share the simulated exposure and are not rescaled per variant
        let scale = match origin {
            SampleOrigin::Data => 1.0,
            _ => args.scale_for(&sample.id),
        };
        let frame = load_sample(&sample.id, &sample.path, origin.clone(), scale, infer_schema_length)?;
        let rows = sample_rows(&frame)?;
        if rows == 0 {
            print_warning(&format!("Sample '{}' has no events", sample.id));
        }
        debug!(sample = %sample.id, rows, "sample rows");
        total_rows += rows;
        samples.push(frame);
        pb.inc(1);
    }
    finish_with_success(
        &pb,
        &format!("{} sample(s) loaded, {} events", samples.len(), total_rows),
    );
    if args.detector.is_empty() {
        print_info("No detector-variation samples; detector covariance will be zero");
    }

    print_step_header(2, "Fill Histograms and Systematics");
    let step_start = Instant::now();
    let model = HistogramModel::new(binning, &args.weight_column).with_strata(args.strata.clone());
    let spinner = create_spinner(&format!("Processing {}...", model.binning().expression()));
    let result = process_variable(&args.region, &samples, &model, &processor)
        .with_context(|| format!("Failed to process variable '{}'", model.binning().expression()))?;
    finish_with_success(&spinner, &format!("{} systematic(s) evaluated", result.covariances.len()));
    info!(
        variable = %result.variable,
        systematics = result.covariances.len(),
        elapsed = ?step_start.elapsed(),
        "variable processed"
    );

    if result.nominal.sum() <= 0.0 {
        print_warning("Nominal prediction is empty; fractional uncertainties are zero");
    }

    display_covariance(&result);

    if let Some(output) = &args.output {
        let metadata = ExportMetadata::new(&inputs, &args.weight_column, None);
        export_variable_result(&result, metadata, output)?;
        print_saved(output);
    }

    print_completion("Covariance");
    Ok(())
}
