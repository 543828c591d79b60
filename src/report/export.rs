//! JSON export of binnings and variable results

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::pipeline::{BinningDefinition, BinningOutcome, VariableResult};

/// Metadata about the run that produced an export
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportMetadata {
    /// Timestamp of the run (ISO 8601 format)
    pub timestamp: String,
    /// histsys version
    pub histsys_version: String,
    /// Input files
    pub inputs: Vec<String>,
    /// Per-event weight column
    pub weight_column: String,
    /// Binning strategy, for binning exports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl ExportMetadata {
    pub fn new(inputs: &[&Path], weight_column: &str, strategy: Option<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            histsys_version: env!("CARGO_PKG_VERSION").to_string(),
            inputs: inputs.iter().map(|p| p.display().to_string()).collect(),
            weight_column: weight_column.to_string(),
            strategy,
        }
    }
}

/// Per-bin statistics of an adaptive binning
#[derive(Debug, Serialize)]
pub struct BinningSummary {
    pub n_bins: usize,
    pub total_effective_count: f64,
    pub effective_counts: Vec<f64>,
    pub below_domain_weight: f64,
    pub above_domain_weight: f64,
}

#[derive(Serialize)]
struct BinningExport<'a> {
    metadata: ExportMetadata,
    summary: BinningSummary,
    binning: &'a BinningDefinition,
}

/// Totals and per-source fractional uncertainties
#[derive(Debug, Serialize)]
pub struct VariableSummary {
    pub total_prediction: f64,
    pub total_error: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<f64>,
    pub fractional_uncertainties: BTreeMap<String, Vec<f64>>,
    pub total_fractional_uncertainty: Vec<f64>,
}

#[derive(Serialize)]
struct VariableExport<'a> {
    metadata: ExportMetadata,
    summary: VariableSummary,
    result: &'a VariableResult,
}

/// Summarise a variable result for export
pub fn summarize_variable(result: &VariableResult) -> VariableSummary {
    let fractional_uncertainties = result
        .systematic_names()
        .filter_map(|name| {
            result
                .fractional_uncertainties(name)
                .map(|f| (name.to_string(), f))
        })
        .collect();
    VariableSummary {
        total_prediction: result.nominal.sum(),
        total_error: result.nominal_with_band.total_error(),
        observed: result.data.as_ref().map(|d| d.sum()),
        fractional_uncertainties,
        total_fractional_uncertainty: result.total_fractional_uncertainties(),
    }
}

/// Write an adaptive binning with its statistics to a JSON file
///
/// # Arguments
/// * `outcome` - Binning and per-bin statistics
/// * `metadata` - Run metadata
/// * `output_path` - Path to write the JSON file
pub fn export_binning(outcome: &BinningOutcome, metadata: ExportMetadata, output_path: &Path) -> Result<()> {
    let export = BinningExport {
        metadata,
        summary: BinningSummary {
            n_bins: outcome.binning.n_bins(),
            total_effective_count: outcome.total_effective_count,
            effective_counts: outcome.effective_counts.clone(),
            below_domain_weight: outcome.below_domain_weight,
            above_domain_weight: outcome.above_domain_weight,
        },
        binning: &outcome.binning,
    };

    let json = serde_json::to_string_pretty(&export).context("Failed to serialize binning to JSON")?;

    std::fs::write(output_path, json)
        .with_context(|| format!("Failed to write binning to {}", output_path.display()))?;

    Ok(())
}

/// Write a variable result (histograms and covariances) to a JSON file
pub fn export_variable_result(result: &VariableResult, metadata: ExportMetadata, output_path: &Path) -> Result<()> {
    let export = VariableExport {
        metadata,
        summary: summarize_variable(result),
        result,
    };

    let json = serde_json::to_string_pretty(&export).context("Failed to serialize variable result to JSON")?;

    std::fs::write(output_path, json)
        .with_context(|| format!("Failed to write variable result to {}", output_path.display()))?;

    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BinningFile {
    Export { binning: BinningDefinition },
    Plain(BinningDefinition),
}

/// Read a binning from a plain definition or a binning export
pub fn read_binning(path: &Path) -> Result<BinningDefinition> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read binning file {}", path.display()))?;
    let file: BinningFile = serde_json::from_str(&text)
        .with_context(|| format!("Invalid binning in {}", path.display()))?;
    Ok(match file {
        BinningFile::Export { binning } | BinningFile::Plain(binning) => binning,
    })
}
