//! Sample loader for CSV and Parquet files

use anyhow::{Context, Result};
use polars::prelude::*;
use std::path::Path;
use tracing::debug;

use super::frame::{SampleFrame, SampleOrigin};

/// Scan a dataset lazily (CSV or Parquet based on extension)
pub fn load_dataset(path: &Path, infer_schema_length: usize) -> Result<LazyFrame> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    // 0 means a full-table scan for CSV type inference
    let infer_rows = if infer_schema_length == 0 {
        None
    } else {
        Some(infer_schema_length)
    };

    let lf = match extension.as_str() {
        "csv" => LazyCsvReader::new(path)
            .with_infer_schema_length(infer_rows)
            .finish()
            .with_context(|| format!("Failed to load CSV file: {}", path.display()))?,
        "parquet" => LazyFrame::scan_parquet(path, Default::default())
            .with_context(|| format!("Failed to load Parquet file: {}", path.display()))?,
        _ => anyhow::bail!(
            "Unsupported file format: {}. Supported formats: csv, parquet",
            extension
        ),
    };

    Ok(lf)
}

/// Load one sample file as a lazily evaluated [`SampleFrame`]
pub fn load_sample(
    id: &str,
    path: &Path,
    origin: SampleOrigin,
    scale: f64,
    infer_schema_length: usize,
) -> Result<SampleFrame> {
    let lf = load_dataset(path, infer_schema_length)
        .with_context(|| format!("Failed to load sample '{}'", id))?;
    debug!(sample = id, path = %path.display(), ?origin, scale, "loaded sample");
    Ok(SampleFrame::new(id, origin, lf).with_scale(scale))
}

/// Row count of a sample (forces a scan)
pub fn sample_rows(sample: &SampleFrame) -> Result<usize> {
    let df = sample
        .lazy()
        .select([len().cast(DataType::UInt64).alias("rows")])
        .collect()
        .with_context(|| format!("Failed to count rows of sample '{}'", sample.id()))?;
    let rows = df.column("rows")?.u64()?.get(0).unwrap_or(0);
    Ok(rows as usize)
}
