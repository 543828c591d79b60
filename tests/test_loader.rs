//! Unit tests for the sample loader

use histsys::pipeline::{load_dataset, load_sample, sample_rows, SampleOrigin};
use polars::prelude::*;
use std::io::Write;
use tempfile::TempDir;

#[path = "common/mod.rs"]
mod common;

use common::*;

#[test]
fn test_load_csv_sample() {
    let temp_dir = TempDir::new().unwrap();
    let csv_path = temp_dir.path().join("test.csv");

    let mut file = std::fs::File::create(&csv_path).unwrap();
    writeln!(file, "x,weight,run").unwrap();
    writeln!(file, "0.5,1.0,1").unwrap();
    writeln!(file, "1.5,2.0,1").unwrap();
    drop(file);

    let sample = load_sample("mc", &csv_path, SampleOrigin::MonteCarlo, 0.5, 100).unwrap();

    assert_eq!(sample.id(), "mc");
    assert_eq!(sample.scale(), 0.5);
    assert!(sample.is_monte_carlo());
    assert!(sample.has_column("weight").unwrap());
    assert!(!sample.has_column("energy").unwrap());
    assert_eq!(sample_rows(&sample).unwrap(), 2);
}

#[test]
fn test_load_parquet_sample() {
    let mut df = create_systematics_dataframe();
    let (_dir, path) = create_temp_parquet(&mut df);

    let sample = load_sample(
        "CV",
        &path,
        SampleOrigin::DetectorVariation {
            variant: "CV".into(),
        },
        1.0,
        100,
    )
    .unwrap();

    assert!(!sample.is_monte_carlo());
    assert_eq!(sample_rows(&sample).unwrap(), 3);
    let kind = sample.column_kind("flux_universes").unwrap();
    assert!(kind.is_sequence());
}

#[test]
fn test_full_scan_inference() {
    let mut df = create_random_dataframe(50);
    let (_dir, path) = create_temp_csv(&mut df);

    let lf = load_dataset(&path, 0).unwrap();
    let collected = lf.collect().unwrap();
    assert_eq!(collected.height(), 50);
    assert_eq!(collected.column("x").unwrap().dtype(), &DataType::Float64);
}

#[test]
fn test_unsupported_format() {
    let temp_dir = TempDir::new().unwrap();
    let bad_path = temp_dir.path().join("test.xlsx");
    std::fs::File::create(&bad_path).unwrap();

    let result = load_dataset(&bad_path, 100);

    assert!(result.is_err(), "Unsupported format should return error");
    let err_msg = result.err().unwrap().to_string();
    assert!(
        err_msg.contains("Unsupported"),
        "Error message should mention unsupported format: {}",
        err_msg
    );
}

#[test]
fn test_nonexistent_sample() {
    let path = std::path::Path::new("/nonexistent/path/to/file.parquet");
    let result = load_sample("mc", path, SampleOrigin::MonteCarlo, 1.0, 100)
        .and_then(|s| sample_rows(&s));
    assert!(result.is_err(), "Nonexistent file should return error");
}
