//! Shared test utilities and fixture generators
#![allow(dead_code)]

use histsys::pipeline::summary::WeightedPoint;
use histsys::pipeline::{SampleFrame, SampleOrigin};
use polars::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

/// 100 unit-weight events at 0.05, 0.15, ..., 9.95
pub fn create_uniform_dataframe() -> DataFrame {
    let x: Vec<f64> = (0..100).map(|i| (2 * i + 1) as f64 / 20.0).collect();
    let weight = vec![1.0f64; 100];
    df! { "x" => x, "weight" => weight }.unwrap()
}

/// Random events over [0, 10) with weights in [0.5, 1.5)
pub fn create_random_dataframe(rows: usize) -> DataFrame {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let x: Vec<f64> = (0..rows).map(|_| rng.gen_range(0.0..10.0)).collect();
    let weight: Vec<f64> = (0..rows).map(|_| rng.gen_range(0.5..1.5)).collect();
    df! { "x" => x, "weight" => weight }.unwrap()
}

/// Simulated events with knob columns and a four-universe list column.
///
/// Every event has nominal weight 1; bin 0 of a `[0, 1, 2]` binning gets the
/// events at 0.5, bin 1 the events at 1.5.
pub fn create_systematics_dataframe() -> DataFrame {
    let universes = Series::new(
        "flux_universes".into(),
        &[
            Series::new("".into(), &[1.1f64, 0.9, 1.0, 1.0]),
            Series::new("".into(), &[1.0f64, 1.0, 1.2, 0.8]),
            Series::new("".into(), &[0.5f64, 1.5, 1.0, 1.0]),
        ],
    );
    let mut df = df! {
        "x" => [0.5f64, 1.5, 1.5],
        "weight" => [1.0f64, 1.0, 1.0],
        "xsec_up" => [1.2f64, 1.0, 1.0],
        "xsec_down" => [0.8f64, 1.0, 1.0],
        "channel" => [0i64, 1, 1],
    }
    .unwrap();
    df.with_column(universes).unwrap();
    df
}

pub fn sample(id: &str, origin: SampleOrigin, df: DataFrame) -> SampleFrame {
    SampleFrame::new(id, origin, df.lazy())
}

/// Weighted points at `0.0, 0.1, ...` with the given weights
pub fn points(weights: &[f64]) -> Vec<WeightedPoint> {
    weights
        .iter()
        .enumerate()
        .map(|(i, &w)| WeightedPoint {
            value: i as f64 / 10.0,
            sum_w: w,
            sum_w2: w * w,
        })
        .collect()
}

/// Create a temporary directory with a test CSV file
pub fn create_temp_csv(df: &mut DataFrame) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let csv_path = temp_dir.path().join("test_data.csv");

    let mut file = std::fs::File::create(&csv_path).unwrap();
    CsvWriter::new(&mut file).finish(df).unwrap();

    (temp_dir, csv_path)
}

/// Create a temporary directory with a test Parquet file
pub fn create_temp_parquet(df: &mut DataFrame) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let parquet_path = temp_dir.path().join("test_data.parquet");

    let file = std::fs::File::create(&parquet_path).unwrap();
    ParquetWriter::new(file).finish(df).unwrap();

    (temp_dir, parquet_path)
}

/// Assert that edges are strictly increasing
pub fn assert_strictly_increasing(edges: &[f64]) {
    for w in edges.windows(2) {
        assert!(w[0] < w[1], "edges not strictly increasing: {:?}", edges);
    }
}

/// Assert that two floats agree to within `tol`
pub fn assert_close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {}, got {} (tolerance {})",
        expected,
        actual,
        tol
    );
}
