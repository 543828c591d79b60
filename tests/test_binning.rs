//! Integration tests for adaptive binning

use histsys::pipeline::adaptive::{bin_effective_counts, compute_edges, merge_deficient_bins};
use histsys::pipeline::{
    bayesian_blocks, calculate, calculate_with_stats, load_sample, BinningConfig, BinningDefinition,
    BinningStrategy, SampleOrigin, SummaryCache,
};
use proptest::prelude::*;

#[path = "common/mod.rs"]
mod common;

use common::*;

fn config(strategy: BinningStrategy, min: f64) -> BinningConfig {
    BinningConfig {
        strategy,
        min_effective_count: min,
        ..BinningConfig::default()
    }
}

#[test]
fn test_equal_weight_from_parquet() {
    let mut df = create_uniform_dataframe();
    let (_dir, path) = create_temp_parquet(&mut df);
    let node = load_sample("mc", &path, SampleOrigin::MonteCarlo, 1.0, 100).unwrap();

    let original = BinningDefinition::single_bin(0.0, 10.0, "x", "x").unwrap();
    let cache = SummaryCache::new();
    let outcome = calculate_with_stats(
        &[node],
        &original,
        "weight",
        &config(BinningStrategy::EqualWeight, 25.0),
        &cache,
    )
    .unwrap();

    assert_eq!(outcome.binning.n_bins(), 4, "edges: {:?}", outcome.binning.edges());
    assert_eq!(outcome.binning.edges()[0], 0.0);
    assert_eq!(outcome.binning.edges()[4], 10.0);
    for neff in &outcome.effective_counts {
        assert_close(*neff, 25.0, 1e-9);
    }
    assert_close(outcome.total_effective_count, 100.0, 1e-9);
}

#[test]
fn test_nodes_are_combined() {
    // Two files of 50 events each bin like one file of 100
    let df = create_uniform_dataframe();
    let mut first = df.slice(0, 50);
    let mut second = df.slice(50, 50);
    let (_d1, p1) = create_temp_csv(&mut first);
    let (_d2, p2) = create_temp_csv(&mut second);
    let nodes = vec![
        load_sample("a", &p1, SampleOrigin::MonteCarlo, 1.0, 100).unwrap(),
        load_sample("b", &p2, SampleOrigin::MonteCarlo, 1.0, 100).unwrap(),
    ];

    let original = BinningDefinition::single_bin(0.0, 10.0, "x", "x").unwrap();
    let binning = calculate(
        &nodes,
        &original,
        "weight",
        &config(BinningStrategy::EqualWeight, 25.0),
        &SummaryCache::new(),
    )
    .unwrap();
    assert_eq!(binning.n_bins(), 4);
}

#[test]
fn test_binning_keeps_metadata() {
    let node = sample("mc", SampleOrigin::MonteCarlo, create_uniform_dataframe());
    let original = BinningDefinition::single_bin(0.0, 10.0, "x", "Energy [GeV]")
        .unwrap()
        .with_stratum_key("channel");
    let binning = calculate(
        &[node],
        &original,
        "weight",
        &config(BinningStrategy::UniformWidth, 50.0),
        &SummaryCache::new(),
    )
    .unwrap();

    assert_eq!(binning.edges(), &[0.0, 5.0, 10.0]);
    assert_eq!(binning.label(), "Energy [GeV]");
    assert_eq!(binning.stratum_key(), Some("channel"));
}

#[test]
fn test_cache_reused_across_calls() {
    let node = sample("mc", SampleOrigin::MonteCarlo, create_uniform_dataframe());
    let original = BinningDefinition::single_bin(0.0, 10.0, "x", "x").unwrap();
    let cache = SummaryCache::new();

    let a = calculate(&[node.clone()], &original, "weight", &config(BinningStrategy::EqualWeight, 25.0), &cache).unwrap();
    let b = calculate(&[node], &original, "weight", &config(BinningStrategy::UniformWidth, 25.0), &cache).unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(a.n_bins(), b.n_bins());

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn test_missing_column_is_error() {
    let node = sample("mc", SampleOrigin::MonteCarlo, create_uniform_dataframe());
    let original = BinningDefinition::single_bin(0.0, 10.0, "missing", "missing").unwrap();
    let result = calculate(
        &[node],
        &original,
        "weight",
        &BinningConfig::default(),
        &SummaryCache::new(),
    );
    assert!(result.is_err());
}

#[test]
fn test_bayesian_blocks_separates_dense_region() {
    // Dense cluster on [4, 5) inside a sparse background
    let mut values: Vec<f64> = (0..20).map(|i| i as f64 / 2.0).collect();
    values.extend((0..200).map(|i| 4.0025 + i as f64 / 200.0));
    values.sort_by(f64::total_cmp);
    values.dedup();
    let weights = vec![1.0; values.len()];

    let edges = bayesian_blocks(&values, &weights, 0.01).unwrap();
    assert_strictly_increasing(&edges);
    assert_eq!(edges[0], values[0]);
    assert_eq!(*edges.last().unwrap(), *values.last().unwrap());
    assert!(
        edges.iter().any(|&e| (3.5..=4.1).contains(&e)),
        "no changepoint near the cluster: {:?}",
        edges
    );
}

#[test]
fn test_random_data_meets_threshold() {
    let node = sample("mc", SampleOrigin::MonteCarlo, create_random_dataframe(2000));
    let original = BinningDefinition::single_bin(0.0, 10.0, "x", "x").unwrap();
    for strategy in [
        BinningStrategy::EqualWeight,
        BinningStrategy::UniformWidth,
        BinningStrategy::BayesianBlocks,
    ] {
        let outcome = calculate_with_stats(
            &[node.clone()],
            &original,
            "weight",
            &config(strategy, 100.0),
            &SummaryCache::new(),
        )
        .unwrap();
        assert_strictly_increasing(outcome.binning.edges());
        if outcome.binning.n_bins() > 1 {
            assert!(
                outcome.effective_counts.iter().all(|&c| c >= 100.0 * (1.0 - 1e-6)),
                "{}: {:?}",
                strategy,
                outcome.effective_counts
            );
        }
    }
}

proptest! {
    #[test]
    fn prop_edges_cover_domain_and_meet_threshold(
        weights in prop::collection::vec(0.1f64..10.0, 2..150),
        min in 1.0f64..40.0,
    ) {
        let pts = points(&weights);
        let hi = weights.len() as f64 / 10.0;
        let edges = compute_edges(&pts, (0.0, hi), &config(BinningStrategy::EqualWeight, min)).unwrap();

        prop_assert!(edges.len() >= 2);
        prop_assert_eq!(edges[0], 0.0);
        prop_assert_eq!(*edges.last().unwrap(), hi);
        prop_assert!(edges.windows(2).all(|w| w[0] < w[1]));

        let counts = bin_effective_counts(&edges, &pts);
        if counts.len() > 1 {
            prop_assert!(counts.iter().all(|&c| c >= min * (1.0 - 1e-6)));
        }
    }

    #[test]
    fn prop_merge_is_idempotent(
        weights in prop::collection::vec(0.1f64..5.0, 2..80),
        n_edges in 3usize..20,
        min in 1.0f64..20.0,
    ) {
        let pts = points(&weights);
        let hi = weights.len() as f64 / 10.0;
        let edges: Vec<f64> = (0..n_edges).map(|i| hi * i as f64 / (n_edges - 1) as f64).collect();

        let once = merge_deficient_bins(edges, &pts, min);
        let twice = merge_deficient_bins(once.clone(), &pts, min);
        prop_assert_eq!(once, twice);
    }
}
