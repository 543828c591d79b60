//! Benchmark of edge placement: equal weight, uniform width and Bayesian blocks
//!
//! Run with: cargo bench --bench binning_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;
use rand::SeedableRng;

use histsys::pipeline::adaptive::compute_edges;
use histsys::pipeline::summary::{WeightedPoint, WeightedSummary};
use histsys::pipeline::{bayesian_blocks, BinningConfig, BinningStrategy};

/// Weighted observations from a falling spectrum on [0, 10)
fn generate_observations(n: usize, seed: u64) -> Vec<(f64, f64)> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let u: f64 = rng.gen();
            let value = -(1.0 - u * (1.0 - (-2.0f64).exp())).ln() * 5.0;
            (value, rng.gen_range(0.5..1.5))
        })
        .collect()
}

fn summary_points(n: usize, resolution: Option<usize>) -> Vec<WeightedPoint> {
    let observations = generate_observations(n, 42);
    WeightedSummary::from_observations(&observations, (f64::NAN, f64::NAN), resolution)
        .points()
        .to_vec()
}

/// Edge placement per strategy over a quantised summary
fn benchmark_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("binning_strategies");

    for n in [10_000, 100_000] {
        let points = summary_points(n, Some(10_000));
        group.throughput(Throughput::Elements(points.len() as u64));

        for strategy in [
            BinningStrategy::EqualWeight,
            BinningStrategy::UniformWidth,
            BinningStrategy::BayesianBlocks,
        ] {
            let config = BinningConfig {
                strategy,
                ..BinningConfig::default()
            };
            group.bench_with_input(BenchmarkId::new(strategy.to_string(), n), &points, |b, points| {
                b.iter(|| {
                    let _ = compute_edges(black_box(points), black_box((0.0, 10.0)), black_box(&config));
                });
            });
        }
    }

    group.finish();
}

/// Quadratic cost of the changepoint search in the number of unique values
fn benchmark_bayesian_blocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("bayesian_blocks");
    group.sample_size(10);

    for n in [500, 2_000, 5_000] {
        let points = summary_points(n, None);
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let weights: Vec<f64> = points.iter().map(|p| p.sum_w).collect();

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let _ = bayesian_blocks(black_box(&values), black_box(&weights), black_box(0.01));
            });
        });
    }

    group.finish();
}

/// Building the weighted summary itself, quantised and exact
fn benchmark_summary(c: &mut Criterion) {
    let mut group = c.benchmark_group("weighted_summary");
    let observations = generate_observations(100_000, 7);
    group.throughput(Throughput::Elements(observations.len() as u64));

    group.bench_function("quantized", |b| {
        b.iter(|| WeightedSummary::from_observations(black_box(&observations), (f64::NAN, f64::NAN), Some(10_000)));
    });
    group.bench_function("exact", |b| {
        b.iter(|| WeightedSummary::from_observations(black_box(&observations), (f64::NAN, f64::NAN), None));
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_strategies,
    benchmark_bayesian_blocks,
    benchmark_summary
);
criterion_main!(benches);
