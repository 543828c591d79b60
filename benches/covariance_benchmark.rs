//! Benchmark of covariance evaluation for multiverse and detector systematics
//!
//! Run with: cargo bench --bench covariance_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rand::SeedableRng;

use histsys::pipeline::systematics::{detector_covariance, universe_covariance};

fn generate_universes(n_bins: usize, n_universes: usize, seed: u64) -> (Vec<f64>, Vec<Vec<f64>>) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let nominal: Vec<f64> = (0..n_bins).map(|_| rng.gen_range(50.0..500.0)).collect();
    let universes = (0..n_universes)
        .map(|_| nominal.iter().map(|c| c * rng.gen_range(0.9..1.1)).collect())
        .collect();
    (nominal, universes)
}

/// Universe covariance for growing bin and universe counts
fn benchmark_universe_covariance(c: &mut Criterion) {
    let mut group = c.benchmark_group("universe_covariance");

    for (n_bins, n_universes) in [(20, 100), (50, 500), (100, 1000)] {
        let (nominal, universes) = generate_universes(n_bins, n_universes, 42);
        group.bench_with_input(
            BenchmarkId::new("bins_x_universes", format!("{}x{}", n_bins, n_universes)),
            &universes,
            |b, universes| {
                b.iter(|| {
                    let _ = universe_covariance(black_box(&nominal), black_box(universes));
                });
            },
        );
    }

    group.finish();
}

fn benchmark_detector_covariance(c: &mut Criterion) {
    let mut group = c.benchmark_group("detector_covariance");

    for n_bins in [20, 100] {
        let (nominal, variants) = generate_universes(n_bins, 10, 7);
        let central = nominal.clone();
        group.bench_with_input(BenchmarkId::from_parameter(n_bins), &variants, |b, variants| {
            b.iter(|| {
                let _ = detector_covariance(black_box(&nominal), black_box(&central), black_box(variants));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_universe_covariance, benchmark_detector_covariance);
criterion_main!(benches);
