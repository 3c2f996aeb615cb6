//! Criterion benchmarks for the clustering hot paths.
//!
//! Benchmarks:
//! 1. Graphical lasso at a fixed penalty
//! 2. Cross-validated graphical lasso
//! 3. Affinity propagation on a sparse covariance
//! 4. Locally linear embedding
//! 5. Full clustering run

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::DMatrix;

use stockgraph_core::structure::glasso::empirical_covariance;
use stockgraph_core::structure::{
    affinity_propagation, cluster, graphical_lasso, graphical_lasso_cv, locally_linear_embedding,
    standardize, AffinityConfig, EmbeddingConfig, GraphicalLassoConfig, Preference,
    StructureConfig,
};

// ── Helpers ──────────────────────────────────────────────────────────

/// `n` securities over `t` days loading on four sector factors.
fn make_variations(n: usize, t: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n, t, |i, s| {
        let g = (i % 4) as f64;
        let factor = (0.9 * s as f64 * (g + 1.0) + g).sin();
        let noise = ((i * 7919 + s * 104_729) % 1000) as f64 / 1000.0 - 0.5;
        factor + 0.5 * noise
    })
}

fn names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("S{i:02}")).collect()
}

fn standardized(n: usize, t: usize) -> DMatrix<f64> {
    standardize(&make_variations(n, t), &names(n)).unwrap()
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_graphical_lasso(c: &mut Criterion) {
    let mut group = c.benchmark_group("graphical_lasso");
    for &n in &[10usize, 41] {
        let s = empirical_covariance(&standardized(n, 250));
        group.bench_with_input(BenchmarkId::from_parameter(n), &s, |b, s| {
            b.iter(|| graphical_lasso(black_box(s), 0.05, &GraphicalLassoConfig::default()))
        });
    }
    group.finish();
}

fn bench_graphical_lasso_cv(c: &mut Criterion) {
    let mut group = c.benchmark_group("graphical_lasso_cv");
    group.sample_size(10);
    let x = standardized(20, 250);
    group.bench_function("20x250", |b| {
        b.iter(|| graphical_lasso_cv(black_box(&x), &GraphicalLassoConfig::default()))
    });
    group.finish();
}

fn bench_affinity(c: &mut Criterion) {
    let s = empirical_covariance(&standardized(41, 250));
    let preference = Preference::Median.resolve(&s);
    c.bench_function("affinity_propagation_41", |b| {
        b.iter(|| affinity_propagation(black_box(&s), preference, &AffinityConfig::default()))
    });
}

fn bench_embedding(c: &mut Criterion) {
    let points = standardized(41, 250).transpose();
    c.bench_function("locally_linear_embedding_41", |b| {
        b.iter(|| locally_linear_embedding(black_box(&points), &EmbeddingConfig::default()))
    });
}

fn bench_full_cluster(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster");
    group.sample_size(10);
    let v = make_variations(41, 250);
    let n = names(41);
    group.bench_function("41x250", |b| {
        b.iter(|| cluster(black_box(&v), &n, &StructureConfig::default()))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_graphical_lasso,
    bench_graphical_lasso_cv,
    bench_affinity,
    bench_embedding,
    bench_full_cluster,
);
criterion_main!(benches);
