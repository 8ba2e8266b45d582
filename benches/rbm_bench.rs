//! Criterion benchmarks for RBM inference and training.
//!
//! Run with: `cargo bench --bench rbm_bench`
//!
//! ## Benchmarks
//!
//! 1. **Free energy**: per-family cost of `F(v)` on a batch
//! 2. **Gibbs sweep**: one `v → h → v` step for growing model sizes
//! 3. **PCD epoch**: a full epoch of persistent contrastive divergence
//! 4. **Pseudolikelihood**: stochastic vs exact estimator

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rbm::data::prototype_samples;
use rbm::partition::{log_pseudolikelihood, log_pseudolikelihood_exact};
use rbm::sampling::sample_v_from_v;
use rbm::{pcd, Adam, Layer, Rbm, TrainConfig};

/// Binary visible layer coupled to the given hidden layer, with small random weights.
fn bench_model(n_visible: usize, hidden: Layer, rng: &mut StdRng) -> Rbm {
    Rbm::with_random_weights(Layer::binary(&[n_visible]), hidden, 0.1, rng)
        .expect("Failed to create benchmark model")
}

fn batch(n: usize, n_visible: usize, rng: &mut StdRng) -> Array2<f64> {
    prototype_samples(n, n_visible, 4, 0.1, rng)
}

// ============================================================================
// Benchmark: Free Energy per Hidden Family
// ============================================================================

fn bench_free_energy(c: &mut Criterion) {
    let mut group = c.benchmark_group("free_energy");
    let mut rng = StdRng::seed_from_u64(0);
    let v = batch(256, 100, &mut rng);

    let families = [
        ("binary", Layer::binary(&[50])),
        ("gaussian", Layer::gaussian(&[50])),
        ("relu", Layer::relu(&[50])),
        ("drelu", Layer::drelu(&[50])),
    ];
    for (name, hidden) in families {
        let rbm = bench_model(100, hidden, &mut rng);
        group.bench_function(name, |b| {
            b.iter(|| rbm.free_energy(black_box(&v)).expect("free_energy failed"));
        });
    }
    group.finish();
}

// ============================================================================
// Benchmark: Gibbs Sweep
// ============================================================================

fn bench_gibbs_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("gibbs_sweep");
    let mut rng = StdRng::seed_from_u64(1);

    for n_visible in [20, 100, 400] {
        let rbm = bench_model(n_visible, Layer::binary(&[n_visible / 2]), &mut rng);
        let v = batch(64, n_visible, &mut rng);
        group.bench_with_input(BenchmarkId::from_parameter(n_visible), &n_visible, |b, _| {
            let mut chain_rng = StdRng::seed_from_u64(2);
            b.iter(|| sample_v_from_v(&rbm, black_box(&v), 1, &mut chain_rng).expect("gibbs failed"));
        });
    }
    group.finish();
}

// ============================================================================
// Benchmark: PCD Epoch
// ============================================================================

fn bench_pcd_epoch(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(3);
    let data = batch(1000, 50, &mut rng);
    let config = TrainConfig {
        batch_size: 50,
        epochs: 1,
        steps: 5,
        ..TrainConfig::default()
    };

    c.bench_function("pcd_epoch_50_25", |b| {
        let mut rbm = bench_model(50, Layer::binary(&[25]), &mut rng);
        let mut optimizer = Adam::new(0.01);
        let mut train_rng = StdRng::seed_from_u64(4);
        b.iter(|| {
            pcd(
                black_box(&mut rbm),
                black_box(&data),
                None,
                &config,
                &mut optimizer,
                None,
                &mut train_rng,
            )
            .expect("pcd failed")
        });
    });
}

// ============================================================================
// Benchmark: Pseudolikelihood
// ============================================================================

fn bench_pseudolikelihood(c: &mut Criterion) {
    let mut group = c.benchmark_group("pseudolikelihood");
    let mut rng = StdRng::seed_from_u64(5);
    let rbm = bench_model(50, Layer::binary(&[25]), &mut rng);
    let v = batch(256, 50, &mut rng);

    group.bench_function("stochastic", |b| {
        let mut site_rng = StdRng::seed_from_u64(6);
        b.iter(|| log_pseudolikelihood(&rbm, black_box(&v), &mut site_rng).expect("lpl failed"));
    });
    group.bench_function("exact", |b| {
        b.iter(|| log_pseudolikelihood_exact(&rbm, black_box(&v)).expect("lpl failed"));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_free_energy,
    bench_gibbs_sweep,
    bench_pcd_epoch,
    bench_pseudolikelihood,
);
criterion_main!(benches);
