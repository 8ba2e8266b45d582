//! Statistical tests for the Markov chains.
//!
//! On a model small enough to enumerate, the empirical distribution of many
//! independent chains must match the exact marginal `p(v) ∝ exp(-F(v))`.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rbm::sampling::{mean_v_from_v, metropolis, mode_v_from_v, sample_h_from_h, sample_v_from_v};
use rbm::utils::logsumexp;
use rbm::{Layer, Rbm};

const N_CHAINS: usize = 20_000;

fn model(seed: u64) -> Rbm {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rbm = Rbm::with_random_weights(Layer::binary(&[3]), Layer::binary(&[2]), 1.2, &mut rng)
        .expect("valid weights");
    rbm.visible_mut()
        .param_mut("theta")
        .expect("theta")
        .assign(&ndarray::arr1(&[1.0, -1.5, 0.4]));
    rbm
}

fn exact_marginal(rbm: &Rbm, states: &Array2<f64>) -> Array1<f64> {
    let f = rbm.free_energy(states).expect("free energy");
    let log_z = logsumexp(f.iter().map(|x| -x));
    f.mapv(|x| (-x - log_z).exp())
}

/// Histogram of binary rows over the enumeration order of `iterate_states`
/// (unit `i` is bit `i` of the state index).
fn histogram(samples: &Array2<f64>, n_states: usize) -> Array1<f64> {
    let mut counts = Array1::zeros(n_states);
    for row in samples.rows() {
        let idx: usize = row
            .iter()
            .enumerate()
            .map(|(i, &x)| if x > 0.5 { 1 << i } else { 0 })
            .sum();
        counts[idx] += 1.0;
    }
    counts / samples.nrows() as f64
}

fn total_variation(p: &Array1<f64>, q: &Array1<f64>) -> f64 {
    0.5 * (p - q).mapv(f64::abs).sum()
}

fn pearson(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    let (ma, mb) = (a.mean().unwrap_or(0.0), b.mean().unwrap_or(0.0));
    let da = a - ma;
    let db = b - mb;
    da.dot(&db) / (da.dot(&da).sqrt() * db.dot(&db).sqrt())
}

#[test]
fn test_gibbs_chains_reach_the_exact_marginal() {
    let rbm = model(0);
    let mut rng = StdRng::seed_from_u64(10);
    let states = rbm.visible().iterate_states().expect("enumerable");
    let exact = exact_marginal(&rbm, &states);

    let v0 = rbm.visible().sample_from_prior(N_CHAINS, &mut rng);
    let v = sample_v_from_v(&rbm, &v0, 30, &mut rng).expect("gibbs");
    let empirical = histogram(&v, states.nrows());

    assert!(total_variation(&exact, &empirical) < 0.03, "{exact} vs {empirical}");
    assert!(pearson(&exact, &empirical) > 0.99);
}

#[test]
fn test_hidden_chains_reach_the_exact_marginal() {
    let rbm = model(1);
    let mut rng = StdRng::seed_from_u64(11);
    let mirror = rbm.mirror();
    let states = mirror.visible().iterate_states().expect("enumerable");
    let exact = exact_marginal(&mirror, &states);

    let h0 = rbm.hidden().sample_from_prior(N_CHAINS, &mut rng);
    let h = sample_h_from_h(&rbm, &h0, 30, &mut rng).expect("gibbs");
    assert!(total_variation(&exact, &histogram(&h, states.nrows())) < 0.03);
}

#[test]
fn test_metropolis_reaches_the_exact_marginal() {
    let rbm = model(2);
    let mut rng = StdRng::seed_from_u64(12);
    let states = rbm.visible().iterate_states().expect("enumerable");
    let exact = exact_marginal(&rbm, &states);

    let v0 = rbm.visible().sample_from_prior(N_CHAINS, &mut rng);
    let v = metropolis(&rbm, &v0, 1.0, 60, &mut rng).expect("metropolis");
    let empirical = histogram(&v, states.nrows());
    assert!(total_variation(&exact, &empirical) < 0.03, "{exact} vs {empirical}");
}

#[test]
fn test_deterministic_chains_are_reproducible_and_bounded() {
    let rbm = model(4);
    let mut rng = StdRng::seed_from_u64(14);
    let v0 = rbm.visible().sample_from_prior(8, &mut rng);
    let mean = mean_v_from_v(&rbm, &v0, 5).expect("mean field");
    assert!(mean.iter().all(|&x| (0.0..=1.0).contains(&x)));
    let mode = mode_v_from_v(&rbm, &v0, 5).expect("modes");
    assert!(mode.iter().all(|&x| x == 0.0 || x == 1.0));
    assert_eq!(mode, mode_v_from_v(&rbm, &v0, 5).expect("modes"));
}

#[test]
fn test_seeded_chains_are_reproducible() {
    let rbm = model(5);
    let v0 = Array2::zeros((4, 3));
    let a = sample_v_from_v(&rbm, &v0, 3, &mut StdRng::seed_from_u64(99)).expect("gibbs");
    let b = sample_v_from_v(&rbm, &v0, 3, &mut StdRng::seed_from_u64(99)).expect("gibbs");
    assert_eq!(a, b);
}
