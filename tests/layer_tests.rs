//! Consistency tests for every unit family.
//!
//! These tests check the layer math against its definition:
//! - the cumulant generating function equals `log ∫ exp(-E(x) + h x)`
//! - conditional means and variances are its first and second derivatives
//! - sample moments match the conditional mean
//! - the rectified reparameterizations describe the same distribution

use approx::assert_abs_diff_eq;
use ndarray::{arr1, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rbm::utils::logsumexp;
use rbm::{Layer, LayerKind};

fn with_params(mut layer: Layer, rows: &[(&str, f64)]) -> Layer {
    for &(name, value) in rows {
        layer.param_mut(name).expect("known parameter").fill(value);
    }
    layer
}

/// One unit of every continuous family, with non-default parameters.
fn continuous_layers() -> Vec<Layer> {
    vec![
        with_params(Layer::gaussian(&[1]), &[("theta", 0.3), ("gamma", 1.5)]),
        with_params(Layer::relu(&[1]), &[("theta", 0.2), ("gamma", 2.0)]),
        with_params(
            Layer::drelu(&[1]),
            &[("theta_p", 0.5), ("theta_n", -0.3), ("gamma_p", 1.2), ("gamma_n", 2.0)],
        ),
        with_params(
            Layer::prelu(&[1]),
            &[("theta", 0.1), ("gamma", 1.5), ("delta", 0.4), ("eta", 0.3)],
        ),
        with_params(
            Layer::xrelu(&[1]),
            &[("theta", 0.1), ("gamma", 1.5), ("delta", 0.4), ("xi", 0.5)],
        ),
    ]
}

/// Small discrete layers with non-default fields.
fn discrete_layers() -> Vec<Layer> {
    let mut potts = Layer::potts(3, &[2]);
    potts
        .param_mut("theta")
        .expect("theta")
        .assign(&arr1(&[0.2, -0.4, 0.1, 0.5, 0.0, -0.3]));
    vec![
        with_params(Layer::binary(&[3]), &[("theta", 0.4)]),
        with_params(Layer::spin(&[3]), &[("theta", -0.25)]),
        potts,
    ]
}

fn fields(layer: &Layer, scale: f64) -> Array2<f64> {
    Array2::from_shape_fn((3, layer.len()), |(b, j)| scale * ((b as f64) - 1.0 + 0.37 * j as f64))
}

/// Midpoint rule for `log ∫ exp(-E(x) + h x) dx` over a single unit, on
/// each half-line separately so the kink at zero falls between nodes.
fn log_integral(layer: &Layer, h: f64) -> f64 {
    let n = 20_000;
    let dx = 20.0 / n as f64;
    let x = Array2::from_shape_fn((2 * n, 1), |(i, _)| {
        let offset = ((i % n) as f64 + 0.5) * dx;
        if i < n {
            offset
        } else {
            -offset
        }
    });
    let e = layer.energy(&x).expect("single unit batch");
    let col0 = x.column(0);
    let terms = e.iter().zip(col0.iter()).map(|(&ei, &xi)| -ei + h * xi + dx.ln());
    logsumexp(terms)
}

#[test]
fn test_continuous_cgf_matches_quadrature() {
    for layer in continuous_layers() {
        for &h in &[-1.3, 0.0, 0.8] {
            let cgf = layer.cgf(&ndarray::arr2(&[[h]])).expect("cgf")[0];
            assert_abs_diff_eq!(cgf, log_integral(&layer, h), epsilon = 1e-4);
        }
    }
}

#[test]
fn test_discrete_cgf_matches_enumeration() {
    for layer in discrete_layers() {
        let states = layer.iterate_states().expect("small layer");
        let energies = layer.energy(&states).expect("energies");
        let h = fields(&layer, 0.6);
        let cgf = layer.cgf(&h).expect("cgf");
        for (b, row) in h.rows().into_iter().enumerate() {
            let dots = states.dot(&row);
            let expected = logsumexp(dots.iter().zip(energies.iter()).map(|(d, e)| d - e));
            assert_abs_diff_eq!(cgf[b], expected, epsilon = 1e-9);
        }
    }
}

#[test]
fn test_mean_and_var_are_cgf_derivatives() {
    let eps = 1e-4;
    for layer in continuous_layers().into_iter().chain(discrete_layers()) {
        let h = fields(&layer, 0.9);
        let (mean, var) = layer.transfer_meanvar(&h).expect("moments");
        for j in 0..layer.len() {
            let mut hp = h.clone();
            let mut hm = h.clone();
            hp.column_mut(j).mapv_inplace(|x| x + eps);
            hm.column_mut(j).mapv_inplace(|x| x - eps);
            let fd_mean = (layer.cgf(&hp).expect("cgf") - layer.cgf(&hm).expect("cgf")) / (2.0 * eps);
            let fd_var = (layer.transfer_mean(&hp).expect("mean")
                - layer.transfer_mean(&hm).expect("mean"))
                / (2.0 * eps);
            for b in 0..h.nrows() {
                assert_abs_diff_eq!(mean[[b, j]], fd_mean[b], epsilon = 1e-5);
                assert_abs_diff_eq!(var[[b, j]], fd_var[[b, j]], epsilon = 1e-5);
            }
        }
    }
}

/// Central differences of `f` with respect to every entry of the layer parameters.
fn parameter_fd(layer: &Layer, eps: f64, f: impl Fn(&Layer) -> f64) -> Array2<f64> {
    let mut out = Array2::zeros(layer.par().dim());
    for ((r, j), slot) in out.indexed_iter_mut() {
        let mut plus = layer.clone();
        let mut minus = layer.clone();
        plus.par_mut()[[r, j]] += eps;
        minus.par_mut()[[r, j]] -= eps;
        *slot = (f(&plus) - f(&minus)) / (2.0 * eps);
    }
    out
}

fn weighted_mean(values: &Array1<f64>, weights: &Array1<f64>) -> f64 {
    values.dot(weights) / weights.sum()
}

#[test]
fn test_free_energy_grad_matches_finite_difference() {
    let weights = arr1(&[1.0, 2.0, 0.5]);
    for layer in continuous_layers().into_iter().chain(discrete_layers()) {
        let h = fields(&layer, 0.8);
        let analytic = layer.free_energy_grad(&h, Some(&weights)).expect("gradient");
        let fd = parameter_fd(&layer, 1e-5, |l| weighted_mean(&l.free_energy(&h).expect("free energy"), &weights));
        for (a, b) in analytic.iter().zip(fd.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_energy_grad_matches_finite_difference() {
    let mut rng = StdRng::seed_from_u64(11);
    for layer in continuous_layers().into_iter().chain(discrete_layers()) {
        let x = layer.sample_from_prior(40, &mut rng);
        let weights = Array1::from_shape_fn(x.nrows(), |i| 0.5 + (i % 3) as f64);
        let stats = layer.suffstats(&x, Some(&weights)).expect("suffstats");
        let analytic = layer.energy_grad(&stats).expect("gradient");
        let fd = parameter_fd(&layer, 1e-5, |l| weighted_mean(&l.energy(&x).expect("energy"), &weights));
        for (a, b) in analytic.iter().zip(fd.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_sample_moments_match_transfer_mean() {
    let mut rng = StdRng::seed_from_u64(7);
    let n = 20_000;
    for layer in continuous_layers().into_iter().chain(discrete_layers()) {
        let h = Array2::from_elem((n, layer.len()), 0.4);
        let samples = layer.transfer_sample(&h, &mut rng).expect("samples");
        let mean = layer.transfer_mean(&h.slice(ndarray::s![0..1, ..]).to_owned()).expect("mean");
        let std = layer.transfer_std(&h.slice(ndarray::s![0..1, ..]).to_owned()).expect("std");
        let empirical = samples.mean_axis(ndarray::Axis(0)).expect("non-empty");
        for j in 0..layer.len() {
            let tol = 5.0 * std[[0, j]] / (n as f64).sqrt() + 1e-9;
            assert!(
                (empirical[j] - mean[[0, j]]).abs() < tol,
                "{:?} unit {j}: empirical {} vs mean {}",
                layer.kind(),
                empirical[j],
                mean[[0, j]]
            );
        }
    }
}

#[test]
fn test_mean_abs_and_mode_are_consistent() {
    for layer in continuous_layers() {
        let h = fields(&layer, 1.1);
        let mean = layer.transfer_mean(&h).expect("mean");
        let mean_abs = layer.transfer_mean_abs(&h).expect("mean abs");
        let mode = layer.transfer_mode(&h).expect("mode");
        for ((m, a), x) in mean.iter().zip(mean_abs.iter()).zip(mode.iter()) {
            assert!(*a >= m.abs() - 1e-12, "{:?}: |mean| {} > mean_abs {a}", layer.kind(), m.abs());
            assert!(x.is_finite());
        }
    }
}

#[test]
fn test_potts_samples_are_one_hot() {
    let mut rng = StdRng::seed_from_u64(3);
    let layer = Layer::potts(4, &[3]);
    let samples = layer.sample_from_prior(50, &mut rng);
    for row in samples.rows() {
        assert_eq!(row.sum(), 3.0);
        for site in 0..3 {
            let hot: f64 = (0..4).map(|c| row[c * 3 + site]).sum();
            assert_eq!(hot, 1.0);
        }
    }
}

#[test]
fn test_rectified_conversions_preserve_the_distribution() {
    let h = ndarray::arr2(&[[-1.0], [0.0], [1.5]]);
    for layer in continuous_layers().into_iter().filter(|l| l.kind() != LayerKind::Gaussian) {
        let as_drelu = layer.to_drelu().expect("rectified");
        let reference = layer.cgf(&h).expect("cgf");
        for (a, b) in reference.iter().zip(as_drelu.cgf(&h).expect("cgf").iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
        let as_prelu = layer.to_prelu().expect("pReLU form");
        for (a, b) in reference.iter().zip(as_prelu.cgf(&h).expect("cgf").iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }
}

#[test]
fn test_drelu_prelu_round_trip() {
    let drelu = continuous_layers()
        .into_iter()
        .find(|l| l.kind() == LayerKind::DReLU)
        .expect("dReLU layer");
    let back = drelu.to_prelu().expect("prelu").to_drelu().expect("drelu");
    for (a, b) in drelu.par().iter().zip(back.par().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }
    let back = drelu.to_xrelu().expect("xrelu").to_drelu().expect("drelu");
    for (a, b) in drelu.par().iter().zip(back.par().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }
}

#[test]
fn test_relu_conversion_limits() {
    let relu = with_params(Layer::relu(&[2]), &[("theta", 0.3), ("gamma", 1.7)]);
    let prelu = relu.to_prelu().expect("relu has a pReLU limit");
    assert_eq!(prelu.param("eta").expect("eta")[0], 1.0);
    assert!(relu.to_xrelu().is_err());
    assert!(Layer::binary(&[2]).to_drelu().is_err());
}
