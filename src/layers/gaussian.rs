//! Gaussian units.

use super::{Params, Units};
use crate::utils::{erfc, SQRT_2_OVER_PI};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::{PI, SQRT_2};

/// `E(x) = |γ|/2 x² - θ x`, `x ∈ ℝ`.
pub(crate) struct GaussianUnits;

impl Units for GaussianUnits {
    fn energy(p: &Params, x: f64) -> f64 {
        0.5 * p[1].abs() * x * x - p[0] * x
    }

    fn cgf(p: &Params, h: f64) -> f64 {
        let g = p[1].abs();
        let t = p[0] + h;
        t * t / (2.0 * g) + 0.5 * (2.0 * PI / g).ln()
    }

    fn mean(p: &Params, h: f64) -> f64 {
        (p[0] + h) / p[1].abs()
    }

    fn var(p: &Params, _h: f64) -> f64 {
        1.0 / p[1].abs()
    }

    fn mode(p: &Params, h: f64) -> f64 {
        Self::mean(p, h)
    }

    fn mean_abs(p: &Params, h: f64) -> f64 {
        let mu = Self::mean(p, h);
        let sigma = Self::var(p, h).sqrt();
        // E|X| for X ~ N(μ, σ²)
        let folded = sigma * SQRT_2_OVER_PI * (-mu * mu / (2.0 * sigma * sigma)).exp();
        folded + mu * (1.0 - erfc(mu / (sigma * SQRT_2)))
    }

    fn sample<R: Rng + ?Sized>(p: &Params, h: f64, rng: &mut R) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        Self::mean(p, h) + z / p[1].abs().sqrt()
    }

    fn stats(x: f64, out: &mut [f64]) {
        out[0] = x;
        out[1] = x * x;
    }

    fn tilted_stats(p: &Params, h: f64, out: &mut [f64]) {
        let mu = Self::mean(p, h);
        out[0] = mu;
        out[1] = mu * mu + Self::var(p, h);
    }

    fn energy_grad(p: &Params, stats: &[f64], out: &mut [f64]) {
        out[0] = -stats[0];
        out[1] = 0.5 * p[1].signum() * stats[1];
    }
}
