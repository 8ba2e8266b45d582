//! Rectified Gaussian units, plus the half-line Gaussian integrals shared
//! with the double-rectified family.
//!
//! A half-line branch with tilt `t` and precision `g` has density
//! `∝ exp(-g/2 x² + t x)` on `x ≥ 0`. An infinite precision pins the branch
//! at zero: its log-mass is `-inf` and every moment is zero.

use super::{Params, Units};
use crate::utils::{erfcx, logerfcx, randnt, SQRT_2_OVER_PI};
use rand::Rng;
use std::f64::consts::{PI, SQRT_2};

/// `log ∫₀^∞ exp(-g/2 x² + t x) dx`
pub(crate) fn half_cgf(t: f64, g: f64) -> f64 {
    if g.is_infinite() {
        return f64::NEG_INFINITY;
    }
    0.5 * (PI / (2.0 * g)).ln() + logerfcx(-t / (2.0 * g).sqrt())
}

/// Inverse Mills ratio of the standardized truncation point `a`.
fn mills(a: f64) -> f64 {
    SQRT_2_OVER_PI / erfcx(a / SQRT_2)
}

/// First and second moments of the half-line branch.
pub(crate) fn half_moments(t: f64, g: f64) -> (f64, f64) {
    if g.is_infinite() {
        return (0.0, 0.0);
    }
    let sigma = 1.0 / g.sqrt();
    let mu = t / g;
    let lambda = mills(-t * sigma);
    let mean = mu + sigma * lambda;
    let second = mu * mu + mu * sigma * lambda + sigma * sigma;
    (mean, second.max(0.0))
}

/// Standardized truncation point above which the tail series replaces
/// `1 + aλ - λ²`, whose terms cancel to relative precision `ε a⁴`.
const TAIL_SERIES_FROM: f64 = 40.0;

/// Variance of the half-line branch.
pub(crate) fn half_var(t: f64, g: f64) -> f64 {
    if g.is_infinite() {
        return 0.0;
    }
    let a = -t / g.sqrt();
    if a > TAIL_SERIES_FROM {
        let r = 1.0 / (a * a);
        return r * (1.0 - r * (6.0 - r * (50.0 - r * 518.0))) / g;
    }
    let lambda = mills(a);
    ((1.0 + a * lambda - lambda * lambda) / g).max(0.0)
}

pub(crate) fn half_sample<R: Rng + ?Sized>(t: f64, g: f64, rng: &mut R) -> f64 {
    if g.is_infinite() {
        return 0.0;
    }
    let sigma = 1.0 / g.sqrt();
    (t / g + sigma * randnt(rng, -t * sigma)).max(0.0)
}

pub(crate) fn half_mode(t: f64, g: f64) -> f64 {
    if g.is_infinite() {
        0.0
    } else {
        (t / g).max(0.0)
    }
}

/// `E(x) = |γ|/2 x² - θ x` on `x ≥ 0`, infinite on `x < 0`.
pub(crate) struct ReluUnits;

impl Units for ReluUnits {
    fn energy(p: &Params, x: f64) -> f64 {
        if x < 0.0 {
            f64::INFINITY
        } else if x == 0.0 {
            0.0
        } else {
            0.5 * p[1].abs() * x * x - p[0] * x
        }
    }

    fn cgf(p: &Params, h: f64) -> f64 {
        half_cgf(p[0] + h, p[1].abs())
    }

    fn mean(p: &Params, h: f64) -> f64 {
        half_moments(p[0] + h, p[1].abs()).0
    }

    fn var(p: &Params, h: f64) -> f64 {
        half_var(p[0] + h, p[1].abs())
    }

    fn mode(p: &Params, h: f64) -> f64 {
        half_mode(p[0] + h, p[1].abs())
    }

    fn mean_abs(p: &Params, h: f64) -> f64 {
        Self::mean(p, h)
    }

    fn sample<R: Rng + ?Sized>(p: &Params, h: f64, rng: &mut R) -> f64 {
        half_sample(p[0] + h, p[1].abs(), rng)
    }

    fn stats(x: f64, out: &mut [f64]) {
        out[0] = x;
        out[1] = x * x;
    }

    fn tilted_stats(p: &Params, h: f64, out: &mut [f64]) {
        let (m, s) = half_moments(p[0] + h, p[1].abs());
        out[0] = m;
        out[1] = s;
    }

    fn energy_grad(p: &Params, stats: &[f64], out: &mut [f64]) {
        out[0] = -stats[0];
        out[1] = 0.5 * p[1].signum() * stats[1];
    }
}
