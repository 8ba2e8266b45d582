//! Rectified units with a bounded asymmetry parameterization.
//!
//! ```text
//! ξp = (1 + |ξ|) / (1 + max(2ξ, 0))     γp = |γ| ξp     θp = θ + Δ ξp
//! ξn = (1 + |ξ|) / (1 - min(2ξ, 0))     γn = |γ| ξn     θn = θ - Δ ξn
//! ```
//! Unlike pReLU, every finite `ξ` maps to two finite branch precisions.

use super::drelu::DReluUnits;
use super::{Params, Units};
use rand::Rng;

/// `(ξp, ξn, dξp/dξ, dξn/dξ)`
fn xi_factors(xi: f64) -> (f64, f64, f64, f64) {
    if xi >= 0.0 {
        let d = 1.0 + 2.0 * xi;
        ((1.0 + xi) / d, 1.0 + xi, -1.0 / (d * d), 1.0)
    } else {
        let d = 1.0 - 2.0 * xi;
        (1.0 - xi, (1.0 - xi) / d, -1.0, 1.0 / (d * d))
    }
}

/// `[θ, γ, Δ, ξ]` to `[θp, θn, γp, γn]`.
pub(crate) fn to_drelu(p: &Params) -> Params {
    let (theta, gamma, delta) = (p[0], p[1].abs(), p[2]);
    let (xp, xn, _, _) = xi_factors(p[3]);
    [theta + delta * xp, theta - delta * xn, gamma * xp, gamma * xn]
}

/// `[θp, θn, γp, γn]` to `[θ, γ, Δ, ξ]`. `None` unless both precisions are finite.
pub(crate) fn from_drelu(d: &Params) -> Option<Params> {
    let (theta_p, theta_n, gamma_p, gamma_n) = (d[0], d[1], d[2].abs(), d[3].abs());
    if gamma_p.is_infinite() || gamma_n.is_infinite() {
        return None;
    }
    let sum = gamma_p + gamma_n;
    let gamma = 2.0 * gamma_p * gamma_n / sum;
    Some([
        (theta_p * gamma_n + theta_n * gamma_p) / sum,
        gamma,
        gamma * (theta_p - theta_n) / sum,
        (gamma_n - gamma_p) / (2.0 * gamma_p.min(gamma_n)),
    ])
}

pub(crate) struct XReluUnits;

impl Units for XReluUnits {
    fn energy(p: &Params, x: f64) -> f64 {
        DReluUnits::energy(&to_drelu(p), x)
    }

    fn cgf(p: &Params, h: f64) -> f64 {
        DReluUnits::cgf(&to_drelu(p), h)
    }

    fn mean(p: &Params, h: f64) -> f64 {
        DReluUnits::mean(&to_drelu(p), h)
    }

    fn var(p: &Params, h: f64) -> f64 {
        DReluUnits::var(&to_drelu(p), h)
    }

    fn mode(p: &Params, h: f64) -> f64 {
        DReluUnits::mode(&to_drelu(p), h)
    }

    fn mean_abs(p: &Params, h: f64) -> f64 {
        DReluUnits::mean_abs(&to_drelu(p), h)
    }

    fn sample<R: Rng + ?Sized>(p: &Params, h: f64, rng: &mut R) -> f64 {
        DReluUnits::sample(&to_drelu(p), h, rng)
    }

    fn stats(x: f64, out: &mut [f64]) {
        DReluUnits::stats(x, out);
    }

    fn tilted_stats(p: &Params, h: f64, out: &mut [f64]) {
        DReluUnits::tilted_stats(&to_drelu(p), h, out);
    }

    fn energy_grad(p: &Params, stats: &[f64], out: &mut [f64]) {
        let (gamma, delta) = (p[1].abs(), p[2]);
        let (fp, fn_, dfp, dfn) = xi_factors(p[3]);
        let (xp, xn, xp2, xn2) = (stats[0], stats[1], stats[2], stats[3]);
        out[0] = -(xp + xn);
        out[1] = 0.5 * p[1].signum() * (xp2 * fp + xn2 * fn_);
        out[2] = -xp * fp + xn * fn_;
        out[3] = dfp * (0.5 * gamma * xp2 - delta * xp) + dfn * (0.5 * gamma * xn2 + delta * xn);
    }
}
