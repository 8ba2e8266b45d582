//! Parametric rectified units: dReLU re-expressed through a common field `θ`,
//! precision `γ`, branch offset `Δ` and asymmetry `η ∈ [-1, 1]`.
//!
//! ```text
//! γp = |γ| / (1 + η)     θp = θ + Δ / (1 + η)
//! γn = |γ| / (1 - η)     θn = θ - Δ / (1 - η)
//! ```
//! `η = ±1` pins one branch at zero.

use super::drelu::DReluUnits;
use super::{Params, Units};
use rand::Rng;

/// Reciprocal that maps a vanishing denominator to a pinned branch.
fn recip(d: f64) -> Option<f64> {
    if d == 0.0 {
        None
    } else {
        Some(1.0 / d)
    }
}

/// `[θ, γ, Δ, η]` to `[θp, θn, γp, γn]`.
pub(crate) fn to_drelu(p: &Params) -> Params {
    let (theta, gamma, delta, eta) = (p[0], p[1].abs(), p[2], p[3]);
    let (theta_p, gamma_p) = match recip(1.0 + eta) {
        Some(a) => (theta + delta * a, gamma * a),
        None => (0.0, f64::INFINITY),
    };
    let (theta_n, gamma_n) = match recip(1.0 - eta) {
        Some(a) => (theta - delta * a, gamma * a),
        None => (0.0, f64::INFINITY),
    };
    [theta_p, theta_n, gamma_p, gamma_n]
}

/// `[θp, θn, γp, γn]` to `[θ, γ, Δ, η]`. `None` when both branches are pinned.
pub(crate) fn from_drelu(d: &Params) -> Option<Params> {
    let (theta_p, theta_n, gamma_p, gamma_n) = (d[0], d[1], d[2].abs(), d[3].abs());
    match (gamma_p.is_infinite(), gamma_n.is_infinite()) {
        (true, true) => None,
        (false, true) => Some([theta_p, 2.0 * gamma_p, 0.0, 1.0]),
        (true, false) => Some([theta_n, 2.0 * gamma_n, 0.0, -1.0]),
        (false, false) => {
            let sum = gamma_p + gamma_n;
            let gamma = 2.0 * gamma_p * gamma_n / sum;
            Some([
                (theta_p * gamma_n + theta_n * gamma_p) / sum,
                gamma,
                gamma * (theta_p - theta_n) / sum,
                (gamma_n - gamma_p) / sum,
            ])
        }
    }
}

pub(crate) struct PReluUnits;

impl Units for PReluUnits {
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
        let (gamma, delta, eta) = (p[1].abs(), p[2], p[3]);
        // A pinned branch has vanishing statistics, so its coefficients drop out.
        let ap = recip(1.0 + eta).unwrap_or(0.0);
        let an = recip(1.0 - eta).unwrap_or(0.0);
        let (xp, xn, xp2, xn2) = (stats[0], stats[1], stats[2], stats[3]);
        out[0] = -(xp + xn);
        out[1] = 0.5 * p[1].signum() * (xp2 * ap + xn2 * an);
        out[2] = -xp * ap + xn * an;
        out[3] = delta * (xp * ap * ap + xn * an * an) + 0.5 * gamma * (xn2 * an * an - xp2 * ap * ap);
    }
}
