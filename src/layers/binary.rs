//! Bernoulli units taking values in `{0, 1}`.

use super::{Params, Units};
use crate::utils::{log1pexp, sigmoid};
use rand::Rng;

/// `E(x) = -θ x`, `x ∈ {0, 1}`.
pub(crate) struct BinaryUnits;

impl Units for BinaryUnits {
    fn energy(p: &Params, x: f64) -> f64 {
        -p[0] * x
    }

    fn cgf(p: &Params, h: f64) -> f64 {
        log1pexp(p[0] + h)
    }

    fn mean(p: &Params, h: f64) -> f64 {
        sigmoid(p[0] + h)
    }

    fn var(p: &Params, h: f64) -> f64 {
        let s = sigmoid(p[0] + h);
        s * (1.0 - s)
    }

    fn mode(p: &Params, h: f64) -> f64 {
        if p[0] + h > 0.0 {
            1.0
        } else {
            0.0
        }
    }

    fn mean_abs(p: &Params, h: f64) -> f64 {
        Self::mean(p, h)
    }

    fn sample<R: Rng + ?Sized>(p: &Params, h: f64, rng: &mut R) -> f64 {
        if rng.gen::<f64>() < sigmoid(p[0] + h) {
            1.0
        } else {
            0.0
        }
    }

    fn stats(x: f64, out: &mut [f64]) {
        out[0] = x;
    }

    fn tilted_stats(p: &Params, h: f64, out: &mut [f64]) {
        out[0] = sigmoid(p[0] + h);
    }

    fn energy_grad(_p: &Params, stats: &[f64], out: &mut [f64]) {
        out[0] = -stats[0];
    }
}
