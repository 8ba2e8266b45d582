//! Ising spins taking values in `{-1, +1}`.

use super::{Params, Units};
use crate::utils::{log1pexp, sigmoid};
use rand::Rng;

/// `E(s) = -θ s`, `s ∈ {-1, +1}`.
pub(crate) struct SpinUnits;

impl Units for SpinUnits {
    fn energy(p: &Params, x: f64) -> f64 {
        -p[0] * x
    }

    fn cgf(p: &Params, h: f64) -> f64 {
        // log(e^t + e^-t)
        let t = (p[0] + h).abs();
        t + log1pexp(-2.0 * t)
    }

    fn mean(p: &Params, h: f64) -> f64 {
        (p[0] + h).tanh()
    }

    fn var(p: &Params, h: f64) -> f64 {
        let m = (p[0] + h).tanh();
        1.0 - m * m
    }

    fn mode(p: &Params, h: f64) -> f64 {
        if p[0] + h >= 0.0 {
            1.0
        } else {
            -1.0
        }
    }

    fn mean_abs(_p: &Params, _h: f64) -> f64 {
        1.0
    }

    fn sample<R: Rng + ?Sized>(p: &Params, h: f64, rng: &mut R) -> f64 {
        if rng.gen::<f64>() < sigmoid(2.0 * (p[0] + h)) {
            1.0
        } else {
            -1.0
        }
    }

    fn stats(x: f64, out: &mut [f64]) {
        out[0] = x;
    }

    fn tilted_stats(p: &Params, h: f64, out: &mut [f64]) {
        out[0] = Self::mean(p, h);
    }

    fn energy_grad(_p: &Params, stats: &[f64], out: &mut [f64]) {
        out[0] = -stats[0];
    }
}
