//! Double rectified Gaussian units.
//!
//! Parameters `[θp, θn, γp, γn]`. The energy is
//! ```text
//! E(x) = |γp|/2 x² - θp x   for x ≥ 0
//! E(x) = |γn|/2 x² - θn x   for x < 0
//! ```
//! The unit is a two-component mixture of half-line Gaussians whose mixing
//! weight is the softmax of the branch log-masses.

use super::relu::{half_cgf, half_mode, half_moments, half_sample};
use super::{Params, Units};
use crate::utils::{logaddexp, sigmoid};
use rand::Rng;

/// Log-masses of the positive and negative branches under field `h`.
fn branches(p: &Params, h: f64) -> (f64, f64) {
    (
        half_cgf(p[0] + h, p[2].abs()),
        half_cgf(-(p[1] + h), p[3].abs()),
    )
}

/// Probability of the positive branch.
fn positive_prob(fp: f64, fn_: f64) -> f64 {
    if fp == f64::NEG_INFINITY && fn_ == f64::NEG_INFINITY {
        0.5
    } else {
        sigmoid(fp - fn_)
    }
}

/// Expected `[x⁺, x⁻, x⁺², x⁻²]` under the tilted distribution.
fn moments(p: &Params, h: f64) -> [f64; 4] {
    let (fp, fn_) = branches(p, h);
    let pp = positive_prob(fp, fn_);
    let pn = 1.0 - pp;
    let (mp, sp) = half_moments(p[0] + h, p[2].abs());
    let (mn, sn) = half_moments(-(p[1] + h), p[3].abs());
    [pp * mp, -pn * mn, pp * sp, pn * sn]
}

pub(crate) struct DReluUnits;

impl Units for DReluUnits {
    fn energy(p: &Params, x: f64) -> f64 {
        if x == 0.0 {
            return 0.0;
        }
        let (theta, gamma) = if x > 0.0 { (p[0], p[2]) } else { (p[1], p[3]) };
        if gamma.is_infinite() {
            f64::INFINITY
        } else {
            0.5 * gamma.abs() * x * x - theta * x
        }
    }

    fn cgf(p: &Params, h: f64) -> f64 {
        let (fp, fn_) = branches(p, h);
        if fp == f64::NEG_INFINITY && fn_ == f64::NEG_INFINITY {
            // Both branches pinned: a point mass at zero.
            0.0
        } else {
            logaddexp(fp, fn_)
        }
    }

    fn mean(p: &Params, h: f64) -> f64 {
        let m = moments(p, h);
        m[0] + m[1]
    }

    fn var(p: &Params, h: f64) -> f64 {
        let m = moments(p, h);
        let mean = m[0] + m[1];
        (m[2] + m[3] - mean * mean).max(0.0)
    }

    fn mode(p: &Params, h: f64) -> f64 {
        let tp = p[0] + h;
        let tn = p[1] + h;
        let xp = half_mode(tp, p[2].abs());
        let xn = -half_mode(-tn, p[3].abs());
        let ep = if xp == 0.0 { 0.0 } else { 0.5 * p[2].abs() * xp * xp - tp * xp };
        let en = if xn == 0.0 { 0.0 } else { 0.5 * p[3].abs() * xn * xn - tn * xn };
        if ep <= en {
            xp
        } else {
            xn
        }
    }

    fn mean_abs(p: &Params, h: f64) -> f64 {
        let m = moments(p, h);
        m[0] - m[1]
    }

    fn sample<R: Rng + ?Sized>(p: &Params, h: f64, rng: &mut R) -> f64 {
        let (fp, fn_) = branches(p, h);
        if rng.gen::<f64>() < positive_prob(fp, fn_) {
            half_sample(p[0] + h, p[2].abs(), rng)
        } else {
            -half_sample(-(p[1] + h), p[3].abs(), rng)
        }
    }

    fn stats(x: f64, out: &mut [f64]) {
        let xp = x.max(0.0);
        let xn = x.min(0.0);
        out[0] = xp;
        out[1] = xn;
        out[2] = xp * xp;
        out[3] = xn * xn;
    }

    fn tilted_stats(p: &Params, h: f64, out: &mut [f64]) {
        out[..4].copy_from_slice(&moments(p, h));
    }

    fn energy_grad(p: &Params, stats: &[f64], out: &mut [f64]) {
        out[0] = -stats[0];
        out[1] = -stats[1];
        out[2] = 0.5 * p[2].signum() * stats[2];
        out[3] = 0.5 * p[3].signum() * stats[3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::relu::ReluUnits;
    use approx::assert_relative_eq;

    #[test]
    fn test_pinned_negative_branch_reduces_to_relu() {
        let d: Params = [0.7, -3.0, 1.3, f64::INFINITY];
        let r: Params = [0.7, 1.3, 0.0, 0.0];
        for &h in &[-2.0, 0.0, 1.5] {
            assert_relative_eq!(DReluUnits::cgf(&d, h), ReluUnits::cgf(&r, h), max_relative = 1e-12);
            assert_relative_eq!(DReluUnits::mean(&d, h), ReluUnits::mean(&r, h), max_relative = 1e-12);
            assert_relative_eq!(DReluUnits::var(&d, h), ReluUnits::var(&r, h), max_relative = 1e-9);
        }
    }

    #[test]
    fn test_both_branches_pinned_is_finite() {
        let d: Params = [0.7, -3.0, f64::INFINITY, f64::INFINITY];
        assert_eq!(DReluUnits::cgf(&d, 1.0), 0.0);
        assert_eq!(DReluUnits::mean(&d, 1.0), 0.0);
        assert_eq!(DReluUnits::var(&d, 1.0), 0.0);
    }

    #[test]
    fn test_mode_picks_lower_energy_branch() {
        let d: Params = [0.0, 0.0, 1.0, 1.0];
        assert!(DReluUnits::mode(&d, 2.0) > 0.0);
        assert!(DReluUnits::mode(&d, -2.0) < 0.0);
    }
}
