//! Numerical helpers shared by the unit layers and estimators.
//!
//! Everything here is scalar math: stable log-sum-exp forms, the scaled
//! complementary error function, and truncated-normal sampling used by the
//! rectified layers.

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::StandardNormal;

/// `sqrt(2 / pi)`
pub const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;

/// Logistic sigmoid, stable for large `|x|`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `log(1 + exp(x))` without overflow.
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// `log(exp(a) + exp(b))`. Two `-inf` arguments give `-inf`, not NaN.
#[inline]
pub fn logaddexp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let m = a.max(b);
    m + (-(a - b).abs()).exp().ln_1p()
}

/// Log-sum-exp over an iterator of values.
pub fn logsumexp<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let values: Vec<f64> = values.into_iter().collect();
    let m = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if m == f64::NEG_INFINITY || m == f64::INFINITY {
        return m;
    }
    m + values.iter().map(|v| (v - m).exp()).sum::<f64>().ln()
}

/// `log(mean(exp(values)))`
pub fn logmeanexp(values: &Array1<f64>) -> f64 {
    logsumexp(values.iter().copied()) - (values.len() as f64).ln()
}

/// Scaled complementary error function, `erfcx(x) = exp(x^2) erfc(x)`.
///
/// Uses the all-positive series for `erf` on `[0, 2.5)`, a continued
/// fraction above that, and the reflection `erfcx(-x) = 2 exp(x^2) - erfcx(x)`
/// for negative arguments.
pub fn erfcx(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x < 0.0 {
        return 2.0 * (x * x).exp() - erfcx(-x);
    }
    if x < 2.5 {
        let two_x2 = 2.0 * x * x;
        let mut term = x;
        let mut sum = x;
        let mut n = 0.0;
        while term > 1e-17 * sum {
            n += 1.0;
            term *= two_x2 / (2.0 * n + 1.0);
            sum += term;
            if n > 300.0 {
                break;
            }
        }
        (x * x).exp() - 2.0 / std::f64::consts::PI.sqrt() * sum
    } else if x.is_infinite() {
        0.0
    } else {
        // erfc(x) = exp(-x^2)/sqrt(pi) * 1/(x + (1/2)/(x + 1/(x + (3/2)/(x + ...))))
        let tiny = 1e-300;
        let mut f = x;
        let mut c = f;
        let mut d = 0.0;
        for k in 1..2000 {
            let a = k as f64 / 2.0;
            d = x + a * d;
            if d.abs() < tiny {
                d = tiny;
            }
            c = x + a / c;
            if c.abs() < tiny {
                c = tiny;
            }
            d = 1.0 / d;
            let delta = c * d;
            f *= delta;
            if (delta - 1.0).abs() < 1e-16 {
                break;
            }
        }
        1.0 / (std::f64::consts::PI.sqrt() * f)
    }
}

/// `log(erfcx(x))`, finite for all finite `x`.
pub fn logerfcx(x: f64) -> f64 {
    if x < 0.0 {
        // erfc(x) lies in (1, 2] here, so the log never underflows.
        x * x + erfc(x).ln()
    } else {
        erfcx(x).ln()
    }
}

/// Complementary error function.
pub fn erfc(x: f64) -> f64 {
    if x >= 0.0 {
        erfcx(x) * (-x * x).exp()
    } else {
        2.0 - erfcx(-x) * (-x * x).exp()
    }
}

/// Draws from a standard normal truncated to `[a, inf)`.
///
/// Plain rejection for `a < 0.5`, Robert's exponential proposal otherwise.
pub fn randnt<R: Rng + ?Sized>(rng: &mut R, a: f64) -> f64 {
    if a < 0.5 {
        loop {
            let z: f64 = rng.sample(StandardNormal);
            if z >= a {
                return z;
            }
        }
    }
    let lambda = 0.5 * (a + (a * a + 4.0).sqrt());
    loop {
        let u: f64 = rng.gen();
        let z = a - (1.0 - u).ln() / lambda;
        let rho = (-0.5 * (z - lambda) * (z - lambda)).exp();
        if rng.gen::<f64>() <= rho {
            return z;
        }
    }
}

/// Weighted average of the rows of `x`. `None` weights average uniformly.
pub fn weighted_row_mean(x: &Array2<f64>, weights: Option<&Array1<f64>>) -> Array1<f64> {
    match weights {
        None => {
            if x.nrows() == 0 {
                Array1::zeros(x.ncols())
            } else {
                x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()))
            }
        }
        Some(w) => {
            let total = w.sum();
            w.dot(x) / total
        }
    }
}

/// Weighted average of a vector of per-sample values.
pub fn weighted_mean(values: &Array1<f64>, weights: Option<&Array1<f64>>) -> f64 {
    match weights {
        None => values.mean().unwrap_or(0.0),
        Some(w) => w.dot(values) / w.sum(),
    }
}
