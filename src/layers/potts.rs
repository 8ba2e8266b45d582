//! Categorical (Potts) units in one-hot encoding.
//!
//! A Potts layer of shape `[q, sites...]` holds `q` categories per site.
//! Columns are flattened row-major, so category `c` of site `s` lives at
//! column `c * n_sites + s`.

use crate::utils::logsumexp;
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;

#[inline]
fn col(c: usize, site: usize, n_sites: usize) -> usize {
    c * n_sites + site
}

/// `Σ_sites log Σ_c exp(θ_c + h_c)` for every row of `inputs`.
pub(crate) fn cgf(theta: ArrayView1<f64>, q: usize, inputs: &Array2<f64>) -> Array1<f64> {
    let n_sites = if q == 0 { 0 } else { theta.len() / q };
    let mut out = Array1::zeros(inputs.nrows());
    for (b, row) in inputs.rows().into_iter().enumerate() {
        out[b] = (0..n_sites)
            .map(|s| logsumexp((0..q).map(|c| theta[col(c, s, n_sites)] + row[col(c, s, n_sites)])))
            .sum();
    }
    out
}

/// Softmax over the categories of each site.
pub(crate) fn probabilities(theta: ArrayView1<f64>, q: usize, inputs: &Array2<f64>) -> Array2<f64> {
    let n_sites = if q == 0 { 0 } else { theta.len() / q };
    let mut out = Array2::zeros(inputs.raw_dim());
    for (b, row) in inputs.rows().into_iter().enumerate() {
        for s in 0..n_sites {
            let logits: Vec<f64> = (0..q)
                .map(|c| theta[col(c, s, n_sites)] + row[col(c, s, n_sites)])
                .collect();
            let lse = logsumexp(logits.iter().copied());
            for (c, l) in logits.iter().enumerate() {
                out[[b, col(c, s, n_sites)]] = (l - lse).exp();
            }
        }
    }
    out
}

/// One-hot encoding of the most probable category at each site.
pub(crate) fn mode(theta: ArrayView1<f64>, q: usize, inputs: &Array2<f64>) -> Array2<f64> {
    let n_sites = if q == 0 { 0 } else { theta.len() / q };
    let mut out = Array2::zeros(inputs.raw_dim());
    for (b, row) in inputs.rows().into_iter().enumerate() {
        for s in 0..n_sites {
            let mut best = 0;
            let mut best_logit = f64::NEG_INFINITY;
            for c in 0..q {
                let l = theta[col(c, s, n_sites)] + row[col(c, s, n_sites)];
                if l > best_logit {
                    best_logit = l;
                    best = c;
                }
            }
            out[[b, col(best, s, n_sites)]] = 1.0;
        }
    }
    out
}

/// One-hot categorical draw at each site.
pub(crate) fn sample<R: Rng + ?Sized>(
    theta: ArrayView1<f64>,
    q: usize,
    inputs: &Array2<f64>,
    rng: &mut R,
) -> Array2<f64> {
    let n_sites = if q == 0 { 0 } else { theta.len() / q };
    let probs = probabilities(theta, q, inputs);
    let mut out = Array2::zeros(inputs.raw_dim());
    for b in 0..inputs.nrows() {
        for s in 0..n_sites {
            let u: f64 = rng.gen();
            let mut acc = 0.0;
            let mut chosen = q - 1;
            for c in 0..q {
                acc += probs[[b, col(c, s, n_sites)]];
                if u < acc {
                    chosen = c;
                    break;
                }
            }
            out[[b, col(chosen, s, n_sites)]] = 1.0;
        }
    }
    out
}

/// Index of the active category at `site` in a one-hot row.
pub(crate) fn active_category(row: ArrayView1<f64>, q: usize, site: usize) -> usize {
    let n_sites = if q == 0 { 0 } else { row.len() / q };
    let mut best = 0;
    for c in 1..q {
        if row[col(c, site, n_sites)] > row[col(best, site, n_sites)] {
            best = c;
        }
    }
    best
}

/// Writes a one-hot `category` at `site` into `row`.
pub(crate) fn set_category(mut row: ndarray::ArrayViewMut1<f64>, q: usize, site: usize, category: usize) {
    let n_sites = if q == 0 { 0 } else { row.len() / q };
    for c in 0..q {
        row[col(c, site, n_sites)] = if c == category { 1.0 } else { 0.0 };
    }
}

/// Subtracts the category mean at every site (zero-sum gauge).
pub(crate) fn zerosum_columns(values: &mut Array1<f64>, q: usize) {
    let n_sites = if q == 0 { 0 } else { values.len() / q };
    for s in 0..n_sites {
        let mean = (0..q).map(|c| values[col(c, s, n_sites)]).sum::<f64>() / q as f64;
        for c in 0..q {
            values[col(c, s, n_sites)] -= mean;
        }
    }
}
