//! Block Gibbs sampling and single-site Metropolis moves.
//!
//! One Gibbs step is a pair of half-steps `v → h → v`; only the final state
//! of the chain side being advanced is returned. The mean-field and mode
//! variants replace the draw at every half-step with the conditional mean or
//! the conditional mode.

use crate::core::{Rbm, RbmError, RbmResult};
use crate::layers::{potts, Layer, LayerKind};
use ndarray::{s, Array2};
use rand::Rng;

/// Advances visible chains by `steps` block Gibbs steps.
pub fn sample_v_from_v<R: Rng + ?Sized>(
    rbm: &Rbm,
    v: &Array2<f64>,
    steps: usize,
    rng: &mut R,
) -> RbmResult<Array2<f64>> {
    rbm.visible().check_batch(v)?;
    let mut v = v.clone();
    for _ in 0..steps {
        let h = rbm.sample_h_from_v(&v, rng)?;
        v = rbm.sample_v_from_h(&h, rng)?;
    }
    Ok(v)
}

/// Advances hidden chains by `steps` block Gibbs steps.
pub fn sample_h_from_h<R: Rng + ?Sized>(
    rbm: &Rbm,
    h: &Array2<f64>,
    steps: usize,
    rng: &mut R,
) -> RbmResult<Array2<f64>> {
    rbm.hidden().check_batch(h)?;
    let mut h = h.clone();
    for _ in 0..steps {
        let v = rbm.sample_v_from_h(&h, rng)?;
        h = rbm.sample_h_from_v(&v, rng)?;
    }
    Ok(h)
}

/// Mean-field iteration `v → E[h|v] → E[v|h]`.
pub fn mean_v_from_v(rbm: &Rbm, v: &Array2<f64>, steps: usize) -> RbmResult<Array2<f64>> {
    rbm.visible().check_batch(v)?;
    let mut v = v.clone();
    for _ in 0..steps {
        let h = rbm.mean_h_from_v(&v)?;
        v = rbm.mean_v_from_h(&h)?;
    }
    Ok(v)
}

pub fn mean_h_from_h(rbm: &Rbm, h: &Array2<f64>, steps: usize) -> RbmResult<Array2<f64>> {
    rbm.hidden().check_batch(h)?;
    let mut h = h.clone();
    for _ in 0..steps {
        let v = rbm.mean_v_from_h(&h)?;
        h = rbm.mean_h_from_v(&v)?;
    }
    Ok(h)
}

/// Zero-temperature iteration through the conditional modes.
pub fn mode_v_from_v(rbm: &Rbm, v: &Array2<f64>, steps: usize) -> RbmResult<Array2<f64>> {
    rbm.visible().check_batch(v)?;
    let mut v = v.clone();
    for _ in 0..steps {
        let h = rbm.mode_h_from_v(&v)?;
        v = rbm.mode_v_from_h(&h)?;
    }
    Ok(v)
}

pub fn mode_h_from_h(rbm: &Rbm, h: &Array2<f64>, steps: usize) -> RbmResult<Array2<f64>> {
    rbm.hidden().check_batch(h)?;
    let mut h = h.clone();
    for _ in 0..steps {
        let v = rbm.mode_v_from_h(&h)?;
        h = rbm.mode_h_from_v(&v)?;
    }
    Ok(h)
}

/// `n` independent draws from a layer with no external field.
pub fn sample_from_prior<R: Rng + ?Sized>(layer: &Layer, n: usize, rng: &mut R) -> Array2<f64> {
    layer.sample_from_prior(n, rng)
}

/// One single-site Metropolis–Hastings move per chain.
///
/// For each row of `v`, one random visible site is proposed to change
/// (binary flips `x → 1 - x`, spins `x → -x`, Potts moves to a uniformly
/// chosen other category) and the move is accepted with probability
/// `min(1, exp(-β ΔE))`, where `ΔE` is the change of the joint energy
/// `E(v, h)` with `h` held fixed. Returns the number of accepted moves.
///
/// # Errors
/// - `Domain` for continuous visible layers
/// - `ShapeMismatch` if `v` and `h` do not pair up row by row
pub fn metropolis_step<R: Rng + ?Sized>(
    rbm: &Rbm,
    v: &mut Array2<f64>,
    h: &Array2<f64>,
    beta: f64,
    rng: &mut R,
) -> RbmResult<usize> {
    let kind = rbm.visible().kind();
    if !kind.is_discrete() {
        return Err(RbmError::Domain(format!("no single-site moves for {kind:?} units")));
    }
    rbm.visible().check_batch(v)?;
    rbm.hidden().check_batch(h)?;
    if v.nrows() != h.nrows() {
        return Err(RbmError::ShapeMismatch {
            expected: vec![v.nrows(), h.ncols()],
            actual: h.shape().to_vec(),
        });
    }
    let n_sites = rbm.visible().n_sites();
    if n_sites == 0 {
        return Ok(0);
    }
    let q = rbm.visible().n_categories();
    let mut accepted = 0;
    for b in 0..v.nrows() {
        let current = v.slice(s![b..b + 1, ..]).to_owned();
        let hb = h.slice(s![b..b + 1, ..]).to_owned();
        let mut proposal = current.clone();
        let site = rng.gen_range(0..n_sites);
        match kind {
            LayerKind::Binary => proposal[[0, site]] = 1.0 - current[[0, site]],
            LayerKind::Spin => proposal[[0, site]] = -current[[0, site]],
            _ => {
                if q < 2 {
                    continue;
                }
                let c = potts::active_category(current.row(0), q, site);
                let mut other = rng.gen_range(0..q - 1);
                if other >= c {
                    other += 1;
                }
                potts::set_category(proposal.row_mut(0), q, site, other);
            }
        }
        let de = rbm.energy(&proposal, &hb)?[0] - rbm.energy(&current, &hb)?[0];
        if rng.gen::<f64>() < (-beta * de).exp() {
            v.row_mut(b).assign(&proposal.row(0));
            accepted += 1;
        }
    }
    Ok(accepted)
}

/// Runs `steps` sweeps of: hidden Gibbs draw at inverse temperature `β`,
/// then one Metropolis move per chain on the visible layer.
pub fn metropolis<R: Rng + ?Sized>(
    rbm: &Rbm,
    v: &Array2<f64>,
    beta: f64,
    steps: usize,
    rng: &mut R,
) -> RbmResult<Array2<f64>> {
    let tempered = rbm.tempered(beta)?;
    let mut v = v.clone();
    for _ in 0..steps {
        let h = tempered.sample_h_from_v(&v, rng)?;
        metropolis_step(rbm, &mut v, &h, beta, rng)?;
    }
    Ok(v)
}
