//! Partition-function estimation.
//!
//! Annealed importance sampling moves chains along the path
//!
//! ```text
//! p_β(v, h) ∝ exp(-E_β(v, h)),   E_β = E_vis^β(v) + E_hid(h) - β v·W·h
//! ```
//!
//! where `E_vis^β` interpolates the parameters of a tractable initial
//! visible layer into the model's visible layer. At `β = 0` the model
//! factorizes and `log Z_0` is exact.

pub mod pseudolikelihood;

pub use pseudolikelihood::{log_pseudolikelihood, log_pseudolikelihood_exact, log_pseudolikelihood_sites};

use crate::core::{Rbm, RbmError, RbmResult};
use crate::layers::Layer;
use crate::sampling::sample_v_from_v;
use crate::utils::logmeanexp;
use ndarray::Array1;
use rand::Rng;

/// Result of [`ais`].
#[derive(Debug, Clone)]
pub struct AisEstimate {
    /// Estimate of `log Z`
    pub log_z: f64,
    /// Accumulated log importance weight of each chain
    pub log_weights: Array1<f64>,
}

impl AisEstimate {
    /// Spread of the importance weights, as the effective sample size.
    pub fn effective_sample_size(&self) -> f64 {
        let m = self.log_weights.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let w = self.log_weights.mapv(|x| (x - m).exp());
        let s = w.sum();
        s * s / w.mapv(|x| x * x).sum()
    }
}

/// Intermediate model at inverse temperature `β`.
pub fn anneal(init: &Layer, rbm: &Rbm, beta: f64) -> RbmResult<Rbm> {
    let visible = Layer::anneal(init, rbm.visible(), beta)?;
    Rbm::new(visible, rbm.hidden().clone(), rbm.w() * beta)
}

/// Estimates `log Z` with `nbetas` evenly spaced temperatures from 0 to 1
/// and `nsamples` independent chains.
///
/// `init` is the visible layer at `β = 0`; by default the model's own
/// visible layer.
///
/// # Errors
/// - `InvalidConfig` if `nbetas < 2` or `nsamples == 0`
/// - `InvalidConfig`/`ShapeMismatch` if `init` cannot be annealed into the visible layer
pub fn ais<R: Rng + ?Sized>(
    rbm: &Rbm,
    nbetas: usize,
    nsamples: usize,
    init: Option<&Layer>,
    rng: &mut R,
) -> RbmResult<AisEstimate> {
    if nbetas < 2 {
        return Err(RbmError::InvalidConfig(format!("ais needs at least 2 temperatures, got {nbetas}")));
    }
    if nsamples == 0 {
        return Err(RbmError::InvalidConfig("ais needs at least one chain".to_string()));
    }
    let init = init.unwrap_or_else(|| rbm.visible());
    let betas: Vec<f64> = (0..nbetas).map(|k| k as f64 / (nbetas - 1) as f64).collect();

    let mut prev = anneal(init, rbm, betas[0])?;
    let log_z0 = prev.log_partition_zero_weight();
    let mut v = prev.visible().sample_from_prior(nsamples, rng);
    let mut log_weights = Array1::zeros(nsamples);
    for &beta in &betas[1..] {
        let cur = anneal(init, rbm, beta)?;
        log_weights += &(prev.free_energy(&v)? - cur.free_energy(&v)?);
        v = sample_v_from_v(&cur, &v, 1, rng)?;
        prev = cur;
    }
    let log_z = log_z0 + logmeanexp(&log_weights);
    log::debug!("ais: nbetas={nbetas} nsamples={nsamples} log_z={log_z:.6}");
    Ok(AisEstimate { log_z, log_weights })
}
