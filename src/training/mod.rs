//! Contrastive-divergence training loops.
//!
//! Every entry point runs the same epoch/minibatch schedule:
//!
//! 1. validate the data against the visible layer, the sample weights and the batch size
//! 2. per minibatch: advance the model chains, compute the CD gradient
//!    (data term minus model term), add the regularization gradient, and
//!    hand the result to the optimizer
//! 3. per epoch: record the log-pseudolikelihood of the training set (discrete
//!    visible layers only) and the wall time
//!
//! The model is only written through [`Rbm::apply_gradient`]; chains and
//! running averages belong to the loop and are returned to the caller
//! where continuation makes sense.

pub mod autodiff;
pub mod centered;
pub mod history;
pub mod optim;
pub mod weightnorm;

pub use autodiff::{Differentiate, FiniteDifference};
pub use centered::{pcd_centered, CenteredConfig};
pub use history::History;
pub use optim::{Adam, Optimizer, ParamKey, Sgd};
pub use weightnorm::{pcd_weightnorm, WeightNormConfig};

use crate::core::{contrastive_divergence, regularization_loss, regularize, Gradient, Rbm, RbmResult, Regularization};
use crate::data::{minibatches, select_rows, select_weights, validate_training_data};
use crate::partition::{log_pseudolikelihood, log_pseudolikelihood_exact};
use crate::sampling::sample_v_from_v;
use crate::utils::weighted_mean;
use ndarray::{Array1, Array2};
use rand::seq::index::sample as sample_indices;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Schedule and penalties shared by all training loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Samples per minibatch; must lie in `[1, n_samples]`
    pub batch_size: usize,
    pub epochs: usize,
    /// Gibbs steps per minibatch
    pub steps: usize,
    pub regularization: Regularization,
    /// Shuffle sample order every epoch
    pub shuffle: bool,
    /// Evaluate the exact pseudolikelihood at the end of each epoch
    /// instead of the one-site estimate
    pub lpl_exact: bool,
    /// Re-impose the Potts zero-sum gauge after every update
    pub zerosum: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            epochs: 1,
            steps: 1,
            regularization: Regularization::default(),
            shuffle: true,
            lpl_exact: false,
            zerosum: true,
        }
    }
}

/// Options of plain CD.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CdConfig {
    /// Start every minibatch's chains at the data (CD-k) instead of fresh
    /// draws from the visible prior
    pub chains_from_data: bool,
}

/// Result of a persistent training run.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub history: History,
    /// Final fantasy particles, usable to continue training
    pub fantasy: Array2<f64>,
}

/// Losses reported for one minibatch.
pub(crate) struct BatchLoss {
    pub cd_loss: f64,
    pub reg_loss: f64,
}

/// Plain contrastive divergence: fresh chains for every minibatch.
pub fn cd<R: Rng + ?Sized>(
    rbm: &mut Rbm,
    data: &Array2<f64>,
    weights: Option<&Array1<f64>>,
    config: &TrainConfig,
    cd_config: &CdConfig,
    optimizer: &mut dyn Optimizer,
    rng: &mut R,
) -> RbmResult<History> {
    run_epochs(rbm, data, weights, config, rng, |rbm, vd, wd, rng| {
        let v0 = if cd_config.chains_from_data {
            vd.clone()
        } else {
            rbm.visible().sample_from_prior(vd.nrows(), rng)
        };
        let vm = sample_v_from_v(rbm, &v0, config.steps, rng)?;
        let grad = contrastive_divergence(rbm, vd, &vm, wd, None, None)?;
        let cd_loss = cd_loss(rbm, vd, &vm, wd)?;
        let reg_loss = update(rbm, grad, config, &mut *optimizer)?;
        Ok(BatchLoss { cd_loss, reg_loss })
    })
}

/// Persistent contrastive divergence.
///
/// Fantasy particles start from `fantasy` (or `batch_size` random data
/// rows) and are carried across minibatches and epochs. The visible data
/// term uses sufficient statistics of the full dataset.
pub fn pcd<R: Rng + ?Sized>(
    rbm: &mut Rbm,
    data: &Array2<f64>,
    weights: Option<&Array1<f64>>,
    config: &TrainConfig,
    optimizer: &mut dyn Optimizer,
    fantasy: Option<Array2<f64>>,
    rng: &mut R,
) -> RbmResult<TrainOutcome> {
    validate_training_data(rbm.visible(), data, weights, config.batch_size)?;
    let stats = rbm.visible().suffstats(data, weights)?;
    let mut chains = init_fantasy(rbm, data, config.batch_size, fantasy, rng)?;
    let history = run_epochs(rbm, data, weights, config, rng, |rbm, vd, wd, rng| {
        chains = sample_v_from_v(rbm, &chains, config.steps, rng)?;
        let grad = contrastive_divergence(rbm, vd, &chains, wd, None, Some(&stats))?;
        let cd_loss = cd_loss(rbm, vd, &chains, wd)?;
        let reg_loss = update(rbm, grad, config, &mut *optimizer)?;
        Ok(BatchLoss { cd_loss, reg_loss })
    })?;
    Ok(TrainOutcome {
        history,
        fantasy: chains,
    })
}

/// Shared epoch/minibatch schedule. `batch_step` performs one update and
/// reports its losses. Minibatches whose sample weights sum to zero are skipped.
pub(crate) fn run_epochs<R, F>(
    rbm: &mut Rbm,
    data: &Array2<f64>,
    weights: Option<&Array1<f64>>,
    config: &TrainConfig,
    rng: &mut R,
    mut batch_step: F,
) -> RbmResult<History>
where
    R: Rng + ?Sized,
    F: FnMut(&mut Rbm, &Array2<f64>, Option<&Array1<f64>>, &mut R) -> RbmResult<BatchLoss>,
{
    validate_training_data(rbm.visible(), data, weights, config.batch_size)?;
    let discrete = rbm.visible().kind().is_discrete();
    if !discrete {
        log::warn!(
            "{:?} visible units: skipping pseudolikelihood evaluation",
            rbm.visible().kind()
        );
    }
    let mut history = History::new();
    let mut batch_count = 0usize;
    for epoch in 1..=config.epochs {
        let started = Instant::now();
        for idx in minibatches(data.nrows(), config.batch_size, config.shuffle, rng) {
            let vd = select_rows(data, &idx);
            let wd = select_weights(weights, &idx);
            if wd.as_ref().is_some_and(|w| w.sum() <= 0.0) {
                log::debug!("epoch {epoch}: skipping minibatch with zero total weight");
                continue;
            }
            let loss = batch_step(rbm, &vd, wd.as_ref(), rng)?;
            batch_count += 1;
            history.push("batch", batch_count as f64);
            history.push("cd_loss", loss.cd_loss);
            history.push("reg_loss", loss.reg_loss);
            log::debug!(
                "epoch {epoch} batch {batch_count}: cd_loss={:.5} reg_loss={:.5}",
                loss.cd_loss,
                loss.reg_loss
            );
        }
        let dt = started.elapsed().as_secs_f64();
        history.push("epoch", epoch as f64);
        history.push("dt", dt);
        if discrete {
            match evaluate_lpl(rbm, data, weights, config.lpl_exact, rng) {
                Ok(lpl) => {
                    history.push("lpl", lpl);
                    log::info!("epoch {epoch}/{}: lpl={lpl:.5} ({dt:.2}s)", config.epochs);
                }
                Err(e) => log::warn!("epoch {epoch}: pseudolikelihood failed: {e}"),
            }
        } else {
            log::info!("epoch {epoch}/{} ({dt:.2}s)", config.epochs);
        }
    }
    Ok(history)
}

/// Weighted mean log-pseudolikelihood of `data`.
pub fn evaluate_lpl<R: Rng + ?Sized>(
    rbm: &Rbm,
    data: &Array2<f64>,
    weights: Option<&Array1<f64>>,
    exact: bool,
    rng: &mut R,
) -> RbmResult<f64> {
    let lpl = if exact {
        log_pseudolikelihood_exact(rbm, data)?
    } else {
        log_pseudolikelihood(rbm, data, rng)?
    };
    Ok(weighted_mean(&lpl, weights))
}

/// `⟨F(vd)⟩_wd - ⟨F(vm)⟩`, the quantity whose gradient CD follows.
pub(crate) fn cd_loss(rbm: &Rbm, vd: &Array2<f64>, vm: &Array2<f64>, wd: Option<&Array1<f64>>) -> RbmResult<f64> {
    let fd = weighted_mean(&rbm.free_energy(vd)?, wd);
    let fm = weighted_mean(&rbm.free_energy(vm)?, None);
    Ok(fd - fm)
}

/// Regularizes `grad`, applies it, and re-imposes the gauge. Returns the
/// penalty value before the step.
pub(crate) fn update(
    rbm: &mut Rbm,
    mut grad: Gradient,
    config: &TrainConfig,
    optimizer: &mut dyn Optimizer,
) -> RbmResult<f64> {
    let reg_loss = regularization_loss(rbm, &config.regularization);
    regularize(&mut grad, rbm, &config.regularization);
    rbm.apply_gradient(&grad, optimizer)?;
    if config.zerosum {
        rbm.zerosum();
    }
    Ok(reg_loss)
}

/// Initial persistent chains: the given particles, or `n` distinct random data rows.
pub(crate) fn init_fantasy<R: Rng + ?Sized>(
    rbm: &Rbm,
    data: &Array2<f64>,
    n: usize,
    fantasy: Option<Array2<f64>>,
    rng: &mut R,
) -> RbmResult<Array2<f64>> {
    match fantasy {
        Some(f) => {
            rbm.visible().check_batch(&f)?;
            Ok(f)
        }
        None => {
            let idx = sample_indices(rng, data.nrows(), n.min(data.nrows())).into_vec();
            Ok(select_rows(data, &idx))
        }
    }
}
