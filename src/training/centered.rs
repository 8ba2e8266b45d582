//! Persistent CD with centered gradients.
//!
//! The update is computed for the centered energy
//! `-(v - λv)·W·(h - λh) + ...` and mapped back onto the plain parameters:
//!
//! ```text
//! ∂Wc    = ∂W - λv ⊗ ∂θh - ∂θv ⊗ λh
//! ∂θv_c  = ∂θv - ∂Wc · λh
//! ∂θh_c  = ∂θh - ∂Wcᵀ · λv
//! ```
//!
//! `∂θ` is the gradient with respect to a uniform shift of a layer's
//! external field (the sum of its field rows). `λv` is the data mean;
//! `λh` is an exponential moving average of the hidden means on data.

use super::{cd_loss, init_fantasy, run_epochs, update, BatchLoss, History, Optimizer, TrainConfig, TrainOutcome};
use crate::core::{contrastive_divergence, Gradient, Rbm, RbmError, RbmResult};
use crate::data::validate_training_data;
use crate::sampling::sample_v_from_v;
use crate::utils::weighted_row_mean;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Options of [`pcd_centered`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CenteredConfig {
    /// Fraction of the running hidden mean kept at each minibatch, in `[0, 1)`
    pub decay: f64,
}

impl Default for CenteredConfig {
    fn default() -> Self {
        Self { decay: 0.9 }
    }
}

/// Rewrites a plain-parameter gradient into its centered form around
/// offsets `lv` (visible) and `lh` (hidden).
pub fn center_gradient(rbm: &Rbm, grad: Gradient, lv: &Array1<f64>, lh: &Array1<f64>) -> Gradient {
    let Gradient {
        mut visible,
        mut hidden,
        w,
    } = grad;
    let gv = rbm.visible().field_sum(&visible);
    let gh = rbm.hidden().field_sum(&hidden);
    let wc = w - outer(lv, &gh) - outer(&gv, lh);
    rbm.visible().shift_field(&mut visible, &(-wc.dot(lh)));
    rbm.hidden().shift_field(&mut hidden, &(-wc.t().dot(lv)));
    Gradient { visible, hidden, w: wc }
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    a.view().insert_axis(Axis(1)).dot(&b.view().insert_axis(Axis(0)))
}

/// Persistent CD with centered gradients. See the module docs.
///
/// # Errors
/// - `InvalidConfig` if `decay ∉ [0, 1)` or the data/batch size are invalid
#[allow(clippy::too_many_arguments)]
pub fn pcd_centered<R: Rng + ?Sized>(
    rbm: &mut Rbm,
    data: &Array2<f64>,
    weights: Option<&Array1<f64>>,
    config: &TrainConfig,
    centered: &CenteredConfig,
    optimizer: &mut dyn Optimizer,
    fantasy: Option<Array2<f64>>,
    rng: &mut R,
) -> RbmResult<TrainOutcome> {
    if !(0.0..1.0).contains(&centered.decay) {
        return Err(RbmError::InvalidConfig(format!(
            "centering decay must lie in [0, 1), got {}",
            centered.decay
        )));
    }
    validate_training_data(rbm.visible(), data, weights, config.batch_size)?;
    let stats = rbm.visible().suffstats(data, weights)?;
    let lv = weighted_row_mean(data, weights);
    let mut lh = weighted_row_mean(&rbm.mean_h_from_v(data)?, weights);
    let mut chains = init_fantasy(rbm, data, config.batch_size, fantasy, rng)?;
    let decay = centered.decay;
    let history: History = run_epochs(rbm, data, weights, config, rng, |rbm, vd, wd, rng| {
        chains = sample_v_from_v(rbm, &chains, config.steps, rng)?;
        let batch_h = weighted_row_mean(&rbm.mean_h_from_v(vd)?, wd);
        lh = &lh * decay + &batch_h * (1.0 - decay);
        let grad = contrastive_divergence(rbm, vd, &chains, wd, None, Some(&stats))?;
        let grad = center_gradient(rbm, grad, &lv, &lh);
        let cd_loss = cd_loss(rbm, vd, &chains, wd)?;
        let reg_loss = update(rbm, grad, config, &mut *optimizer)?;
        Ok(BatchLoss { cd_loss, reg_loss })
    })?;
    Ok(TrainOutcome {
        history,
        fantasy: chains,
    })
}
