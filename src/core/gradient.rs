//! Gradient records and the contrastive-divergence estimator.

use super::{Rbm, RbmError, RbmResult};
use crate::data::check_weights;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// Gradient with respect to every parameter of an [`Rbm`].
///
/// `visible`/`hidden` mirror the layer parameter matrices `(n_params, n_units)`
/// and `w` mirrors the weights `(nv, nh)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gradient {
    pub visible: Array2<f64>,
    pub hidden: Array2<f64>,
    pub w: Array2<f64>,
}

impl Gradient {
    pub fn zeros_like(rbm: &Rbm) -> Self {
        Self {
            visible: Array2::zeros(rbm.visible().par().raw_dim()),
            hidden: Array2::zeros(rbm.hidden().par().raw_dim()),
            w: Array2::zeros(rbm.w().raw_dim()),
        }
    }

    pub(crate) fn check_shape(&self, rbm: &Rbm) -> RbmResult<()> {
        for (g, p) in [
            (&self.visible, rbm.visible().par()),
            (&self.hidden, rbm.hidden().par()),
            (&self.w, rbm.w()),
        ] {
            if g.dim() != p.dim() {
                return Err(RbmError::ShapeMismatch {
                    expected: p.shape().to_vec(),
                    actual: g.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Largest absolute entry across all parts.
    pub fn max_abs(&self) -> f64 {
        self.visible
            .iter()
            .chain(self.hidden.iter())
            .chain(self.w.iter())
            .fold(0.0, |m, x| m.max(x.abs()))
    }

    pub fn is_finite(&self) -> bool {
        self.visible
            .iter()
            .chain(self.hidden.iter())
            .chain(self.w.iter())
            .all(|x| x.is_finite())
    }
}

impl Add for Gradient {
    type Output = Gradient;

    fn add(self, rhs: Gradient) -> Gradient {
        Gradient {
            visible: self.visible + rhs.visible,
            hidden: self.hidden + rhs.hidden,
            w: self.w + rhs.w,
        }
    }
}

impl Sub for Gradient {
    type Output = Gradient;

    fn sub(self, rhs: Gradient) -> Gradient {
        Gradient {
            visible: self.visible - rhs.visible,
            hidden: self.hidden - rhs.hidden,
            w: self.w - rhs.w,
        }
    }
}

impl Mul<f64> for Gradient {
    type Output = Gradient;

    fn mul(self, rhs: f64) -> Gradient {
        Gradient {
            visible: self.visible * rhs,
            hidden: self.hidden * rhs,
            w: self.w * rhs,
        }
    }
}

impl Neg for Gradient {
    type Output = Gradient;

    fn neg(self) -> Gradient {
        self * -1.0
    }
}

/// Gradient of the (weighted) mean free energy `⟨F(v)⟩` with respect to
/// every model parameter.
///
/// ```text
/// ∂θ_vis = ∂E_vis at ⟨suffstats(v)⟩
/// ∂θ_hid = ∂E_hid at ⟨tilted suffstats(vW)⟩
/// ∂W     = -⟨vᵀ E[h | v]⟩
/// ```
///
/// # Errors
/// - `InvalidConfig` for an empty batch
/// - `ShapeMismatch` for a batch or weight-count mismatch
pub fn free_energy_grad(rbm: &Rbm, v: &Array2<f64>, weights: Option<&Array1<f64>>) -> RbmResult<Gradient> {
    if v.nrows() == 0 {
        return Err(RbmError::InvalidConfig("free energy gradient of an empty batch".to_string()));
    }
    check_weights(weights, v.nrows())?;
    let visible = rbm.visible().energy_grad(&rbm.visible().suffstats(v, weights)?)?;
    let inputs = rbm.inputs_h_from_v(v)?;
    let hidden = rbm.hidden().free_energy_grad(&inputs, weights)?;
    let mean_h = rbm.hidden().transfer_mean(&inputs)?;
    let w = match weights {
        Some(wts) => {
            let scaled = &mean_h * &wts.view().insert_axis(Axis(1));
            -v.t().dot(&scaled) / wts.sum()
        }
        None => -v.t().dot(&mean_h) / v.nrows() as f64,
    };
    Ok(Gradient { visible, hidden, w })
}

/// Contrastive-divergence gradient: data term minus model term.
///
/// `vd`/`wd` are data samples and weights, `vm`/`wm` the model (fantasy)
/// samples. When `stats` holds precomputed visible sufficient statistics of
/// the full dataset, they replace the batch statistics in the data term.
pub fn contrastive_divergence(
    rbm: &Rbm,
    vd: &Array2<f64>,
    vm: &Array2<f64>,
    wd: Option<&Array1<f64>>,
    wm: Option<&Array1<f64>>,
    stats: Option<&Array2<f64>>,
) -> RbmResult<Gradient> {
    let mut data = free_energy_grad(rbm, vd, wd)?;
    if let Some(stats) = stats {
        data.visible = rbm.visible().energy_grad(stats)?;
    }
    let model = free_energy_grad(rbm, vm, wm)?;
    Ok(data - model)
}

/// Penalty coefficients added to the CD gradient before each update.
///
/// ```text
/// R = l2_fields/2 Σ θ²  +  l1_weights Σ|w|  +  l2_weights/2 Σ w²
///   + l2l1_weights/2 Σ_μ (Σ_i |w_iμ|)²
/// ```
///
/// `θ` ranges over the field rows of both layers. Zero coefficients are skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Regularization {
    pub l2_fields: f64,
    pub l1_weights: f64,
    pub l2_weights: f64,
    pub l2l1_weights: f64,
}

impl Regularization {
    pub fn is_zero(&self) -> bool {
        self.l2_fields == 0.0 && self.l1_weights == 0.0 && self.l2_weights == 0.0 && self.l2l1_weights == 0.0
    }
}

/// Adds the penalty gradient into `grad` in place.
pub fn regularize(grad: &mut Gradient, rbm: &Rbm, reg: &Regularization) {
    if reg.l2_fields != 0.0 {
        for (g, layer) in [(&mut grad.visible, rbm.visible()), (&mut grad.hidden, rbm.hidden())] {
            for &r in layer.kind().field_rows() {
                let mut row = g.row_mut(r);
                row.scaled_add(reg.l2_fields, &layer.par().row(r));
            }
        }
    }
    let w = rbm.w();
    if reg.l1_weights != 0.0 {
        grad.w.scaled_add(reg.l1_weights, &w.mapv(signum));
    }
    if reg.l2_weights != 0.0 {
        grad.w.scaled_add(reg.l2_weights, w);
    }
    if reg.l2l1_weights != 0.0 {
        let colsum = w.mapv(f64::abs).sum_axis(Axis(0));
        let g = &w.mapv(signum) * &colsum.insert_axis(Axis(0));
        grad.w.scaled_add(reg.l2l1_weights, &g);
    }
}

/// Value of the penalty at the current parameters.
pub fn regularization_loss(rbm: &Rbm, reg: &Regularization) -> f64 {
    let mut loss = 0.0;
    if reg.l2_fields != 0.0 {
        for layer in [rbm.visible(), rbm.hidden()] {
            for &r in layer.kind().field_rows() {
                loss += 0.5 * reg.l2_fields * layer.par().row(r).mapv(|x| x * x).sum();
            }
        }
    }
    let w = rbm.w();
    if reg.l1_weights != 0.0 {
        loss += reg.l1_weights * w.mapv(f64::abs).sum();
    }
    if reg.l2_weights != 0.0 {
        loss += 0.5 * reg.l2_weights * w.mapv(|x| x * x).sum();
    }
    if reg.l2l1_weights != 0.0 {
        let colsum = w.mapv(f64::abs).sum_axis(Axis(0));
        loss += 0.5 * reg.l2l1_weights * colsum.mapv(|x| x * x).sum();
    }
    loss
}

/// `sign(x)` with `sign(0) = 0`.
fn signum(x: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        x.signum()
    }
}
