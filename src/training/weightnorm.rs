//! Persistent CD with weight normalization.
//!
//! Each hidden unit's incoming weights are split into a norm and a unit
//! direction, `w[:, μ] = ω_μ u[:, μ]` with `‖u[:, μ]‖ = 1`. Given the
//! gradient `G = ∂L/∂w` of the CD loss (plus penalties):
//!
//! ```text
//! ∂ω_μ      = Σ_i u_iμ G_iμ
//! ∂u[:, μ]  = ω_μ (I - u uᵀ) G[:, μ]
//! ```
//!
//! Optionally the same gradient is obtained from a [`Differentiate`]
//! implementation applied to the loss as a function of the flat vector
//! `[ω; u]` (with `u` renormalized inside the loss) and the two are compared.

use super::{
    cd_loss, init_fantasy, run_epochs, BatchLoss, Differentiate, FiniteDifference, Optimizer, ParamKey,
    TrainConfig, TrainOutcome,
};
use crate::core::{
    contrastive_divergence, regularization_loss, regularize, Rbm, RbmError, RbmResult, Regularization,
};
use crate::data::validate_training_data;
use crate::sampling::sample_v_from_v;
use ndarray::{s, Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Options of [`pcd_weightnorm`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightNormConfig {
    /// Compare the chain-rule gradient against the differentiated loss.
    ///
    /// With the default [`FiniteDifference`] one check costs two loss
    /// evaluations, each on a cloned model, per factor (`nh + nv·nh` of them).
    pub check_gradients: bool,
    /// Minibatches between two checks; the first minibatch is always checked.
    /// Must be at least 1.
    pub check_interval: usize,
    /// Largest accepted absolute difference between the two gradients
    pub tolerance: f64,
}

impl Default for WeightNormConfig {
    fn default() -> Self {
        Self {
            check_gradients: true,
            check_interval: 100,
            tolerance: 1e-5,
        }
    }
}

/// Splits `w` into column norms `ω` and unit columns `u`.
///
/// A zero column gets the direction `1/√nv` and norm 0.
pub fn decompose(w: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let omega = w.mapv(|x| x * x).sum_axis(Axis(0)).mapv(f64::sqrt);
    let mut u = w.clone();
    let fallback = if w.nrows() > 0 { 1.0 / (w.nrows() as f64).sqrt() } else { 0.0 };
    for (mut col, &norm) in u.columns_mut().into_iter().zip(omega.iter()) {
        if norm > 0.0 {
            col /= norm;
        } else {
            col.fill(fallback);
        }
    }
    (omega, u)
}

/// `u diag(ω)`.
pub fn compose(omega: &Array1<f64>, u: &Array2<f64>) -> Array2<f64> {
    u * &omega.view().insert_axis(Axis(0))
}

/// Chain rule from `G = ∂L/∂w` to `(∂ω, ∂u)`.
pub fn norm_direction_grad(g: &Array2<f64>, omega: &Array1<f64>, u: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let d_omega = (u * g).sum_axis(Axis(0));
    let projected = g - &(u * &d_omega.view().insert_axis(Axis(0)));
    let d_u = projected * &omega.view().insert_axis(Axis(0));
    (d_omega, d_u)
}

fn flatten(omega: &Array1<f64>, u: &Array2<f64>) -> Array1<f64> {
    omega.iter().chain(u.iter()).copied().collect()
}

/// Loss as a function of `[ω; u]`, with the direction columns renormalized.
fn loss_at(
    rbm: &Rbm,
    x: &Array1<f64>,
    vd: &Array2<f64>,
    vm: &Array2<f64>,
    wd: Option<&Array1<f64>>,
    reg: &Regularization,
) -> f64 {
    let (nv, nh) = rbm.w().dim();
    let omega = x.slice(s![..nh]).to_owned();
    let direction = match x.slice(s![nh..]).to_owned().into_shape((nv, nh)) {
        Ok(d) => d,
        Err(_) => return f64::NAN,
    };
    let norms = direction.mapv(|v| v * v).sum_axis(Axis(0)).mapv(f64::sqrt);
    let u = &direction / &norms.insert_axis(Axis(0));
    let mut model = rbm.clone();
    if model.set_weights(compose(&omega, &u)).is_err() {
        return f64::NAN;
    }
    match cd_loss(&model, vd, vm, wd) {
        Ok(l) => l + regularization_loss(&model, reg),
        Err(_) => f64::NAN,
    }
}

/// Persistent CD on the norm/direction factors of the weights.
///
/// Layer fields are updated as in [`super::pcd`]; the weights are rebuilt
/// from the updated factors after every step, with directions renormalized.
///
/// # Errors
/// - `InvalidConfig` for a zero `check_interval`
/// - `GradientCheck` if `check_gradients` is set and the two gradient paths disagree
#[allow(clippy::too_many_arguments)]
pub fn pcd_weightnorm<R: Rng + ?Sized>(
    rbm: &mut Rbm,
    data: &Array2<f64>,
    weights: Option<&Array1<f64>>,
    config: &TrainConfig,
    wn: &WeightNormConfig,
    optimizer: &mut dyn Optimizer,
    fantasy: Option<Array2<f64>>,
    rng: &mut R,
) -> RbmResult<TrainOutcome> {
    pcd_weightnorm_with(rbm, data, weights, config, wn, optimizer, &FiniteDifference::default(), fantasy, rng)
}

/// [`pcd_weightnorm`] with an explicit gradient capability for the self-check.
#[allow(clippy::too_many_arguments)]
pub fn pcd_weightnorm_with<R: Rng + ?Sized>(
    rbm: &mut Rbm,
    data: &Array2<f64>,
    weights: Option<&Array1<f64>>,
    config: &TrainConfig,
    wn: &WeightNormConfig,
    optimizer: &mut dyn Optimizer,
    differentiate: &dyn Differentiate,
    fantasy: Option<Array2<f64>>,
    rng: &mut R,
) -> RbmResult<TrainOutcome> {
    if wn.check_interval == 0 {
        return Err(RbmError::InvalidConfig("check_interval must be at least 1".to_string()));
    }
    validate_training_data(rbm.visible(), data, weights, config.batch_size)?;
    let stats = rbm.visible().suffstats(data, weights)?;
    let mut chains = init_fantasy(rbm, data, config.batch_size, fantasy, rng)?;
    let reg = config.regularization;
    let mut batch = 0usize;
    let history = run_epochs(rbm, data, weights, config, rng, |rbm, vd, wd, rng| {
        chains = sample_v_from_v(rbm, &chains, config.steps, rng)?;
        let mut grad = contrastive_divergence(rbm, vd, &chains, wd, None, Some(&stats))?;
        let cd = cd_loss(rbm, vd, &chains, wd)?;
        let reg_loss = regularization_loss(rbm, &reg);
        regularize(&mut grad, rbm, &reg);

        let (omega, u) = decompose(rbm.w());
        let (d_omega, d_u) = norm_direction_grad(&grad.w, &omega, &u);
        let check = wn.check_gradients && batch % wn.check_interval == 0;
        batch += 1;
        if check {
            let x = flatten(&omega, &u);
            let frozen: &Rbm = rbm;
            let oracle = differentiate.gradient(&|x| loss_at(frozen, x, vd, &chains, wd, &reg), &x);
            let manual = flatten(&d_omega, &d_u);
            let max_abs_diff = (&oracle - &manual).fold(0.0f64, |m, d| m.max(d.abs()));
            if !(max_abs_diff <= wn.tolerance) {
                return Err(RbmError::GradientCheck {
                    max_abs_diff,
                    tolerance: wn.tolerance,
                });
            }
        }

        rbm.apply_layer_gradients(&grad.visible, &grad.hidden, &mut *optimizer)?;
        let mut omega = omega.insert_axis(Axis(0));
        optimizer.step(ParamKey::Custom("norm"), &mut omega, &d_omega.insert_axis(Axis(0)));
        let mut u = u;
        optimizer.step(ParamKey::Custom("direction"), &mut u, &d_u);
        let (_, u) = decompose(&u);
        rbm.set_weights(compose(&omega.index_axis(Axis(0), 0).to_owned(), &u))?;
        if config.zerosum {
            rbm.zerosum();
        }
        Ok(BatchLoss { cd_loss: cd, reg_loss })
    })?;
    Ok(TrainOutcome {
        history,
        fantasy: chains,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::free_energy_grad;
    use crate::layers::Layer;
    use crate::training::{Sgd, TrainConfig};
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_decompose_compose_round_trip() {
        let w = ndarray::arr2(&[[3.0, 0.0], [4.0, 0.0]]);
        let (omega, u) = decompose(&w);
        assert_abs_diff_eq!(omega[0], 5.0);
        assert_abs_diff_eq!(u[[0, 0]], 0.6);
        assert_eq!(omega[1], 0.0);
        assert_abs_diff_eq!(u.column(1).mapv(|x| x * x).sum(), 1.0, epsilon = 1e-12);
        assert!((compose(&omega, &u) - &w).iter().all(|d| d.abs() < 1e-12));
    }

    #[test]
    fn test_manual_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(0);
        let rbm = Rbm::with_random_weights(Layer::binary(&[4]), Layer::binary(&[2]), 0.7, &mut rng).unwrap();
        let vd = ndarray::arr2(&[[1.0, 0.0, 1.0, 1.0], [0.0, 0.0, 1.0, 0.0]]);
        let vm = ndarray::arr2(&[[0.0, 1.0, 1.0, 0.0]]);
        let reg = Regularization {
            l2_weights: 0.1,
            ..Regularization::default()
        };
        let mut g = free_energy_grad(&rbm, &vd, None).unwrap() - free_energy_grad(&rbm, &vm, None).unwrap();
        regularize(&mut g, &rbm, &reg);
        let (omega, u) = decompose(rbm.w());
        let (d_omega, d_u) = norm_direction_grad(&g.w, &omega, &u);
        let fd = FiniteDifference::default().gradient(&|x| loss_at(&rbm, x, &vd, &vm, None, &reg), &flatten(&omega, &u));
        let manual = flatten(&d_omega, &d_u);
        for (a, b) in fd.iter().zip(manual.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_pcd_weightnorm_keeps_unit_directions() {
        let mut rng = StdRng::seed_from_u64(1);
        let data = crate::data::prototype_samples(32, 5, 2, 0.05, &mut rng);
        let mut rbm = Rbm::with_random_weights(Layer::binary(&[5]), Layer::binary(&[2]), 0.3, &mut rng).unwrap();
        let config = TrainConfig {
            batch_size: 8,
            epochs: 2,
            ..TrainConfig::default()
        };
        let mut opt = Sgd::new(0.05, 0.0);
        let outcome =
            pcd_weightnorm(&mut rbm, &data, None, &config, &WeightNormConfig::default(), &mut opt, None, &mut rng)
                .unwrap();
        assert_eq!(outcome.history.get("epoch").len(), 2);
        let (_, u) = decompose(rbm.w());
        for col in u.columns() {
            assert_abs_diff_eq!(col.mapv(|x| x * x).sum(), 1.0, epsilon = 1e-9);
        }
    }

    struct Counting(std::cell::Cell<usize>);

    impl Differentiate for Counting {
        fn gradient(&self, f: &dyn Fn(&Array1<f64>) -> f64, x: &Array1<f64>) -> Array1<f64> {
            self.0.set(self.0.get() + 1);
            FiniteDifference::default().gradient(f, x)
        }
    }

    #[test]
    fn test_check_interval_limits_self_checks() {
        let mut rng = StdRng::seed_from_u64(3);
        let data = crate::data::prototype_samples(40, 4, 2, 0.05, &mut rng);
        let mut rbm = Rbm::with_random_weights(Layer::binary(&[4]), Layer::binary(&[2]), 0.3, &mut rng).unwrap();
        let config = TrainConfig {
            batch_size: 4,
            epochs: 2,
            ..TrainConfig::default()
        };
        let wn = WeightNormConfig {
            check_interval: 7,
            ..WeightNormConfig::default()
        };
        let counting = Counting(std::cell::Cell::new(0));
        let mut opt = Sgd::new(0.05, 0.0);
        pcd_weightnorm_with(&mut rbm, &data, None, &config, &wn, &mut opt, &counting, None, &mut rng).unwrap();
        // 20 minibatches, checked at 0, 7 and 14
        assert_eq!(counting.0.get(), 3);

        let zero = WeightNormConfig {
            check_interval: 0,
            ..WeightNormConfig::default()
        };
        let result = pcd_weightnorm(&mut rbm, &data, None, &config, &zero, &mut opt, None, &mut rng);
        assert!(matches!(result, Err(RbmError::InvalidConfig(_))));
    }

    struct Zero;

    impl Differentiate for Zero {
        fn gradient(&self, _f: &dyn Fn(&Array1<f64>) -> f64, x: &Array1<f64>) -> Array1<f64> {
            Array1::zeros(x.len())
        }
    }

    #[test]
    fn test_disagreeing_oracle_fails_the_check() {
        let mut rng = StdRng::seed_from_u64(2);
        let data = crate::data::prototype_samples(16, 4, 2, 0.05, &mut rng);
        let mut rbm = Rbm::with_random_weights(Layer::binary(&[4]), Layer::binary(&[2]), 0.5, &mut rng).unwrap();
        let config = TrainConfig {
            batch_size: 16,
            ..TrainConfig::default()
        };
        let mut opt = Sgd::new(0.05, 0.0);
        let result = pcd_weightnorm_with(
            &mut rbm,
            &data,
            None,
            &config,
            &WeightNormConfig::default(),
            &mut opt,
            &Zero,
            None,
            &mut rng,
        );
        assert!(matches!(result, Err(RbmError::GradientCheck { .. })));
    }
}
