//! Bipartite energy model.
//!
//! An RBM couples a visible layer `v`, a hidden layer `h` and a weight
//! matrix `W`:
//!
//! ```text
//! E(v, h) = E_vis(v) + E_hid(h) - v·W·h
//! F(v)    = E_vis(v) - cgf_hid(v·W)          (hidden units summed out)
//! ```
//!
//! The external field seen by the hidden layer is `v·W`; the field seen by
//! the visible layer is `h·Wᵀ`. Batches are matrices with one sample per row.

pub mod gradient;

use crate::layers::{potts, Layer, LayerKind};
use crate::training::optim::{Optimizer, ParamKey};
use crate::utils::logsumexp;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, Axis};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use gradient::{
    contrastive_divergence, free_energy_grad, regularization_loss, regularize, Gradient,
    Regularization,
};

/// Error type for RBM operations.
#[derive(Debug, Error)]
pub enum RbmError {
    /// Array shape does not match the layer or model layout
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Invalid model or training configuration
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Argument outside the domain of the operation
    #[error("domain error: {0}")]
    Domain(String),

    /// Manual and differentiated gradients disagree
    #[error("gradient check failed: max |Δ| = {max_abs_diff:e} > {tolerance:e}")]
    GradientCheck { max_abs_diff: f64, tolerance: f64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type RbmResult<T> = Result<T, RbmError>;

/// A Restricted Boltzmann Machine.
///
/// # Layout
///
/// - **visible:** `nv` units, batches of shape `(batch, nv)`
/// - **hidden:** `nh` units, batches of shape `(batch, nh)`
/// - **weights:** `w` of shape `(nv, nh)`, i.e. `visible.shape ++ hidden.shape` flattened
///
/// Parameters change only through [`Rbm::apply_gradient`] and the explicit
/// initialization/gauge methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rbm {
    visible: Layer,
    hidden: Layer,
    w: Array2<f64>,
}

impl Rbm {
    /// Create an RBM from two layers and a weight matrix.
    ///
    /// # Errors
    /// - `ShapeMismatch` if `w` is not `(visible.len(), hidden.len())`
    pub fn new(visible: Layer, hidden: Layer, w: Array2<f64>) -> RbmResult<Self> {
        let expected = (visible.len(), hidden.len());
        if w.dim() != expected {
            return Err(RbmError::ShapeMismatch {
                expected: vec![expected.0, expected.1],
                actual: w.shape().to_vec(),
            });
        }
        Ok(Self { visible, hidden, w })
    }

    /// RBM with all couplings zero.
    pub fn with_zero_weights(visible: Layer, hidden: Layer) -> Self {
        let w = Array2::zeros((visible.len(), hidden.len()));
        Self { visible, hidden, w }
    }

    /// RBM with weights drawn from `N(0, std²)`.
    ///
    /// # Errors
    /// - `Domain` if `std` is negative or not finite
    pub fn with_random_weights<R: Rng + ?Sized>(
        visible: Layer,
        hidden: Layer,
        std: f64,
        rng: &mut R,
    ) -> RbmResult<Self> {
        let normal = Normal::new(0.0, std)
            .map_err(|e| RbmError::Domain(format!("weight std {std}: {e}")))?;
        let w = Array2::random_using((visible.len(), hidden.len()), normal, rng);
        Ok(Self { visible, hidden, w })
    }

    pub fn visible(&self) -> &Layer {
        &self.visible
    }

    pub fn hidden(&self) -> &Layer {
        &self.hidden
    }

    /// Weight matrix of shape `(nv, nh)`.
    pub fn w(&self) -> &Array2<f64> {
        &self.w
    }

    pub fn visible_mut(&mut self) -> &mut Layer {
        &mut self.visible
    }

    pub fn hidden_mut(&mut self) -> &mut Layer {
        &mut self.hidden
    }

    /// Replace the weight matrix.
    ///
    /// # Errors
    /// - `ShapeMismatch` if the shape changes
    pub fn set_weights(&mut self, w: Array2<f64>) -> RbmResult<()> {
        if w.dim() != self.w.dim() {
            return Err(RbmError::ShapeMismatch {
                expected: self.w.shape().to_vec(),
                actual: w.shape().to_vec(),
            });
        }
        self.w = w;
        Ok(())
    }

    /// Sets the visible layer from data marginals, resets the hidden layer,
    /// and draws `w ~ N(0, 1/nv)`.
    ///
    /// # Errors
    /// - `Domain` if `ε ∉ (0, 0.5)`
    /// - `ShapeMismatch` if `data` does not match the visible layer
    pub fn initialize<R: Rng + ?Sized>(
        &mut self,
        data: &Array2<f64>,
        weights: Option<&Array1<f64>>,
        eps: f64,
        rng: &mut R,
    ) -> RbmResult<()> {
        self.visible.initialize_from_data(data, weights, eps)?;
        self.hidden.reset();
        let nv = self.visible.len();
        if nv > 0 {
            let std = (1.0 / nv as f64).sqrt();
            let normal = Normal::new(0.0, std)
                .map_err(|e| RbmError::Domain(format!("weight std {std}: {e}")))?;
            self.w = Array2::random_using(self.w.raw_dim(), normal, rng);
        }
        self.zerosum();
        Ok(())
    }

    /// Field on the hidden layer, `v·W`.
    pub fn inputs_h_from_v(&self, v: &Array2<f64>) -> RbmResult<Array2<f64>> {
        self.visible.check_batch(v)?;
        Ok(v.dot(&self.w))
    }

    /// Field on the visible layer, `h·Wᵀ`.
    pub fn inputs_v_from_h(&self, h: &Array2<f64>) -> RbmResult<Array2<f64>> {
        self.hidden.check_batch(h)?;
        Ok(h.dot(&self.w.t()))
    }

    /// Coupling energy `-v·W·h` per sample.
    ///
    /// Batch sizes must match, or one side may carry a single sample that
    /// broadcasts against the other.
    ///
    /// # Errors
    /// - `ShapeMismatch` for unit-count mismatches or incompatible batch sizes
    pub fn interaction_energy(&self, v: &Array2<f64>, h: &Array2<f64>) -> RbmResult<Array1<f64>> {
        let vw = self.inputs_h_from_v(v)?;
        self.hidden.check_batch(h)?;
        match (vw.nrows(), h.nrows()) {
            (a, b) if a == b => Ok(-(&vw * h).sum_axis(Axis(1))),
            (1, _) => Ok(-h.dot(&vw.row(0))),
            (_, 1) => Ok(-vw.dot(&h.row(0))),
            (a, b) => Err(RbmError::ShapeMismatch {
                expected: vec![a, self.hidden.len()],
                actual: vec![b, self.hidden.len()],
            }),
        }
    }

    /// Joint energy `E_vis(v) + E_hid(h) - v·W·h`, with singleton-batch broadcasting.
    pub fn energy(&self, v: &Array2<f64>, h: &Array2<f64>) -> RbmResult<Array1<f64>> {
        let coupling = self.interaction_energy(v, h)?;
        let ev = self.visible.energy(v)?;
        let eh = self.hidden.energy(h)?;
        let layers = broadcast_add(&ev, &eh)?;
        broadcast_add(&layers, &coupling)
    }

    /// Free energy of visible configurations, hidden units summed out.
    pub fn free_energy(&self, v: &Array2<f64>) -> RbmResult<Array1<f64>> {
        let inputs = self.inputs_h_from_v(v)?;
        Ok(self.visible.energy(v)? - self.hidden.cgf(&inputs)?)
    }

    /// Free energy of hidden configurations, visible units summed out.
    pub fn free_energy_h(&self, h: &Array2<f64>) -> RbmResult<Array1<f64>> {
        let inputs = self.inputs_v_from_h(h)?;
        Ok(self.hidden.energy(h)? - self.visible.cgf(&inputs)?)
    }

    pub fn mean_h_from_v(&self, v: &Array2<f64>) -> RbmResult<Array2<f64>> {
        self.hidden.transfer_mean(&self.inputs_h_from_v(v)?)
    }

    pub fn mean_v_from_h(&self, h: &Array2<f64>) -> RbmResult<Array2<f64>> {
        self.visible.transfer_mean(&self.inputs_v_from_h(h)?)
    }

    pub fn mode_h_from_v(&self, v: &Array2<f64>) -> RbmResult<Array2<f64>> {
        self.hidden.transfer_mode(&self.inputs_h_from_v(v)?)
    }

    pub fn mode_v_from_h(&self, h: &Array2<f64>) -> RbmResult<Array2<f64>> {
        self.visible.transfer_mode(&self.inputs_v_from_h(h)?)
    }

    pub fn sample_h_from_v<R: Rng + ?Sized>(&self, v: &Array2<f64>, rng: &mut R) -> RbmResult<Array2<f64>> {
        self.hidden.transfer_sample(&self.inputs_h_from_v(v)?, rng)
    }

    pub fn sample_v_from_h<R: Rng + ?Sized>(&self, h: &Array2<f64>, rng: &mut R) -> RbmResult<Array2<f64>> {
        self.visible.transfer_sample(&self.inputs_v_from_h(h)?, rng)
    }

    /// Swap visible and hidden roles. `mirror().energy(h, v) == energy(v, h)`.
    pub fn mirror(&self) -> Rbm {
        Rbm {
            visible: self.hidden.clone(),
            hidden: self.visible.clone(),
            w: self.w.t().to_owned(),
        }
    }

    /// Model at inverse temperature `β`: every energy term scaled by `β`.
    pub fn tempered(&self, beta: f64) -> RbmResult<Rbm> {
        Ok(Rbm {
            visible: self.visible.scaled(beta)?,
            hidden: self.hidden.scaled(beta)?,
            w: &self.w * beta,
        })
    }

    /// Exact `log Z` of a Gaussian–Gaussian RBM.
    ///
    /// With precision matrix `A = [[diag|γv|, -W], [-Wᵀ, diag|γh|]]` and
    /// field `b = [θv; θh]`:
    ///
    /// ```text
    /// log Z = ½ bᵀA⁻¹b - ½ log det A + (N/2) log 2π
    /// ```
    ///
    /// # Errors
    /// - `Domain` if either layer is not Gaussian or `A` is not positive definite
    pub fn log_partition(&self) -> RbmResult<f64> {
        if self.visible.kind() != LayerKind::Gaussian || self.hidden.kind() != LayerKind::Gaussian {
            return Err(RbmError::Domain(format!(
                "closed-form log Z needs Gaussian layers, got {:?}/{:?}",
                self.visible.kind(),
                self.hidden.kind()
            )));
        }
        let nv = self.visible.len();
        let nh = self.hidden.len();
        let n = nv + nh;
        let gv = self.visible.par().row(1);
        let gh = self.hidden.par().row(1);
        let a = DMatrix::from_fn(n, n, |i, j| match (i < nv, j < nv) {
            (true, true) if i == j => gv[i].abs(),
            (false, false) if i == j => gh[i - nv].abs(),
            (true, false) => -self.w[[i, j - nv]],
            (false, true) => -self.w[[j, i - nv]],
            _ => 0.0,
        });
        let b = DVector::from_iterator(
            n,
            self.visible.par().row(0).iter().chain(self.hidden.par().row(0).iter()).copied(),
        );
        let chol = a.cholesky().ok_or_else(|| {
            RbmError::Domain("coupling matrix is not positive definite; Z diverges".to_string())
        })?;
        let logdet = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
        let quad = b.dot(&chol.solve(&b));
        Ok(0.5 * quad - 0.5 * logdet + 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln())
    }

    /// `log Z` of the decoupled model (weights ignored).
    pub fn log_partition_zero_weight(&self) -> f64 {
        self.visible.log_partition() + self.hidden.log_partition()
    }

    /// Exact `log Z` by enumerating the smaller discrete side.
    ///
    /// # Errors
    /// - `Domain` if neither layer is discrete
    /// - `InvalidConfig` if the enumerated layer has too many states
    pub fn log_partition_brute_force(&self) -> RbmResult<f64> {
        let v_discrete = self.visible.kind().is_discrete();
        let h_discrete = self.hidden.kind().is_discrete();
        let use_visible = match (v_discrete, h_discrete) {
            (true, true) => self.visible.n_sites() <= self.hidden.n_sites(),
            (true, false) => true,
            (false, true) => false,
            (false, false) => {
                return Err(RbmError::Domain(
                    "brute-force log Z needs a discrete layer".to_string(),
                ))
            }
        };
        let f = if use_visible {
            self.free_energy(&self.visible.iterate_states()?)?
        } else {
            self.free_energy_h(&self.hidden.iterate_states()?)?
        };
        Ok(logsumexp(f.iter().map(|&x| -x)))
    }

    /// `log p(v) = -F(v) - log Z`.
    pub fn log_likelihood(&self, v: &Array2<f64>, log_z: f64) -> RbmResult<Array1<f64>> {
        Ok(self.free_energy(v)?.mapv(|f| -f - log_z))
    }

    pub fn log_likelihood_brute_force(&self, v: &Array2<f64>) -> RbmResult<Array1<f64>> {
        let log_z = self.log_partition_brute_force()?;
        self.log_likelihood(v, log_z)
    }

    /// Mean squared difference between `v` and its mean-field reconstruction `v → h → v`.
    pub fn reconstruction_error(&self, v: &Array2<f64>) -> RbmResult<f64> {
        let h = self.mean_h_from_v(v)?;
        let recon = self.mean_v_from_h(&h)?;
        let diff = v - &recon;
        Ok(diff.mapv(|d| d * d).mean().unwrap_or(0.0))
    }

    /// Zero-sum gauge on Potts fields and the matching weight axes.
    pub fn zerosum(&mut self) {
        self.visible.zerosum();
        self.hidden.zerosum();
        if self.visible.kind() == LayerKind::Potts {
            let q = self.visible.n_categories();
            for mut col in self.w.columns_mut() {
                let mut owned = col.to_owned();
                potts::zerosum_columns(&mut owned, q);
                col.assign(&owned);
            }
        }
        if self.hidden.kind() == LayerKind::Potts {
            let q = self.hidden.n_categories();
            for mut row in self.w.rows_mut() {
                let mut owned = row.to_owned();
                potts::zerosum_columns(&mut owned, q);
                row.assign(&owned);
            }
        }
    }

    /// Apply one optimizer step to every parameter. This is the only place
    /// training mutates the model.
    ///
    /// # Errors
    /// - `ShapeMismatch` if `grad` does not mirror this model
    pub fn apply_gradient(&mut self, grad: &Gradient, optimizer: &mut dyn Optimizer) -> RbmResult<()> {
        grad.check_shape(self)?;
        self.apply_layer_gradients(&grad.visible, &grad.hidden, optimizer)?;
        optimizer.step(ParamKey::Weights, &mut self.w, &grad.w);
        Ok(())
    }

    /// Optimizer step on the layer parameters only, for training schemes
    /// that update the weights through their own reparameterization.
    pub(crate) fn apply_layer_gradients(
        &mut self,
        visible: &Array2<f64>,
        hidden: &Array2<f64>,
        optimizer: &mut dyn Optimizer,
    ) -> RbmResult<()> {
        for (g, p) in [(visible, self.visible.par()), (hidden, self.hidden.par())] {
            if g.dim() != p.dim() {
                return Err(RbmError::ShapeMismatch {
                    expected: p.shape().to_vec(),
                    actual: g.shape().to_vec(),
                });
            }
        }
        optimizer.step(ParamKey::Visible, self.visible.par_mut(), visible);
        optimizer.step(ParamKey::Hidden, self.hidden.par_mut(), hidden);
        Ok(())
    }
}

/// Adds two per-sample vectors, broadcasting a length-1 side.
fn broadcast_add(a: &Array1<f64>, b: &Array1<f64>) -> RbmResult<Array1<f64>> {
    match (a.len(), b.len()) {
        (x, y) if x == y => Ok(a + b),
        (1, _) => Ok(b + a[0]),
        (_, 1) => Ok(a + b[0]),
        (x, y) => Err(RbmError::ShapeMismatch {
            expected: vec![x],
            actual: vec![y],
        }),
    }
}
