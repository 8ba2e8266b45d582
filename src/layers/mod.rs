//! Exponential-family unit layers.
//!
//! Every layer variant exposes the same contract against an external field
//! `inputs` (the coupling from the other side of the bipartite graph):
//!
//! ```text
//! cgf(inputs)  = log ∫ exp(-E(x) + inputs · x) dx       (summed over units)
//! mean         =  ∂cgf/∂inputs
//! var          = ∂²cgf/∂inputs²
//! ```
//!
//! The free energy of a layer is `-cgf`. Energies are linear in a small set
//! of sufficient statistics, so parameter gradients of both the energy and
//! the free energy reduce to "energy gradient evaluated at (expected)
//! statistics".
//!
//! ## Layout
//!
//! Parameters live in an `Array2<f64>` of shape `(n_params, n_units)`; a
//! batch of configurations is an `Array2<f64>` with one sample per row.
//!
//! | kind     | parameters           | statistics               |
//! |----------|----------------------|--------------------------|
//! | Binary   | θ                    | x                        |
//! | Spin     | θ                    | x                        |
//! | Potts    | θ                    | x (one-hot)              |
//! | Gaussian | θ, γ                 | x, x²                    |
//! | ReLU     | θ, γ                 | x, x²                    |
//! | dReLU    | θp, θn, γp, γn       | x⁺, x⁻, x⁺², x⁻²         |
//! | pReLU    | θ, γ, Δ, η           | x⁺, x⁻, x⁺², x⁻²         |
//! | xReLU    | θ, γ, Δ, ξ           | x⁺, x⁻, x⁺², x⁻²         |

mod binary;
mod drelu;
mod gaussian;
pub(crate) mod potts;
mod prelu;
mod relu;
mod spin;
mod xrelu;

use crate::core::{RbmError, RbmResult};
use crate::data::check_weights;
use crate::utils::weighted_row_mean;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Parameters of a single unit, padded to four slots.
pub(crate) type Params = [f64; 4];

/// Upper bound on the number of states [`Layer::iterate_states`] will enumerate.
pub const MAX_ENUMERATED_STATES: u64 = 1 << 20;

/// Per-unit math of an elementwise layer family.
///
/// `h` is the external field on the unit; the tilted distribution is
/// `∝ exp(-E(x) + h x)`.
pub(crate) trait Units {
    fn energy(p: &Params, x: f64) -> f64;
    fn cgf(p: &Params, h: f64) -> f64;
    fn mean(p: &Params, h: f64) -> f64;
    fn var(p: &Params, h: f64) -> f64;
    fn mode(p: &Params, h: f64) -> f64;
    fn mean_abs(p: &Params, h: f64) -> f64;
    fn sample<R: Rng + ?Sized>(p: &Params, h: f64, rng: &mut R) -> f64;
    /// Sufficient statistics of the value `x`.
    fn stats(x: f64, out: &mut [f64]);
    /// Expected sufficient statistics under the tilted distribution.
    fn tilted_stats(p: &Params, h: f64, out: &mut [f64]);
    /// `∂E/∂p` given (averaged) statistics; linear in `stats`.
    fn energy_grad(p: &Params, stats: &[f64], out: &mut [f64]);
}

/// Dispatches on a [`LayerKind`], binding `$U` to the elementwise family.
macro_rules! per_kind {
    ($kind:expr, $U:ident => $body:expr, potts => $potts:expr) => {
        match $kind {
            LayerKind::Potts => $potts,
            LayerKind::Binary => {
                type $U = binary::BinaryUnits;
                $body
            }
            LayerKind::Spin => {
                type $U = spin::SpinUnits;
                $body
            }
            LayerKind::Gaussian => {
                type $U = gaussian::GaussianUnits;
                $body
            }
            LayerKind::ReLU => {
                type $U = relu::ReluUnits;
                $body
            }
            LayerKind::DReLU => {
                type $U = drelu::DReluUnits;
                $body
            }
            LayerKind::PReLU => {
                type $U = prelu::PReluUnits;
                $body
            }
            LayerKind::XReLU => {
                type $U = xrelu::XReluUnits;
                $body
            }
        }
    };
}

/// The distribution family of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    /// Bernoulli units in `{0, 1}`
    Binary,
    /// Ising spins in `{-1, +1}`
    Spin,
    /// Categorical units, one-hot over a leading category axis
    Potts,
    /// Gaussian units
    Gaussian,
    /// Rectified Gaussian units
    ReLU,
    /// Double rectified Gaussian units
    DReLU,
    /// dReLU with asymmetry `η`
    PReLU,
    /// dReLU with asymmetry `ξ`
    XReLU,
}

impl LayerKind {
    /// Parameter names, in row order of [`Layer::par`].
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            LayerKind::Binary | LayerKind::Spin | LayerKind::Potts => &["theta"],
            LayerKind::Gaussian | LayerKind::ReLU => &["theta", "gamma"],
            LayerKind::DReLU => &["theta_p", "theta_n", "gamma_p", "gamma_n"],
            LayerKind::PReLU => &["theta", "gamma", "delta", "eta"],
            LayerKind::XReLU => &["theta", "gamma", "delta", "xi"],
        }
    }

    pub fn n_params(self) -> usize {
        self.param_names().len()
    }

    /// Number of sufficient statistics per unit.
    pub fn n_stats(self) -> usize {
        match self {
            LayerKind::Binary | LayerKind::Spin | LayerKind::Potts => 1,
            LayerKind::Gaussian | LayerKind::ReLU => 2,
            LayerKind::DReLU | LayerKind::PReLU | LayerKind::XReLU => 4,
        }
    }

    /// True for layers with a finite set of unit values.
    pub fn is_discrete(self) -> bool {
        matches!(self, LayerKind::Binary | LayerKind::Spin | LayerKind::Potts)
    }

    /// Rows of the parameter matrix that act as the linear field on `x`.
    ///
    /// A constant shift `c` of the external field moves every one of these rows by `c`.
    pub fn field_rows(self) -> &'static [usize] {
        match self {
            LayerKind::DReLU => &[0, 1],
            _ => &[0],
        }
    }

    fn default_params(self) -> Params {
        match self {
            LayerKind::Binary | LayerKind::Spin | LayerKind::Potts => [0.0; 4],
            LayerKind::Gaussian | LayerKind::ReLU => [0.0, 1.0, 0.0, 0.0],
            LayerKind::DReLU => [0.0, 0.0, 1.0, 1.0],
            LayerKind::PReLU | LayerKind::XReLU => [0.0, 1.0, 0.0, 0.0],
        }
    }

    fn is_rectified(self) -> bool {
        matches!(
            self,
            LayerKind::ReLU | LayerKind::DReLU | LayerKind::PReLU | LayerKind::XReLU
        )
    }
}

/// A layer of units: a distribution family, a unit layout, and parameters.
///
/// Layers are plain values. Annealing, tempering and reparameterizing all
/// return new layers; only [`Layer::par_mut`], [`Layer::initialize_from_data`],
/// [`Layer::reset`] and [`Layer::zerosum`] mutate in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    kind: LayerKind,
    shape: Vec<usize>,
    par: Array2<f64>,
}

impl Layer {
    /// Creates a layer with default parameters (zero fields, unit precisions).
    ///
    /// # Errors
    /// - `InvalidConfig` for a Potts layer without a category axis
    pub fn new(kind: LayerKind, shape: &[usize]) -> RbmResult<Self> {
        if kind == LayerKind::Potts && shape.is_empty() {
            return Err(RbmError::InvalidConfig(
                "Potts layer shape must start with the category count".to_string(),
            ));
        }
        Ok(Self::of(kind, shape))
    }

    /// Creates a layer from an explicit `(n_params, n_units)` parameter matrix.
    pub fn from_params(kind: LayerKind, shape: &[usize], par: Array2<f64>) -> RbmResult<Self> {
        let mut layer = Self::new(kind, shape)?;
        if par.dim() != layer.par.dim() {
            return Err(RbmError::ShapeMismatch {
                expected: layer.par.shape().to_vec(),
                actual: par.shape().to_vec(),
            });
        }
        layer.par = par;
        Ok(layer)
    }

    fn of(kind: LayerKind, shape: &[usize]) -> Self {
        let n: usize = shape.iter().product();
        let defaults = kind.default_params();
        let mut par = Array2::zeros((kind.n_params(), n));
        for (k, mut row) in par.rows_mut().into_iter().enumerate() {
            row.fill(defaults[k]);
        }
        Self {
            kind,
            shape: shape.to_vec(),
            par,
        }
    }

    pub fn binary(shape: &[usize]) -> Self {
        Self::of(LayerKind::Binary, shape)
    }

    pub fn spin(shape: &[usize]) -> Self {
        Self::of(LayerKind::Spin, shape)
    }

    /// `q` categories on each site of `sites`.
    pub fn potts(q: usize, sites: &[usize]) -> Self {
        let mut shape = vec![q];
        shape.extend_from_slice(sites);
        Self::of(LayerKind::Potts, &shape)
    }

    pub fn gaussian(shape: &[usize]) -> Self {
        Self::of(LayerKind::Gaussian, shape)
    }

    pub fn relu(shape: &[usize]) -> Self {
        Self::of(LayerKind::ReLU, shape)
    }

    pub fn drelu(shape: &[usize]) -> Self {
        Self::of(LayerKind::DReLU, shape)
    }

    pub fn prelu(shape: &[usize]) -> Self {
        Self::of(LayerKind::PReLU, shape)
    }

    pub fn xrelu(shape: &[usize]) -> Self {
        Self::of(LayerKind::XReLU, shape)
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    /// Unit layout (for Potts, `[q, sites...]`).
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of units (columns of a batch).
    pub fn len(&self) -> usize {
        self.par.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parameter matrix of shape `(n_params, n_units)`.
    pub fn par(&self) -> &Array2<f64> {
        &self.par
    }

    pub fn par_mut(&mut self) -> &mut Array2<f64> {
        &mut self.par
    }

    /// Looks up a parameter row by name (see [`LayerKind::param_names`]).
    pub fn param(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let k = self.kind.param_names().iter().position(|n| *n == name)?;
        Some(self.par.row(k))
    }

    pub fn param_mut(&mut self, name: &str) -> Option<ArrayViewMut1<'_, f64>> {
        let k = self.kind.param_names().iter().position(|n| *n == name)?;
        Some(self.par.row_mut(k))
    }

    /// Category count of a Potts layer; 1 for elementwise layers.
    pub fn n_categories(&self) -> usize {
        match self.kind {
            LayerKind::Potts => self.shape[0],
            _ => 1,
        }
    }

    /// Number of independent sites (units, or Potts sites).
    pub fn n_sites(&self) -> usize {
        match self.kind {
            LayerKind::Potts if self.shape[0] > 0 => self.len() / self.shape[0],
            LayerKind::Potts => 0,
            _ => self.len(),
        }
    }

    fn unit_params(&self) -> Vec<Params> {
        let np = self.kind.n_params();
        (0..self.len())
            .map(|j| {
                let mut p = [0.0; 4];
                for (k, slot) in p.iter_mut().enumerate().take(np) {
                    *slot = self.par[[k, j]];
                }
                p
            })
            .collect()
    }

    /// Verifies that `x` holds one configuration of this layer per row.
    pub fn check_batch(&self, x: &Array2<f64>) -> RbmResult<()> {
        if x.ncols() != self.len() {
            return Err(RbmError::ShapeMismatch {
                expected: vec![x.nrows(), self.len()],
                actual: x.shape().to_vec(),
            });
        }
        Ok(())
    }

    fn map_units<F: FnMut(&Params, f64) -> f64>(&self, inputs: &Array2<f64>, mut f: F) -> Array2<f64> {
        let params = self.unit_params();
        let mut out = Array2::zeros(inputs.raw_dim());
        for (mut dst, src) in out.rows_mut().into_iter().zip(inputs.rows()) {
            for (j, p) in params.iter().enumerate() {
                dst[j] = f(p, src[j]);
            }
        }
        out
    }

    fn sum_units<F: Fn(&Params, f64) -> f64>(&self, x: &Array2<f64>, f: F) -> Array1<f64> {
        let params = self.unit_params();
        x.rows()
            .into_iter()
            .map(|row| params.iter().zip(row.iter()).map(|(p, &v)| f(p, v)).sum())
            .collect()
    }

    fn theta(&self) -> ArrayView1<'_, f64> {
        self.par.row(0)
    }

    /// Energy of each configuration (row) of `x`, excluding normalization.
    pub fn energy(&self, x: &Array2<f64>) -> RbmResult<Array1<f64>> {
        self.check_batch(x)?;
        Ok(per_kind!(self.kind,
            U => self.sum_units(x, U::energy),
            potts => -x.dot(&self.theta())))
    }

    /// Cumulant generating function `log ∫ exp(-E(x) + inputs·x) dx`, one value per row.
    pub fn cgf(&self, inputs: &Array2<f64>) -> RbmResult<Array1<f64>> {
        self.check_batch(inputs)?;
        Ok(per_kind!(self.kind,
            U => self.sum_units(inputs, U::cgf),
            potts => potts::cgf(self.theta(), self.shape[0], inputs)))
    }

    /// Free energy `-cgf(inputs)`.
    pub fn free_energy(&self, inputs: &Array2<f64>) -> RbmResult<Array1<f64>> {
        Ok(-self.cgf(inputs)?)
    }

    /// Log normalizer of the layer on its own (zero external field).
    pub fn log_partition(&self) -> f64 {
        let zero = Array2::zeros((1, self.len()));
        self.cgf(&zero).map(|c| c[0]).unwrap_or(f64::NAN)
    }

    /// One draw per unit from the tilted distribution.
    pub fn transfer_sample<R: Rng + ?Sized>(
        &self,
        inputs: &Array2<f64>,
        rng: &mut R,
    ) -> RbmResult<Array2<f64>> {
        self.check_batch(inputs)?;
        Ok(per_kind!(self.kind,
            U => self.map_units(inputs, |p, h| U::sample(p, h, &mut *rng)),
            potts => potts::sample(self.theta(), self.shape[0], inputs, rng)))
    }

    /// Conditional mean, `∂cgf/∂inputs`.
    pub fn transfer_mean(&self, inputs: &Array2<f64>) -> RbmResult<Array2<f64>> {
        self.check_batch(inputs)?;
        Ok(per_kind!(self.kind,
            U => self.map_units(inputs, U::mean),
            potts => potts::probabilities(self.theta(), self.shape[0], inputs)))
    }

    /// Conditional variance, `∂²cgf/∂inputs²` (per-category diagonal for Potts).
    pub fn transfer_var(&self, inputs: &Array2<f64>) -> RbmResult<Array2<f64>> {
        self.check_batch(inputs)?;
        Ok(per_kind!(self.kind,
            U => self.map_units(inputs, U::var),
            potts => potts::probabilities(self.theta(), self.shape[0], inputs).mapv(|p| p * (1.0 - p))))
    }

    pub fn transfer_meanvar(&self, inputs: &Array2<f64>) -> RbmResult<(Array2<f64>, Array2<f64>)> {
        Ok((self.transfer_mean(inputs)?, self.transfer_var(inputs)?))
    }

    pub fn transfer_std(&self, inputs: &Array2<f64>) -> RbmResult<Array2<f64>> {
        Ok(self.transfer_var(inputs)?.mapv(f64::sqrt))
    }

    /// Most probable configuration of each unit.
    pub fn transfer_mode(&self, inputs: &Array2<f64>) -> RbmResult<Array2<f64>> {
        self.check_batch(inputs)?;
        Ok(per_kind!(self.kind,
            U => self.map_units(inputs, U::mode),
            potts => potts::mode(self.theta(), self.shape[0], inputs)))
    }

    /// `E|x|` under the tilted distribution.
    pub fn transfer_mean_abs(&self, inputs: &Array2<f64>) -> RbmResult<Array2<f64>> {
        self.check_batch(inputs)?;
        Ok(per_kind!(self.kind,
            U => self.map_units(inputs, U::mean_abs),
            potts => potts::probabilities(self.theta(), self.shape[0], inputs)))
    }

    /// `n` independent draws from the layer with no external field.
    pub fn sample_from_prior<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Array2<f64> {
        let zero = Array2::zeros((n, self.len()));
        per_kind!(self.kind,
            U => self.map_units(&zero, |p, h| U::sample(p, h, &mut *rng)),
            potts => potts::sample(self.theta(), self.shape[0], &zero, rng))
    }

    /// Weighted batch averages of the sufficient statistics of `data`,
    /// shape `(n_stats, n_units)`.
    pub fn suffstats(&self, data: &Array2<f64>, weights: Option<&Array1<f64>>) -> RbmResult<Array2<f64>> {
        self.check_batch(data)?;
        check_weights(weights, data.nrows())?;
        Ok(per_kind!(self.kind,
            U => average_stats(data, weights, self.kind.n_stats(), |_, x, out| U::stats(x, out)),
            potts => weighted_row_mean(data, weights).insert_axis(Axis(0))))
    }

    /// Expected sufficient statistics under the tilted distribution, batch-averaged.
    pub fn tilted_stats(&self, inputs: &Array2<f64>, weights: Option<&Array1<f64>>) -> RbmResult<Array2<f64>> {
        self.check_batch(inputs)?;
        check_weights(weights, inputs.nrows())?;
        let params = self.unit_params();
        Ok(per_kind!(self.kind,
            U => average_stats(inputs, weights, self.kind.n_stats(), |j, h, out| U::tilted_stats(&params[j], h, out)),
            potts => weighted_row_mean(&potts::probabilities(self.theta(), self.shape[0], inputs), weights)
                .insert_axis(Axis(0))))
    }

    /// Gradient of the mean energy with respect to the layer parameters,
    /// given averaged sufficient statistics.
    pub fn energy_grad(&self, stats: &Array2<f64>) -> RbmResult<Array2<f64>> {
        let expected = (self.kind.n_stats(), self.len());
        if stats.dim() != expected {
            return Err(RbmError::ShapeMismatch {
                expected: vec![expected.0, expected.1],
                actual: stats.shape().to_vec(),
            });
        }
        let params = self.unit_params();
        let np = self.kind.n_params();
        let ns = self.kind.n_stats();
        let mut grad = Array2::zeros((np, self.len()));
        let mut s = [0.0; 4];
        let mut g = [0.0; 4];
        for (j, p) in params.iter().enumerate() {
            for k in 0..ns {
                s[k] = stats[[k, j]];
            }
            per_kind!(self.kind,
                U => U::energy_grad(p, &s, &mut g),
                potts => g[0] = -s[0]);
            for k in 0..np {
                grad[[k, j]] = g[k];
            }
        }
        Ok(grad)
    }

    /// Gradient of the mean free energy `-cgf(inputs)` with respect to the parameters.
    pub fn free_energy_grad(&self, inputs: &Array2<f64>, weights: Option<&Array1<f64>>) -> RbmResult<Array2<f64>> {
        let stats = self.tilted_stats(inputs, weights)?;
        self.energy_grad(&stats)
    }

    /// Sum of the field rows of a parameter-shaped array.
    pub fn field_sum(&self, grad: &Array2<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.len());
        for &r in self.kind.field_rows() {
            out += &grad.row(r);
        }
        out
    }

    /// Adds `delta` to every field row of a parameter-shaped array.
    pub fn shift_field(&self, grad: &mut Array2<f64>, delta: &Array1<f64>) {
        for &r in self.kind.field_rows() {
            let mut row = grad.row_mut(r);
            row += delta;
        }
    }

    /// Restores default parameters.
    pub fn reset(&mut self) {
        let fresh = Self::of(self.kind, &self.shape);
        self.par = fresh.par;
    }

    /// Sets the parameters so that the layer alone matches the marginal
    /// statistics of `data`. Empirical probabilities are clamped to
    /// `[ε, 1 - ε]`; variances are floored at `ε`. Rectified layers are
    /// reset to defaults.
    ///
    /// # Errors
    /// - `Domain` if `ε ∉ (0, 0.5)`
    /// - `ShapeMismatch` if `data` does not match the layer
    pub fn initialize_from_data(
        &mut self,
        data: &Array2<f64>,
        weights: Option<&Array1<f64>>,
        eps: f64,
    ) -> RbmResult<()> {
        if !(eps > 0.0 && eps < 0.5) {
            return Err(RbmError::Domain(format!("ε must lie in (0, 0.5), got {eps}")));
        }
        self.check_batch(data)?;
        check_weights(weights, data.nrows())?;
        let mean = weighted_row_mean(data, weights);
        match self.kind {
            LayerKind::Binary => {
                let theta = mean.mapv(|m| {
                    let p = m.clamp(eps, 1.0 - eps);
                    (p / (1.0 - p)).ln()
                });
                self.par.row_mut(0).assign(&theta);
            }
            LayerKind::Spin => {
                let theta = mean.mapv(|m| {
                    let p = (0.5 * (1.0 + m)).clamp(eps, 1.0 - eps);
                    0.5 * (p / (1.0 - p)).ln()
                });
                self.par.row_mut(0).assign(&theta);
            }
            LayerKind::Potts => {
                let mut theta = mean.mapv(|m| m.clamp(eps, 1.0).ln());
                potts::zerosum_columns(&mut theta, self.shape[0]);
                self.par.row_mut(0).assign(&theta);
            }
            LayerKind::Gaussian => {
                let second = weighted_row_mean(&data.mapv(|x| x * x), weights);
                let var = (&second - &mean.mapv(|m| m * m)).mapv(|v| v.max(eps));
                self.par.row_mut(0).assign(&(&mean / &var));
                self.par.row_mut(1).assign(&var.mapv(|v| 1.0 / v));
            }
            LayerKind::ReLU | LayerKind::DReLU | LayerKind::PReLU | LayerKind::XReLU => self.reset(),
        }
        Ok(())
    }

    /// Imposes the zero-sum gauge on Potts fields. No-op for other layers.
    pub fn zerosum(&mut self) {
        if self.kind == LayerKind::Potts {
            let mut theta = self.par.row(0).to_owned();
            potts::zerosum_columns(&mut theta, self.shape[0]);
            self.par.row_mut(0).assign(&theta);
        }
    }

    /// Parameter interpolation `(1 - β) init + β target`.
    ///
    /// pReLU and xReLU (and mixed rectified pairs) are interpolated in their
    /// dReLU form, where the energy is linear in the parameters.
    ///
    /// # Errors
    /// - `ShapeMismatch` if the unit layouts differ
    /// - `InvalidConfig` if the layer families cannot be interpolated
    pub fn anneal(init: &Layer, target: &Layer, beta: f64) -> RbmResult<Layer> {
        if init.shape != target.shape {
            return Err(RbmError::ShapeMismatch {
                expected: target.shape.clone(),
                actual: init.shape.clone(),
            });
        }
        let linear = |k: LayerKind| !matches!(k, LayerKind::PReLU | LayerKind::XReLU);
        let (a, b) = if init.kind == target.kind && linear(init.kind) {
            (init.clone(), target.clone())
        } else if init.kind.is_rectified() && target.kind.is_rectified() {
            (init.to_drelu()?, target.to_drelu()?)
        } else {
            return Err(RbmError::InvalidConfig(format!(
                "cannot anneal {:?} into {:?}",
                init.kind, target.kind
            )));
        };
        let mut out = b.clone();
        ndarray::Zip::from(&mut out.par)
            .and(&a.par)
            .and(&b.par)
            .for_each(|o, &x, &y| *o = lerp(x, y, beta));
        Ok(out)
    }

    /// The layer with its energy scaled by `β` (inverse temperature).
    pub fn scaled(&self, beta: f64) -> RbmResult<Layer> {
        let mut zero = self.clone();
        zero.par.fill(0.0);
        Layer::anneal(&zero, self, beta)
    }

    /// Equivalent dReLU layer.
    ///
    /// ReLU maps to a dReLU whose negative branch has infinite precision
    /// (pinned at zero).
    ///
    /// # Errors
    /// - `Domain` for non-rectified layers
    pub fn to_drelu(&self) -> RbmResult<Layer> {
        let params = self.unit_params();
        let convert: fn(&Params) -> Params = match self.kind {
            LayerKind::DReLU => return Ok(self.clone()),
            LayerKind::ReLU => |p| [p[0], 0.0, p[1], f64::INFINITY],
            LayerKind::PReLU => prelu::to_drelu,
            LayerKind::XReLU => xrelu::to_drelu,
            other => {
                return Err(RbmError::Domain(format!("{other:?} has no dReLU form")));
            }
        };
        Ok(self.rebuilt(LayerKind::DReLU, params.iter().map(convert)))
    }

    /// Equivalent pReLU layer. A pinned branch maps to `η = ±1`.
    ///
    /// # Errors
    /// - `Domain` for non-rectified layers or units with both branches pinned
    pub fn to_prelu(&self) -> RbmResult<Layer> {
        if self.kind == LayerKind::PReLU {
            return Ok(self.clone());
        }
        let d = self.to_drelu()?;
        let converted: Option<Vec<Params>> = d.unit_params().iter().map(prelu::from_drelu).collect();
        let converted = converted
            .ok_or_else(|| RbmError::Domain("unit with both branches pinned has no pReLU form".to_string()))?;
        Ok(self.rebuilt(LayerKind::PReLU, converted.into_iter()))
    }

    /// Equivalent xReLU layer.
    ///
    /// # Errors
    /// - `Domain` for non-rectified layers or any pinned branch (including every ReLU)
    pub fn to_xrelu(&self) -> RbmResult<Layer> {
        if self.kind == LayerKind::XReLU {
            return Ok(self.clone());
        }
        let d = self.to_drelu()?;
        let converted: Option<Vec<Params>> = d.unit_params().iter().map(xrelu::from_drelu).collect();
        let converted = converted
            .ok_or_else(|| RbmError::Domain("a pinned branch has no xReLU form".to_string()))?;
        Ok(self.rebuilt(LayerKind::XReLU, converted.into_iter()))
    }

    fn rebuilt<I: Iterator<Item = Params>>(&self, kind: LayerKind, units: I) -> Layer {
        let mut out = Self::of(kind, &self.shape);
        for (j, p) in units.enumerate() {
            for k in 0..kind.n_params() {
                out.par[[k, j]] = p[k];
            }
        }
        out
    }

    /// Every configuration of a small discrete layer, one per row.
    ///
    /// # Errors
    /// - `Domain` for continuous layers
    /// - `InvalidConfig` above [`MAX_ENUMERATED_STATES`] states
    pub fn iterate_states(&self) -> RbmResult<Array2<f64>> {
        let (base, digits) = match self.kind {
            LayerKind::Binary | LayerKind::Spin => (2u64, self.len()),
            LayerKind::Potts => (self.shape[0] as u64, self.n_sites()),
            other => return Err(RbmError::Domain(format!("{other:?} units cannot be enumerated"))),
        };
        let count = u32::try_from(digits)
            .ok()
            .and_then(|d| base.checked_pow(d))
            .filter(|&c| c <= MAX_ENUMERATED_STATES)
            .ok_or_else(|| {
                RbmError::InvalidConfig(format!("{base}^{digits} states is too many to enumerate"))
            })?;
        let mut out = Array2::zeros((count as usize, self.len()));
        for (idx, mut row) in out.rows_mut().into_iter().enumerate() {
            let mut rest = idx as u64;
            for site in 0..digits {
                let digit = (rest % base) as usize;
                rest /= base;
                match self.kind {
                    LayerKind::Binary => row[site] = digit as f64,
                    LayerKind::Spin => row[site] = 2.0 * digit as f64 - 1.0,
                    _ => potts::set_category(row.view_mut(), self.shape[0], site, digit),
                }
            }
        }
        Ok(out)
    }
}

fn lerp(a: f64, b: f64, beta: f64) -> f64 {
    if beta == 0.0 {
        a
    } else if beta == 1.0 {
        b
    } else {
        (1.0 - beta) * a + beta * b
    }
}

/// Weighted average over rows of per-unit statistics produced by `f(unit, value, out)`.
fn average_stats<F: FnMut(usize, f64, &mut [f64])>(
    x: &Array2<f64>,
    weights: Option<&Array1<f64>>,
    n_stats: usize,
    mut f: F,
) -> Array2<f64> {
    let mut acc = Array2::zeros((n_stats, x.ncols()));
    let mut buf = [0.0; 4];
    let mut total = 0.0;
    for (b, row) in x.rows().into_iter().enumerate() {
        let w = weights.map_or(1.0, |w| w[b]);
        total += w;
        for (j, &v) in row.iter().enumerate() {
            f(j, v, &mut buf);
            for k in 0..n_stats {
                acc[[k, j]] += w * buf[k];
            }
        }
    }
    if total > 0.0 {
        acc /= total;
    }
    acc
}
