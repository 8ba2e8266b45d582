//! Parameter update rules.
//!
//! Training loops hand each gradient tensor to an [`Optimizer`] together
//! with a [`ParamKey`] naming the tensor, so stateful rules (momentum, Adam
//! moments) can keep one state slot per parameter. The update is a descent
//! step: `param ← param - step(grad)`.

use ndarray::Array2;
use std::collections::HashMap;

/// Identifies a parameter tensor across optimizer steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    Visible,
    Hidden,
    Weights,
    /// Tensors outside the RBM's own layout (e.g. a weight-norm factor)
    Custom(&'static str),
}

/// Applies one descent step to a parameter given its gradient.
pub trait Optimizer {
    fn step(&mut self, key: ParamKey, param: &mut Array2<f64>, grad: &Array2<f64>);
}

/// Stochastic gradient descent with classical momentum.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub lr: f64,
    pub momentum: f64,
    velocity: HashMap<ParamKey, Array2<f64>>,
}

impl Sgd {
    pub fn new(lr: f64, momentum: f64) -> Self {
        Self {
            lr,
            momentum,
            velocity: HashMap::new(),
        }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, key: ParamKey, param: &mut Array2<f64>, grad: &Array2<f64>) {
        if self.momentum == 0.0 {
            param.scaled_add(-self.lr, grad);
            return;
        }
        let v = self
            .velocity
            .entry(key)
            .or_insert_with(|| Array2::zeros(grad.raw_dim()));
        if v.dim() != grad.dim() {
            *v = Array2::zeros(grad.raw_dim());
        }
        *v *= self.momentum;
        v.scaled_add(self.lr, grad);
        *param -= &*v;
    }
}

/// Adam (Kingma & Ba) with bias correction.
#[derive(Debug, Clone)]
pub struct Adam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    state: HashMap<ParamKey, AdamState>,
}

#[derive(Debug, Clone)]
struct AdamState {
    m: Array2<f64>,
    v: Array2<f64>,
    t: i32,
}

impl Adam {
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            ..Self::default()
        }
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            state: HashMap::new(),
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, key: ParamKey, param: &mut Array2<f64>, grad: &Array2<f64>) {
        let s = self.state.entry(key).or_insert_with(|| AdamState {
            m: Array2::zeros(grad.raw_dim()),
            v: Array2::zeros(grad.raw_dim()),
            t: 0,
        });
        if s.m.dim() != grad.dim() {
            s.m = Array2::zeros(grad.raw_dim());
            s.v = Array2::zeros(grad.raw_dim());
            s.t = 0;
        }
        s.t += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        ndarray::Zip::from(&mut s.m)
            .and(&mut s.v)
            .and(grad)
            .for_each(|m, v, &g| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
            });
        let c1 = 1.0 - b1.powi(s.t);
        let c2 = 1.0 - b2.powi(s.t);
        let (lr, eps) = (self.lr, self.eps);
        ndarray::Zip::from(param)
            .and(&s.m)
            .and(&s.v)
            .for_each(|p, &m, &v| {
                *p -= lr * (m / c1) / ((v / c2).sqrt() + eps);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    #[test]
    fn test_sgd_plain_step() {
        let mut opt = Sgd::new(0.1, 0.0);
        let mut p = arr2(&[[1.0, 2.0]]);
        opt.step(ParamKey::Weights, &mut p, &arr2(&[[1.0, -1.0]]));
        assert_abs_diff_eq!(p[[0, 0]], 0.9);
        assert_abs_diff_eq!(p[[0, 1]], 2.1);
    }

    #[test]
    fn test_sgd_momentum_accumulates_per_key() {
        let mut opt = Sgd::new(1.0, 0.5);
        let mut p = arr2(&[[0.0]]);
        let g = arr2(&[[1.0]]);
        opt.step(ParamKey::Weights, &mut p, &g);
        opt.step(ParamKey::Weights, &mut p, &g);
        // velocities 1, 1.5
        assert_abs_diff_eq!(p[[0, 0]], -2.5);
        let mut q = arr2(&[[0.0]]);
        opt.step(ParamKey::Hidden, &mut q, &g);
        assert_abs_diff_eq!(q[[0, 0]], -1.0);
    }

    #[test]
    fn test_adam_first_step_is_lr_sized() {
        let mut opt = Adam::new(0.01);
        let mut p = arr2(&[[0.0, 0.0]]);
        opt.step(ParamKey::Visible, &mut p, &arr2(&[[3.0, -0.2]]));
        assert_abs_diff_eq!(p[[0, 0]], -0.01, epsilon = 1e-6);
        assert_abs_diff_eq!(p[[0, 1]], 0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_adam_minimizes_quadratic() {
        let mut opt = Adam::new(0.05);
        let mut p = arr2(&[[4.0]]);
        for _ in 0..2000 {
            let g = &p * 2.0;
            opt.step(ParamKey::Custom("x"), &mut p, &g);
        }
        assert!(p[[0, 0]].abs() < 0.1);
    }
}
