//! Gradient capability for scalar losses over a flat parameter vector.

use ndarray::Array1;

/// Computes `∇f(x)` for a scalar function of a parameter vector.
pub trait Differentiate {
    fn gradient(&self, f: &dyn Fn(&Array1<f64>) -> f64, x: &Array1<f64>) -> Array1<f64>;
}

/// Central differences, `(f(x + h eᵢ) - f(x - h eᵢ)) / 2h`.
#[derive(Debug, Clone, Copy)]
pub struct FiniteDifference {
    pub step: f64,
}

impl Default for FiniteDifference {
    fn default() -> Self {
        Self { step: 1e-6 }
    }
}

impl Differentiate for FiniteDifference {
    fn gradient(&self, f: &dyn Fn(&Array1<f64>) -> f64, x: &Array1<f64>) -> Array1<f64> {
        let mut probe = x.clone();
        let mut grad = Array1::zeros(x.len());
        for i in 0..x.len() {
            let orig = probe[i];
            probe[i] = orig + self.step;
            let plus = f(&probe);
            probe[i] = orig - self.step;
            let minus = f(&probe);
            probe[i] = orig;
            grad[i] = (plus - minus) / (2.0 * self.step);
        }
        grad
    }
}
