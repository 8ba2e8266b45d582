//! Log-pseudolikelihood of discrete visible configurations.
//!
//! For site `i` of sample `v`:
//!
//! ```text
//! log p(vᵢ | v₋ᵢ) = -F(v) - log Σ_{x} exp(-F(v with vᵢ = x))
//! ```
//!
//! where `x` ranges over every value site `i` can take (the two bit
//! values, the two spins, or the `q` Potts categories).

use crate::core::{Rbm, RbmError, RbmResult};
use crate::layers::{potts, LayerKind};
use crate::utils::logsumexp;
use ndarray::{Array1, Array2};
use rand::Rng;

/// Site conditional log-probability for site `sites[b]` of each row `b` of `v`.
///
/// # Errors
/// - `Domain` for continuous visible layers
/// - `ShapeMismatch` if `sites` does not have one entry per row or a site is out of range
pub fn log_pseudolikelihood_sites(rbm: &Rbm, v: &Array2<f64>, sites: &[usize]) -> RbmResult<Array1<f64>> {
    let layer = rbm.visible();
    let kind = layer.kind();
    if !kind.is_discrete() {
        return Err(RbmError::Domain(format!("pseudolikelihood needs discrete units, got {kind:?}")));
    }
    layer.check_batch(v)?;
    if sites.len() != v.nrows() {
        return Err(RbmError::ShapeMismatch {
            expected: vec![v.nrows()],
            actual: vec![sites.len()],
        });
    }
    let n_sites = layer.n_sites();
    if let Some(&bad) = sites.iter().find(|&&s| s >= n_sites) {
        return Err(RbmError::ShapeMismatch {
            expected: vec![n_sites],
            actual: vec![bad],
        });
    }
    let q = layer.n_categories();
    let n_values = if kind == LayerKind::Potts { q } else { 2 };

    // Free energy of each alternative value at the chosen site: (n_values, batch).
    let mut free = Array2::zeros((n_values, v.nrows()));
    for x in 0..n_values {
        let mut flipped = v.clone();
        for (b, &site) in sites.iter().enumerate() {
            match kind {
                LayerKind::Binary => flipped[[b, site]] = x as f64,
                LayerKind::Spin => flipped[[b, site]] = 2.0 * x as f64 - 1.0,
                _ => potts::set_category(flipped.row_mut(b), q, site, x),
            }
        }
        free.row_mut(x).assign(&rbm.free_energy(&flipped)?);
    }
    let observed = rbm.free_energy(v)?;
    Ok(Array1::from_shape_fn(v.nrows(), |b| {
        -observed[b] - logsumexp(free.column(b).iter().map(|&f| -f))
    }))
}

/// Stochastic estimator: one uniformly chosen site per sample. Its
/// expectation over the site choice is [`log_pseudolikelihood_exact`].
pub fn log_pseudolikelihood<R: Rng + ?Sized>(rbm: &Rbm, v: &Array2<f64>, rng: &mut R) -> RbmResult<Array1<f64>> {
    let n_sites = rbm.visible().n_sites();
    if n_sites == 0 {
        return Ok(Array1::zeros(v.nrows()));
    }
    let sites: Vec<usize> = (0..v.nrows()).map(|_| rng.gen_range(0..n_sites)).collect();
    log_pseudolikelihood_sites(rbm, v, &sites)
}

/// Average over all sites of the site conditional log-probabilities, per sample.
pub fn log_pseudolikelihood_exact(rbm: &Rbm, v: &Array2<f64>) -> RbmResult<Array1<f64>> {
    let n_sites = rbm.visible().n_sites();
    let mut total = Array1::zeros(v.nrows());
    if n_sites == 0 {
        rbm.visible().check_batch(v)?;
        return Ok(total);
    }
    for site in 0..n_sites {
        total += &log_pseudolikelihood_sites(rbm, v, &vec![site; v.nrows()])?;
    }
    Ok(total / n_sites as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Layer;
    use crate::utils::sigmoid;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_independent_binary_sites() {
        // With W = 0 every site conditional is the marginal.
        let mut visible = Layer::binary(&[2]);
        visible.par_mut().row_mut(0).assign(&ndarray::arr1(&[1.0, -2.0]));
        let rbm = Rbm::with_zero_weights(visible, Layer::binary(&[3]));
        let v = ndarray::arr2(&[[1.0, 0.0]]);
        let lpl = log_pseudolikelihood_exact(&rbm, &v).unwrap();
        let expected = 0.5 * (sigmoid(1.0).ln() + sigmoid(2.0).ln());
        assert_abs_diff_eq!(lpl[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_stochastic_estimator_averages_to_exact() {
        let mut rng = StdRng::seed_from_u64(0);
        let rbm = Rbm::with_random_weights(Layer::spin(&[3]), Layer::binary(&[2]), 0.8, &mut rng).unwrap();
        let v = ndarray::arr2(&[[1.0, -1.0, 1.0]]);
        let exact = log_pseudolikelihood_exact(&rbm, &v).unwrap()[0];
        let n = 20_000;
        let batch = Array2::from_shape_fn((n, 3), |(_, j)| v[[0, j]]);
        let stochastic = log_pseudolikelihood(&rbm, &batch, &mut rng).unwrap();
        assert_abs_diff_eq!(stochastic.mean().unwrap(), exact, epsilon = 0.05);
    }

    #[test]
    fn test_potts_sites_are_normalized() {
        let mut rng = StdRng::seed_from_u64(1);
        let rbm = Rbm::with_random_weights(Layer::potts(3, &[2]), Layer::gaussian(&[2]), 0.5, &mut rng).unwrap();
        let states = rbm.visible().iterate_states().unwrap();
        let probs: f64 = (0..3)
            .map(|c| {
                let mut v = states.row(0).to_owned().insert_axis(ndarray::Axis(0));
                potts::set_category(v.row_mut(0), 3, 1, c);
                log_pseudolikelihood_sites(&rbm, &v, &[1]).unwrap()[0].exp()
            })
            .sum();
        assert_abs_diff_eq!(probs, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_continuous_and_bad_sites() {
        let rbm = Rbm::with_zero_weights(Layer::gaussian(&[2]), Layer::binary(&[1]));
        assert!(log_pseudolikelihood_exact(&rbm, &Array2::zeros((1, 2))).is_err());
        let rbm = Rbm::with_zero_weights(Layer::binary(&[2]), Layer::binary(&[1]));
        assert!(log_pseudolikelihood_sites(&rbm, &Array2::zeros((1, 2)), &[2]).is_err());
        assert!(log_pseudolikelihood_sites(&rbm, &Array2::zeros((2, 2)), &[0]).is_err());
    }
}
