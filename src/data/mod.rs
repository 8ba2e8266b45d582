//! Training data handling: validation, minibatching, and a synthetic
//! prototype-plus-noise generator.

use crate::core::{RbmError, RbmResult};
use crate::layers::Layer;
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

/// Checks optional per-sample weights: one per sample, finite,
/// non-negative, with a positive sum.
pub fn check_weights(weights: Option<&Array1<f64>>, n_samples: usize) -> RbmResult<()> {
    let Some(w) = weights else {
        return Ok(());
    };
    if w.len() != n_samples {
        return Err(RbmError::ShapeMismatch {
            expected: vec![n_samples],
            actual: vec![w.len()],
        });
    }
    if w.iter().any(|&x| !x.is_finite() || x < 0.0) {
        return Err(RbmError::InvalidConfig(
            "sample weights must be finite and non-negative".to_string(),
        ));
    }
    if w.sum() <= 0.0 {
        return Err(RbmError::InvalidConfig("sample weights must have a positive sum".to_string()));
    }
    Ok(())
}

/// Validates a training set against the visible layer.
///
/// # Errors
/// - `ShapeMismatch` if `data` columns differ from the visible unit count
/// - `InvalidConfig` for an empty dataset, bad weights, or
///   `batch_size ∉ [1, n_samples]`
pub fn validate_training_data(
    visible: &Layer,
    data: &Array2<f64>,
    weights: Option<&Array1<f64>>,
    batch_size: usize,
) -> RbmResult<()> {
    visible.check_batch(data)?;
    let n = data.nrows();
    if n == 0 {
        return Err(RbmError::InvalidConfig("training data is empty".to_string()));
    }
    check_weights(weights, n)?;
    if batch_size == 0 || batch_size > n {
        return Err(RbmError::InvalidConfig(format!(
            "batch_size must lie in [1, {n}], got {batch_size}"
        )));
    }
    Ok(())
}

/// Splits `0..n` into consecutive batches of `batch_size` indices
/// (the last may be shorter), optionally shuffled first.
pub fn minibatches<R: Rng + ?Sized>(n: usize, batch_size: usize, shuffle: bool, rng: &mut R) -> Vec<Vec<usize>> {
    let mut idx: Vec<usize> = (0..n).collect();
    if shuffle {
        idx.shuffle(rng);
    }
    idx.chunks(batch_size.max(1)).map(<[usize]>::to_vec).collect()
}

/// Rows of `x` at `idx`.
pub fn select_rows(x: &Array2<f64>, idx: &[usize]) -> Array2<f64> {
    x.select(Axis(0), idx)
}

/// Entries of optional weights at `idx`.
pub fn select_weights(weights: Option<&Array1<f64>>, idx: &[usize]) -> Option<Array1<f64>> {
    weights.map(|w| w.select(Axis(0), idx))
}

/// Binary samples drawn around random prototypes: each sample copies one of
/// `n_prototypes` random binary vectors and flips each bit with probability `noise`.
pub fn prototype_samples<R: Rng + ?Sized>(
    n_samples: usize,
    n_visible: usize,
    n_prototypes: usize,
    noise: f64,
    rng: &mut R,
) -> Array2<f64> {
    let n_prototypes = n_prototypes.max(1);
    let prototypes = Array2::from_shape_fn((n_prototypes, n_visible), |_| {
        if rng.gen::<bool>() {
            1.0
        } else {
            0.0
        }
    });
    let mut out = Array2::zeros((n_samples, n_visible));
    for mut row in out.rows_mut() {
        let p = rng.gen_range(0..n_prototypes);
        for (j, x) in row.iter_mut().enumerate() {
            let bit = prototypes[[p, j]];
            *x = if rng.gen::<f64>() < noise { 1.0 - bit } else { bit };
        }
    }
    out
}

/// Splits rows into a leading training part and a trailing held-out part.
pub fn train_test_split(data: &Array2<f64>, test_fraction: f64) -> (Array2<f64>, Array2<f64>) {
    let n = data.nrows();
    let n_test = ((n as f64) * test_fraction.clamp(0.0, 1.0)).round() as usize;
    let split = n - n_test;
    let (train, test) = data.view().split_at(Axis(0), split);
    (train.to_owned(), test.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_check_weights() {
        assert!(check_weights(None, 3).is_ok());
        assert!(check_weights(Some(&ndarray::arr1(&[1.0, 0.0, 2.0])), 3).is_ok());
        assert!(matches!(
            check_weights(Some(&ndarray::arr1(&[1.0, 2.0])), 3),
            Err(RbmError::ShapeMismatch { .. })
        ));
        assert!(check_weights(Some(&ndarray::arr1(&[1.0, -1.0])), 2).is_err());
        assert!(check_weights(Some(&ndarray::arr1(&[0.0, 0.0])), 2).is_err());
    }

    #[test]
    fn test_validate_batch_size() {
        let layer = Layer::binary(&[2]);
        let data = Array2::zeros((5, 2));
        assert!(validate_training_data(&layer, &data, None, 5).is_ok());
        assert!(validate_training_data(&layer, &data, None, 0).is_err());
        assert!(validate_training_data(&layer, &data, None, 6).is_err());
        assert!(validate_training_data(&layer, &Array2::zeros((5, 3)), None, 2).is_err());
    }

    #[test]
    fn test_minibatches_cover_all_samples() {
        let mut rng = StdRng::seed_from_u64(0);
        let batches = minibatches(10, 4, true, &mut rng);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 2);
        let mut all: Vec<usize> = batches.concat();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_prototype_samples_are_binary() {
        let mut rng = StdRng::seed_from_u64(1);
        let x = prototype_samples(50, 7, 3, 0.1, &mut rng);
        assert_eq!(x.dim(), (50, 7));
        assert!(x.iter().all(|&v| v == 0.0 || v == 1.0));
    }

    #[test]
    fn test_train_test_split() {
        let x = Array2::from_shape_fn((10, 2), |(i, _)| i as f64);
        let (train, test) = train_test_split(&x, 0.2);
        assert_eq!(train.nrows(), 8);
        assert_eq!(test[[0, 0]], 8.0);
    }
}
