//! Checkpoint save/load for RBMs.
//!
//! Serializes both layers (family, unit layout, parameter rows) and the
//! weight matrix to pretty-printed JSON. Matrices are stored as nested
//! rows so the files stay readable.

use crate::core::{Rbm, RbmError, RbmResult};
use crate::layers::{Layer, LayerKind};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serializable layer description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerData {
    pub kind: LayerKind,
    pub shape: Vec<usize>,
    /// Parameter rows, in the order of [`LayerKind::param_names`].
    pub params: Vec<Vec<f64>>,
}

/// Serializable checkpoint data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbmCheckpoint {
    pub visible: LayerData,
    pub hidden: LayerData,
    /// Weight matrix rows, one per visible unit.
    pub weights: Vec<Vec<f64>>,
    /// Epoch at which this checkpoint was saved.
    pub epoch: usize,
}

fn array2_to_vecs(arr: &Array2<f64>) -> Vec<Vec<f64>> {
    arr.rows().into_iter().map(|row| row.to_vec()).collect()
}

fn vecs_to_array2(vecs: &[Vec<f64>], ncols: usize) -> RbmResult<Array2<f64>> {
    let nrows = vecs.len();
    let flat: Vec<f64> = vecs.iter().flat_map(|r| r.iter().copied()).collect();
    Array2::from_shape_vec((nrows, ncols), flat).map_err(|_| RbmError::ShapeMismatch {
        expected: vec![nrows, ncols],
        actual: vecs.iter().map(Vec::len).collect(),
    })
}

impl LayerData {
    fn from_layer(layer: &Layer) -> Self {
        Self {
            kind: layer.kind(),
            shape: layer.shape().to_vec(),
            params: array2_to_vecs(layer.par()),
        }
    }

    fn to_layer(&self) -> RbmResult<Layer> {
        let n: usize = self.shape.iter().product();
        Layer::from_params(self.kind, &self.shape, vecs_to_array2(&self.params, n)?)
    }
}

impl RbmCheckpoint {
    pub fn from_rbm(rbm: &Rbm, epoch: usize) -> Self {
        Self {
            visible: LayerData::from_layer(rbm.visible()),
            hidden: LayerData::from_layer(rbm.hidden()),
            weights: array2_to_vecs(rbm.w()),
            epoch,
        }
    }

    /// Rebuilds the model, validating every shape.
    pub fn to_rbm(&self) -> RbmResult<Rbm> {
        let visible = self.visible.to_layer()?;
        let hidden = self.hidden.to_layer()?;
        let w = vecs_to_array2(&self.weights, hidden.len())?;
        Rbm::new(visible, hidden, w)
    }
}

/// Save an RBM checkpoint to a JSON file, creating parent directories.
///
/// # Errors
///
/// - `Domain` if any parameter is not finite (JSON has no infinities)
/// - `Io`/`Serde` if the file cannot be written or the data cannot be serialized
pub fn save_checkpoint(rbm: &Rbm, path: &Path, epoch: usize) -> RbmResult<()> {
    let finite = rbm
        .visible()
        .par()
        .iter()
        .chain(rbm.hidden().par().iter())
        .chain(rbm.w().iter())
        .all(|x| x.is_finite());
    if !finite {
        return Err(RbmError::Domain(
            "non-finite parameters cannot be stored as JSON".to_string(),
        ));
    }
    let data = RbmCheckpoint::from_rbm(rbm, epoch);
    let json = serde_json::to_string_pretty(&data)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;
    Ok(())
}

/// Load an RBM checkpoint from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the stored
/// shapes are inconsistent.
pub fn load_checkpoint(path: &Path) -> RbmResult<(RbmCheckpoint, Rbm)> {
    let json = std::fs::read_to_string(path)?;
    let data: RbmCheckpoint = serde_json::from_str(&json)?;
    let rbm = data.to_rbm()?;
    Ok((data, rbm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;

    fn make_test_rbm() -> Rbm {
        let mut rng = StdRng::seed_from_u64(0);
        Rbm::with_random_weights(Layer::potts(3, &[2]), Layer::drelu(&[4]), 0.3, &mut rng).expect("valid std")
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let rbm = make_test_rbm();
        let dir = std::env::temp_dir().join("rbm_test_checkpoint");
        let path = dir.join("test_checkpoint.json");

        let result = save_checkpoint(&rbm, &path, 5);
        assert!(result.is_ok(), "Failed to save: {:?}", result.err());

        let (data, loaded) = load_checkpoint(&path).expect("Failed to load");
        assert_eq!(data.epoch, 5);
        assert_eq!(data.visible.kind, LayerKind::Potts);
        assert_eq!(loaded.visible().shape(), &[3, 2]);
        assert_eq!(loaded.hidden().kind(), LayerKind::DReLU);
        for (a, b) in rbm.w().iter().zip(loaded.w().iter()) {
            assert!((a - b).abs() < 1e-12, "Weight mismatch: {a} vs {b}");
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_checkpoint_creates_directory() {
        let dir = std::env::temp_dir().join("rbm_test_nested").join("deep").join("path");
        let path = dir.join("checkpoint.json");
        assert!(save_checkpoint(&make_test_rbm(), &path, 0).is_ok());
        assert!(path.exists());
        let _ = fs::remove_dir_all(std::env::temp_dir().join("rbm_test_nested"));
    }

    #[test]
    fn test_non_finite_parameters_are_refused() {
        let rbm = Rbm::with_zero_weights(Layer::binary(&[2]), Layer::relu(&[1]).to_drelu().expect("relu"));
        let path = std::env::temp_dir().join("rbm_test_inf.json");
        assert!(matches!(save_checkpoint(&rbm, &path, 0), Err(RbmError::Domain(_))));
    }

    #[test]
    fn test_load_nonexistent_checkpoint() {
        let result = load_checkpoint(Path::new("/nonexistent/path.json"));
        assert!(matches!(result, Err(RbmError::Io(_))));
    }

    #[test]
    fn test_inconsistent_shapes_are_rejected() {
        let mut data = RbmCheckpoint::from_rbm(&make_test_rbm(), 0);
        data.weights.pop();
        assert!(data.to_rbm().is_err());
    }
}
