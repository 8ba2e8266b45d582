//! # RBM (Restricted Boltzmann Machines)
//!
//! Bipartite energy-based models with a visible and a hidden layer of
//! exponential-family units coupled by a weight matrix.
//!
//! ## Overview
//!
//! The joint energy is
//! `E(v, h) = Σ_i U_i(v_i) + Σ_μ U_μ(h_μ) - Σ_iμ v_i w_iμ h_μ`.
//! Every unit family exposes its cumulant generating function of an input
//! field, from which conditional means, variances, samples and free
//! energies follow. Models are trained by (persistent) contrastive
//! divergence and evaluated through pseudolikelihood or annealed
//! importance sampling of the partition function.
//!
//! ## Structure
//!
//! - [`layers`]: Unit families: Binary, Spin, Potts, Gaussian and the rectified families
//! - [`core`]: The RBM itself, energies, exact partition functions, gradients
//! - [`sampling`]: Block Gibbs and Metropolis chains
//! - [`partition`]: Annealed importance sampling and pseudolikelihood
//! - [`training`]: CD, PCD, centered and weight-normalized PCD, optimizers
//! - [`data`]: Sample validation, minibatching, synthetic data
//! - [`checkpoint`]: JSON persistence
//! - [`utils`]: Numerically stable scalar helpers

pub mod checkpoint;
pub mod core;
pub mod data;
pub mod layers;
pub mod partition;
pub mod sampling;
pub mod training;
pub mod utils;

pub use checkpoint::{load_checkpoint, save_checkpoint, RbmCheckpoint};
pub use core::{Gradient, Rbm, RbmError, RbmResult, Regularization};
pub use layers::{Layer, LayerKind};
pub use partition::{ais, AisEstimate};
pub use training::{
    cd, pcd, pcd_centered, pcd_weightnorm, Adam, CdConfig, CenteredConfig, History, Optimizer, Sgd,
    TrainConfig, TrainOutcome, WeightNormConfig,
};
