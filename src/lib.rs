//! # gmm3d - Gaussian mixture density estimation for 3D point clouds
//!
//! Fits a mixture of weighted multivariate Gaussians (weight, mean, full 3x3
//! covariance) to a set of unlabeled 3D observations under a
//! maximum-likelihood criterion:
//!
//! - **K-means initialization**: restartable Lloyd clustering seeds the mode
//!   means and weights.
//! - **Expectation-Maximization**: iterative E-step/M-step refinement of the
//!   full-covariance mixture, with a relative log-likelihood stopping rule.
//! - **Log-domain arithmetic**: every probability query runs through
//!   log-sum-exp, so far outliers and near-zero weights cannot underflow the
//!   statistics.
//!
//! ## Quick Start
//!
//! ```
//! use gmm3d::prelude::*;
//! use rand::prelude::*;
//!
//! // Two noisy blobs of 3D points.
//! let mut rng = StdRng::seed_from_u64(42);
//! let mut observations = Vec::new();
//! for _ in 0..50 {
//!     let mut jitter = || rng.gen_range(-0.5..0.5);
//!     observations.push(Vec3::new(-5.0 + jitter(), jitter(), jitter()));
//!     observations.push(Vec3::new(5.0 + jitter(), jitter(), jitter()));
//! }
//!
//! // Fit a 2-mode mixture: k-means seeds it, EM trains it.
//! let mut gmm = MixtureModel::new(2);
//! let converged = gmm
//!     .fit_with(&observations, &FitOptions::default().with_seed(7))
//!     .unwrap();
//! assert!(converged);
//!
//! // Query the trained model.
//! let (left, _) = gmm.closest_mode(&Vec3::new(-5.0, 0.0, 0.0)).unwrap();
//! let (right, _) = gmm.closest_mode(&Vec3::new(5.0, 0.0, 0.0)).unwrap();
//! assert_ne!(left, right);
//! assert!(gmm.log_likelihood(&Vec3::new(5.0, 0.0, 0.0)).is_finite());
//! ```
//!
//! ## Module Overview
//!
//! - [`mixture`]: the mixture model, probability queries, pruning, fitting
//! - [`em`]: the Expectation-Maximization optimizer
//! - [`gaussian`]: single multivariate Gaussian component
//! - [`kmeans`]: k-means clustering used for initialization
//! - [`stats`]: online mean/variance accumulators
//! - [`random`]: seeded sampling utilities

pub mod em;
pub mod gaussian;
pub mod kmeans;
pub mod mixture;
pub mod random;
pub mod stats;

mod error;
mod types;

pub use error::{ErrorCode, GmmError, Result};
pub use types::{Mat3, Vec3};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::em::{Em, DEFAULT_EM_MAX_ITERATIONS, DEFAULT_EM_TOLERANCE, SAFE_MIN_WEIGHT};
    pub use crate::error::{ErrorCode, GmmError, Result};
    pub use crate::gaussian::GaussianComponent;
    pub use crate::kmeans::{
        KMeans, KMeansConfig, KMeansInit, KMeansResult, DEFAULT_KMEANS_RESTARTS,
    };
    pub use crate::mixture::{likelihood_ratio, log_exp_sum, FitOptions, MixtureModel};
    pub use crate::random::RandomSampler;
    pub use crate::stats::{OnlineMean, OnlineVariance};
    pub use crate::types::{Mat3, Vec3};
}
