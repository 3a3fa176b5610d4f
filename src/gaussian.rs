//! Single multivariate Gaussian component.
//!
//! Each component caches the Cholesky-derived precision matrix and
//! log-determinant of its covariance, so density evaluation inside the EM
//! inner loops is a handful of flops. The cache is refreshed whenever the
//! covariance is replaced.

use crate::types::{Mat3, Vec3};
use nalgebra::Cholesky;
use rand::Rng;
use rand_distr::StandardNormal;

/// One weighted 3D Gaussian (mean, full covariance, mixing weight).
#[derive(Debug, Clone)]
pub struct GaussianComponent {
    mean: Vec3,
    covariance: Mat3,
    weight: f64,
    /// Inverse covariance. `None` when the covariance is not positive
    /// definite, in which case the density is defined as zero everywhere.
    precision: Option<Mat3>,
    /// Cholesky factor of the covariance, kept for sampling.
    chol_l: Option<Mat3>,
    log_det: f64,
}

impl GaussianComponent {
    /// Create a component from its parameters.
    pub fn new(mean: Vec3, covariance: Mat3, weight: f64) -> Self {
        let mut component = Self {
            mean,
            covariance,
            weight,
            precision: None,
            chol_l: None,
            log_det: 0.0,
        };
        component.refresh_cache();
        component
    }

    /// Unit Gaussian at the origin with the given weight.
    pub fn standard(weight: f64) -> Self {
        Self::new(Vec3::zeros(), Mat3::identity(), weight)
    }

    /// Mean vector.
    pub fn mean(&self) -> &Vec3 {
        &self.mean
    }

    /// Covariance matrix.
    pub fn covariance(&self) -> &Mat3 {
        &self.covariance
    }

    /// Mixing weight.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Replace the mean.
    pub fn set_mean(&mut self, mean: Vec3) {
        self.mean = mean;
    }

    /// Replace the covariance and refresh the cached factorization.
    pub fn set_covariance(&mut self, covariance: Mat3) {
        self.covariance = covariance;
        self.refresh_cache();
    }

    /// Replace the mixing weight.
    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    /// Whether the covariance is invertible (positive definite).
    pub fn is_well_conditioned(&self) -> bool {
        self.precision.is_some()
    }

    /// Log density of the multivariate normal at `x`.
    ///
    /// Returns `-inf` when the covariance is degenerate; downstream EM code
    /// treats that as zero probability mass for this component.
    pub fn log_density(&self, x: &Vec3) -> f64 {
        let precision = match &self.precision {
            Some(p) => p,
            None => return f64::NEG_INFINITY,
        };
        let diff = x - self.mean;
        let mahalanobis_sq = (precision * diff).dot(&diff);
        let log_2pi = (2.0 * std::f64::consts::PI).ln();
        -0.5 * (3.0 * log_2pi + self.log_det + mahalanobis_sq)
    }

    /// Density of the multivariate normal at `x`. May underflow to zero for
    /// far outliers.
    pub fn density(&self, x: &Vec3) -> f64 {
        self.log_density(x).exp()
    }

    /// Draw one sample, `mean + L * z` with `z` standard normal.
    ///
    /// For a degenerate covariance the mean itself is returned.
    pub fn sample(&self, rng: &mut impl Rng) -> Vec3 {
        let z = Vec3::new(
            rng.sample(StandardNormal),
            rng.sample(StandardNormal),
            rng.sample(StandardNormal),
        );
        match &self.chol_l {
            Some(l) => self.mean + l * z,
            None => self.mean,
        }
    }

    fn refresh_cache(&mut self) {
        match Cholesky::new(self.covariance) {
            Some(chol) => {
                let l = chol.l();
                self.log_det = 2.0 * (0..3).map(|i| l[(i, i)].ln()).sum::<f64>();
                self.precision = Some(chol.inverse());
                self.chol_l = Some(l);
            }
            None => {
                self.precision = None;
                self.chol_l = None;
                self.log_det = 0.0;
            }
        }
    }
}
