//! Expectation-Maximization optimizer for Gaussian mixtures.
//!
//! Given a set of observations and an already-initialized mixture (e.g. by
//! k-means), [`Em::process`] refines the mode weights, means and covariances
//! in place until the relative improvement of the total log-likelihood drops
//! below a tolerance or the iteration budget runs out.
//!
//! The optimizer owns a responsibility matrix sized at construction time for
//! a fixed (observations, modes) pair; the buffer is overwritten, never
//! reallocated, across iterations.

use crate::error::{GmmError, Result};
use crate::mixture::{log_exp_sum, MixtureModel};
use crate::stats::OnlineMean;
use crate::types::{Mat3, Vec3};

/// Default stopping threshold on relative log-likelihood improvement.
pub const DEFAULT_EM_TOLERANCE: f64 = 1e-4;

/// Default maximum number of EM iterations.
pub const DEFAULT_EM_MAX_ITERATIONS: usize = 10;

/// Floor for every mode weight used as a divisor. Keeps the mean and
/// covariance updates well-defined when a mode receives (almost) no
/// responsibility mass.
pub const SAFE_MIN_WEIGHT: f64 = 1e-6;

/// Expectation-Maximization optimizer.
pub struct Em {
    /// Responsibilities, `[mode][observation]`, so that
    /// `responsibilities[k][n] = p(k | x_n)` under the current mixture.
    responsibilities: Vec<Vec<f64>>,
    num_observations: usize,
    tolerance: f64,
    max_iterations: usize,
    /// Count of (observation, mode) responsibility entries that evaluated to
    /// NaN or infinity and were substituted with zero.
    nonfinite_events: u64,
}

impl Em {
    /// Create an optimizer sized for a fixed number of observations and
    /// modes, with default tolerance and iteration budget.
    pub fn new(num_observations: usize, num_modes: usize) -> Self {
        Self {
            responsibilities: vec![vec![0.0; num_observations]; num_modes],
            num_observations,
            tolerance: DEFAULT_EM_TOLERANCE,
            max_iterations: DEFAULT_EM_MAX_ITERATIONS,
            nonfinite_events: 0,
        }
    }

    /// Set the stopping tolerance, returning `self`.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the iteration budget, returning `self`.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the stopping tolerance. The stopping condition is
    /// `|(new - old) / old| <= tolerance` on the total log-likelihood.
    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance;
    }

    /// Set the maximum number of iterations.
    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = max_iterations;
    }

    /// Number of responsibility entries clamped to zero because they
    /// evaluated to NaN or infinity (near-singular covariances, extreme
    /// outliers). Purely diagnostic; the substitution itself is the designed
    /// recovery.
    pub fn nonfinite_events(&self) -> u64 {
        self.nonfinite_events
    }

    /// Train the mixture in place.
    ///
    /// Each iteration runs the E-step and the three ordered M-step updates
    /// (weights, then means, then covariances), then re-evaluates the total
    /// log-likelihood. Returns `Ok(true)` if the tolerance criterion stopped
    /// the loop, `Ok(false)` if the iteration budget did; non-convergence is
    /// a reportable outcome, not an error.
    ///
    /// Fails with `FailedPrecondition` when the observation count differs
    /// from the one this optimizer was sized for, when the mixture's mode
    /// count differs from the one the responsibility buffer was sized for,
    /// or when there are more modes than observations.
    pub fn process(&mut self, observations: &[Vec3], gmm: &mut MixtureModel) -> Result<bool> {
        if observations.len() != self.num_observations {
            return Err(GmmError::failed_precondition(format!(
                "optimizer sized for {} observations, got {}",
                self.num_observations,
                observations.len()
            )));
        }
        if gmm.num_modes() != self.responsibilities.len() {
            return Err(GmmError::failed_precondition(format!(
                "optimizer sized for {} modes, mixture has {}",
                self.responsibilities.len(),
                gmm.num_modes()
            )));
        }
        if gmm.num_modes() == 0 || gmm.num_modes() > self.num_observations {
            return Err(GmmError::failed_precondition(format!(
                "{} observations cannot constrain {} modes",
                self.num_observations,
                gmm.num_modes()
            )));
        }

        // Finite stand-in for -inf: the relative-improvement ratio below
        // must stay finite on the first iteration.
        let mut new_log_likelihood = f64::MIN;

        for _ in 0..self.max_iterations {
            // E-step.
            self.update_responsibilities(observations, gmm);

            // M-step. Order matters: means divide by the just-updated
            // weights, covariances center on the just-updated means.
            self.update_weights(gmm);
            self.update_means(observations, gmm);
            self.update_covariances(observations, gmm);

            let old_log_likelihood = new_log_likelihood;
            new_log_likelihood = gmm.total_log_likelihood(observations);

            let relative_change =
                ((new_log_likelihood - old_log_likelihood) / old_log_likelihood).abs();
            if relative_change <= self.tolerance {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// E-step: `responsibilities[k][n] = exp(log p(k | x_n))`.
    ///
    /// An entry that evaluates to NaN or infinity (near-singular covariance,
    /// extreme outlier) is substituted with zero rather than propagated:
    /// that observation simply carries no posterior mass for that mode this
    /// iteration.
    fn update_responsibilities(&mut self, observations: &[Vec3], gmm: &MixtureModel) {
        let num_modes = gmm.num_modes();
        let mut log_densities = vec![0.0; num_modes];
        let mut log_weights = vec![0.0; num_modes];

        for (o, observation) in observations.iter().enumerate() {
            for (k, mode) in gmm.modes().iter().enumerate() {
                log_densities[k] = mode.log_density(observation);
                log_weights[k] = mode.weight().ln();
            }
            let log_normalizer = log_exp_sum(&log_densities, &log_weights);

            for k in 0..num_modes {
                let responsibility =
                    (log_densities[k] + log_weights[k] - log_normalizer).exp();
                self.responsibilities[k][o] = if responsibility.is_finite() {
                    responsibility
                } else {
                    self.nonfinite_events += 1;
                    0.0
                };
            }
        }
    }

    /// First M-step update: `P(k) = sum_n(p(k|x_n)) / N`, floored at
    /// [`SAFE_MIN_WEIGHT`].
    fn update_weights(&self, gmm: &mut MixtureModel) {
        for k in 0..gmm.num_modes() {
            let mut weight = OnlineMean::<f64>::new();
            for &r in &self.responsibilities[k] {
                weight.push(r);
            }
            gmm.mode_mut(k).set_weight(weight.mean().max(SAFE_MIN_WEIGHT));
        }
    }

    /// Second M-step update: `mean_k = sum_n(p(k|x_n) x_n) / sum_n(p(k|x_n))`.
    ///
    /// The accumulator computes `sum_n(p(k|x_n) x_n) / N`; the `/N` cancels
    /// against the one inside the just-updated weight.
    fn update_means(&self, observations: &[Vec3], gmm: &mut MixtureModel) {
        let mut sum_mean = OnlineMean::<Vec3>::new();
        for k in 0..gmm.num_modes() {
            for (o, x) in observations.iter().enumerate() {
                sum_mean.push(x * self.responsibilities[k][o]);
            }
            let weight = gmm.mode(k).weight().max(SAFE_MIN_WEIGHT);
            gmm.mode_mut(k).set_mean(sum_mean.mean() / weight);
            sum_mean.reset();
        }
    }

    /// Third M-step update:
    /// `cov_k = sum_n(p(k|x_n) d_n d_n^T) / (N * max(P(k), floor))`,
    /// with `d_n = x_n - mean_k` centered on the just-updated mean. The
    /// denominator reconstructs `sum_n(p(k|x_n))` from the normalized
    /// weight.
    fn update_covariances(&self, observations: &[Vec3], gmm: &mut MixtureModel) {
        let n = self.num_observations as f64;
        for k in 0..gmm.num_modes() {
            let mean = *gmm.mode(k).mean();
            let mut cov = Mat3::zeros();
            for (o, x) in observations.iter().enumerate() {
                let centered = x - mean;
                cov += (centered * centered.transpose()) * self.responsibilities[k][o];
            }
            cov /= n * gmm.mode(k).weight().max(SAFE_MIN_WEIGHT);
            gmm.mode_mut(k).set_covariance(cov);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaussian::GaussianComponent;
    use rand::prelude::*;

    fn two_cluster_observations() -> Vec<Vec3> {
        let mut rng = StdRng::seed_from_u64(42);
        let mut jitter = move || rng.gen_range(-0.5..0.5);
        let mut observations = Vec::new();
        for _ in 0..20 {
            observations.push(Vec3::new(-5.0 + jitter(), jitter(), jitter()));
            observations.push(Vec3::new(5.0 + jitter(), jitter(), jitter()));
        }
        observations
    }

    fn seeded_mixture() -> MixtureModel {
        MixtureModel::from_modes(vec![
            GaussianComponent::new(Vec3::new(-4.0, 0.0, 0.0), Mat3::identity(), 0.5),
            GaussianComponent::new(Vec3::new(4.0, 0.0, 0.0), Mat3::identity(), 0.5),
        ])
    }

    #[test]
    fn test_responsibilities_normalized_after_e_step() {
        let observations = two_cluster_observations();
        let gmm = seeded_mixture();
        let mut em = Em::new(observations.len(), gmm.num_modes());

        em.update_responsibilities(&observations, &gmm);

        for o in 0..observations.len() {
            let total: f64 = (0..gmm.num_modes()).map(|k| em.responsibilities[k][o]).sum();
            assert!((total - 1.0).abs() < 1e-9, "observation {}: sum {}", o, total);
        }
        assert_eq!(em.nonfinite_events(), 0);
    }

    #[test]
    fn test_nonfinite_responsibilities_clamped_to_zero() {
        let observations = two_cluster_observations();
        // Degenerate covariances: every log density is -inf, so every
        // responsibility evaluates to NaN and must be substituted with 0.
        let gmm = MixtureModel::from_modes(vec![
            GaussianComponent::new(Vec3::zeros(), Mat3::zeros(), 0.5),
            GaussianComponent::new(Vec3::zeros(), Mat3::zeros(), 0.5),
        ]);
        let mut em = Em::new(observations.len(), gmm.num_modes());

        em.update_responsibilities(&observations, &gmm);

        for row in &em.responsibilities {
            assert!(row.iter().all(|&r| r == 0.0));
        }
        assert_eq!(
            em.nonfinite_events(),
            (observations.len() * gmm.num_modes()) as u64
        );
    }

    #[test]
    fn test_weight_floor_after_m_step() {
        let observations = two_cluster_observations();
        // A third mode far away from all data receives essentially zero
        // responsibility; its weight must land on the floor, not at zero.
        let mut gmm = MixtureModel::from_modes(vec![
            GaussianComponent::new(Vec3::new(-5.0, 0.0, 0.0), Mat3::identity(), 0.4),
            GaussianComponent::new(Vec3::new(5.0, 0.0, 0.0), Mat3::identity(), 0.4),
            GaussianComponent::new(Vec3::new(1e3, 1e3, 1e3), Mat3::identity(), 0.2),
        ]);
        let mut em = Em::new(observations.len(), gmm.num_modes());

        em.update_responsibilities(&observations, &gmm);
        em.update_weights(&mut gmm);

        for mode in gmm.modes() {
            assert!(mode.weight().is_finite());
            assert!(mode.weight() >= SAFE_MIN_WEIGHT);
        }
        assert!(gmm.mode(2).weight() <= SAFE_MIN_WEIGHT * 1.0001);
    }

    #[test]
    fn test_process_converges_on_separated_clusters() {
        let observations = two_cluster_observations();
        let mut gmm = seeded_mixture();
        let mut em = Em::new(observations.len(), gmm.num_modes());

        let converged = em.process(&observations, &mut gmm).unwrap();
        assert!(converged);

        // Means recovered to within the cluster jitter.
        let (a, _) = gmm.closest_mode(&Vec3::new(-5.0, 0.0, 0.0)).unwrap();
        let (b, _) = gmm.closest_mode(&Vec3::new(5.0, 0.0, 0.0)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_process_rejects_wrong_observation_count() {
        let observations = two_cluster_observations();
        let mut gmm = seeded_mixture();
        let mut em = Em::new(observations.len() + 1, gmm.num_modes());

        let err = em.process(&observations, &mut gmm).unwrap_err();
        assert_eq!(
            err.code(),
            crate::error::ErrorCode::FailedPrecondition
        );
    }

    #[test]
    fn test_process_rejects_more_modes_than_observations() {
        let observations = vec![Vec3::zeros(), Vec3::new(1.0, 0.0, 0.0)];
        let mut gmm = MixtureModel::new(3);
        let mut em = Em::new(observations.len(), 3);

        assert!(em.process(&observations, &mut gmm).is_err());
    }

    #[test]
    fn test_process_rejects_mismatched_mode_count() {
        let observations = two_cluster_observations();
        let mut gmm = seeded_mixture();
        let mut em = Em::new(observations.len(), gmm.num_modes() + 2);

        assert!(em.process(&observations, &mut gmm).is_err());
    }
}
