//! Gaussian mixture model over 3D observations.
//!
//! The mixture owns its components by value; modes are addressed by stable
//! index, and only the EM optimizer mutates them (through a `&mut` borrow for
//! the duration of a `process` call). All probability queries run in the log
//! domain and are combined with the log-sum-exp trick.

use crate::em::{Em, DEFAULT_EM_MAX_ITERATIONS, DEFAULT_EM_TOLERANCE, SAFE_MIN_WEIGHT};
use crate::error::{GmmError, Result};
use crate::gaussian::GaussianComponent;
use crate::kmeans::{KMeans, KMeansConfig, DEFAULT_KMEANS_RESTARTS};
use crate::types::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

/// Options for [`MixtureModel::fit_with`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOptions {
    /// Number of k-means restarts used for initialization.
    pub kmeans_restarts: usize,
    /// EM stopping threshold on relative log-likelihood improvement.
    pub tolerance: f64,
    /// Maximum number of EM iterations.
    pub max_iterations: usize,
    /// Random seed for the k-means initialization.
    pub seed: Option<u64>,
    /// Per-axis scaling factors applied to the trained mixture, for callers
    /// that whitened their observations before fitting.
    pub scaling: Option<[f64; 3]>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            kmeans_restarts: DEFAULT_KMEANS_RESTARTS,
            tolerance: DEFAULT_EM_TOLERANCE,
            max_iterations: DEFAULT_EM_MAX_ITERATIONS,
            seed: None,
            scaling: None,
        }
    }
}

impl FitOptions {
    /// Set the k-means restart count.
    pub fn with_kmeans_restarts(mut self, restarts: usize) -> Self {
        self.kmeans_restarts = restarts;
        self
    }

    /// Set the EM tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the EM iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set per-axis un-whitening scale factors.
    pub fn with_scaling(mut self, scaling: [f64; 3]) -> Self {
        self.scaling = Some(scaling);
        self
    }
}

/// A weighted mixture of 3D Gaussians.
#[derive(Debug, Clone)]
pub struct MixtureModel {
    modes: Vec<GaussianComponent>,
    /// Scales the overall probability mass of the mixture; 1 by default.
    global_weight: f64,
}

impl MixtureModel {
    /// Create a mixture of `num_modes` unit Gaussians at the origin with
    /// uniform weights. The caller is expected to initialize the modes (for
    /// example via [`MixtureModel::fit`]) before querying probabilities.
    pub fn new(num_modes: usize) -> Self {
        let weight = if num_modes > 0 {
            1.0 / num_modes as f64
        } else {
            0.0
        };
        Self {
            modes: (0..num_modes)
                .map(|_| GaussianComponent::standard(weight))
                .collect(),
            global_weight: 1.0,
        }
    }

    /// Create a mixture from pre-built components.
    pub fn from_modes(modes: Vec<GaussianComponent>) -> Self {
        Self {
            modes,
            global_weight: 1.0,
        }
    }

    /// Number of modes.
    pub fn num_modes(&self) -> usize {
        self.modes.len()
    }

    /// Whether the mixture has no modes.
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// All modes, in stable index order.
    pub fn modes(&self) -> &[GaussianComponent] {
        &self.modes
    }

    /// Mode `k`. Panics on an out-of-range index.
    pub fn mode(&self, k: usize) -> &GaussianComponent {
        assert!(k < self.modes.len(), "mode index {} out of range", k);
        &self.modes[k]
    }

    /// Mutable mode `k`. Panics on an out-of-range index.
    pub fn mode_mut(&mut self, k: usize) -> &mut GaussianComponent {
        assert!(k < self.modes.len(), "mode index {} out of range", k);
        &mut self.modes[k]
    }

    /// Global weight of the mixture.
    pub fn global_weight(&self) -> f64 {
        self.global_weight
    }

    /// Set the global weight of the mixture.
    pub fn set_global_weight(&mut self, weight: f64) {
        self.global_weight = weight;
    }

    /// Log-likelihood of one observation under the mixture:
    /// `log(global_weight * sum_k(p(x|k) * P(k)))`.
    pub fn log_likelihood(&self, observation: &Vec3) -> f64 {
        self.log_mixture(observation) + self.global_weight.ln()
    }

    /// Likelihood of one observation. May underflow to zero for far
    /// outliers; that is expected.
    pub fn likelihood(&self, observation: &Vec3) -> f64 {
        self.log_likelihood(observation).exp()
    }

    /// Total log-likelihood of a set of observations,
    /// `sum_n(log P(x_n))`. This is the statistic EM monitors for
    /// convergence.
    pub fn total_log_likelihood(&self, observations: &[Vec3]) -> f64 {
        observations.iter().map(|x| self.log_likelihood(x)).sum()
    }

    /// Log responsibility `log p(k|x) = log p(x|k) + log P(k) - log p(x)`.
    ///
    /// The normalizer is the mode sum without the global weight, so
    /// responsibilities always sum to 1 over modes. Panics on an
    /// out-of-range index.
    pub fn log_responsibility(&self, observation: &Vec3, mode_index: usize) -> f64 {
        assert!(
            mode_index < self.modes.len(),
            "mode index {} out of range",
            mode_index
        );
        let mode = &self.modes[mode_index];
        mode.log_density(observation) + mode.weight().ln() - self.log_mixture(observation)
    }

    /// MAP mode for an observation: the index maximizing
    /// `log p(x|k) + log P(k)`, together with that log value.
    ///
    /// Returns `None` for an empty mixture.
    pub fn closest_mode(&self, observation: &Vec3) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (k, mode) in self.modes.iter().enumerate() {
            let log_joint = mode.log_density(observation) + mode.weight().ln();
            match best {
                Some((_, best_log)) if log_joint <= best_log => {}
                _ => best = Some((k, log_joint)),
            }
        }
        best
    }

    /// Remove every mode whose weight is below `tolerance`, preserving the
    /// relative order of the survivors. Returns the number of surviving
    /// modes.
    ///
    /// The remaining weights are NOT renormalized; callers that need weights
    /// summing to 1 again should follow up with
    /// [`MixtureModel::renormalize_weights`].
    pub fn remove_bad_modes(&mut self, tolerance: f64) -> usize {
        self.modes.retain(|mode| mode.weight() >= tolerance);
        self.modes.len()
    }

    /// Rescale mode weights to sum to 1. No-op when the total weight is not
    /// a positive finite number.
    pub fn renormalize_weights(&mut self) {
        let total: f64 = self.modes.iter().map(|m| m.weight()).sum();
        if total.is_finite() && total > 0.0 {
            for mode in &mut self.modes {
                let w = mode.weight() / total;
                mode.set_weight(w);
            }
        }
    }

    /// Fit the mixture to a set of observations with default options.
    ///
    /// Seeds the modes via k-means, then refines them with EM. Returns
    /// whether EM converged within its iteration budget.
    pub fn fit(&mut self, observations: &[Vec3]) -> Result<bool> {
        self.fit_with(observations, &FitOptions::default())
    }

    /// Fit the mixture to a set of observations.
    ///
    /// The k-means initialization assigns each mode a cluster centroid as its
    /// mean, the cluster occupancy fraction as its weight, and an identity
    /// covariance. EM then trains the full-covariance mixture in place. If
    /// `options.scaling` is set, the trained means and covariances are
    /// rescaled per axis afterwards (un-whitening).
    pub fn fit_with(&mut self, observations: &[Vec3], options: &FitOptions) -> Result<bool> {
        let k = self.modes.len();
        if k == 0 {
            return Err(GmmError::failed_precondition("mixture has no modes"));
        }
        if observations.len() < k {
            return Err(GmmError::failed_precondition(format!(
                "{} observations cannot constrain {} modes",
                observations.len(),
                k
            )));
        }

        let mut config = KMeansConfig::new(k).with_num_restarts(options.kmeans_restarts);
        config.seed = options.seed;
        let result = KMeans::new(config).fit(observations)?;

        let n = observations.len() as f64;
        for (idx, mode) in self.modes.iter_mut().enumerate() {
            mode.set_mean(result.centers[idx]);
            mode.set_covariance(Mat3::identity());
            let occupancy = result.cluster_sizes[idx] as f64 / n;
            mode.set_weight(occupancy.max(SAFE_MIN_WEIGHT));
        }

        let mut em = Em::new(observations.len(), k)
            .with_tolerance(options.tolerance)
            .with_max_iterations(options.max_iterations);
        let converged = em.process(observations, self)?;

        if let Some(scaling) = options.scaling {
            self.unwhiten(&scaling);
        }

        Ok(converged)
    }

    /// Log of the mode sum, `log(sum_k(p(x|k) * P(k)))`, without the global
    /// weight.
    fn log_mixture(&self, observation: &Vec3) -> f64 {
        let log_densities: Vec<f64> = self
            .modes
            .iter()
            .map(|m| m.log_density(observation))
            .collect();
        let log_weights: Vec<f64> = self.modes.iter().map(|m| m.weight().ln()).collect();
        log_exp_sum(&log_densities, &log_weights)
    }

    /// Rescale each mode per axis: `mean_i *= s_i`,
    /// `cov_ij *= s_i * s_j`.
    fn unwhiten(&mut self, scaling: &[f64; 3]) {
        for mode in &mut self.modes {
            let m = mode.mean();
            mode.set_mean(Vec3::new(
                m.x * scaling[0],
                m.y * scaling[1],
                m.z * scaling[2],
            ));
            let mut cov = *mode.covariance();
            for i in 0..3 {
                for j in 0..3 {
                    cov[(i, j)] *= scaling[i] * scaling[j];
                }
            }
            mode.set_covariance(cov);
        }
    }
}

/// Compute `log(sum_n(x1_n * x2_n))` from two sequences of log values, where
/// `log_values1[n] = log(x1_n)` and `log_values2[n] = log(x2_n)`.
///
/// The largest combined term `max_n(l1_n + l2_n)` is factored out before
/// exponentiating, so the sum cannot overflow or underflow even when the two
/// sequences peak at different indices. All-`-inf` inputs (every term has
/// zero probability) yield `-inf`, never NaN.
pub fn log_exp_sum(log_values1: &[f64], log_values2: &[f64]) -> f64 {
    debug_assert_eq!(log_values1.len(), log_values2.len());

    let max = log_values1
        .iter()
        .zip(log_values2.iter())
        .map(|(&l1, &l2)| l1 + l2)
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }

    let mut sum = 0.0;
    for (&l1, &l2) in log_values1.iter().zip(log_values2.iter()) {
        // A -inf on either side is a zero term; skipping it avoids
        // -inf + inf arithmetic below.
        if l1 == f64::NEG_INFINITY || l2 == f64::NEG_INFINITY {
            continue;
        }
        sum += (l1 + l2 - max).exp();
    }

    // The term attaining the maximum contributes exp(0) = 1, so sum >= 1.
    max + sum.ln()
}

/// Probability that `observation` was drawn from `gmm1` rather than `gmm2`:
/// `p(x|gmm1) / (p(x|gmm1) + p(x|gmm2))`, with each mixture's global weight
/// applied.
///
/// Computed in the log domain so that two tiny likelihoods still produce a
/// meaningful ratio. When both mixtures assign zero mass the observation is
/// uninformative and 0.5 is returned.
pub fn likelihood_ratio(gmm1: &MixtureModel, gmm2: &MixtureModel, observation: &Vec3) -> f64 {
    let l1 = gmm1.log_likelihood(observation);
    let l2 = gmm2.log_likelihood(observation);
    if l1 == f64::NEG_INFINITY && l2 == f64::NEG_INFINITY {
        return 0.5;
    }
    let max = l1.max(l2);
    let e1 = (l1 - max).exp();
    let e2 = (l2 - max).exp();
    e1 / (e1 + e2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_mode_mixture() -> MixtureModel {
        MixtureModel::from_modes(vec![
            GaussianComponent::new(Vec3::new(-5.0, 0.0, 0.0), Mat3::identity(), 0.5),
            GaussianComponent::new(Vec3::new(5.0, 0.0, 0.0), Mat3::identity(), 0.5),
        ])
    }

    #[test]
    fn test_log_likelihood_single_mode() {
        let gmm = MixtureModel::from_modes(vec![GaussianComponent::standard(1.0)]);
        let x = Vec3::new(0.5, -0.5, 1.0);
        // With one unit-weight mode the mixture log-likelihood is the
        // component log density.
        let expected = gmm.mode(0).log_density(&x);
        assert!((gmm.log_likelihood(&x) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_responsibilities_sum_to_one() {
        let gmm = two_mode_mixture();
        let x = Vec3::new(1.0, 2.0, -1.0);
        let total: f64 = (0..gmm.num_modes())
            .map(|k| gmm.log_responsibility(&x, k).exp())
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_closest_mode_at_component_mean() {
        let gmm = two_mode_mixture();
        let (mode, log_prob) = gmm.closest_mode(&Vec3::new(5.0, 0.0, 0.0)).unwrap();
        assert_eq!(mode, 1);
        assert!(log_prob.is_finite());

        let (mode, _) = gmm.closest_mode(&Vec3::new(-5.0, 0.0, 0.0)).unwrap();
        assert_eq!(mode, 0);
    }

    #[test]
    fn test_closest_mode_empty_mixture() {
        let gmm = MixtureModel::from_modes(Vec::new());
        assert!(gmm.closest_mode(&Vec3::zeros()).is_none());
    }

    #[test]
    fn test_remove_bad_modes() {
        let mut gmm = MixtureModel::from_modes(vec![
            GaussianComponent::new(Vec3::new(1.0, 0.0, 0.0), Mat3::identity(), 0.4),
            GaussianComponent::new(Vec3::new(2.0, 0.0, 0.0), Mat3::identity(), 0.001),
            GaussianComponent::new(Vec3::new(3.0, 0.0, 0.0), Mat3::identity(), 0.3),
            GaussianComponent::new(Vec3::new(4.0, 0.0, 0.0), Mat3::identity(), 0.0005),
            GaussianComponent::new(Vec3::new(5.0, 0.0, 0.0), Mat3::identity(), 0.2985),
        ]);

        let survivors = gmm.remove_bad_modes(0.01);
        assert_eq!(survivors, 3);
        assert_eq!(gmm.num_modes(), 3);

        // Survivors keep their original relative order.
        assert_eq!(gmm.mode(0).mean().x, 1.0);
        assert_eq!(gmm.mode(1).mean().x, 3.0);
        assert_eq!(gmm.mode(2).mean().x, 5.0);

        // Pruning does not renormalize.
        let total: f64 = gmm.modes().iter().map(|m| m.weight()).sum();
        assert!((total - 0.9985).abs() < 1e-12);

        gmm.renormalize_weights();
        let total: f64 = gmm.modes().iter().map(|m| m.weight()).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_log_exp_sum_matches_direct() {
        let v1 = [0.5f64, 1.5, 0.1];
        let v2 = [0.9f64, 0.2, 2.0];
        let l1: Vec<f64> = v1.iter().map(|x| x.ln()).collect();
        let l2: Vec<f64> = v2.iter().map(|x| x.ln()).collect();

        let direct: f64 = v1.iter().zip(v2.iter()).map(|(a, b)| a * b).sum();
        assert!((log_exp_sum(&l1, &l2) - direct.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_log_exp_sum_extreme_magnitudes() {
        // Probabilities around e^-1e6 underflow any direct computation but
        // must stay finite in the log domain.
        let l1 = [-1.0e6, -1.0e6 - 2.0];
        let l2 = [-1.0e6 - 1.0, -1.0e6];
        let result = log_exp_sum(&l1, &l2);
        assert!(result.is_finite());
        // The products are e^(-2e6 - 1) and e^(-2e6 - 2).
        let expected = -2.0e6 + ((-1.0f64).exp() + (-2.0f64).exp()).ln();
        assert!((result - expected).abs() < 1e-6);
    }

    #[test]
    fn test_log_exp_sum_mismatched_maxima() {
        // Each sequence peaks at a different index; both products are
        // e^-1000, so the shifted sum must not underflow to zero.
        let l1 = [0.0, -1000.0];
        let l2 = [-1000.0, 0.0];
        let result = log_exp_sum(&l1, &l2);
        let expected = -1000.0 + 2.0f64.ln();
        assert!((result - expected).abs() < 1e-12);
    }

    #[test]
    fn test_log_exp_sum_all_neg_infinity() {
        let l = [f64::NEG_INFINITY, f64::NEG_INFINITY];
        let result = log_exp_sum(&l, &l);
        assert_eq!(result, f64::NEG_INFINITY);
        assert!(!result.is_nan());
    }

    #[test]
    fn test_log_exp_sum_partial_neg_infinity() {
        let l1 = [f64::NEG_INFINITY, 0.0];
        let l2 = [0.0, 0.0];
        // Only the second term contributes: log(1 * 1) = 0.
        assert!((log_exp_sum(&l1, &l2) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_likelihood_ratio() {
        let gmm1 = MixtureModel::from_modes(vec![GaussianComponent::new(
            Vec3::zeros(),
            Mat3::identity(),
            1.0,
        )]);
        let gmm2 = MixtureModel::from_modes(vec![GaussianComponent::new(
            Vec3::new(10.0, 0.0, 0.0),
            Mat3::identity(),
            1.0,
        )]);

        let near_first = likelihood_ratio(&gmm1, &gmm2, &Vec3::zeros());
        assert!(near_first > 0.99);

        let midpoint = likelihood_ratio(&gmm1, &gmm2, &Vec3::new(5.0, 0.0, 0.0));
        assert!((midpoint - 0.5).abs() < 1e-9);

        // Far from both mixtures the ratio is still well-defined.
        let far = likelihood_ratio(&gmm1, &gmm2, &Vec3::new(1e4, 0.0, 0.0));
        assert!(!far.is_nan());
    }

    #[test]
    fn test_global_weight_scales_likelihood() {
        let mut gmm = MixtureModel::from_modes(vec![GaussianComponent::standard(1.0)]);
        let x = Vec3::zeros();
        let base = gmm.log_likelihood(&x);
        gmm.set_global_weight(0.5);
        assert!((gmm.log_likelihood(&x) - (base + 0.5f64.ln())).abs() < 1e-12);

        // Responsibilities are normalized over modes and ignore the global
        // weight.
        assert!((gmm.log_responsibility(&x, 0) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_fit_requires_enough_observations() {
        let mut gmm = MixtureModel::new(5);
        let observations = vec![Vec3::zeros(); 3];
        assert!(gmm.fit(&observations).is_err());
    }
}
