//! K-means clustering over 3D observations.
//!
//! Used to seed a [`MixtureModel`](crate::mixture::MixtureModel) with
//! plausible starting means and weights before EM refines the full
//! covariances. Supports random restarts with best-inertia selection.

use crate::error::{GmmError, Result};
use crate::random::RandomSampler;
use crate::types::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Default number of restarts with different initializations.
pub const DEFAULT_KMEANS_RESTARTS: usize = 10;

/// Minimum number of observations before the assignment step runs in
/// parallel.
const PARALLEL_ASSIGN_THRESHOLD: usize = 512;

/// Initialization method for k-means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KMeansInit {
    /// Random unique observations as initial centers.
    Random,
    /// K-means++ initialization (better spread).
    KMeansPlusPlus,
}

/// Configuration for k-means clustering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansConfig {
    /// Number of clusters.
    pub num_clusters: usize,
    /// Maximum number of Lloyd iterations per restart.
    pub max_iterations: usize,
    /// Convergence threshold on the relative change of total
    /// within-cluster distance.
    pub convergence_threshold: f64,
    /// Initialization method.
    pub init_method: KMeansInit,
    /// Random seed for reproducibility.
    pub seed: Option<u64>,
    /// Number of random restarts; the run with the lowest inertia wins.
    pub num_restarts: usize,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            num_clusters: 10,
            max_iterations: 100,
            convergence_threshold: 1e-5,
            init_method: KMeansInit::Random,
            seed: None,
            num_restarts: DEFAULT_KMEANS_RESTARTS,
        }
    }
}

impl KMeansConfig {
    /// Create a new configuration with the given number of clusters.
    pub fn new(num_clusters: usize) -> Self {
        Self {
            num_clusters,
            ..Default::default()
        }
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the initialization method.
    pub fn with_init_method(mut self, method: KMeansInit) -> Self {
        self.init_method = method;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the number of restarts.
    pub fn with_num_restarts(mut self, num_restarts: usize) -> Self {
        self.num_restarts = num_restarts;
        self
    }
}

/// K-means clustering result.
#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// Cluster centers.
    pub centers: Vec<Vec3>,
    /// Cluster assignment for each observation.
    pub assignments: Vec<usize>,
    /// Number of observations in each cluster.
    pub cluster_sizes: Vec<usize>,
    /// Total within-cluster sum of squared distances.
    pub inertia: f64,
    /// Number of iterations performed by the winning restart.
    pub num_iterations: usize,
    /// Whether the winning restart converged.
    pub converged: bool,
}

impl KMeansResult {
    /// Center closest to `observation` and its Euclidean distance.
    /// `None` when there are no centers.
    pub fn closest_centroid(&self, observation: &Vec3) -> Option<(usize, f64)> {
        self.centers
            .iter()
            .enumerate()
            .map(|(i, c)| (i, (observation - c).norm()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// K-means clustering algorithm.
pub struct KMeans {
    config: KMeansConfig,
}

impl KMeans {
    /// Create a new k-means instance with the given configuration.
    pub fn new(config: KMeansConfig) -> Self {
        Self { config }
    }

    /// Create a k-means instance for the given number of clusters.
    pub fn with_clusters(num_clusters: usize) -> Self {
        Self::new(KMeansConfig::new(num_clusters))
    }

    /// Cluster the observations, keeping the best of `num_restarts` runs.
    pub fn fit(&self, observations: &[Vec3]) -> Result<KMeansResult> {
        if observations.is_empty() {
            return Err(GmmError::invalid_argument(
                "cannot cluster an empty observation set",
            ));
        }
        if self.config.num_clusters == 0 {
            return Err(GmmError::invalid_argument("number of clusters must be > 0"));
        }

        let k = self.config.num_clusters.min(observations.len());
        let restarts = self.config.num_restarts.max(1);

        let mut best_result: Option<KMeansResult> = None;
        let mut best_inertia = f64::INFINITY;

        for restart in 0..restarts {
            let seed = self.config.seed.map(|s| s + restart as u64);
            let result = self.fit_single(observations, k, seed)?;

            if result.inertia < best_inertia {
                best_inertia = result.inertia;
                best_result = Some(result);
            }
        }

        best_result.ok_or_else(|| GmmError::internal("k-means produced no result"))
    }

    /// Single Lloyd run.
    fn fit_single(
        &self,
        observations: &[Vec3],
        k: usize,
        seed: Option<u64>,
    ) -> Result<KMeansResult> {
        let mut centers = self.initialize_centers(observations, k, seed)?;
        let mut prev_inertia = f64::INFINITY;
        let mut num_iterations = 0;
        let mut converged = false;

        for iter in 0..self.config.max_iterations {
            num_iterations = iter + 1;

            let (assignments, inertia) = assign_clusters(observations, &centers);

            let relative_change = (prev_inertia - inertia).abs() / (prev_inertia + 1e-10);
            if relative_change < self.config.convergence_threshold {
                converged = true;
                break;
            }
            prev_inertia = inertia;

            centers = update_centers(observations, &assignments, k);
        }

        // Final assignment for accurate sizes and inertia.
        let (assignments, inertia) = assign_clusters(observations, &centers);
        let mut cluster_sizes = vec![0usize; k];
        for &a in &assignments {
            cluster_sizes[a] += 1;
        }

        Ok(KMeansResult {
            centers,
            assignments,
            cluster_sizes,
            inertia,
            num_iterations,
            converged,
        })
    }

    fn initialize_centers(
        &self,
        observations: &[Vec3],
        k: usize,
        seed: Option<u64>,
    ) -> Result<Vec<Vec3>> {
        let mut sampler = match seed {
            Some(s) => RandomSampler::with_seed(s),
            None => RandomSampler::new(),
        };

        match self.config.init_method {
            KMeansInit::Random => {
                let indices = sampler.sample_unique_indices(observations.len(), k)?;
                Ok(indices.iter().map(|&i| observations[i]).collect())
            }
            KMeansInit::KMeansPlusPlus => Ok(kmeans_plusplus_init(observations, k, &mut sampler)),
        }
    }
}

/// K-means++ seeding: each new center is drawn proportionally to the squared
/// distance from the nearest already-chosen center.
fn kmeans_plusplus_init(observations: &[Vec3], k: usize, sampler: &mut RandomSampler) -> Vec<Vec3> {
    let n = observations.len();
    let mut centers = Vec::with_capacity(k);

    let first = (sampler.random_f64() * n as f64) as usize % n;
    centers.push(observations[first]);

    let mut min_distances: Vec<f64> = observations
        .iter()
        .map(|p| (p - centers[0]).norm_squared())
        .collect();

    for _ in 1..k {
        let total: f64 = min_distances.iter().sum();
        if total == 0.0 {
            // All remaining observations duplicate existing centers.
            let idx = (sampler.random_f64() * n as f64) as usize % n;
            centers.push(observations[idx]);
        } else {
            let threshold = sampler.random_f64() * total;
            let mut cumulative = 0.0;
            let mut selected = 0;
            for (i, &d) in min_distances.iter().enumerate() {
                cumulative += d;
                if cumulative >= threshold {
                    selected = i;
                    break;
                }
            }
            centers.push(observations[selected]);
        }

        let new_center = *centers.last().unwrap();
        for (i, d) in min_distances.iter_mut().enumerate() {
            let dist = (observations[i] - new_center).norm_squared();
            if dist < *d {
                *d = dist;
            }
        }
    }

    centers
}

/// Assign each observation to its nearest center. Parallelized above a
/// size threshold; each observation's assignment is independent.
fn assign_clusters(observations: &[Vec3], centers: &[Vec3]) -> (Vec<usize>, f64) {
    let assign_one = |point: &Vec3| -> (usize, f64) {
        let mut min_dist = f64::INFINITY;
        let mut min_idx = 0;
        for (i, center) in centers.iter().enumerate() {
            let dist = (point - center).norm_squared();
            if dist < min_dist {
                min_dist = dist;
                min_idx = i;
            }
        }
        (min_idx, min_dist)
    };

    let assignments: Vec<(usize, f64)> = if observations.len() >= PARALLEL_ASSIGN_THRESHOLD {
        observations.par_iter().map(assign_one).collect()
    } else {
        observations.iter().map(assign_one).collect()
    };

    let inertia: f64 = assignments.iter().map(|(_, d)| *d).sum();
    (assignments.into_iter().map(|(a, _)| a).collect(), inertia)
}

/// Move each center to the mean of its assigned observations. Empty
/// clusters are reseeded from the data.
fn update_centers(observations: &[Vec3], assignments: &[usize], k: usize) -> Vec<Vec3> {
    let mut sums = vec![Vec3::zeros(); k];
    let mut counts = vec![0usize; k];

    for (point, &cluster) in observations.iter().zip(assignments.iter()) {
        sums[cluster] += point;
        counts[cluster] += 1;
    }

    sums.into_iter()
        .zip(counts)
        .enumerate()
        .map(|(i, (sum, count))| {
            if count > 0 {
                sum / count as f64
            } else {
                observations[i % observations.len()]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered_observations() -> Vec<Vec3> {
        let mut observations = Vec::new();
        for i in 0..10 {
            let t = i as f64 * 0.1;
            observations.push(Vec3::new(t, t * 0.5, 0.0));
            observations.push(Vec3::new(10.0 + t, 10.0 + t * 0.5, 0.0));
            observations.push(Vec3::new(t, 10.0 + t * 0.5, 10.0));
        }
        observations
    }

    #[test]
    fn test_kmeans_basic() {
        let observations = clustered_observations();
        let kmeans = KMeans::new(KMeansConfig::new(3).with_seed(42));
        let result = kmeans.fit(&observations).unwrap();

        assert_eq!(result.centers.len(), 3);
        assert_eq!(result.assignments.len(), 30);
        let total: usize = result.cluster_sizes.iter().sum();
        assert_eq!(total, 30);
    }

    #[test]
    fn test_kmeans_separates_clusters() {
        let observations = clustered_observations();
        let kmeans = KMeans::new(KMeansConfig::new(3).with_seed(42));
        let result = kmeans.fit(&observations).unwrap();

        // Each of the three blobs maps to a single cluster.
        for blob in 0..3 {
            let first = result.assignments[blob];
            for i in 0..10 {
                assert_eq!(result.assignments[3 * i + blob], first);
            }
        }
        assert_eq!(result.cluster_sizes.iter().filter(|&&s| s == 10).count(), 3);
    }

    #[test]
    fn test_kmeans_plusplus_init() {
        let observations = clustered_observations();
        let kmeans = KMeans::new(
            KMeansConfig::new(3)
                .with_init_method(KMeansInit::KMeansPlusPlus)
                .with_seed(42),
        );
        let result = kmeans.fit(&observations).unwrap();
        assert_eq!(result.centers.len(), 3);
    }

    #[test]
    fn test_kmeans_single_cluster() {
        let observations = vec![
            Vec3::new(1.0, 2.0, 0.0),
            Vec3::new(1.1, 2.1, 0.0),
            Vec3::new(0.9, 1.9, 0.0),
        ];
        let kmeans = KMeans::with_clusters(1);
        let result = kmeans.fit(&observations).unwrap();

        assert_eq!(result.centers.len(), 1);
        assert!(result.assignments.iter().all(|&a| a == 0));
        assert!((result.centers[0] - Vec3::new(1.0, 2.0, 0.0)).norm() < 0.1);
    }

    #[test]
    fn test_kmeans_more_clusters_than_points() {
        let observations = vec![Vec3::new(1.0, 2.0, 0.0), Vec3::new(3.0, 4.0, 0.0)];
        let kmeans = KMeans::new(KMeansConfig::new(5).with_seed(42));
        let result = kmeans.fit(&observations).unwrap();

        assert!(result.centers.len() <= 2);
    }

    #[test]
    fn test_kmeans_empty_input() {
        let kmeans = KMeans::with_clusters(3);
        assert!(kmeans.fit(&[]).is_err());
    }

    #[test]
    fn test_closest_centroid() {
        let observations = clustered_observations();
        let kmeans = KMeans::new(KMeansConfig::new(3).with_seed(42));
        let result = kmeans.fit(&observations).unwrap();

        let (idx, dist) = result.closest_centroid(&Vec3::new(10.5, 10.2, 0.0)).unwrap();
        assert!(dist < 2.0);
        assert!(idx < 3);
    }
}
