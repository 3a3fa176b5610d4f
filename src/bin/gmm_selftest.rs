//! Self-test driver for gmm3d.
//!
//! Builds synthetic 3D point clouds from known cluster layouts, recovers
//! them with k-means and with a full GMM fit, and reports pass/fail. Exits
//! non-zero when either check fails.

use gmm3d::prelude::*;
use rand::prelude::*;

const SCALE: f64 = 10.0;
const NUM_CLUSTERS: usize = 5;
const POINTS_PER_CLUSTER: usize = 100;

/// Cluster centers at distance `SCALE` from the origin along the axes.
fn true_centroids() -> Vec<Vec3> {
    vec![
        Vec3::new(-SCALE, 0.0, 0.0),
        Vec3::new(0.0, -SCALE, 0.0),
        Vec3::new(0.0, 0.0, -SCALE),
        Vec3::new(SCALE, 0.0, 0.0),
        Vec3::new(0.0, SCALE, 0.0),
    ]
}

/// Uniform per-axis noise in [-SCALE/4, SCALE/4] around each centroid.
fn generate_observations(seed: u64) -> (Vec<Vec3>, Vec<usize>) {
    let centroids = true_centroids();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut observations = Vec::with_capacity(NUM_CLUSTERS * POINTS_PER_CLUSTER);
    let mut labels = Vec::with_capacity(NUM_CLUSTERS * POINTS_PER_CLUSTER);

    for (k, centroid) in centroids.iter().enumerate() {
        for _ in 0..POINTS_PER_CLUSTER {
            let mut noise = || rng.gen_range(-SCALE / 4.0..SCALE / 4.0);
            observations.push(centroid + Vec3::new(noise(), noise(), noise()));
            labels.push(k);
        }
    }

    (observations, labels)
}

/// Fraction of point pairs whose same-cluster/different-cluster relation
/// disagrees between two labelings. Invariant under label permutation.
fn pairwise_disagreement(truth: &[usize], predicted: &[usize]) -> f64 {
    let n = truth.len();
    let mut bad = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            let same_truth = truth[i] == truth[j];
            let same_pred = predicted[i] == predicted[j];
            if same_truth != same_pred {
                bad += 1;
            }
        }
    }
    bad as f64 / (n * (n - 1) / 2) as f64
}

fn check_kmeans(observations: &[Vec3], labels: &[usize]) -> bool {
    let config = KMeansConfig::new(NUM_CLUSTERS)
        .with_num_restarts(30)
        .with_max_iterations(100)
        .with_seed(1);
    let result = match KMeans::new(config).fit(observations) {
        Ok(r) => r,
        Err(e) => {
            println!("k-means failed: {}", e);
            return false;
        }
    };

    let mut avg_best_distance = OnlineMean::<f64>::new();
    for centroid in true_centroids() {
        let (_, dist) = result.closest_centroid(&centroid).unwrap();
        avg_best_distance.push(dist);
    }

    let assignments: Vec<usize> = result.assignments.clone();
    let disagreement = pairwise_disagreement(labels, &assignments);

    println!(
        "k-means: avg centroid error {:.3}, pairwise disagreement {:.2}%, {} iterations",
        avg_best_distance.mean(),
        disagreement * 100.0,
        result.num_iterations
    );

    avg_best_distance.mean() < SCALE && disagreement < 0.10
}

fn check_gmm(observations: &[Vec3], labels: &[usize]) -> bool {
    let mut gmm = MixtureModel::new(NUM_CLUSTERS);
    let options = FitOptions::default().with_kmeans_restarts(30).with_seed(1);
    let converged = match gmm.fit_with(observations, &options) {
        Ok(c) => c,
        Err(e) => {
            println!("GMM fit failed: {}", e);
            return false;
        }
    };

    // MAP assignment and average posterior under the assigned mode.
    let mut assignments = Vec::with_capacity(observations.len());
    let mut avg_log_prob = OnlineMean::<f64>::new();
    let mut log_prob_spread = OnlineVariance::new();
    for observation in observations {
        let (mode, _) = gmm.closest_mode(observation).unwrap();
        assignments.push(mode);
        let log_resp = gmm.log_responsibility(observation, mode);
        avg_log_prob.push(log_resp);
        log_prob_spread.push(log_resp);
    }
    let avg_probability = avg_log_prob.mean().exp();
    let disagreement = pairwise_disagreement(labels, &assignments);

    println!(
        "GMM: converged {}, avg posterior {:.4} (log std dev {:.3}), pairwise disagreement {:.2}%",
        converged,
        avg_probability,
        log_prob_spread.std_dev(),
        disagreement * 100.0
    );
    for (k, mode) in gmm.modes().iter().enumerate() {
        let m = mode.mean();
        println!(
            "  mode {}: weight {:.4}, mean ({:+.2}, {:+.2}, {:+.2})",
            k,
            mode.weight(),
            m.x,
            m.y,
            m.z
        );
    }

    converged && avg_probability > 0.9 && disagreement < 0.10
}

fn main() {
    println!("gmm3d self-test\n");

    let (observations, labels) = generate_observations(99);
    println!(
        "dataset: {} clusters x {} points, noise +/-{}\n",
        NUM_CLUSTERS,
        POINTS_PER_CLUSTER,
        SCALE / 4.0
    );

    let kmeans_ok = check_kmeans(&observations, &labels);
    let gmm_ok = check_gmm(&observations, &labels);

    println!(
        "\nk-means: {}  GMM: {}",
        if kmeans_ok { "PASS" } else { "FAIL" },
        if gmm_ok { "PASS" } else { "FAIL" }
    );

    if !(kmeans_ok && gmm_ok) {
        std::process::exit(1);
    }
}
