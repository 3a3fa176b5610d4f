//! Random sampling utilities.

use crate::error::{GmmError, Result};
use rand::prelude::*;

/// Maximum number of redraws per slot before unique-index sampling gives up.
pub const MAX_SAMPLE_RETRIES: usize = 25;

/// Random sampler for selecting indices and scalars.
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    /// Create a new sampler with a random seed.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a new sampler with a specific seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Sample `k` unique indices from `[0, n)` by rejection sampling.
    ///
    /// Each slot is redrawn at most [`MAX_SAMPLE_RETRIES`] times; if a unique
    /// value still has not been found the whole operation fails with
    /// `ResourceExhausted`. The typical use is tiny subsets (k-means restart
    /// seeds), where rejection sampling beats shuffling a full index vector.
    pub fn sample_unique_indices(&mut self, n: usize, k: usize) -> Result<Vec<usize>> {
        if k == 0 || n == 0 {
            return Err(GmmError::invalid_argument("empty sample request"));
        }
        if k > n {
            return Err(GmmError::invalid_argument(format!(
                "cannot draw {} unique indices from a range of {}",
                k, n
            )));
        }
        // Trivial case: the subset is the whole range.
        if k == n {
            return Ok((0..n).collect());
        }

        let mut indices = Vec::with_capacity(k);
        indices.push(self.rng.gen_range(0..n));

        for _ in 1..k {
            let mut candidate = self.rng.gen_range(0..n);
            let mut retries = 0;
            while indices.contains(&candidate) {
                if retries == MAX_SAMPLE_RETRIES {
                    return Err(GmmError::resource_exhausted(
                        "unique index sampling exceeded retry budget",
                    ));
                }
                candidate = (candidate + 1) % n;
                retries += 1;
            }
            indices.push(candidate);
        }

        Ok(indices)
    }

    /// Get a random float in `[0, 1)`.
    pub fn random_f64(&mut self) -> f64 {
        self.rng.gen()
    }

    /// Borrow the underlying RNG.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_unique_indices() {
        let mut sampler = RandomSampler::with_seed(42);
        let indices = sampler.sample_unique_indices(100, 10).unwrap();

        assert_eq!(indices.len(), 10);
        let mut sorted = indices.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 10);
        assert!(indices.iter().all(|&i| i < 100));
    }

    #[test]
    fn test_sample_whole_range() {
        let mut sampler = RandomSampler::with_seed(42);
        let indices = sampler.sample_unique_indices(5, 5).unwrap();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_sample_k_greater_than_n() {
        let mut sampler = RandomSampler::with_seed(42);
        assert!(sampler.sample_unique_indices(5, 10).is_err());
    }

    #[test]
    fn test_sample_empty_request() {
        let mut sampler = RandomSampler::with_seed(42);
        assert!(sampler.sample_unique_indices(0, 0).is_err());
    }
}
