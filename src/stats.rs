//! Online accumulators for means and variances.
//!
//! These accumulators compute running statistics in a single pass without
//! storing the samples, which keeps the EM update loops allocation-free.

use std::ops::{Add, Div, Sub};

/// Incremental mean over any type supporting vector-space operations.
///
/// Works for both scalars (`f64`) and 3D points (`Vec3`): the update is
/// `mean += (x - mean) / n`, which is numerically preferable to summing and
/// dividing at the end.
#[derive(Debug, Clone, Copy)]
pub struct OnlineMean<T> {
    mean: T,
    count: usize,
}

impl<T> OnlineMean<T>
where
    T: Copy + Default + Add<Output = T> + Sub<Output = T> + Div<f64, Output = T>,
{
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self {
            mean: T::default(),
            count: 0,
        }
    }

    /// Push a sample.
    pub fn push(&mut self, x: T) {
        self.count += 1;
        self.mean = self.mean + (x - self.mean) / self.count as f64;
    }

    /// Current mean. Zero-valued before any sample is pushed.
    pub fn mean(&self) -> T {
        self.mean
    }

    /// Number of samples pushed.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Reset for reuse.
    pub fn reset(&mut self) {
        self.mean = T::default();
        self.count = 0;
    }
}

impl<T> Default for OnlineMean<T>
where
    T: Copy + Default + Add<Output = T> + Sub<Output = T> + Div<f64, Output = T>,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Welford's online variance accumulator for scalars.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnlineVariance {
    mean: f64,
    m2: f64,
    count: usize,
}

impl OnlineVariance {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a sample.
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Current mean.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance. Zero with fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Number of samples pushed.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Reset for reuse.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
