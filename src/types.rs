//! Common type aliases for 3D observations.

use nalgebra::{Matrix3, Vector3};

/// A 3D observation (point in R^3).
pub type Vec3 = Vector3<f64>;

/// A 3x3 real matrix, used for covariances.
pub type Mat3 = Matrix3<f64>;
