//! Rigid transforms between coordinate frames.
//!
//! A [`RigidTransform`] maps points from a *source* frame into a *target*
//! frame: `p_target = R * p_source + t`. A [`CameraPose`] is the
//! camera -> world transform, so the camera center in world coordinates is
//! simply its translation, and world -> camera is `pose.inverse()`.

use std::ops::Mul;

use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Rotation + translation, `p_target = rotation * p_source + translation`.
///
/// The rotation is stored unchecked: orthonormality is the caller's
/// responsibility and is not re-validated on use.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

/// Camera -> world transform of a posed camera.
pub type CameraPose = RigidTransform;

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Wrap a raw 3x3 matrix without projecting it onto SO(3).
    pub fn from_parts(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self::new(Rotation3::from_matrix_unchecked(rotation), translation)
    }

    /// Build from a row-major 3x3 rotation and a 3-vector.
    pub fn from_row_major(rotation: &[f64; 9], translation: &[f64; 3]) -> Self {
        Self::from_parts(
            Matrix3::from_row_slice(rotation),
            Vector3::new(translation[0], translation[1], translation[2]),
        )
    }

    pub fn rotation_row_major(&self) -> [f64; 9] {
        let m = self.rotation.matrix();
        [
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)],
        ]
    }

    pub fn translation_array(&self) -> [f64; 3] {
        [self.translation.x, self.translation.y, self.translation.z]
    }

    /// Target -> source transform. Uses `R^T`, valid for orthonormal `R`.
    pub fn inverse(&self) -> Self {
        let r_inv = self.rotation.transpose();
        Self {
            rotation: r_inv,
            translation: -(r_inv * self.translation),
        }
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * p.coords + self.translation)
    }

    /// Rotate a direction; translation does not apply.
    pub fn transform_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * v
    }

    /// Origin of the source frame expressed in the target frame.
    pub fn origin(&self) -> Point3<f64> {
        Point3::from(self.translation)
    }

    /// `‖R Rᵀ − I‖ < tol` and `det R > 0`.
    pub fn is_orthonormal(&self, tol: f64) -> bool {
        is_rotation_matrix(self.rotation.matrix(), tol)
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: RigidTransform) -> Self::Output {
        self.compose(&rhs)
    }
}

/// Check that `m` is a proper rotation within `tol` (Frobenius norm).
pub fn is_rotation_matrix(m: &Matrix3<f64>, tol: f64) -> bool {
    if m.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let err = (m * m.transpose() - Matrix3::identity()).norm();
    err < tol && m.determinant() > 0.0
}
