//! SE(2) rigid transforms and angle utilities for the maze-exploration engine.
//!
//! `Transform2D` is the common currency between the range simulator, the
//! occupancy mapper, and the pose-graph SLAM back-end: all three need to
//! compose and invert 2D rigid transforms, and SLAM additionally needs to
//! express one pose relative to another's frame (its edge measurements).
//! `geometry` holds the lower-level stateless primitives (segments, rays,
//! Bresenham rasterization) that the maze model and range simulator build on.

use nalgebra::{Isometry2, Matrix3, Vector2};
use std::f64::consts::PI;
use types::Pose;

pub mod geometry;
pub use geometry::{
    bresenham_line, point_segment_distance, ray_segment_intersection, segments_intersect,
    GridCell, Ray, Segment,
};

/// A 2D rigid body transform (translation + rotation).
#[derive(Debug, Clone, Copy)]
pub struct Transform2D {
    inner: Isometry2<f64>,
}

impl Transform2D {
    /// Create identity transform.
    pub fn identity() -> Self {
        Self {
            inner: Isometry2::identity(),
        }
    }

    /// Create transform from translation and rotation angle.
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            inner: Isometry2::new(Vector2::new(x, y), theta),
        }
    }

    /// Create from a Pose struct.
    pub fn from_pose(pose: &Pose) -> Self {
        Self::new(pose.x, pose.y, pose.theta)
    }

    /// Convert to a Pose struct, with `theta` normalized to `(-pi, pi]`.
    pub fn to_pose(&self) -> Pose {
        Pose {
            x: self.inner.translation.x,
            y: self.inner.translation.y,
            theta: normalize_angle(self.inner.rotation.angle()),
        }
    }

    /// Get the underlying nalgebra Isometry2.
    pub fn as_isometry(&self) -> &Isometry2<f64> {
        &self.inner
    }

    /// Get translation component.
    pub fn translation(&self) -> Vector2<f64> {
        self.inner.translation.vector
    }

    /// Get rotation angle in radians.
    pub fn rotation(&self) -> f64 {
        self.inner.rotation.angle()
    }

    /// Compute inverse transform.
    pub fn inverse(&self) -> Self {
        Self {
            inner: self.inner.inverse(),
        }
    }

    /// Compose transforms: self * other.
    /// If self is A->B and other is B->C, result is A->C.
    pub fn compose(&self, other: &Transform2D) -> Transform2D {
        Transform2D {
            inner: self.inner * other.inner,
        }
    }

    /// Transform a point from child frame to parent frame.
    pub fn transform_point(&self, point: Vector2<f64>) -> Vector2<f64> {
        self.inner
            .transform_point(&nalgebra::Point2::from(point))
            .coords
    }

    /// Transform a vector (rotation only, no translation) from child frame
    /// to parent frame.
    pub fn transform_vector(&self, v: Vector2<f64>) -> Vector2<f64> {
        self.inner.transform_vector(&v)
    }

    /// Compute relative transform: from self to other, i.e. `self^-1 * other`.
    /// If self is A and other is B (both expressed in the same outer frame),
    /// returns the A->B transform — `other` expressed in `self`'s frame.
    pub fn relative_to(&self, other: &Transform2D) -> Transform2D {
        Transform2D {
            inner: self.inner.inverse() * other.inner,
        }
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Transform2D {
    type Output = Transform2D;

    fn mul(self, rhs: Transform2D) -> Transform2D {
        self.compose(&rhs)
    }
}

impl std::ops::Mul<&Transform2D> for Transform2D {
    type Output = Transform2D;

    fn mul(self, rhs: &Transform2D) -> Transform2D {
        self.compose(rhs)
    }
}

impl std::ops::Mul<Transform2D> for &Transform2D {
    type Output = Transform2D;

    fn mul(self, rhs: Transform2D) -> Transform2D {
        self.compose(&rhs)
    }
}

impl std::ops::Mul<&Transform2D> for &Transform2D {
    type Output = Transform2D;

    fn mul(self, rhs: &Transform2D) -> Transform2D {
        self.compose(rhs)
    }
}

/// Normalize angle to `(-PI, PI]`.
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a <= -PI {
        a += 2.0 * PI;
    }
    a
}

/// Compute shortest angular difference from a to b, normalized to `(-PI, PI]`.
pub fn angle_diff(a: f64, b: f64) -> f64 {
    normalize_angle(b - a)
}

/// 2D rotation matrix (homogeneous, for use alongside `Matrix3`-based SLAM
/// Jacobians) for a given angle.
pub fn rotation_matrix(theta: f64) -> Matrix3<f64> {
    let c = theta.cos();
    let s = theta.sin();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}
