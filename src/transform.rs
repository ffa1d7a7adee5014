//! Rigid transforms about the geometric center of a volume.
//!
//! A [`RigidTransform`] `(R, T)` acts on a volume `v` of shape `s` as
//!
//! ```text
//! out(o) = v(R · (o − c − T) + c),    c = s / 2
//! ```
//!
//! so `T` is the displacement of the output relative to the volume center and
//! `R` maps output directions onto input directions.

use nalgebra::{Matrix3, Rotation3, Vector3};

/// Rotation + translation relative to the volume's geometric center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    /// 3×3 orthonormal rotation matrix.
    pub rotation: Matrix3<f64>,
    /// Translation in voxels.
    pub translation: Vector3<f64>,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), Vector3::zeros())
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self::new(Matrix3::identity(), translation)
    }

    /// Transform whose application undoes this one.
    pub fn inverse(&self) -> Self {
        Self::new(
            self.rotation.transpose(),
            -(self.rotation * self.translation),
        )
    }

    /// The transform equivalent to applying `self` first and `next` second.
    pub fn then(&self, next: &RigidTransform) -> Self {
        Self::new(
            self.rotation * next.rotation,
            next.translation + next.rotation.transpose() * self.translation,
        )
    }

    /// Source coordinate sampled for output voxel `o` in a volume centered at `c`.
    pub fn source_point(&self, o: &Vector3<f64>, c: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * (o - c - self.translation) + c
    }

    /// Rotation angle in radians, read from the trace of `R`.
    pub fn rotation_angle(&self) -> f64 {
        ((self.rotation.trace() - 1.0) / 2.0).clamp(-1.0, 1.0).acos()
    }

    /// Largest absolute deviation of `RᵀR` from the identity.
    pub fn orthonormality_error(&self) -> f64 {
        (self.rotation.transpose() * self.rotation - Matrix3::identity()).amax()
    }
}

/// Angle in radians between two rotation matrices.
pub fn rotation_distance(a: &Matrix3<f64>, b: &Matrix3<f64>) -> f64 {
    let rel = a.transpose() * b;
    ((rel.trace() - 1.0) / 2.0).clamp(-1.0, 1.0).acos()
}

/// Rotation from Euler angles `(θx, θy, θz)` in the static x-y-z convention:
/// `R = Rz(θz) · Ry(θy) · Rx(θx)`.
pub fn euler_to_matrix(angles: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::from_euler_angles(angles.x, angles.y, angles.z).into_inner()
}

/// Inverse of [`euler_to_matrix`]. Input must be orthonormal with det +1.
pub fn matrix_to_euler(rotation: &Matrix3<f64>) -> Vector3<f64> {
    let (x, y, z) = Rotation3::from_matrix_unchecked(*rotation).euler_angles();
    Vector3::new(x, y, z)
}

// ── 180° flips ──────────────────────────────────────────────────────────────

/// One of the four candidate corrections for the eigenvector sign ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlipAxis {
    /// No flip.
    Identity,
    /// 180° about axis 0: `diag(1, −1, −1)`.
    Axis0,
    /// 180° about axis 1: `diag(−1, 1, −1)`.
    Axis1,
    /// 180° about axis 2: `diag(−1, −1, 1)`.
    Axis2,
}

impl FlipAxis {
    pub const ALL: [FlipAxis; 4] = [
        FlipAxis::Identity,
        FlipAxis::Axis0,
        FlipAxis::Axis1,
        FlipAxis::Axis2,
    ];

    /// Coordinate axis of the rotation, `None` for the identity.
    pub fn axis(self) -> Option<usize> {
        match self {
            FlipAxis::Identity => None,
            FlipAxis::Axis0 => Some(0),
            FlipAxis::Axis1 => Some(1),
            FlipAxis::Axis2 => Some(2),
        }
    }

    pub fn matrix(self) -> Matrix3<f64> {
        let d = match self {
            FlipAxis::Identity => [1.0, 1.0, 1.0],
            FlipAxis::Axis0 => [1.0, -1.0, -1.0],
            FlipAxis::Axis1 => [-1.0, 1.0, -1.0],
            FlipAxis::Axis2 => [-1.0, -1.0, 1.0],
        };
        Matrix3::from_diagonal(&Vector3::new(d[0], d[1], d[2]))
    }
}

impl std::fmt::Display for FlipAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.axis() {
            None => write!(f, "identity"),
            Some(a) => write!(f, "180° about axis {a}"),
        }
    }
}
