//! Centroid and principal axes of an intensity volume.
//!
//! The orientation is read from the second-order central moments:
//!
//! 1. `m000` and the first-order moments give the intensity centroid `T`.
//! 2. Central moments `μ200 … μ011` about `T` form the covariance matrix.
//! 3. Its eigenvectors (as columns) form the rotation `R`.
//!
//! Eigenvectors are only defined up to sign, and their order follows the
//! decomposition unless the eigenvalues are clearly separated, in which case
//! they are sorted largest first so two volumes of the same object produce
//! comparable frames. The remaining sign ambiguity is resolved later by the
//! flip search.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use ndarray::ArrayView3;

use crate::error::Result;
use crate::moments::moment3;
use crate::volume::{geometric_center, shape3};

const MAX_EIGEN_ITERATIONS: usize = 200;

/// Centroid and principal axes of a volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    /// Centroid relative to the geometric center `shape / 2`, in voxels of
    /// the analysed volume.
    pub translation: Vector3<f64>,
    /// Principal axes as columns; det = +1.
    pub rotation: Matrix3<f64>,
    /// Variance along each principal axis (voxels²), matching the column order.
    pub eigenvalues: Vector3<f64>,
    /// Whether the axes were reordered by decreasing variance.
    pub sorted: bool,
}

/// Estimate centroid and principal axes.
///
/// `min_eigen_separation` is the smallest relative gap between any two
/// eigenvalues for which sorting is considered reliable. With smaller gaps
/// the decomposition order is kept as-is.
///
/// An all-zero volume yields a non-finite translation.
pub fn moments_orientation(
    volume: ArrayView3<f32>,
    subsample: usize,
    min_eigen_separation: f64,
) -> Result<Orientation> {
    let origin = [0.0; 3];
    let m000 = moment3(volume, [0, 0, 0], origin, subsample)?;
    let centroid = Vector3::new(
        moment3(volume, [1, 0, 0], origin, subsample)? / m000,
        moment3(volume, [0, 1, 0], origin, subsample)? / m000,
        moment3(volume, [0, 0, 1], origin, subsample)? / m000,
    );
    let center = [centroid.x, centroid.y, centroid.z];

    let mu = |order: [u32; 3]| -> Result<f64> {
        Ok(moment3(volume, order, center, subsample)? / m000)
    };
    let mu200 = mu([2, 0, 0])?;
    let mu020 = mu([0, 2, 0])?;
    let mu002 = mu([0, 0, 2])?;
    let mu110 = mu([1, 1, 0])?;
    let mu101 = mu([1, 0, 1])?;
    let mu011 = mu([0, 1, 1])?;

    #[rustfmt::skip]
    let covariance = Matrix3::new(
        mu200, mu110, mu101,
        mu110, mu020, mu011,
        mu101, mu011, mu002,
    );

    // Non-finite input (empty volume) never converges; fall back to the
    // coordinate axes.
    let (mut eigenvalues, mut rotation) =
        match SymmetricEigen::try_new(covariance, f64::EPSILON, MAX_EIGEN_ITERATIONS) {
            Some(eigen) => (eigen.eigenvalues, eigen.eigenvectors),
            None => (covariance.diagonal(), Matrix3::identity()),
        };

    let sorted = well_separated(&eigenvalues, min_eigen_separation);
    if sorted {
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]));
        let (vals, vecs) = (eigenvalues, rotation);
        for (dst, &src) in order.iter().enumerate() {
            eigenvalues[dst] = vals[src];
            rotation.set_column(dst, &vecs.column(src));
        }
    }

    if rotation.determinant() < 0.0 {
        let flipped = -rotation.column(2);
        rotation.set_column(2, &flipped);
    }

    let translation = centroid - geometric_center(shape3(volume));
    tracing::debug!(
        "orientation: centroid {:?}, eigenvalues {:?}, sorted {}",
        translation.as_slice(),
        eigenvalues.as_slice(),
        sorted
    );

    Ok(Orientation {
        translation,
        rotation,
        eigenvalues,
        sorted,
    })
}

/// True when every pair of eigenvalues differs by more than `min_gap`
/// relative to the largest magnitude.
fn well_separated(values: &Vector3<f64>, min_gap: f64) -> bool {
    let scale = values.amax();
    if scale.is_nan() || scale <= 0.0 {
        return false;
    }
    (0..3).all(|i| ((i + 1)..3).all(|j| (values[i] - values[j]).abs() > min_gap * scale))
}
