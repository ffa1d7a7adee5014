//! Resolution of the 180° ambiguity left by principal-axis alignment.
//!
//! Eigenvectors carry no sign, so the moment estimate is only known up to a
//! 180° rotation about one of the fixed volume's principal axes. Each of the
//! four candidate transforms is applied to the moving volume on a cube
//! around the fixed centroid, and the one with the smallest sum of squared
//! differences wins. Only the cube is resampled.

use ndarray::{s, ArrayView3};

use crate::resample::SplineVolume;
use crate::transform::{FlipAxis, RigidTransform};
use crate::volume::{centered_window, shape3};

/// Sum of squared differences for each candidate, in [`FlipAxis::ALL`] order.
///
/// `candidates[i]` is the complete moving-to-fixed transform that includes
/// the correction `FlipAxis::ALL[i]`. `moving` must have the shape of
/// `fixed`.
pub fn flip_costs(
    fixed: ArrayView3<f32>,
    moving: &SplineVolume,
    candidates: &[RigidTransform; 4],
    center: [f64; 3],
    half_width: usize,
) -> [f64; 4] {
    let window = centered_window(shape3(fixed), center, half_width);
    let [r0, r1, r2] = window.clone();
    let fixed_crop = fixed.slice(s![r0, r1, r2]);

    let mut costs = [0.0_f64; 4];
    for (cost, candidate) in costs.iter_mut().zip(candidates) {
        let moving_crop = moving.resample_region(candidate, &window);
        *cost = fixed_crop
            .iter()
            .zip(moving_crop.iter())
            .map(|(&f, &m)| {
                let d = (f - m) as f64;
                d * d
            })
            .sum();
    }
    costs
}

/// Pick the candidate that best matches `fixed` near `center`.
///
/// `center` is in absolute index coordinates. The crop is the odd cube
/// `[c − h, c + h]`, shrunk symmetrically where it would leave the volume.
/// Ties resolve to the earliest candidate.
pub fn resolve_flip(
    fixed: ArrayView3<f32>,
    moving: &SplineVolume,
    candidates: &[RigidTransform; 4],
    center: [f64; 3],
    half_width: usize,
) -> FlipAxis {
    let costs = flip_costs(fixed, moving, candidates, center, half_width);
    tracing::debug!(
        "flip SSD: identity {:.4e}, axis0 {:.4e}, axis1 {:.4e}, axis2 {:.4e}",
        costs[0],
        costs[1],
        costs[2],
        costs[3]
    );

    let mut best = 0;
    for (i, &c) in costs.iter().enumerate().skip(1) {
        if c < costs[best] {
            best = i;
        }
    }
    FlipAxis::ALL[best]
}
