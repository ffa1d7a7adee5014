//! Raw and central 3D image moments.
//!
//! A moment of order `(p, q, r)` about center `x0` is
//!
//! ```text
//! m_pqr = Σ v[i,j,k] · (i − x0₀)^p · (j − x0₁)^q · (k − x0₂)^r
//! ```
//!
//! Moments are separable per axis, so the coordinate powers are tabulated
//! once per axis and the volume is visited a single time. Sums are
//! accumulated sequentially in `f64`.

use ndarray::{ArrayView3, Axis};

use crate::error::{AlignError, Result};

/// Compute a 3D image moment.
///
/// - `order`: per-axis power. A zero order leaves that axis unweighted.
/// - `center`: coordinate origin in index units. May lie outside the volume.
/// - `subsample`: visit every k-th voxel along each axis. Coordinates stay in
///   full-resolution index units and the sum is scaled by `k³` so that the
///   result approximates the full-resolution moment.
pub fn moment3(
    volume: ArrayView3<f32>,
    order: [u32; 3],
    center: [f64; 3],
    subsample: usize,
) -> Result<f64> {
    if subsample == 0 {
        return Err(AlignError::InvalidArgument(
            "moment subsample factor must be at least 1".into(),
        ));
    }
    let (n0, n1, n2) = volume.dim();
    let w0 = axis_weights(n0, order[0], center[0], subsample);
    let w1 = axis_weights(n1, order[1], center[1], subsample);
    let w2 = axis_weights(n2, order[2], center[2], subsample);

    let mut total = 0.0_f64;
    for (a, &wa) in w0.iter().enumerate() {
        let plane = volume.index_axis(Axis(0), a * subsample);
        for (b, &wb) in w1.iter().enumerate() {
            let row = plane.index_axis(Axis(0), b * subsample);
            let mut acc = 0.0_f64;
            for (c, &wc) in w2.iter().enumerate() {
                acc += row[c * subsample] as f64 * wc;
            }
            total += acc * wa * wb;
        }
    }
    Ok(total * (subsample * subsample * subsample) as f64)
}

/// `(idx − center)^order` for every sampled index along one axis.
fn axis_weights(n: usize, order: u32, center: f64, stride: usize) -> Vec<f64> {
    (0..n)
        .step_by(stride)
        .map(|i| {
            if order == 0 {
                1.0
            } else {
                (i as f64 - center).powi(order as i32)
            }
        })
        .collect()
}

/// Center of mass of `data²` per axis, relative to `shape / 2`.
///
/// Used as a cheap estimate of where the object sits on the detector.
/// An all-zero input gives non-finite coordinates.
pub fn centre_of_squared_mass(data: ArrayView3<f32>) -> [f64; 3] {
    let shape = [data.dim().0, data.dim().1, data.dim().2];
    let mut mass = 0.0_f64;
    let mut first = [0.0_f64; 3];
    for ((i, j, k), &v) in data.indexed_iter() {
        let w = (v as f64) * (v as f64);
        mass += w;
        first[0] += w * (i as f64 - (shape[0] / 2) as f64);
        first[1] += w * (j as f64 - (shape[1] / 2) as f64);
        first[2] += w * (k as f64 - (shape[2] / 2) as f64);
    }
    [first[0] / mass, first[1] / mass, first[2] / mass]
}
