//! Rigid resampling with cubic B-spline interpolation, plus the Gaussian
//! smoothing and trilinear sampling used by the multi-resolution refiner.
//!
//! Spline interpolation follows the usual two-step scheme:
//!
//! 1. **Prefilter**: convert samples to B-spline coefficients with the
//!    recursive causal/anti-causal filter for the cubic pole `z = √3 − 2`,
//!    using mirror-symmetric boundaries.
//! 2. **Evaluate**: sum the 4×4×4 neighbourhood of coefficients weighted by
//!    the cubic B-spline kernel.
//!
//! Points that map outside `[0, n − 1]` along any axis read as zero. Output
//! voxels are independent, so slices are filled in parallel with rayon; the
//! result does not depend on thread scheduling.

use std::ops::Range;

use nalgebra::{Rotation3, Vector3};
use ndarray::{Array3, ArrayView3, Axis, Zip};

use crate::error::{AlignError, Result};
use crate::transform::RigidTransform;
use crate::volume::{geometric_center, shape3};

/// Pole of the cubic B-spline prefilter.
const POLE: f64 = -0.267_949_192_431_122_7;
/// Truncation tolerance for the causal initialisation sum.
const INIT_TOLERANCE: f64 = 1e-10;
/// Slack for points that land on the boundary up to round-off.
const EDGE_EPS: f64 = 1e-6;

/// Resampling capability used to apply rigid transforms to volumes.
///
/// Implementations must be pure: the input is never modified.
pub trait Resampler: Sync {
    fn resample(&self, volume: ArrayView3<f32>, transform: &RigidTransform) -> Array3<f32>;
}

/// Order-3 B-spline resampler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplineResampler;

impl Resampler for SplineResampler {
    fn resample(&self, volume: ArrayView3<f32>, transform: &RigidTransform) -> Array3<f32> {
        affine(volume, transform)
    }
}

/// Apply a rigid transform about the geometric center with cubic B-spline
/// interpolation: `out(o) = v(R · (o − c − T) + c)`.
pub fn affine(volume: ArrayView3<f32>, transform: &RigidTransform) -> Array3<f32> {
    SplineVolume::new(volume).resample(transform)
}

/// Turn the content of a volume by `angle` radians about the line through
/// the grid center parallel to array axis `axis`.
///
/// Positive angles follow the right-hand rule: about axis 0, content on
/// the positive axis-1 side moves toward positive axis 2. The grid keeps
/// its shape and corners that leave it are lost.
pub fn rotate(volume: ArrayView3<f32>, angle: f64, axis: usize) -> Result<Array3<f32>> {
    let turn = Rotation3::from_axis_angle(&unit_axis(axis)?, angle);
    let transform = RigidTransform::new(turn.matrix().transpose(), Vector3::zeros());
    Ok(affine(volume, &transform))
}

/// Shift the content of a volume by `shift` voxels within the plane
/// perpendicular to array axis `axis`.
///
/// The two components apply to the remaining axes in increasing order.
pub fn translate(volume: ArrayView3<f32>, shift: [f64; 2], axis: usize) -> Result<Array3<f32>> {
    unit_axis(axis)?;
    let mut t = Vector3::zeros();
    let in_plane = (0..3).filter(|&d| d != axis);
    for (d, s) in in_plane.zip(shift) {
        t[d] = s;
    }
    Ok(affine(volume, &RigidTransform::from_translation(t)))
}

/// Zoom a volume by `factor` along every axis.
///
/// Each output extent is `n · factor` rounded half to even (at least one
/// voxel). The first and last voxels of every axis stay aligned with the
/// input corners.
pub fn scale(volume: ArrayView3<f32>, factor: f64) -> Result<Array3<f32>> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(AlignError::InvalidArgument(format!("scale factor must be positive, got {factor}")));
    }
    let shape = shape3(volume);
    let out_shape = shape.map(|n| ((n as f64 * factor).round_ties_even() as usize).max(1));
    let step: [f64; 3] = std::array::from_fn(|d| {
        if out_shape[d] > 1 {
            (shape[d] as f64 - 1.0) / (out_shape[d] as f64 - 1.0)
        } else {
            0.0
        }
    });
    tracing::debug!("zoom {:?} -> {:?}", shape, out_shape);

    let spline = SplineVolume::new(volume);
    let mut out = Array3::<f32>::zeros(out_shape);
    Zip::indexed(&mut out).par_for_each(|(i, j, k), o| {
        let p = Vector3::new(i as f64 * step[0], j as f64 * step[1], k as f64 * step[2]);
        *o = spline.sample(&p) as f32;
    });
    Ok(out)
}

fn unit_axis(axis: usize) -> Result<nalgebra::Unit<Vector3<f64>>> {
    if axis > 2 {
        return Err(AlignError::InvalidArgument(format!("axis {axis} out of range for a volume")));
    }
    Ok(Vector3::ith_axis(axis))
}

/// Prefiltered cubic B-spline representation of a volume.
///
/// Build once and sample many times; the flip search evaluates four
/// candidate transforms against the same coefficients.
#[derive(Debug, Clone)]
pub struct SplineVolume {
    coeffs: Array3<f64>,
    shape: [usize; 3],
}

impl SplineVolume {
    pub fn new(volume: ArrayView3<f32>) -> Self {
        Self {
            coeffs: spline_coefficients(volume),
            shape: shape3(volume),
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Interpolated value at a continuous index position; zero outside.
    pub fn sample(&self, p: &Vector3<f64>) -> f64 {
        eval_cubic(&self.coeffs, self.shape, p)
    }

    /// Apply `transform` over the whole grid.
    pub fn resample(&self, transform: &RigidTransform) -> Array3<f32> {
        let [n0, n1, n2] = self.shape;
        self.resample_region(transform, &[0..n0, 0..n1, 0..n2])
    }

    /// Apply `transform` but compute only the output voxels in `region`.
    ///
    /// Element `[i, j, k]` of the result is output voxel
    /// `(r0.start + i, r1.start + j, r2.start + k)`; the rotation center
    /// stays the center of the full grid.
    pub fn resample_region(&self, transform: &RigidTransform, region: &[Range<usize>; 3]) -> Array3<f32> {
        let c = geometric_center(self.shape);
        let r = transform.rotation;
        let origin = Vector3::new(
            region[0].start as f64,
            region[1].start as f64,
            region[2].start as f64,
        );
        let offset = c - r * (c + transform.translation) + r * origin;

        let dim = (region[0].len(), region[1].len(), region[2].len());
        let mut out = Array3::<f32>::zeros(dim);
        Zip::indexed(&mut out).par_for_each(|(i, j, k), o| {
            let p = r * Vector3::new(i as f64, j as f64, k as f64) + offset;
            *o = self.sample(&p) as f32;
        });
        out
    }
}

/// B-spline coefficients of a volume (separable prefilter along each axis).
pub fn spline_coefficients(volume: ArrayView3<f32>) -> Array3<f64> {
    let mut coeffs = volume.mapv(|v| v as f64);
    for axis in 0..3 {
        Zip::from(coeffs.lanes_mut(Axis(axis))).par_for_each(|mut lane| {
            let mut buf = lane.to_vec();
            prefilter_line(&mut buf);
            lane.iter_mut().zip(buf).for_each(|(dst, src)| *dst = src);
        });
    }
    coeffs
}

fn prefilter_line(c: &mut [f64]) {
    let n = c.len();
    if n < 2 {
        return;
    }
    let z = POLE;
    let lambda = (1.0 - z) * (1.0 - 1.0 / z);
    c.iter_mut().for_each(|v| *v *= lambda);

    c[0] = causal_init(c, z);
    for k in 1..n {
        c[k] += z * c[k - 1];
    }
    c[n - 1] = (z / (z * z - 1.0)) * (c[n - 1] + z * c[n - 2]);
    for k in (0..n - 1).rev() {
        c[k] = z * (c[k + 1] - c[k]);
    }
}

fn causal_init(c: &[f64], z: f64) -> f64 {
    let n = c.len();
    let horizon = (INIT_TOLERANCE.ln() / z.abs().ln()).ceil() as usize;
    if horizon < n {
        let mut zn = z;
        let mut sum = c[0];
        for &v in &c[1..horizon] {
            sum += zn * v;
            zn *= z;
        }
        sum
    } else {
        // Exact mirror-symmetric initialisation for short lines.
        let iz = 1.0 / z;
        let mut zn = z;
        let mut z2n = z.powi(n as i32 - 1);
        let mut sum = c[0] + z2n * c[n - 1];
        z2n *= z2n * iz;
        for &v in &c[1..n - 1] {
            sum += (zn + z2n) * v;
            zn *= z;
            z2n *= iz;
        }
        sum / (1.0 - zn * zn)
    }
}

/// Mirror an index into `[0, n)` without repeating the edge sample.
fn mirror(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * n as isize - 2;
    let m = i.rem_euclid(period);
    if m >= n as isize {
        (period - m) as usize
    } else {
        m as usize
    }
}

fn cubic_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    let u = 1.0 - t;
    [
        u * u * u / 6.0,
        (4.0 - 6.0 * t2 + 3.0 * t3) / 6.0,
        (1.0 + 3.0 * t + 3.0 * t2 - 3.0 * t3) / 6.0,
        t3 / 6.0,
    ]
}

/// Evaluate the spline at `p`; zero outside the sampled domain.
fn eval_cubic(coeffs: &Array3<f64>, shape: [usize; 3], p: &Vector3<f64>) -> f64 {
    let mut base = [0isize; 3];
    let mut weights = [[0.0_f64; 4]; 3];
    for d in 0..3 {
        let x = p[d];
        let hi = (shape[d] as f64 - 1.0) + EDGE_EPS;
        if !(x >= -EDGE_EPS && x <= hi) {
            return 0.0;
        }
        let f = x.floor();
        base[d] = f as isize - 1;
        weights[d] = cubic_weights(x - f);
    }

    let mut idx = [[0usize; 4]; 3];
    for d in 0..3 {
        for (m, slot) in idx[d].iter_mut().enumerate() {
            *slot = mirror(base[d] + m as isize, shape[d]);
        }
    }

    let mut total = 0.0;
    for a in 0..4 {
        let mut plane = 0.0;
        for b in 0..4 {
            let mut row = 0.0;
            for c in 0..4 {
                row += weights[2][c] * coeffs[[idx[0][a], idx[1][b], idx[2][c]]];
            }
            plane += weights[1][b] * row;
        }
        total += weights[0][a] * plane;
    }
    total
}

/// Trilinear interpolation at a continuous index position.
///
/// Returns `None` when `p` lies outside `[0, n − 1]` on any axis.
pub fn trilinear(volume: &ArrayView3<f32>, p: [f64; 3]) -> Option<f64> {
    let shape = shape3(*volume);
    let mut i0 = [0usize; 3];
    let mut t = [0.0_f64; 3];
    for d in 0..3 {
        let n = shape[d];
        if n == 0 || !(p[d] >= 0.0 && p[d] <= (n - 1) as f64) {
            return None;
        }
        if n == 1 {
            continue;
        }
        let f = (p[d].floor() as usize).min(n - 2);
        i0[d] = f;
        t[d] = p[d] - f as f64;
    }
    let at = |a: usize, b: usize, c: usize| -> f64 {
        let i = (i0[0] + a).min(shape[0] - 1);
        let j = (i0[1] + b).min(shape[1] - 1);
        let k = (i0[2] + c).min(shape[2] - 1);
        volume[[i, j, k]] as f64
    };
    let lerp = |x: f64, y: f64, s: f64| x + (y - x) * s;
    let c00 = lerp(at(0, 0, 0), at(0, 0, 1), t[2]);
    let c01 = lerp(at(0, 1, 0), at(0, 1, 1), t[2]);
    let c10 = lerp(at(1, 0, 0), at(1, 0, 1), t[2]);
    let c11 = lerp(at(1, 1, 0), at(1, 1, 1), t[2]);
    let c0 = lerp(c00, c01, t[1]);
    let c1 = lerp(c10, c11, t[1]);
    Some(lerp(c0, c1, t[0]))
}

/// Separable Gaussian smoothing with standard deviation `sigma` voxels.
///
/// The kernel is truncated at 4σ and boundaries reflect (edge sample
/// repeated). `sigma <= 0` returns a copy.
pub fn gaussian_filter(volume: ArrayView3<f32>, sigma: f64) -> Array3<f32> {
    if sigma <= 0.0 {
        return volume.to_owned();
    }
    let radius = (4.0 * sigma).ceil() as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|w| *w /= norm);

    let mut data = volume.mapv(|v| v as f64);
    for axis in 0..3 {
        Zip::from(data.lanes_mut(Axis(axis))).par_for_each(|mut lane| {
            let src = lane.to_vec();
            let n = src.len();
            for (i, dst) in lane.iter_mut().enumerate() {
                let mut acc = 0.0;
                for (m, &w) in kernel.iter().enumerate() {
                    acc += w * src[reflect(i as isize + m as isize - radius, n)];
                }
                *dst = acc;
            }
        });
    }
    data.mapv(|v| v as f32)
}

/// Reflect an index into `[0, n)`, repeating the edge sample.
fn reflect(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m >= n as isize {
        (period - 1 - m) as usize
    } else {
        m as usize
    }
}
