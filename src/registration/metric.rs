//! Image-similarity metrics for the intensity-based refiner.
//!
//! Both metrics sample the fixed image on a regular grid, map each sample
//! through the candidate transform and read the moving image with trilinear
//! interpolation. Samples that land outside the moving image read as the
//! moving minimum, so every transform is scored on the same sample set and
//! the fixed marginal does not change with the overlap. Lower values are
//! better for both metrics.
//!
//! [`overlap_correlation`] scores a finished estimate on the full-resolution
//! volumes; registration uses it to decide whether a refinement is kept.

use nalgebra::Vector3;
use ndarray::{Array3, ArrayView3};

use super::refine::EulerTransform;
use crate::resample::trilinear;
use crate::transform::RigidTransform;
use crate::volume::geometric_center;

/// Fewest overlapping samples for which a metric value is meaningful.
const MIN_SAMPLES: usize = 32;

/// Similarity measure minimised by [`PowellOptimizer`](super::PowellOptimizer).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimilarityMetric {
    /// Mean of squared intensity differences. Sensitive to intensity scale.
    MeanSquares,
    /// Negated mutual information in the style of Mattes et al.: intensities
    /// are normalised to their min/max range, the fixed image uses a box
    /// Parzen window and the moving image a cubic B-spline window. Invariant
    /// to affine intensity changes.
    MutualInformation {
        /// Histogram bins per image.
        bins: usize,
    },
}

impl Default for SimilarityMetric {
    fn default() -> Self {
        SimilarityMetric::MutualInformation { bins: 32 }
    }
}

/// One level of the multi-resolution pyramid.
///
/// `shrink` relates level indices to full-resolution indices:
/// full = level · shrink. Transforms are always expressed at full resolution.
pub(crate) struct PyramidLevel {
    pub fixed: Array3<f32>,
    pub moving: Array3<f32>,
    pub shrink: usize,
    pub fixed_range: (f32, f32),
    pub moving_range: (f32, f32),
}

impl PyramidLevel {
    pub fn new(fixed: Array3<f32>, moving: Array3<f32>, shrink: usize) -> Self {
        let fixed_range = min_max(fixed.view());
        let moving_range = min_max(moving.view());
        Self {
            fixed,
            moving,
            shrink,
            fixed_range,
            moving_range,
        }
    }

    /// Visit every `(fixed, moving)` intensity pair of the sampling grid and
    /// return how many of them overlap the moving image.
    fn for_each_sample(&self, transform: &EulerTransform, stride: usize, mut f: impl FnMut(f32, f64)) -> usize {
        let step = stride.max(1);
        let scale = self.shrink as f64;
        let moving = self.moving.view();
        let pad = self.moving_range.0 as f64;
        let rotation = transform.rotation();
        let (n0, n1, n2) = self.fixed.dim();
        let mut inside = 0;
        for i in (0..n0).step_by(step) {
            for j in (0..n1).step_by(step) {
                for k in (0..n2).step_by(step) {
                    let x = Vector3::new(i as f64, j as f64, k as f64) * scale;
                    let y = rotation * (x - transform.center) + transform.center + transform.translation;
                    let m = match trilinear(&moving, [y.x / scale, y.y / scale, y.z / scale]) {
                        Some(m) => {
                            inside += 1;
                            m
                        }
                        None => pad,
                    };
                    f(self.fixed[[i, j, k]], m);
                }
            }
        }
        inside
    }
}

impl SimilarityMetric {
    /// Metric value for `transform` on one pyramid level. Returns `+∞` when
    /// the images barely overlap.
    pub(crate) fn evaluate(&self, level: &PyramidLevel, transform: &EulerTransform, stride: usize) -> f64 {
        match *self {
            SimilarityMetric::MeanSquares => {
                let mut sum = 0.0;
                let mut count = 0usize;
                let inside = level.for_each_sample(transform, stride, |f, m| {
                    let d = f as f64 - m;
                    sum += d * d;
                    count += 1;
                });
                if inside < MIN_SAMPLES {
                    f64::INFINITY
                } else {
                    sum / count as f64
                }
            }
            SimilarityMetric::MutualInformation { bins } => mattes_mi(level, transform, stride, bins.max(2)),
        }
    }
}

fn mattes_mi(level: &PyramidLevel, transform: &EulerTransform, stride: usize, bins: usize) -> f64 {
    let (fmin, fmax) = level.fixed_range;
    let (mmin, mmax) = level.moving_range;
    let fspan = (fmax - fmin) as f64;
    let mspan = (mmax - mmin) as f64;
    if fspan <= 0.0 || mspan <= 0.0 {
        return 0.0;
    }

    // moving axis padded by one bin below and two above for the spline support
    let mcols = bins + 3;
    let mut joint = vec![0.0_f64; bins * mcols];
    let top = (bins - 1) as f64;
    let inside = level.for_each_sample(transform, stride, |f, m| {
        let fb = (((f - fmin) as f64 / fspan) * top).round().clamp(0.0, top) as usize;
        let u = (((m - mmin as f64) / mspan) * top).clamp(0.0, top);
        let base = u.floor() as isize - 1;
        let row = &mut joint[fb * mcols..(fb + 1) * mcols];
        for off in 0..4 {
            let b = base + off;
            let w = cubic_bspline(b as f64 - u);
            row[(b + 1) as usize] += w;
        }
    });
    if inside < MIN_SAMPLES {
        return f64::INFINITY;
    }

    let total: f64 = joint.iter().sum();
    let mut pf = vec![0.0_f64; bins];
    let mut pm = vec![0.0_f64; mcols];
    for (a, row) in joint.chunks(mcols).enumerate() {
        for (b, &v) in row.iter().enumerate() {
            pf[a] += v / total;
            pm[b] += v / total;
        }
    }

    let mut mi = 0.0;
    for (a, row) in joint.chunks(mcols).enumerate() {
        for (b, &v) in row.iter().enumerate() {
            let p = v / total;
            if p > 0.0 {
                mi += p * (p / (pf[a] * pm[b])).ln();
            }
        }
    }
    -mi
}

/// Cubic B-spline kernel β³(u).
fn cubic_bspline(u: f64) -> f64 {
    let a = u.abs();
    if a < 1.0 {
        (4.0 - 6.0 * a * a + 3.0 * a * a * a) / 6.0
    } else if a < 2.0 {
        let t = 2.0 - a;
        t * t * t / 6.0
    } else {
        0.0
    }
}

/// Pearson correlation between `fixed` and `moving` resampled by
/// `transform`, both at full resolution.
///
/// Only every `stride`-th fixed voxel along each axis is visited, and the
/// moving volume is read with trilinear interpolation at the exact source
/// point, so a strided estimate is judged without the aliasing of its
/// strided inputs. Sources outside the moving volume read as its minimum.
/// With `binary` both volumes are thresholded at `> 0` first. Returns 0 when
/// either side is constant.
pub fn overlap_correlation(
    fixed: ArrayView3<f32>,
    moving: ArrayView3<f32>,
    transform: &RigidTransform,
    stride: usize,
    binary: bool,
) -> f64 {
    let level = |v: f64| -> f64 {
        if binary {
            if v > 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            v
        }
    };
    let pad = level(min_max(moving).0 as f64);
    let (n0, n1, n2) = fixed.dim();
    let c = geometric_center([n0, n1, n2]);
    let step = stride.max(1);

    let mut acc = PairStats::default();
    for i in (0..n0).step_by(step) {
        for j in (0..n1).step_by(step) {
            for k in (0..n2).step_by(step) {
                let p = transform.source_point(&Vector3::new(i as f64, j as f64, k as f64), &c);
                let m = trilinear(&moving, [p.x, p.y, p.z]).map_or(pad, level);
                acc.push(level(fixed[[i, j, k]] as f64), m);
            }
        }
    }
    acc.correlation()
}

#[derive(Debug, Default)]
struct PairStats {
    n: f64,
    sa: f64,
    sb: f64,
    saa: f64,
    sbb: f64,
    sab: f64,
}

impl PairStats {
    fn push(&mut self, a: f64, b: f64) {
        self.n += 1.0;
        self.sa += a;
        self.sb += b;
        self.saa += a * a;
        self.sbb += b * b;
        self.sab += a * b;
    }

    fn correlation(&self) -> f64 {
        if self.n == 0.0 {
            return 0.0;
        }
        let cov = self.sab - self.sa * self.sb / self.n;
        let va = self.saa - self.sa * self.sa / self.n;
        let vb = self.sbb - self.sb * self.sb / self.n;
        if va <= 0.0 || vb <= 0.0 {
            return 0.0;
        }
        cov / (va * vb).sqrt()
    }
}

fn min_max(v: ArrayView3<f32>) -> (f32, f32) {
    v.iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured(n: usize) -> Array3<f32> {
        Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            let (x, y, z) = (i as f64, j as f64, k as f64);
            ((x * 0.4).sin() * (y * 0.3).cos() + (z * 0.25).sin() + 0.02 * x) as f32
        })
    }

    #[test]
    fn test_spline_window_partitions_unity() {
        for u in [0.0, 0.3, 0.5, 0.99] {
            let s: f64 = (-1..=2).map(|b| cubic_bspline(b as f64 - u)).sum();
            assert!((s - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_metrics_prefer_alignment() {
        let v = textured(24);
        let level = PyramidLevel::new(v.clone(), v, 1);
        let aligned = EulerTransform::centered([24, 24, 24]);
        let mut shifted = aligned;
        shifted.translation = Vector3::new(1.5, -1.0, 0.5);
        for metric in [SimilarityMetric::MeanSquares, SimilarityMetric::default()] {
            let a = metric.evaluate(&level, &aligned, 1);
            let s = metric.evaluate(&level, &shifted, 1);
            assert!(a < s, "{metric:?}: aligned {a} vs shifted {s}");
        }
        let ms = SimilarityMetric::MeanSquares.evaluate(&level, &aligned, 1);
        assert!(ms.abs() < 1e-12);
    }

    #[test]
    fn test_mutual_information_ignores_intensity_scale() {
        let v = textured(20);
        let scaled = v.mapv(|x| 3.0 * x + 1.0);
        let plain = PyramidLevel::new(v.clone(), v.clone(), 1);
        let rescaled = PyramidLevel::new(v, scaled, 1);
        let mut t = EulerTransform::centered([20, 20, 20]);
        t.angles = Vector3::new(0.05, 0.0, -0.03);
        let metric = SimilarityMetric::MutualInformation { bins: 24 };
        let a = metric.evaluate(&plain, &t, 1);
        let b = metric.evaluate(&rescaled, &t, 1);
        assert!((a - b).abs() < 1e-4, "{a} vs {b}");
    }

    /// Piecewise-constant ellipsoid with a bright knob and a dim notch.
    fn piecewise(n: usize) -> Array3<f32> {
        let c = (n / 2) as f64;
        Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            let (x, y, z) = (i as f64 - c, j as f64 - c, k as f64 - c);
            let inside = x * x / 100.0 + y * y / 49.0 + z * z / 20.0 <= 1.0;
            let knob = (x - 5.0).powi(2) + y * y + z * z <= 6.0;
            let notch = x * x + (y - 3.0).powi(2) + z * z <= 3.0;
            match (inside, knob, notch) {
                (_, true, _) => 2.0,
                (true, _, true) => 0.3,
                (true, _, _) => 1.0,
                _ => 0.0,
            }
        })
    }

    #[test]
    fn test_identity_is_local_minimum_of_mutual_information() {
        let n = 32;
        let v = piecewise(n);
        let level = PyramidLevel::new(v.clone(), v, 1);
        let identity = EulerTransform::centered([n, n, n]);
        let metric = SimilarityMetric::default();
        for stride in [1, 2] {
            let at_identity = metric.evaluate(&level, &identity, stride);
            for axis in 0..3 {
                for step in [-0.1, -0.05, 0.05, 0.1] {
                    let mut t = identity;
                    t.angles[axis] = step;
                    let value = metric.evaluate(&level, &t, stride);
                    assert!(
                        at_identity < value,
                        "stride {stride}: angle {axis} by {step} gives {value} <= {at_identity}"
                    );
                }
                for step in [-1.0, -0.5, 0.5, 1.0] {
                    let mut t = identity;
                    t.translation[axis] = step;
                    let value = metric.evaluate(&level, &t, stride);
                    assert!(
                        at_identity < value,
                        "stride {stride}: shift {axis} by {step} gives {value} <= {at_identity}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_partial_overlap_keeps_fixed_marginal() {
        // shifting content out of the field must not make the remaining
        // overlap look better than the aligned state
        let v = piecewise(24);
        let level = PyramidLevel::new(v.clone(), v, 1);
        let identity = EulerTransform::centered([24, 24, 24]);
        let metric = SimilarityMetric::default();
        let aligned = metric.evaluate(&level, &identity, 1);
        for shift in [4.0, 8.0] {
            let mut t = identity;
            t.translation = Vector3::new(shift, 0.0, 0.0);
            assert!(aligned < metric.evaluate(&level, &t, 1));
        }
    }

    #[test]
    fn test_overlap_correlation() {
        let v = piecewise(24);
        let identity = RigidTransform::identity();
        let same = overlap_correlation(v.view(), v.view(), &identity, 1, false);
        assert!((same - 1.0).abs() < 1e-12);

        // invariant to intensity scale and offset
        let scaled = v.mapv(|x| 4.0 * x + 2.0);
        let r = overlap_correlation(v.view(), scaled.view(), &identity, 2, false);
        assert!((r - 1.0).abs() < 1e-9, "{r}");

        let shifted = RigidTransform::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let worse = overlap_correlation(v.view(), v.view(), &shifted, 2, false);
        assert!(worse < 0.95, "{worse}");

        // binary mode compares supports
        let relit = v.mapv(|x| if x > 0.0 { 7.0 } else { 0.0 });
        let b = overlap_correlation(v.view(), relit.view(), &identity, 1, true);
        assert!((b - 1.0).abs() < 1e-12);

        let flat = Array3::<f32>::ones((8, 8, 8));
        assert_eq!(overlap_correlation(flat.view(), flat.view(), &identity, 1, false), 0.0);
    }

    #[test]
    fn test_no_overlap_is_infinite() {
        let v = textured(10);
        let level = PyramidLevel::new(v.clone(), v, 1);
        let mut t = EulerTransform::centered([10, 10, 10]);
        t.translation = Vector3::new(50.0, 0.0, 0.0);
        assert!(SimilarityMetric::default().evaluate(&level, &t, 1).is_infinite());
    }
}
