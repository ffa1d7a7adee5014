//! Intensity-based refinement of a coarse rigid alignment.
//!
//! The optimizer is pluggable through [`IntensityOptimizer`]. Optimizers work
//! in their own parameterisation, [`EulerTransform`], which maps a fixed-image
//! point `x` to the moving-image point
//!
//! ```text
//! y = R(θ) · (x − ctr) + ctr + t
//! ```
//!
//! with Euler angles `θ` (static x-y-z), rotation center `ctr` (by default
//! the geometric center `(shape − 1) / 2`) and translation `t`. This module
//! owns the conversion to the center-relative [`RigidTransform`] convention
//! used everywhere else.

use nalgebra::Vector3;
use ndarray::ArrayView3;

use super::metric::{PyramidLevel, SimilarityMetric};
use super::powell::{powell_minimize, PowellSettings};
use crate::error::Result;
use crate::resample::gaussian_filter;
use crate::transform::{euler_to_matrix, matrix_to_euler, RigidTransform};
use crate::volume::{geometric_center, shape3, subsample};

/// Rigid transform in the optimizer's native convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerTransform {
    /// Rotation angles `(θx, θy, θz)` in radians.
    pub angles: Vector3<f64>,
    /// Translation in voxels.
    pub translation: Vector3<f64>,
    /// Rotation center in index coordinates.
    pub center: Vector3<f64>,
}

impl EulerTransform {
    /// Identity rotating about the geometric center of a volume of `shape`.
    pub fn centered(shape: [usize; 3]) -> Self {
        Self {
            angles: Vector3::zeros(),
            translation: Vector3::zeros(),
            center: Vector3::new(
                (shape[0] as f64 - 1.0) / 2.0,
                (shape[1] as f64 - 1.0) / 2.0,
                (shape[2] as f64 - 1.0) / 2.0,
            ),
        }
    }

    pub fn rotation(&self) -> nalgebra::Matrix3<f64> {
        euler_to_matrix(&self.angles)
    }

    /// Moving-image point matching fixed-image point `x`.
    pub fn map_point(&self, x: &Vector3<f64>) -> Vector3<f64> {
        self.rotation() * (x - self.center) + self.center + self.translation
    }

    /// Convert to the center-relative convention for a volume of `shape`:
    /// `R = R(θ)`, `T = (ctr − c) + Rᵀ · (c − ctr − t)` with `c = shape / 2`.
    pub fn to_rigid(&self, shape: [usize; 3]) -> RigidTransform {
        let r = self.rotation();
        let c = geometric_center(shape);
        let translation = (self.center - c) + r.transpose() * (c - self.center - self.translation);
        RigidTransform::new(r, translation)
    }

    /// Inverse of [`to_rigid`](Self::to_rigid), keeping the rotation center
    /// of `self`.
    pub fn with_rigid(&self, rigid: &RigidTransform, shape: [usize; 3]) -> Self {
        let c = geometric_center(shape);
        let r = rigid.rotation;
        Self {
            angles: matrix_to_euler(&r),
            translation: c - self.center - r * (rigid.translation - self.center + c),
            center: self.center,
        }
    }
}

/// A multi-resolution intensity optimizer.
///
/// Given two same-shape volumes, returns the transform (native convention)
/// that best maps `fixed` onto `moving` under the optimizer's similarity
/// metric, starting from the identity.
pub trait IntensityOptimizer: Sync {
    fn optimize(&self, fixed: ArrayView3<f32>, moving: ArrayView3<f32>) -> anyhow::Result<EulerTransform>;
}

/// Run `optimizer` and express its result as a [`RigidTransform`] residual.
///
/// Errors from the optimizer are passed through unchanged.
pub fn refine_alignment(
    fixed: ArrayView3<f32>,
    moving: ArrayView3<f32>,
    optimizer: &dyn IntensityOptimizer,
) -> Result<RigidTransform> {
    let native = optimizer.optimize(fixed, moving)?;
    tracing::debug!(
        "refiner result: angles {:?} rad, translation {:?} vox",
        native.angles.as_slice(),
        native.translation.as_slice()
    );
    Ok(native.to_rigid(shape3(fixed)))
}

// ── Built-in optimizer ──────────────────────────────────────────────────────

/// Configuration for [`PowellOptimizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct PowellConfig {
    /// Similarity metric.
    /// Default: mutual information with 32 bins.
    pub metric: SimilarityMetric,
    /// Shrink factor per pyramid level, coarse to fine.
    /// Default: [4, 2, 1].
    pub shrink_factors: Vec<usize>,
    /// Gaussian smoothing sigma (full-resolution voxels) per level.
    /// Default: [2.0, 1.0, 0.0].
    pub smoothing_sigmas: Vec<f64>,
    /// Regular sampling stride on each level's fixed grid.
    /// Default: 2.
    pub sampling_stride: usize,
    /// Maximum Powell sweeps per level.
    /// Default: 8.
    pub max_iterations: usize,
    /// Function evaluations per line search.
    /// Default: 16.
    pub line_search_evals: usize,
    /// Line-search half-range at full resolution, in voxels of displacement.
    /// Scaled by the level's shrink factor.
    /// Default: 2.0.
    pub line_search_radius: f64,
    /// Relative metric decrease per sweep that ends a level.
    /// Default: 1e-5.
    pub tolerance: f64,
}

impl Default for PowellConfig {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::default(),
            shrink_factors: vec![4, 2, 1],
            smoothing_sigmas: vec![2.0, 1.0, 0.0],
            sampling_stride: 2,
            max_iterations: 8,
            line_search_evals: 16,
            line_search_radius: 2.0,
            tolerance: 1e-5,
        }
    }
}

/// Multi-resolution Powell optimizer over the six rigid parameters.
///
/// Angles are scaled by the volume radius so that a unit step in any
/// parameter moves the outermost voxels by about one voxel.
#[derive(Debug, Clone, Default)]
pub struct PowellOptimizer {
    pub config: PowellConfig,
}

impl PowellOptimizer {
    pub fn new(config: PowellConfig) -> Self {
        Self { config }
    }
}

impl IntensityOptimizer for PowellOptimizer {
    fn optimize(&self, fixed: ArrayView3<f32>, moving: ArrayView3<f32>) -> anyhow::Result<EulerTransform> {
        let cfg = &self.config;
        let shape = shape3(fixed);
        anyhow::ensure!(
            shape == shape3(moving),
            "refiner volumes differ in shape: {:?} vs {:?}",
            shape,
            shape3(moving)
        );
        anyhow::ensure!(
            !cfg.shrink_factors.is_empty() && cfg.shrink_factors.len() == cfg.smoothing_sigmas.len(),
            "need one smoothing sigma per shrink factor ({} vs {})",
            cfg.shrink_factors.len(),
            cfg.smoothing_sigmas.len()
        );

        let min_dim = *shape.iter().min().unwrap_or(&0);
        anyhow::ensure!(min_dim >= 4, "volume too small to refine: {:?}", shape);

        let radius = (*shape.iter().max().unwrap_or(&1) as f64 / 2.0).max(1.0);
        let mut current = EulerTransform::centered(shape);
        let center = current.center;

        for (&requested, &sigma) in cfg.shrink_factors.iter().zip(&cfg.smoothing_sigmas) {
            let shrink = requested.clamp(1, (min_dim / 4).max(1));
            let level = PyramidLevel::new(
                subsample(gaussian_filter(fixed, sigma).view(), shrink),
                subsample(gaussian_filter(moving, sigma).view(), shrink),
                shrink,
            );

            let to_params = |t: &EulerTransform| -> Vec<f64> {
                vec![
                    t.angles.x * radius,
                    t.angles.y * radius,
                    t.angles.z * radius,
                    t.translation.x,
                    t.translation.y,
                    t.translation.z,
                ]
            };
            let from_params = |p: &[f64]| -> EulerTransform {
                EulerTransform {
                    angles: Vector3::new(p[0], p[1], p[2]) / radius,
                    translation: Vector3::new(p[3], p[4], p[5]),
                    center,
                }
            };

            let settings = PowellSettings {
                max_iterations: cfg.max_iterations,
                line_search_radius: cfg.line_search_radius * shrink as f64,
                line_search_evals: cfg.line_search_evals,
                tolerance: cfg.tolerance,
            };
            let stride = effective_stride(level.fixed.dim(), cfg.sampling_stride);
            let start = to_params(&current);
            let initial = cfg.metric.evaluate(&level, &current, stride);
            let outcome = powell_minimize(
                |p| cfg.metric.evaluate(&level, &from_params(p), stride),
                &start,
                &settings,
            );
            tracing::debug!(
                "refine level shrink {}: metric {:.6} -> {:.6} ({} sweeps, {} evaluations)",
                shrink,
                initial,
                outcome.value,
                outcome.iterations,
                outcome.evaluations
            );
            current = from_params(&outcome.x);
        }

        Ok(current)
    }
}

/// Fewest metric samples a level should provide before its stride is reduced.
const MIN_LEVEL_SAMPLES: usize = 4096;

/// Largest stride `<= requested` that still yields enough samples.
fn effective_stride(dim: (usize, usize, usize), requested: usize) -> usize {
    let count = |s: usize| dim.0.div_ceil(s) * dim.1.div_ceil(s) * dim.2.div_ceil(s);
    let mut stride = requested.max(1);
    while stride > 1 && count(stride) < MIN_LEVEL_SAMPLES {
        stride -= 1;
    }
    stride
}
