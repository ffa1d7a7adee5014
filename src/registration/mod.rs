//! Rigid registration of two CT volumes.
//!
//! The alignment is estimated in three stages:
//!
//! 1. **Moments**: centroid and principal axes of both volumes give a coarse
//!    rotation `R = R_mov · R_fixᵀ` and translation `T = T_fix − Rᵀ · T_mov`.
//! 2. **Flip**: the principal axes carry no sign, so the estimate is only
//!    known up to a 180° turn `F` about one of the fixed principal axes. The
//!    four candidates `R = R_mov · F · R_fixᵀ` (with `T` from the same rule)
//!    are compared near the fixed centroid and the best one is kept.
//! 3. **Refinement** (optional): an [`IntensityOptimizer`] polishes the
//!    coarse result. Its residual `(R_r, T_r)` is composed onto the coarse
//!    transform, `R ← R · R_r` and `T ← T_r + R_rᵀ · T`, so the translation
//!    is the optimizer's and is not recomputed from the centroids. The
//!    refined transform replaces the coarse one only when it correlates
//!    better with the fixed volume at full resolution.
//!
//! All stages run on strided copies of the inputs; the final translation is
//! mapped back to full-resolution voxels.

pub mod flip;
pub mod metric;
pub mod powell;
pub mod refine;

use std::time::Instant;

use ndarray::{Array3, ArrayView3};

pub use flip::{flip_costs, resolve_flip};
pub use metric::{overlap_correlation, SimilarityMetric};
pub use refine::{refine_alignment, EulerTransform, IntensityOptimizer, PowellConfig, PowellOptimizer};

use crate::error::{AlignError, Result};
use crate::orientation::{moments_orientation, Orientation};
use crate::progress::{NoProgress, ProgressSink};
use crate::resample::{Resampler, SplineResampler, SplineVolume};
use crate::transform::{FlipAxis, RigidTransform};
use crate::volume::{binarize_eroded, geometric_center, rms_difference, shape3, subsample};

const STAGE: &str = "registration";

// ── Configuration ───────────────────────────────────────────────────────────

/// Configuration for [`register_volumes`].
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationConfig {
    /// Stride applied to both volumes before any computation.
    /// Default: 2.
    pub subsample: usize,
    /// Run the intensity-based refinement after moment alignment.
    /// Default: true.
    pub refine: bool,
    /// Threshold at `> 0` and erode once before estimating the alignment.
    /// Transforms are still applied to full intensities.
    /// Default: false.
    pub binary: bool,
    /// Half-width (voxels of the subsampled volume) of the cube compared when
    /// resolving the flip ambiguity.
    /// Default: 50.
    pub flip_half_width: usize,
    /// Minimum relative eigenvalue gap for sorting principal axes.
    /// Default: 1e-3.
    pub min_eigen_separation: f64,
    /// Settings for the built-in refiner used by [`register_volumes`].
    pub refiner: PowellConfig,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            subsample: 2,
            refine: true,
            binary: false,
            flip_half_width: 50,
            min_eigen_separation: 1e-3,
            refiner: PowellConfig::default(),
        }
    }
}

// ── Result ──────────────────────────────────────────────────────────────────

/// Outcome of a registration.
///
/// Applying [`transform`](Self::transform) to the moving volume (see
/// [`affine`](crate::affine)) aligns it with the fixed volume.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// Final transform, translation in full-resolution voxels.
    pub transform: RigidTransform,
    /// Moment + flip estimate before refinement, full-resolution voxels.
    pub coarse_transform: RigidTransform,
    /// 180° correction chosen by the flip search.
    pub flip: FlipAxis,
    /// Orientation of the fixed volume (subsampled units).
    pub fixed_orientation: Orientation,
    /// Orientation of the moving volume (subsampled units).
    pub moving_orientation: Orientation,
    /// RMS voxel difference before alignment (subsampled volumes).
    pub rms_initial: f64,
    /// RMS voxel difference after moment + flip alignment.
    pub rms_moments: f64,
    /// RMS voxel difference for the final transform, if refinement ran.
    pub rms_refined: Option<f64>,
    /// Whether the refined transform replaced the coarse one.
    pub refinement_accepted: bool,
    /// Wall-clock time of the registration in milliseconds.
    pub elapsed_ms: f64,
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Register `moving` onto `fixed` with the built-in Powell refiner.
pub fn register_volumes(
    fixed: ArrayView3<f32>,
    moving: ArrayView3<f32>,
    config: &RegistrationConfig,
) -> Result<RegistrationResult> {
    let optimizer = PowellOptimizer::new(config.refiner.clone());
    register_volumes_with(fixed, moving, config, &optimizer, &NoProgress)
}

/// Register `moving` onto `fixed` with a caller-supplied optimizer and
/// progress sink.
///
/// # Errors
///
/// - [`AlignError::ShapeMismatch`] when the volumes differ in shape.
/// - [`AlignError::InvalidArgument`] when `subsample` is zero.
/// - [`AlignError::External`] when the optimizer fails.
pub fn register_volumes_with(
    fixed: ArrayView3<f32>,
    moving: ArrayView3<f32>,
    config: &RegistrationConfig,
    optimizer: &dyn IntensityOptimizer,
    progress: &dyn ProgressSink,
) -> Result<RegistrationResult> {
    let t0 = Instant::now();
    let shape = shape3(fixed);
    if shape != shape3(moving) {
        return Err(AlignError::ShapeMismatch {
            fixed: shape,
            moving: shape3(moving),
        });
    }
    if config.subsample == 0 {
        return Err(AlignError::InvalidArgument(
            "registration subsample factor must be at least 1".into(),
        ));
    }
    progress.progress(STAGE, 0.0);

    let k = config.subsample;
    let fixed_s = subsample(fixed, k);
    let moving_s = subsample(moving, k);
    let sub_shape = shape3(fixed_s.view());
    let resampler = SplineResampler;

    let rms_initial = rms_difference(fixed_s.view(), moving_s.view());
    tracing::info!("L2 norm before registration: {:.6}", rms_initial);
    progress.metric("rms_initial", rms_initial);

    // Masks replace intensities for everything that estimates the alignment.
    let fixed_mask = config.binary.then(|| binarize_eroded(fixed_s.view()));
    let moving_mask = config.binary.then(|| binarize_eroded(moving_s.view()));
    let fixed_a = fixed_mask.as_ref().map_or(fixed_s.view(), |m| m.view());
    let moving_a = moving_mask.as_ref().map_or(moving_s.view(), |m| m.view());

    // ── Stage 1: moments ──
    let fixed_orientation = moments_orientation(fixed_a, 1, config.min_eigen_separation)?;
    let moving_orientation = moments_orientation(moving_a, 1, config.min_eigen_separation)?;
    let compose = |flip: FlipAxis| -> RigidTransform {
        // 180° about a fixed principal axis, carried into array coordinates
        let rotation = moving_orientation.rotation * flip.matrix() * fixed_orientation.rotation.transpose();
        let translation =
            fixed_orientation.translation - rotation.transpose() * moving_orientation.translation;
        RigidTransform::new(rotation, translation)
    };

    // ── Stage 2: flip ──
    let candidates = FlipAxis::ALL.map(&compose);
    let moving_spline = SplineVolume::new(moving_a);
    let centroid = fixed_orientation.translation + geometric_center(sub_shape);
    let flip = resolve_flip(
        fixed_a,
        &moving_spline,
        &candidates,
        [centroid.x, centroid.y, centroid.z],
        config.flip_half_width,
    );
    let coarse = compose(flip);
    tracing::debug!("flip correction: {}", flip);

    let coarse_moving = resampler.resample(moving_s.view(), &coarse);
    let rms_moments = rms_difference(fixed_s.view(), coarse_moving.view());
    tracing::info!("L2 norm after moments alignment: {:.6}", rms_moments);
    progress.metric("rms_moments", rms_moments);
    progress.progress(STAGE, 0.1);

    // ── Stage 3: refinement ──
    let (transform, rms_refined, refinement_accepted) = if config.refine {
        let refine_input: Array3<f32> = if config.binary {
            moving_spline.resample(&coarse)
        } else {
            coarse_moving
        };
        let residual = refine_alignment(fixed_a, refine_input.view(), optimizer)?;
        let refined = coarse.then(&residual);

        // judged on the full-resolution volumes, where a strided estimate
        // is free of the aliasing of its strided inputs
        let score = |t: &RigidTransform| {
            overlap_correlation(fixed, moving, &upscale(t, k, sub_shape, shape), k, config.binary)
        };
        let before = score(&coarse);
        let after = score(&refined);
        progress.metric("correlation_moments", before);
        progress.metric("correlation_refined", after);
        let accepted = after > before;
        let transform = if accepted {
            refined
        } else {
            tracing::info!(
                "refinement rejected: correlation {:.6} after moments, {:.6} after refinement",
                before,
                after
            );
            coarse
        };

        let resampled = resampler.resample(moving_s.view(), &transform);
        let rms = rms_difference(fixed_s.view(), resampled.view());
        tracing::info!("L2 norm after refinement: {:.6}", rms);
        progress.metric("rms_refined", rms);
        (transform, Some(rms), accepted)
    } else {
        (coarse, None, false)
    };
    progress.progress(STAGE, 1.0);

    let elapsed_ms = t0.elapsed().as_secs_f64() * 1e3;
    tracing::debug!(
        "registration finished in {:.1} ms: rotation angle {:.3} deg",
        elapsed_ms,
        transform.rotation_angle().to_degrees()
    );

    Ok(RegistrationResult {
        transform: upscale(&transform, k, sub_shape, shape),
        coarse_transform: upscale(&coarse, k, sub_shape, shape),
        flip,
        fixed_orientation,
        moving_orientation,
        rms_initial,
        rms_moments,
        rms_refined,
        refinement_accepted,
        elapsed_ms,
    })
}

/// Map a transform estimated on strided volumes back to full resolution.
///
/// Sub-grid index `j` corresponds to full index `k·j`, so besides scaling
/// the translation the offset between `k · c_sub` and `c_full` has to be
/// carried through the rotation. The offset vanishes when every extent is a
/// multiple of `2k`.
fn upscale(t: &RigidTransform, k: usize, sub_shape: [usize; 3], full_shape: [usize; 3]) -> RigidTransform {
    let kf = k as f64;
    let delta = geometric_center(sub_shape) * kf - geometric_center(full_shape);
    let translation = t.translation * kf + delta - t.rotation.transpose() * delta;
    RigidTransform::new(t.rotation, translation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::tests::RecordingSink;
    use crate::resample::affine;
    use crate::transform::euler_to_matrix;
    use nalgebra::Vector3;

    /// Optimizer that always reports the identity.
    struct NoOpOptimizer;
    impl IntensityOptimizer for NoOpOptimizer {
        fn optimize(&self, fixed: ArrayView3<f32>, _moving: ArrayView3<f32>) -> anyhow::Result<EulerTransform> {
            Ok(EulerTransform::centered(shape3(fixed)))
        }
    }

    /// Optimizer that returns a preset residual.
    struct ScriptedOptimizer(RigidTransform);
    impl IntensityOptimizer for ScriptedOptimizer {
        fn optimize(&self, fixed: ArrayView3<f32>, _moving: ArrayView3<f32>) -> anyhow::Result<EulerTransform> {
            let shape = shape3(fixed);
            Ok(EulerTransform::centered(shape).with_rigid(&self.0, shape))
        }
    }

    struct Failing;
    impl IntensityOptimizer for Failing {
        fn optimize(&self, _: ArrayView3<f32>, _: ArrayView3<f32>) -> anyhow::Result<EulerTransform> {
            anyhow::bail!("optimizer diverged")
        }
    }

    fn phantom(n: usize) -> Array3<f32> {
        let c = (n / 2) as f64;
        Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            let (x, y, z) = (i as f64 - c, j as f64 - c, k as f64 - c);
            // features sit on the coordinate axes so the principal axes stay
            // axis-aligned while no 180° rotation maps the object onto itself
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
    fn test_shape_mismatch() {
        let a = Array3::<f32>::zeros((8, 8, 8));
        let b = Array3::<f32>::zeros((8, 9, 8));
        let err = register_volumes(a.view(), b.view(), &RegistrationConfig::default()).unwrap_err();
        assert!(matches!(err, AlignError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_optimizer_error_propagates() {
        let v = phantom(32);
        let config = RegistrationConfig {
            subsample: 1,
            ..Default::default()
        };
        let err = register_volumes_with(v.view(), v.view(), &config, &Failing, &NoProgress).unwrap_err();
        assert!(matches!(err, AlignError::External(_)));
        assert_eq!(err.to_string(), "optimizer diverged");
    }

    #[test]
    fn test_flip_and_shift_recovered_by_moments() {
        let fixed = phantom(40);
        let truth = RigidTransform::new(FlipAxis::Axis0.matrix(), Vector3::new(2.0, -3.0, 1.0));
        let moving = affine(fixed.view(), &truth.inverse());
        let config = RegistrationConfig {
            subsample: 1,
            refine: false,
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let result =
            register_volumes_with(fixed.view(), moving.view(), &config, &NoOpOptimizer, &sink).unwrap();
        assert!((result.transform.rotation - truth.rotation).amax() < 5e-3);
        assert!((result.transform.translation - truth.translation).norm() < 0.1);
        assert!(result.rms_moments < result.rms_initial);
        assert!(result.rms_refined.is_none());

        let events = sink.events.lock().unwrap();
        assert_eq!(events.first().map(|e| e.1), Some(0.0));
        assert_eq!(events.last().map(|e| e.1), Some(1.0));
    }

    #[test]
    fn test_identity_refiner_keeps_coarse_estimate() {
        let fixed = phantom(32);
        let truth = RigidTransform::new(
            euler_to_matrix(&Vector3::new(0.0, 0.0, 0.3)),
            Vector3::new(1.0, 0.0, -1.0),
        );
        let moving = affine(fixed.view(), &truth.inverse());
        let config = RegistrationConfig {
            subsample: 1,
            ..Default::default()
        };
        let result =
            register_volumes_with(fixed.view(), moving.view(), &config, &NoOpOptimizer, &NoProgress).unwrap();
        assert!((result.transform.rotation - result.coarse_transform.rotation).amax() < 1e-12);
        assert!((result.transform.translation - result.coarse_transform.translation).norm() < 1e-9);
        assert!(!result.refinement_accepted);
    }

    #[test]
    fn test_worse_refinement_is_rejected() {
        let fixed = phantom(32);
        let truth = RigidTransform::new(FlipAxis::Axis1.matrix(), Vector3::new(1.0, 2.0, 0.0));
        let moving = affine(fixed.view(), &truth.inverse());
        let config = RegistrationConfig {
            subsample: 1,
            ..Default::default()
        };
        let detour = RigidTransform::new(
            euler_to_matrix(&Vector3::new(0.0, 0.0, 0.3)),
            Vector3::new(2.0, 0.0, 0.0),
        );
        let sink = RecordingSink::default();
        let result = register_volumes_with(
            fixed.view(),
            moving.view(),
            &config,
            &ScriptedOptimizer(detour),
            &sink,
        )
        .unwrap();
        assert!(!result.refinement_accepted);
        assert_eq!(result.transform, result.coarse_transform);
        let rms = result.rms_refined.unwrap();
        assert!((rms - result.rms_moments).abs() < 1e-9);

        let events = sink.events.lock().unwrap();
        let metric = |name: &str| events.iter().find(|e| e.0 == name).map(|e| e.1);
        let before = metric("metric:correlation_moments").unwrap();
        let after = metric("metric:correlation_refined").unwrap();
        assert!(after < before, "correlation {before} -> {after}");
    }

    #[test]
    fn test_better_refinement_is_accepted() {
        let fixed = phantom(32);
        let truth = RigidTransform::new(
            euler_to_matrix(&Vector3::new(0.0, 0.0, 0.3)),
            Vector3::new(1.0, 0.0, -1.0),
        );
        // a flat background drags the moving centroid toward the grid center,
        // so the moment estimate is off in translation
        let moving = affine(fixed.view(), &truth.inverse()).mapv(|v| v + 0.05);
        let coarse_only = RegistrationConfig {
            subsample: 1,
            refine: false,
            ..Default::default()
        };
        let coarse = register_volumes(fixed.view(), moving.view(), &coarse_only)
            .unwrap()
            .transform;
        assert!((coarse.translation - truth.translation).norm() > 0.2);

        // a refiner that lands exactly on the truth
        let residual = coarse.inverse().then(&truth);
        let config = RegistrationConfig {
            subsample: 1,
            ..Default::default()
        };
        let result = register_volumes_with(
            fixed.view(),
            moving.view(),
            &config,
            &ScriptedOptimizer(residual),
            &NoProgress,
        )
        .unwrap();
        assert!(result.refinement_accepted);
        assert!((result.transform.rotation - truth.rotation).amax() < 1e-9);
        assert!((result.transform.translation - truth.translation).norm() < 1e-6);
        assert!(result.rms_refined.unwrap() < result.rms_moments);
    }

    #[test]
    fn test_upscale_matches_full_resolution_sampling() {
        let t = RigidTransform::new(
            euler_to_matrix(&Vector3::new(0.1, 0.2, -0.3)),
            Vector3::new(1.5, -2.0, 0.5),
        );
        // odd full extent: k * c_sub differs from c_full
        let full = [50, 51, 49];
        let sub = [25, 26, 25];
        let up = upscale(&t, 2, sub, full);
        let j = Vector3::new(4.0, 7.0, 9.0);
        let via_sub = t.source_point(&j, &geometric_center(sub)) * 2.0;
        let via_full = up.source_point(&(j * 2.0), &geometric_center(full));
        assert!((via_sub - via_full).norm() < 1e-12);
    }
}
