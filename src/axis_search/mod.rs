//! Rotation-axis calibration for cone-beam scans.
//!
//! A misplaced rotation axis blurs every reconstructed slice, so the axis
//! offset is found by maximising reconstruction sharpness:
//!
//! 1. **Initial guess**: supplied, or the horizontal centre of squared mass
//!    of the projections converted to mm.
//! 2. **Coarse-to-fine search**: at each level five offsets spanning
//!    `±img_pixel · subscale` around the guess are reconstructed at reduced
//!    horizontal resolution and scored by negated gradient energy.
//! 3. **Parabolic refinement**: the vertex through the best sample and its
//!    neighbours becomes the next guess, and the subscale is halved until a
//!    full-resolution level has run.

pub mod geometry;
pub mod parabolic;
pub mod sharpness;

use ndarray::ArrayView3;
use rayon::prelude::*;
use tracing::{debug, info, warn};

pub use geometry::{Geometry, Reconstructor, Subsampling};
pub use parabolic::parabolic_min;
pub use sharpness::gradient_cost;

use crate::error::{AlignError, Result};
use crate::moments::centre_of_squared_mass;

/// Number of trial offsets per level.
const TRIALS: usize = 5;

// ── Configuration ───────────────────────────────────────────────────────────

/// Configuration for [`find_rotation_axis`].
#[derive(Debug, Clone, PartialEq)]
pub struct AxisSearchConfig {
    /// Horizontal subsampling of the first level. Must be 1 or a power of two.
    /// Default: 16.
    pub coarsest_subscale: usize,
    /// Vertical subsampling used at every level.
    /// Default: 20.
    pub vertical_subsample: usize,
    /// Starting offset in mm. When `None` it is derived from the data.
    /// Default: None.
    pub initial_guess: Option<f64>,
    /// Derive the starting offset from the projections' centre of squared
    /// mass; otherwise start from the geometry's current `axs_hrz`.
    /// Default: true.
    pub use_centre_of_mass: bool,
    /// Reconstruct the trials of one level concurrently.
    /// Default: true.
    pub parallel: bool,
}

impl Default for AxisSearchConfig {
    fn default() -> Self {
        Self {
            coarsest_subscale: 16,
            vertical_subsample: 20,
            initial_guess: None,
            use_centre_of_mass: true,
            parallel: true,
        }
    }
}

// ── Result ──────────────────────────────────────────────────────────────────

/// Diagnostics of one search level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelRecord {
    pub subscale: usize,
    /// Offsets tried, in mm.
    pub trial_values: Vec<f64>,
    /// Sharpness cost of each trial (lower is sharper).
    pub costs: Vec<f64>,
    /// Guess after parabolic refinement.
    pub guess: f64,
}

/// Outcome of [`find_rotation_axis`].
#[derive(Debug, Clone, PartialEq)]
pub struct AxisSearchResult {
    /// Rotation-axis offset in mm.
    pub offset: f64,
    /// Offset the search started from.
    pub initial_guess: f64,
    /// One record per level, coarsest first.
    pub levels: Vec<LevelRecord>,
}

// ── Search ──────────────────────────────────────────────────────────────────

/// Find the horizontal rotation-axis offset that gives the sharpest
/// reconstruction.
///
/// `projections` are laid out as (vertical, angle, horizontal). The input
/// geometry is not modified; each trial reconstructs with a copy whose
/// `axs_hrz` is set to the trial value.
///
/// # Errors
///
/// - [`AlignError::InvalidSubscale`] when `coarsest_subscale` is neither 1 nor
///   a power of two.
/// - [`AlignError::InvalidArgument`] when `vertical_subsample` is zero.
/// - [`AlignError::External`] when the reconstructor fails.
pub fn find_rotation_axis(
    projections: ArrayView3<f32>,
    geometry: &Geometry,
    reconstructor: &dyn Reconstructor,
    config: &AxisSearchConfig,
) -> Result<AxisSearchResult> {
    let mut subscale = config.coarsest_subscale;
    if !subscale.is_power_of_two() {
        return Err(AlignError::InvalidSubscale(subscale));
    }
    if config.vertical_subsample == 0 {
        return Err(AlignError::InvalidArgument(
            "vertical subsample must be at least 1".into(),
        ));
    }

    let initial_guess = initial_guess(projections, geometry, config);
    let img_pixel = geometry.img_pixel();
    info!("The initial guess for the rotation axis shift is {:.3} mm", initial_guess);

    let mut guess = initial_guess;
    let mut levels = Vec::new();
    while subscale >= 1 {
        info!("Subscale factor {}", subscale);
        let subsample = Subsampling {
            vertical: config.vertical_subsample,
            horizontal: subscale,
        };
        let half = img_pixel * subscale as f64;
        let trial_values = linspace(guess - half, guess + half, TRIALS);

        let cost = |value: &f64| -> anyhow::Result<f64> {
            let trial = geometry.with_axis_offset(*value);
            let volume = reconstructor.reconstruct(projections, &trial, subsample)?;
            Ok(gradient_cost(volume.view()))
        };
        let costs: Vec<f64> = if config.parallel {
            trial_values.par_iter().map(cost).collect::<anyhow::Result<_>>()?
        } else {
            trial_values.iter().map(cost).collect::<anyhow::Result<_>>()?
        };
        debug!("trials {:?} costs {:?}", trial_values, costs);

        let best = argmin(&costs);
        guess = parabolic_min(&costs, best, &trial_values);
        info!("Current guess is {:.3} mm", guess);

        levels.push(LevelRecord {
            subscale,
            trial_values,
            costs,
            guess,
        });
        subscale /= 2;
    }

    Ok(AxisSearchResult {
        offset: guess,
        initial_guess,
        levels,
    })
}

fn initial_guess(projections: ArrayView3<f32>, geometry: &Geometry, config: &AxisSearchConfig) -> f64 {
    if let Some(guess) = config.initial_guess {
        return guess;
    }
    if config.use_centre_of_mass {
        info!("Computing centre of mass...");
        let guess = geometry.pixel_to_mm(centre_of_squared_mass(projections)[2]);
        if guess.is_finite() {
            return guess;
        }
        warn!("projections carry no mass, starting from the current axis offset");
    }
    geometry.axs_hrz
}

/// Index of the smallest value; NaN never wins and ties go to the first.
fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold(0, |best, (i, &v)| if v < values[best] || values[best].is_nan() { i } else { best })
}

fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    let step = (stop - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}
