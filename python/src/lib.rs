//! Python bindings for ctalign via PyO3.
//!
//! Exposes volume registration, rotation-axis calibration and intensity
//! helpers to Python as the `ctalignrs` module. Volumes are accepted in any
//! common numpy dtype and processed as float32.

mod axis_search;
mod helpers;
mod preprocess;
mod registration;

use pyo3::prelude::*;

// ═══════════════════════════════════════════════════════════════════════════
// Module definition
// ═══════════════════════════════════════════════════════════════════════════

/// ctalignrs: CT volume registration and rotation-axis calibration
///
/// A Rust implementation of moment-based rigid registration with
/// intensity refinement, exposed to Python via PyO3.
#[pymodule]
fn ctalignrs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(registration::moment3, m)?)?;
    m.add_function(wrap_pyfunction!(registration::moments_orientation, m)?)?;
    m.add_function(wrap_pyfunction!(registration::affine, m)?)?;
    m.add_function(wrap_pyfunction!(registration::rotate, m)?)?;
    m.add_function(wrap_pyfunction!(registration::translate, m)?)?;
    m.add_function(wrap_pyfunction!(registration::scale, m)?)?;
    m.add_function(wrap_pyfunction!(registration::register_volumes, m)?)?;
    m.add_function(wrap_pyfunction!(axis_search::optimize_rotation_center, m)?)?;
    m.add_function(wrap_pyfunction!(preprocess::histogram, m)?)?;
    m.add_function(wrap_pyfunction!(preprocess::intensity_range, m)?)?;
    m.add_function(wrap_pyfunction!(preprocess::subtract_air, m)?)?;
    m.add_function(wrap_pyfunction!(preprocess::remove_dark, m)?)?;
    m.add_function(wrap_pyfunction!(preprocess::residual_rings, m)?)?;
    m.add_function(wrap_pyfunction!(preprocess::apply_edge_ramp, m)?)?;
    Ok(())
}
