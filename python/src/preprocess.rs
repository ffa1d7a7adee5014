use numpy::{PyArray1, PyArray3, PyReadwriteArray3};
use pyo3::prelude::*;

use ctalign::AirConfig;

use crate::helpers::{to_py_err, volume_to_f32};

/// Equal-width histogram of a volume.
///
/// Args:
///     data: 3D numpy array.
///     bins: Number of bins. Default 256.
///     range: (low, high) tuple. None = (min(data.min(), 0), data.max()).
///
/// Returns:
///     (centers, counts) tuple of numpy arrays.
#[pyfunction]
#[pyo3(signature = (data, bins = 256, range = None))]
pub(crate) fn histogram<'py>(
    py: Python<'py>,
    data: &Bound<'py, PyAny>,
    bins: usize,
    range: Option<(f64, f64)>,
) -> PyResult<(Bound<'py, PyArray1<f64>>, Bound<'py, PyArray1<u64>>)> {
    let v = volume_to_f32(data)?;
    let h = ctalign::histogram(v.view(), bins, range).map_err(to_py_err)?;
    Ok((PyArray1::from_vec(py, h.centers), PyArray1::from_vec(py, h.counts)))
}

/// Air level, 99.99th percentile and material centre of a volume.
///
/// Returns:
///     (air, high, centre) tuple of floats.
#[pyfunction]
pub(crate) fn intensity_range(data: &Bound<'_, PyAny>) -> PyResult<(f64, f64, f64)> {
    let v = volume_to_f32(data)?;
    let r = ctalign::intensity_range(v.view()).map_err(to_py_err)?;
    Ok((r.air, r.high, r.centre))
}

/// Subtract the air level from a float32 projection stack in place and clamp at zero.
///
/// Args:
///     projections: Writable float32 array (vertical, angle, horizontal).
///     air: Air level to subtract. None = estimate from the detector border.
///     border_width: Border width in pixels used for the estimate. Default 10.
///
/// Returns:
///     float air level that was subtracted.
#[pyfunction]
#[pyo3(signature = (projections, air = None, border_width = 10))]
pub(crate) fn subtract_air(
    py: Python<'_>,
    mut projections: PyReadwriteArray3<f32>,
    air: Option<f32>,
    border_width: usize,
) -> PyResult<f32> {
    let config = AirConfig {
        border_width,
        ..Default::default()
    };
    let view = projections.as_array_mut();
    py.detach(|| ctalign::subtract_air(view, air, &config))
        .map_err(to_py_err)
}

/// Zero every voxel below the first histogram minimum after the air peak, in place.
///
/// Args:
///     volume: Writable float32 3D array.
///
/// Returns:
///     float threshold below which voxels were zeroed.
#[pyfunction]
pub(crate) fn remove_dark(py: Python<'_>, mut volume: PyReadwriteArray3<f32>) -> PyResult<f32> {
    let view = volume.as_array_mut();
    py.detach(|| ctalign::remove_dark(view)).map_err(to_py_err)
}

/// Remove detector-fixed ring artefacts from a float32 projection stack in place.
///
/// Args:
///     projections: Writable float32 array (vertical, angle, horizontal).
///     kernel: (vertical, horizontal) median window. Default (3, 3).
#[pyfunction]
#[pyo3(signature = (projections, kernel = (3, 3)))]
pub(crate) fn residual_rings(
    py: Python<'_>,
    mut projections: PyReadwriteArray3<f32>,
    kernel: (usize, usize),
) -> PyResult<()> {
    let view = projections.as_array_mut();
    py.detach(|| ctalign::residual_rings(view, [kernel.0, kernel.1]))
        .map_err(to_py_err)
}

/// Pad axes 0 and 2 of a projection tile with linear ramps down to zero.
///
/// Args:
///     data: 3D numpy array.
///     width: (axis 0, axis 2) ramp widths in pixels.
///
/// Returns:
///     float32 numpy array, larger by twice the widths.
#[pyfunction]
pub(crate) fn apply_edge_ramp<'py>(
    py: Python<'py>,
    data: &Bound<'py, PyAny>,
    width: (usize, usize),
) -> PyResult<Bound<'py, PyArray3<f32>>> {
    let v = volume_to_f32(data)?;
    let out = py.detach(|| ctalign::apply_edge_ramp(v.view(), [width.0, width.1]));
    Ok(PyArray3::from_owned_array(py, out))
}
