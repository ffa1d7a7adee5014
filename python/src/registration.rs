use nalgebra::{Matrix3, Vector3};
use numpy::{PyArray3, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use ctalign::{PowellConfig, RegistrationConfig, RigidTransform, SimilarityMetric};

use crate::helpers::{matrix_to_py, to_py_err, vector_to_py, volume_to_f32};

/// Compute the 3D moment of order (p, q, r) of a volume.
///
/// Args:
///     volume: 3D numpy array.
///     order: Tuple (p, q, r) of per-axis powers.
///     center: Per-axis index offset subtracted before raising. Default (0, 0, 0).
///     subsample: Stride along every axis. Default 1.
///
/// Returns:
///     float moment, scaled by subsample³.
#[pyfunction]
#[pyo3(signature = (volume, order, center = (0.0, 0.0, 0.0), subsample = 1))]
pub(crate) fn moment3(
    volume: &Bound<'_, PyAny>,
    order: (u32, u32, u32),
    center: (f64, f64, f64),
    subsample: usize,
) -> PyResult<f64> {
    let v = volume_to_f32(volume)?;
    ctalign::moment3(
        v.view(),
        [order.0, order.1, order.2],
        [center.0, center.1, center.2],
        subsample,
    )
    .map_err(to_py_err)
}

/// Centroid and principal axes of a volume.
///
/// Args:
///     volume: 3D numpy array.
///     subsample: Stride used for the moments. Default 1.
///     min_eigen_separation: Relative eigenvalue gap required to sort axes. Default 1e-3.
///
/// Returns:
///     dict with keys 'translation' (centroid relative to shape // 2),
///     'rotation' (3x3, eigenvectors as columns), 'eigenvalues', 'sorted'.
#[pyfunction]
#[pyo3(signature = (volume, subsample = 1, min_eigen_separation = 1e-3))]
pub(crate) fn moments_orientation<'py>(
    py: Python<'py>,
    volume: &Bound<'py, PyAny>,
    subsample: usize,
    min_eigen_separation: f64,
) -> PyResult<Bound<'py, PyDict>> {
    let v = volume_to_f32(volume)?;
    let o = ctalign::moments_orientation(v.view(), subsample, min_eigen_separation).map_err(to_py_err)?;

    let dict = PyDict::new(py);
    dict.set_item("translation", vector_to_py(py, &o.translation))?;
    dict.set_item("rotation", matrix_to_py(py, &o.rotation))?;
    dict.set_item("eigenvalues", vector_to_py(py, &o.eigenvalues))?;
    dict.set_item("sorted", o.sorted)?;
    Ok(dict)
}

/// Apply a rigid transform to a volume with cubic B-spline interpolation.
///
/// The output voxel `o` samples the input at `R · (o − c − T) + c`, with
/// `c = shape // 2`. Points outside the volume read as zero.
///
/// Args:
///     volume: 3D numpy array.
///     rotation: 3x3 rotation matrix.
///     translation: Length-3 translation in voxels.
///
/// Returns:
///     float32 numpy array of the same shape.
#[pyfunction]
pub(crate) fn affine<'py>(
    py: Python<'py>,
    volume: &Bound<'py, PyAny>,
    rotation: PyReadonlyArray2<f64>,
    translation: PyReadonlyArray1<f64>,
) -> PyResult<Bound<'py, PyArray3<f32>>> {
    let transform = parse_transform(rotation, translation)?;
    let v = volume_to_f32(volume)?;
    let out = py.detach(|| ctalign::affine(v.view(), &transform));
    Ok(PyArray3::from_owned_array(py, out))
}

/// Rotate a volume about the grid center around one array axis.
///
/// Args:
///     volume: 3D numpy array.
///     angle: Rotation in radians, right-handed about the axis.
///     axis: Array axis (0, 1 or 2).
///
/// Returns:
///     float32 numpy array of the same shape.
#[pyfunction]
pub(crate) fn rotate<'py>(
    py: Python<'py>,
    volume: &Bound<'py, PyAny>,
    angle: f64,
    axis: usize,
) -> PyResult<Bound<'py, PyArray3<f32>>> {
    let v = volume_to_f32(volume)?;
    let out = py.detach(|| ctalign::rotate(v.view(), angle, axis)).map_err(to_py_err)?;
    Ok(PyArray3::from_owned_array(py, out))
}

/// Shift a volume within the plane perpendicular to one array axis.
///
/// Args:
///     volume: 3D numpy array.
///     shift: (a, b) shift in voxels along the two remaining axes.
///     axis: Array axis (0, 1 or 2).
///
/// Returns:
///     float32 numpy array of the same shape.
#[pyfunction]
pub(crate) fn translate<'py>(
    py: Python<'py>,
    volume: &Bound<'py, PyAny>,
    shift: (f64, f64),
    axis: usize,
) -> PyResult<Bound<'py, PyArray3<f32>>> {
    let v = volume_to_f32(volume)?;
    let out = py
        .detach(|| ctalign::translate(v.view(), [shift.0, shift.1], axis))
        .map_err(to_py_err)?;
    Ok(PyArray3::from_owned_array(py, out))
}

/// Zoom a volume by a uniform factor with corner-aligned cubic interpolation.
///
/// Returns:
///     float32 numpy array with each extent scaled by `factor`.
#[pyfunction]
pub(crate) fn scale<'py>(
    py: Python<'py>,
    volume: &Bound<'py, PyAny>,
    factor: f64,
) -> PyResult<Bound<'py, PyArray3<f32>>> {
    let v = volume_to_f32(volume)?;
    let out = py.detach(|| ctalign::scale(v.view(), factor)).map_err(to_py_err)?;
    Ok(PyArray3::from_owned_array(py, out))
}

/// Register `moving` onto `fixed`.
///
/// Args:
///     fixed: 3D numpy array.
///     moving: 3D numpy array of the same shape.
///     subsample: Stride applied to both volumes before estimation. Default 2.
///     refine: Run the intensity-based refinement. Default True.
///     binary: Estimate on thresholded, eroded masks. Default False.
///     flip_half_width: Half-width of the cube used to resolve 180° flips. Default 50.
///     metric: 'mi' (mutual information) or 'ms' (mean squares). Default 'mi'.
///     bins: Histogram bins for mutual information. Default 32.
///     shrink_factors: Refinement pyramid levels, coarsest first. Default [4, 2, 1].
///     max_iterations: Powell sweeps per pyramid level. Default 8.
///
/// Returns:
///     dict with keys 'rotation', 'translation' (full-resolution voxels),
///     'coarse_rotation', 'coarse_translation', 'flip', 'rms_initial',
///     'rms_moments', 'rms_refined', 'refinement_accepted', 'elapsed_ms'.
#[pyfunction]
#[pyo3(signature = (
    fixed,
    moving,
    subsample = 2,
    refine = true,
    binary = false,
    flip_half_width = 50,
    metric = "mi",
    bins = 32,
    shrink_factors = None,
    max_iterations = 8,
))]
#[allow(clippy::too_many_arguments)]
pub(crate) fn register_volumes<'py>(
    py: Python<'py>,
    fixed: &Bound<'py, PyAny>,
    moving: &Bound<'py, PyAny>,
    subsample: usize,
    refine: bool,
    binary: bool,
    flip_half_width: usize,
    metric: &str,
    bins: usize,
    shrink_factors: Option<Vec<usize>>,
    max_iterations: usize,
) -> PyResult<Bound<'py, PyDict>> {
    let metric = match metric {
        "mi" => SimilarityMetric::MutualInformation { bins },
        "ms" => SimilarityMetric::MeanSquares,
        other => {
            return Err(pyo3::exceptions::PyValueError::new_err(format!(
                "unknown metric '{other}', expected 'mi' or 'ms'"
            )))
        }
    };
    let mut refiner = PowellConfig {
        metric,
        max_iterations,
        ..Default::default()
    };
    if let Some(shrink) = shrink_factors {
        // one smoothing sigma per level, halving towards full resolution
        refiner.smoothing_sigmas = shrink.iter().map(|&s| if s > 1 { s as f64 / 2.0 } else { 0.0 }).collect();
        refiner.shrink_factors = shrink;
    }
    let config = RegistrationConfig {
        subsample,
        refine,
        binary,
        flip_half_width,
        refiner,
        ..Default::default()
    };

    let fixed = volume_to_f32(fixed)?;
    let moving = volume_to_f32(moving)?;
    let result = py
        .detach(|| ctalign::register_volumes(fixed.view(), moving.view(), &config))
        .map_err(to_py_err)?;

    let dict = PyDict::new(py);
    dict.set_item("rotation", matrix_to_py(py, &result.transform.rotation))?;
    dict.set_item("translation", vector_to_py(py, &result.transform.translation))?;
    dict.set_item("coarse_rotation", matrix_to_py(py, &result.coarse_transform.rotation))?;
    dict.set_item("coarse_translation", vector_to_py(py, &result.coarse_transform.translation))?;
    dict.set_item("flip", result.flip.to_string())?;
    dict.set_item("rms_initial", result.rms_initial)?;
    dict.set_item("rms_moments", result.rms_moments)?;
    dict.set_item("rms_refined", result.rms_refined)?;
    dict.set_item("refinement_accepted", result.refinement_accepted)?;
    dict.set_item("elapsed_ms", result.elapsed_ms)?;
    Ok(dict)
}

fn parse_transform(
    rotation: PyReadonlyArray2<f64>,
    translation: PyReadonlyArray1<f64>,
) -> PyResult<RigidTransform> {
    let r = rotation.as_array();
    let t = translation.as_array();
    if r.dim() != (3, 3) || t.len() != 3 {
        return Err(pyo3::exceptions::PyValueError::new_err(
            "rotation must be 3x3 and translation must have 3 elements",
        ));
    }
    Ok(RigidTransform::new(
        Matrix3::from_fn(|i, j| r[[i, j]]),
        Vector3::new(t[0], t[1], t[2]),
    ))
}
