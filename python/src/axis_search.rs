use numpy::ndarray::{Array3, ArrayView3};
use numpy::PyReadonlyArray3;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

use ctalign::{AxisSearchConfig, Geometry, Reconstructor, Subsampling};

use crate::helpers::{geometry_from_dict, to_py_err, volume_to_f32};

/// Reconstruction operator backed by a Python callable.
///
/// The callable is invoked as `f(projections, geometry, (vertical, horizontal))`
/// and must return a 3D array. It receives the caller's original projection
/// array and a copy of the caller's geometry dictionary with `axs_hrz`
/// replaced by the trial value.
struct PyReconstructor {
    callable: Py<PyAny>,
    projections: Py<PyAny>,
    geometry: Py<PyDict>,
}

impl Reconstructor for PyReconstructor {
    fn reconstruct(
        &self,
        _projections: ArrayView3<f32>,
        geometry: &Geometry,
        subsample: Subsampling,
    ) -> anyhow::Result<Array3<f32>> {
        Python::attach(|py| -> anyhow::Result<Array3<f32>> {
            let trial = self.geometry.bind(py).copy()?;
            trial.set_item("axs_hrz", geometry.axs_hrz)?;
            let volume = self.callable.bind(py).call1((
                self.projections.bind(py),
                trial,
                (subsample.vertical, subsample.horizontal),
            ))?;
            if let Ok(arr) = volume.extract::<PyReadonlyArray3<f32>>() {
                return Ok(arr.as_array().to_owned());
            }
            Ok(volume_to_f32(&volume)?)
        })
    }
}

/// Find the horizontal rotation-axis offset that gives the sharpest reconstruction.
///
/// Args:
///     projections: 3D numpy array (vertical, angle, horizontal).
///     geometry: dict with at least 'det_pixel', 'src2obj', 'det2obj'.
///     reconstruct: Callable f(projections, geometry, (vertical, horizontal)) -> ndarray.
///     guess: Initial offset in mm. None = derive from the data.
///     subscale: Horizontal subsampling of the coarsest level (1 or a power of two). Default 16.
///     centre_of_mass: Derive the initial guess from the projections' centre of mass. Default True.
///     vertical_subsample: Vertical subsampling at every level. Default 20.
///
/// Returns:
///     dict with keys 'offset' (mm), 'initial_guess' (mm) and 'levels', a list
///     of dicts with 'subscale', 'trial_values', 'costs', 'guess'.
#[pyfunction]
#[pyo3(signature = (
    projections,
    geometry,
    reconstruct,
    guess = None,
    subscale = 16,
    centre_of_mass = true,
    vertical_subsample = 20,
))]
#[allow(clippy::too_many_arguments)]
pub(crate) fn optimize_rotation_center<'py>(
    py: Python<'py>,
    projections: &Bound<'py, PyAny>,
    geometry: &Bound<'py, PyDict>,
    reconstruct: &Bound<'py, PyAny>,
    guess: Option<f64>,
    subscale: usize,
    centre_of_mass: bool,
    vertical_subsample: usize,
) -> PyResult<Bound<'py, PyDict>> {
    if !reconstruct.is_callable() {
        return Err(pyo3::exceptions::PyTypeError::new_err("reconstruct must be callable"));
    }
    let parsed = geometry_from_dict(geometry)?;
    let data = volume_to_f32(projections)?;
    let reconstructor = PyReconstructor {
        callable: reconstruct.clone().unbind(),
        projections: projections.clone().unbind(),
        geometry: geometry.clone().unbind(),
    };
    // trials call back into Python one at a time
    let config = AxisSearchConfig {
        coarsest_subscale: subscale,
        vertical_subsample,
        initial_guess: guess,
        use_centre_of_mass: centre_of_mass,
        parallel: false,
    };

    let result = py
        .detach(|| ctalign::find_rotation_axis(data.view(), &parsed, &reconstructor, &config))
        .map_err(to_py_err)?;

    let levels = PyList::empty(py);
    for level in &result.levels {
        let d = PyDict::new(py);
        d.set_item("subscale", level.subscale)?;
        d.set_item("trial_values", level.trial_values.clone())?;
        d.set_item("costs", level.costs.clone())?;
        d.set_item("guess", level.guess)?;
        levels.append(d)?;
    }
    let dict = PyDict::new(py);
    dict.set_item("offset", result.offset)?;
    dict.set_item("initial_guess", result.initial_guess)?;
    dict.set_item("levels", levels)?;
    Ok(dict)
}
