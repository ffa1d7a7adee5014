use numpy::ndarray::{Array1, Array2, Array3};
use numpy::{PyArray1, PyArray2, PyReadonlyArray3};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use ctalign::{AlignError, Geometry};

/// Geometry keys with a dedicated field; everything else goes to `extra`.
const GEOMETRY_KEYS: [&str; 6] = ["det_pixel", "src2obj", "det2obj", "det_hrz", "det_vrt", "axs_hrz"];

/// Map a library error onto the closest Python exception.
pub(crate) fn to_py_err(err: AlignError) -> PyErr {
    match err {
        AlignError::External(_) => pyo3::exceptions::PyRuntimeError::new_err(err.to_string()),
        _ => pyo3::exceptions::PyValueError::new_err(err.to_string()),
    }
}

/// Convert a 3D numpy array of any supported dtype to an owned f32 volume.
///
/// Supported dtypes: float32, float64, uint8, uint16, int16.
pub(crate) fn volume_to_f32(volume: &Bound<'_, PyAny>) -> PyResult<Array3<f32>> {
    let dtype = volume.getattr("dtype")?;
    let kind: String = dtype.getattr("kind")?.extract()?;
    let itemsize: usize = dtype.getattr("itemsize")?.extract()?;

    match (kind.as_str(), itemsize) {
        ("f", 4) => {
            let arr: PyReadonlyArray3<f32> = volume.extract()?;
            Ok(arr.as_array().to_owned())
        }
        ("f", 8) => {
            let arr: PyReadonlyArray3<f64> = volume.extract()?;
            Ok(arr.as_array().mapv(|v| v as f32))
        }
        ("u", 1) => {
            let arr: PyReadonlyArray3<u8> = volume.extract()?;
            Ok(arr.as_array().mapv(|v| v as f32))
        }
        ("u", 2) => {
            let arr: PyReadonlyArray3<u16> = volume.extract()?;
            Ok(arr.as_array().mapv(|v| v as f32))
        }
        ("i", 2) => {
            let arr: PyReadonlyArray3<i16> = volume.extract()?;
            Ok(arr.as_array().mapv(|v| v as f32))
        }
        _ => {
            let dtype_str: String = dtype.str()?.extract()?;
            Err(pyo3::exceptions::PyTypeError::new_err(format!(
                "Unsupported volume dtype '{}'. Expected float32, float64, uint16, int16, or uint8.",
                dtype_str,
            )))
        }
    }
}

/// Parse a geometry dictionary.
///
/// `det_pixel`, `src2obj` and `det2obj` are required; the offsets default
/// to zero. Remaining numeric entries are kept in `extra`.
pub(crate) fn geometry_from_dict(dict: &Bound<'_, PyDict>) -> PyResult<Geometry> {
    let required = |key: &str| -> PyResult<f64> {
        dict.get_item(key)?
            .ok_or_else(|| pyo3::exceptions::PyKeyError::new_err(format!("geometry is missing '{key}'")))?
            .extract()
    };
    let optional = |key: &str| -> PyResult<f64> {
        match dict.get_item(key)? {
            Some(v) => v.extract(),
            None => Ok(0.0),
        }
    };

    let mut geometry = Geometry {
        det_pixel: required("det_pixel")?,
        src2obj: required("src2obj")?,
        det2obj: required("det2obj")?,
        det_hrz: optional("det_hrz")?,
        det_vrt: optional("det_vrt")?,
        axs_hrz: optional("axs_hrz")?,
        ..Default::default()
    };
    if geometry.src2obj == 0.0 {
        return Err(pyo3::exceptions::PyValueError::new_err("src2obj must be non-zero"));
    }
    for (key, value) in dict.iter() {
        let Ok(key) = key.extract::<String>() else {
            continue;
        };
        if GEOMETRY_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Ok(v) = value.extract::<f64>() {
            geometry.extra.insert(key, v);
        }
    }
    Ok(geometry)
}

pub(crate) fn matrix_to_py<'py>(py: Python<'py>, m: &nalgebra::Matrix3<f64>) -> Bound<'py, PyArray2<f64>> {
    PyArray2::from_owned_array(py, Array2::from_shape_fn((3, 3), |(i, j)| m[(i, j)]))
}

pub(crate) fn vector_to_py<'py>(py: Python<'py>, v: &nalgebra::Vector3<f64>) -> Bound<'py, PyArray1<f64>> {
    PyArray1::from_owned_array(py, Array1::from_vec(vec![v.x, v.y, v.z]))
}
