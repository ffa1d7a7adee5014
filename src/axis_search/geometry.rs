//! Cone-beam scan geometry and the reconstruction seam used by the axis search.

use std::collections::BTreeMap;

use ndarray::{Array3, ArrayView3};

/// Scalar description of a circular cone-beam scan.
///
/// Distances are in mm. `axs_hrz` is the horizontal offset of the rotation
/// axis and is the quantity calibrated by
/// [`find_rotation_axis`](super::find_rotation_axis). Any further named
/// parameters a reconstructor needs travel untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Geometry {
    /// Detector pixel pitch.
    pub det_pixel: f64,
    /// Source to rotation-axis distance.
    pub src2obj: f64,
    /// Rotation-axis to detector distance.
    pub det2obj: f64,
    /// Horizontal detector offset.
    pub det_hrz: f64,
    /// Vertical detector offset.
    pub det_vrt: f64,
    /// Horizontal rotation-axis offset.
    pub axs_hrz: f64,
    pub extra: BTreeMap<String, f64>,
}

impl Geometry {
    /// `(src2obj + det2obj) / src2obj`.
    pub fn magnification(&self) -> f64 {
        (self.src2obj + self.det2obj) / self.src2obj
    }

    /// Reconstruction voxel size: detector pixel scaled back to the object plane.
    pub fn img_pixel(&self) -> f64 {
        self.det_pixel / self.magnification()
    }

    /// Convert a detector-pixel distance to mm in the object plane.
    pub fn pixel_to_mm(&self, pixels: f64) -> f64 {
        pixels * self.img_pixel()
    }

    /// Copy of the geometry with the rotation axis moved to `axs_hrz`.
    pub fn with_axis_offset(&self, axs_hrz: f64) -> Self {
        Self {
            axs_hrz,
            ..self.clone()
        }
    }
}

/// Detector subsampling applied by a reconstructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subsampling {
    pub vertical: usize,
    pub horizontal: usize,
}

/// A reconstruction algorithm (FDK or similar).
///
/// Implementations must be deterministic for a given input, since the axis
/// search compares volumes reconstructed with different geometries.
pub trait Reconstructor: Sync {
    /// Reconstruct `projections` (vertical, angle, horizontal) into a volume
    /// whose first axis is vertical.
    fn reconstruct(
        &self,
        projections: ArrayView3<f32>,
        geometry: &Geometry,
        subsample: Subsampling,
    ) -> anyhow::Result<Array3<f32>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan() -> Geometry {
        Geometry {
            det_pixel: 0.1,
            src2obj: 100.0,
            det2obj: 300.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_magnification_and_pixel() {
        let g = scan();
        assert!((g.magnification() - 4.0).abs() < 1e-12);
        assert!((g.img_pixel() - 0.025).abs() < 1e-12);
        assert!((g.pixel_to_mm(8.0) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_axis_offset_copy_keeps_extra() {
        let mut g = scan();
        g.extra.insert("theta_range".into(), 360.0);
        let moved = g.with_axis_offset(0.3);
        assert_eq!(moved.axs_hrz, 0.3);
        assert_eq!(g.axs_hrz, 0.0);
        assert_eq!(moved.extra.get("theta_range"), Some(&360.0));
    }
}
