//! Dense volume helpers: strided subsampling, binary masks, residuals and
//! centered crop windows.

use std::ops::Range;

use nalgebra::Vector3;
use ndarray::{s, Array3, ArrayView3, Zip};

/// Shape of a volume as a fixed-size array.
pub fn shape3(volume: ArrayView3<f32>) -> [usize; 3] {
    let (a, b, c) = volume.dim();
    [a, b, c]
}

/// Geometric center `shape / 2` (integer division) used as the rotation
/// center of every [`RigidTransform`](crate::RigidTransform).
pub fn geometric_center(shape: [usize; 3]) -> Vector3<f64> {
    Vector3::new(
        (shape[0] / 2) as f64,
        (shape[1] / 2) as f64,
        (shape[2] / 2) as f64,
    )
}

/// Take every `stride`-th voxel along all three axes.
///
/// `stride == 1` returns an owned copy.
pub fn subsample(volume: ArrayView3<f32>, stride: usize) -> Array3<f32> {
    let k = stride.max(1) as isize;
    volume.slice(s![..;k, ..;k, ..;k]).to_owned()
}

/// Threshold at `> 0` and apply one step of binary erosion with a
/// 6-connected structuring element. Voxels outside the volume count as
/// background, so the outermost layer always erodes.
pub fn binarize_eroded(volume: ArrayView3<f32>) -> Array3<f32> {
    let (n0, n1, n2) = volume.dim();
    let mask = volume.mapv(|v| v > 0.0);
    let inside = |i: usize, j: usize, k: usize| -> bool {
        if i == 0 || j == 0 || k == 0 || i + 1 >= n0 || j + 1 >= n1 || k + 1 >= n2 {
            return false;
        }
        mask[[i, j, k]]
            && mask[[i - 1, j, k]]
            && mask[[i + 1, j, k]]
            && mask[[i, j - 1, k]]
            && mask[[i, j + 1, k]]
            && mask[[i, j, k - 1]]
            && mask[[i, j, k + 1]]
    };
    Array3::from_shape_fn((n0, n1, n2), |(i, j, k)| {
        if inside(i, j, k) {
            1.0
        } else {
            0.0
        }
    })
}

/// Root-mean-square voxel difference between two same-shape volumes.
///
/// Returns 0 for empty volumes.
pub fn rms_difference(a: ArrayView3<f32>, b: ArrayView3<f32>) -> f64 {
    let n = a.len();
    if n == 0 {
        return 0.0;
    }
    let mut sum = 0.0_f64;
    Zip::from(a).and(b).for_each(|&x, &y| {
        let d = (x - y) as f64;
        sum += d * d;
    });
    (sum / n as f64).sqrt()
}

/// Index ranges of an odd cube `[c - h, c + h]` around `center`.
///
/// The center is rounded to the nearest voxel and clamped into the volume.
/// Along each axis the half-width shrinks to the largest value that keeps
/// the window inside the volume while staying centered, so a 180° rotation
/// of the crop is a point reflection through `center`.
pub fn centered_window(shape: [usize; 3], center: [f64; 3], half_width: usize) -> [Range<usize>; 3] {
    let axis = |d: usize| -> Range<usize> {
        let n = shape[d];
        if n == 0 {
            return 0..0;
        }
        let c = if center[d].is_finite() {
            center[d].round().clamp(0.0, (n - 1) as f64) as usize
        } else {
            n / 2
        };
        let h = half_width.min(c).min(n - 1 - c);
        (c - h)..(c + h + 1)
    };
    [axis(0), axis(1), axis(2)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsample_keeps_first_voxel() {
        let v = Array3::from_shape_fn((5, 6, 7), |(i, j, k)| (i * 100 + j * 10 + k) as f32);
        let s = subsample(v.view(), 2);
        assert_eq!(s.dim(), (3, 3, 4));
        assert_eq!(s[[1, 2, 3]], v[[2, 4, 6]]);
    }

    #[test]
    fn test_erosion_removes_shell() {
        let mut v = Array3::<f32>::zeros((7, 7, 7));
        v.slice_mut(s![1..6, 1..6, 1..6]).fill(3.0);
        let eroded = binarize_eroded(v.view());
        assert_eq!(eroded.sum(), 27.0, "5^3 cube should erode to 3^3");
        assert_eq!(eroded[[3, 3, 3]], 1.0);
        assert_eq!(eroded[[1, 3, 3]], 0.0);
    }

    #[test]
    fn test_erosion_at_border() {
        let v = Array3::<f32>::ones((4, 4, 4));
        let eroded = binarize_eroded(v.view());
        assert_eq!(eroded.sum(), 8.0);
        assert_eq!(eroded[[0, 1, 1]], 0.0);
    }

    #[test]
    fn test_window_is_clamped_and_centered() {
        let w = centered_window([100, 40, 100], [50.0, 5.2, 97.0], 50);
        assert_eq!(w[0], 1..100);
        assert_eq!(w[1], 0..11);
        assert_eq!(w[2], 95..100);
    }

    #[test]
    fn test_window_center_outside_volume() {
        let w = centered_window([10, 10, 10], [-4.0, 30.0, 5.0], 3);
        assert_eq!(w[0], 0..1);
        assert_eq!(w[1], 9..10);
        assert_eq!(w[2], 2..9);
    }

    #[test]
    fn test_rms_difference() {
        let a = Array3::<f32>::zeros((2, 2, 2));
        let b = Array3::<f32>::from_elem((2, 2, 2), 2.0);
        assert!((rms_difference(a.view(), b.view()) - 2.0).abs() < 1e-12);
    }
}
