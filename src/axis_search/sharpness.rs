//! Gradient-energy sharpness of a reconstructed volume.

use ndarray::{ArrayView2, ArrayView3, Axis};

/// Negated gradient energy: `-Σ (∂₀v)² + (∂₁v)²` over every slice along
/// axis 0. Sharper volumes score lower.
pub fn gradient_cost(volume: ArrayView3<f32>) -> f64 {
    -volume.axis_iter(Axis(0)).map(slice_gradient_energy).sum::<f64>()
}

/// Sum of squared 2D gradients, central differences inside and one-sided
/// differences on the border.
fn slice_gradient_energy(slice: ArrayView2<f32>) -> f64 {
    let (n0, n1) = slice.dim();
    let diff = |lo: f32, hi: f32, span: usize| (hi as f64 - lo as f64) / span as f64;
    let mut energy = 0.0;
    for i in 0..n0 {
        for j in 0..n1 {
            let g0 = if n0 < 2 {
                0.0
            } else if i == 0 {
                diff(slice[[0, j]], slice[[1, j]], 1)
            } else if i == n0 - 1 {
                diff(slice[[i - 1, j]], slice[[i, j]], 1)
            } else {
                diff(slice[[i - 1, j]], slice[[i + 1, j]], 2)
            };
            let g1 = if n1 < 2 {
                0.0
            } else if j == 0 {
                diff(slice[[i, 0]], slice[[i, 1]], 1)
            } else if j == n1 - 1 {
                diff(slice[[i, j - 1]], slice[[i, j]], 1)
            } else {
                diff(slice[[i, j - 1]], slice[[i, j + 1]], 2)
            };
            energy += g0 * g0 + g1 * g1;
        }
    }
    energy
}
