//! Sub-sample refinement of a sampled minimum.

/// Abscissa of the minimum of the parabola through the samples around
/// `index`.
///
/// At either end of `space` there is no bracketing triple and the sample
/// itself is returned. The same happens when the parabola is degenerate,
/// opens downwards, or its vertex is not finite.
pub fn parabolic_min(values: &[f64], index: usize, space: &[f64]) -> f64 {
    if index == 0 || index + 1 >= values.len().min(space.len()) {
        return space[index];
    }

    let (x0, x1, x2) = (space[index - 1], space[index], space[index + 1]);
    let (y0, y1, y2) = (values[index - 1], values[index], values[index + 1]);

    let denom = (x0 - x1) * (x0 - x2) * (x1 - x2);
    if denom.abs() < 1e-30 {
        return x1;
    }
    let a = (x2 * (y1 - y0) + x1 * (y0 - y2) + x0 * (y2 - y1)) / denom;
    let b = (x2 * x2 * (y0 - y1) + x1 * x1 * (y2 - y0) + x0 * x0 * (y1 - y2)) / denom;
    if a.is_nan() || a <= 0.0 {
        return x1;
    }

    let vertex = -b / (2.0 * a);
    if vertex.is_finite() {
        vertex
    } else {
        x1
    }
}
