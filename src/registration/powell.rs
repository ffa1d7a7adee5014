//! Derivative-free minimisation: Powell's direction-set method with a
//! bounded golden-section line search.

/// Settings for [`powell_minimize`].
#[derive(Debug, Clone, Copy)]
pub struct PowellSettings {
    /// Maximum number of sweeps over the direction set.
    pub max_iterations: usize,
    /// Line searches cover `[-radius, radius]` along each direction.
    pub line_search_radius: f64,
    /// Function evaluations per line search.
    pub line_search_evals: usize,
    /// Relative decrease per sweep below which the search stops.
    pub tolerance: f64,
}

/// Outcome of [`powell_minimize`].
#[derive(Debug, Clone)]
pub struct PowellOutcome {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub evaluations: usize,
}

/// Golden-section search for the minimum of `f` on `[a, b]`.
///
/// Assumes `f` is unimodal on the interval. Returns `(x_min, f(x_min))`.
pub fn golden_section_minimize(
    mut f: impl FnMut(f64) -> f64,
    mut a: f64,
    mut b: f64,
    max_evals: usize,
) -> (f64, f64) {
    const INV_PHI: f64 = 0.618_033_988_749_894_9;

    let mut x1 = b - INV_PHI * (b - a);
    let mut x2 = a + INV_PHI * (b - a);
    let mut f1 = f(x1);
    let mut f2 = f(x2);
    let mut evals = 2;

    while evals < max_evals && (b - a).abs() > 1e-15 {
        if f1 <= f2 {
            b = x2;
            x2 = x1;
            f2 = f1;
            x1 = b - INV_PHI * (b - a);
            f1 = f(x1);
        } else {
            a = x1;
            x1 = x2;
            f1 = f2;
            x2 = a + INV_PHI * (b - a);
            f2 = f(x2);
        }
        evals += 1;
    }

    if f1 <= f2 {
        (x1, f1)
    } else {
        (x2, f2)
    }
}

/// Minimise `f` starting from `x0`.
///
/// Each sweep line-searches along every direction of the set, then replaces
/// the direction of largest decrease with the net displacement of the sweep.
/// A step is only taken when it lowers the function value, so the returned
/// value never exceeds `f(x0)`.
pub fn powell_minimize(
    mut f: impl FnMut(&[f64]) -> f64,
    x0: &[f64],
    settings: &PowellSettings,
) -> PowellOutcome {
    let n = x0.len();
    let mut evaluations = 0usize;
    let mut eval = |x: &[f64]| {
        evaluations += 1;
        f(x)
    };

    let mut directions: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();
    let mut x = x0.to_vec();
    let mut fx = eval(&x);
    let mut iterations = 0;

    for _ in 0..settings.max_iterations {
        iterations += 1;
        let x_start = x.clone();
        let f_start = fx;
        let mut biggest_drop = 0.0;
        let mut biggest_idx = 0;

        for (i, d) in directions.iter().enumerate() {
            let before = fx;
            line_minimize(&mut eval, &mut x, &mut fx, d, settings);
            if before - fx > biggest_drop {
                biggest_drop = before - fx;
                biggest_idx = i;
            }
        }

        if 2.0 * (f_start - fx) <= settings.tolerance * (f_start.abs() + fx.abs()) + 1e-30 {
            break;
        }

        let shift: Vec<f64> = x.iter().zip(&x_start).map(|(a, b)| a - b).collect();
        let norm = shift.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 1e-12 {
            let d: Vec<f64> = shift.iter().map(|v| v / norm).collect();
            line_minimize(&mut eval, &mut x, &mut fx, &d, settings);
            directions.remove(biggest_idx);
            directions.push(d);
        }
    }

    PowellOutcome {
        x,
        value: fx,
        iterations,
        evaluations,
    }
}

fn line_minimize(
    f: &mut impl FnMut(&[f64]) -> f64,
    x: &mut [f64],
    fx: &mut f64,
    direction: &[f64],
    settings: &PowellSettings,
) {
    let origin = x.to_vec();
    let mut trial = origin.clone();
    let r = settings.line_search_radius;
    let (alpha, value) = golden_section_minimize(
        |a| {
            for ((p, o), d) in trial.iter_mut().zip(&origin).zip(direction) {
                *p = o + a * d;
            }
            f(&trial)
        },
        -r,
        r,
        settings.line_search_evals,
    );
    if value < *fx {
        for ((xi, o), d) in x.iter_mut().zip(&origin).zip(direction) {
            *xi = o + alpha * d;
        }
        *fx = value;
    }
}
