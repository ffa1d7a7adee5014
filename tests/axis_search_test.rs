//! Integration tests: run the rotation-axis search against a reconstructor
//! with a known best offset.


use ctalign::{find_rotation_axis, AlignError, AxisSearchConfig};
use ndarray::Array3;

use synthetic::BlurredDisk;

const TRUE_OFFSET: f64 = 0.123;

fn disk() -> BlurredDisk {
    BlurredDisk {
        true_offset: TRUE_OFFSET,
        blur: 4.0,
        size: 256,
    }
}

#[test]
fn test_offset_recovered_from_explicit_guess() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let geometry = synthetic::scan_geometry();
    let projections = Array3::<f32>::zeros((40, 8, 64));
    let config = AxisSearchConfig {
        initial_guess: Some(0.0),
        ..Default::default()
    };
    let result = find_rotation_axis(projections.view(), &geometry, &disk(), &config).unwrap();

    for level in &result.levels {
        println!(
            "subscale {:2}: guess {:.4} mm, trials {:?}",
            level.subscale, level.guess, level.trial_values
        );
    }
    assert_eq!(result.levels.len(), 5);
    assert!(
        (result.offset - TRUE_OFFSET).abs() < geometry.img_pixel(),
        "offset {} mm",
        result.offset
    );
    // the input geometry is left alone
    assert_eq!(geometry.axs_hrz, 0.0);
}

#[test]
fn test_offset_recovered_from_centre_of_mass() {
    let geometry = synthetic::scan_geometry();
    // a bright column three pixels right of the detector centre
    let mut projections = Array3::<f32>::zeros((40, 8, 64));
    projections.slice_mut(ndarray::s![.., .., 35]).fill(1.0);

    let result =
        find_rotation_axis(projections.view(), &geometry, &disk(), &AxisSearchConfig::default()).unwrap();
    assert!((result.initial_guess - 3.0 * geometry.img_pixel()).abs() < 1e-9);
    assert!(
        (result.offset - TRUE_OFFSET).abs() < geometry.img_pixel(),
        "offset {} mm",
        result.offset
    );
}

#[test]
fn test_finer_levels_narrow_the_trials() {
    let geometry = synthetic::scan_geometry();
    let projections = Array3::<f32>::zeros((40, 8, 64));
    let config = AxisSearchConfig {
        initial_guess: Some(0.05),
        coarsest_subscale: 8,
        ..Default::default()
    };
    let result = find_rotation_axis(projections.view(), &geometry, &disk(), &config).unwrap();
    let spans: Vec<f64> = result
        .levels
        .iter()
        .map(|l| l.trial_values[4] - l.trial_values[0])
        .collect();
    for (level, span) in result.levels.iter().zip(&spans) {
        assert!((span - 2.0 * geometry.img_pixel() * level.subscale as f64).abs() < 1e-12);
    }
    assert!(spans.windows(2).all(|w| w[1] < w[0]));
}

#[test]
fn test_invalid_subscale_rejected() {
    let geometry = synthetic::scan_geometry();
    let projections = Array3::<f32>::zeros((4, 4, 4));
    let config = AxisSearchConfig {
        coarsest_subscale: 6,
        ..Default::default()
    };
    let err = find_rotation_axis(projections.view(), &geometry, &disk(), &config).unwrap_err();
    assert!(matches!(err, AlignError::InvalidSubscale(6)));
}
