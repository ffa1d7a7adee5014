//! Intensity helpers used before registration or reconstruction: histograms,
//! robust intensity ranges, dark-voxel removal, and the projection-stack
//! corrections (air subtraction, ring removal, edge ramps).

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, ArrayViewMut3, Axis, Zip};
use rayon::prelude::*;

use crate::error::{AlignError, Result};

/// Equal-width histogram with bin centers.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub centers: Vec<f64>,
    pub counts: Vec<u64>,
}

/// Histogram `data` into `bins` equal-width bins over `range`.
///
/// The default range is `[min(data.min, 0), data.max]`. Values outside the
/// range are ignored; the upper edge belongs to the last bin. A degenerate
/// range is widened by ±0.5.
pub fn histogram(data: ArrayView3<f32>, bins: usize, range: Option<(f64, f64)>) -> Result<Histogram> {
    histogram_of(data.iter().copied(), bins, range)
}

fn histogram_of<I>(values: I, bins: usize, range: Option<(f64, f64)>) -> Result<Histogram>
where
    I: Iterator<Item = f32> + Clone,
{
    if bins == 0 {
        return Err(AlignError::InvalidArgument("histogram needs at least one bin".into()));
    }
    let (mut lo, mut hi) = match range {
        Some(r) => r,
        None => {
            let (mn, mx) = values
                .clone()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), v| (a.min(v as f64), b.max(v as f64)));
            if mn > mx {
                (0.0, 1.0)
            } else {
                (mn.min(0.0), mx)
            }
        }
    };
    if hi <= lo {
        lo -= 0.5;
        hi += 0.5;
    }

    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0u64; bins];
    for v in values {
        let v = v as f64;
        if !(v >= lo && v <= hi) {
            continue;
        }
        let b = (((v - lo) / width) as usize).min(bins - 1);
        counts[b] += 1;
    }
    let centers = (0..bins).map(|b| lo + (b as f64 + 0.5) * width).collect();
    Ok(Histogram { centers, counts })
}

/// Robust intensity landmarks of a volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityRange {
    /// Position of the dominant histogram peak (usually air).
    pub air: f64,
    /// 99.99th percentile.
    pub high: f64,
    /// Count-weighted mean of the bins between air (plus a tenth of the range)
    /// and `high`.
    pub centre: f64,
}

/// Estimate air level, upper percentile and material centre from a 256-bin
/// histogram whose log-counts are smoothed with a σ = 1 Gaussian.
///
/// The smoothed log-counts only locate the air peak. The centre weights each
/// bin by its raw count, not by its smoothed log-count: log weights of
/// sparse bins are near zero or negative, which drags the centre away from
/// the bulk of the material.
pub fn intensity_range(data: ArrayView3<f32>) -> Result<IntensityRange> {
    if data.is_empty() {
        return Err(AlignError::InvalidArgument("intensity range of an empty volume".into()));
    }
    let hist = histogram(data, 256, None)?;
    let log_counts: Vec<f64> = hist.counts.iter().map(|&c| (c as f64 + 0.1).ln()).collect();
    let smooth = gaussian_1d(&log_counts, 1.0);

    let peak = smooth
        .iter()
        .enumerate()
        .fold(0, |best, (i, &v)| if v > smooth[best] { i } else { best });
    let air = hist.centers[peak];
    let high = percentile(data, 99.99);

    let floor = air + (high - air) / 10.0;
    let (mut num, mut den) = (0.0, 0.0);
    for (&x, &count) in hist.centers.iter().zip(&hist.counts) {
        if x > floor && x < high {
            num += x * count as f64;
            den += count as f64;
        }
    }
    let centre = if den != 0.0 { num / den } else { (air + high) / 2.0 };

    Ok(IntensityRange { air, high, centre })
}

/// Configuration for [`subtract_air`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirConfig {
    /// Width in pixels of the detector border sampled for air.
    /// Default: 10.
    pub border_width: usize,
    /// Histogram bins over `range` used to locate the air peak.
    /// Default: 1024.
    pub bins: usize,
    /// Intensity range searched for the air peak.
    /// Default: (-0.1, 0.1).
    pub range: (f64, f64),
}

impl Default for AirConfig {
    fn default() -> Self {
        Self {
            border_width: 10,
            bins: 1024,
            range: (-0.1, 0.1),
        }
    }
}

/// Air intensity of a projection stack laid out as (vertical, angle,
/// horizontal): the most populated border bin of each projection, maximised
/// over all angles.
pub fn estimate_air(projections: ArrayView3<f32>, config: &AirConfig) -> Result<f32> {
    let (nv, _, nh) = projections.dim();
    let w = config.border_width.min(nv).min(nh);
    if w == 0 {
        return Err(AlignError::InvalidArgument(
            "air border must cover at least one pixel".into(),
        ));
    }
    let mut air = f64::NEG_INFINITY;
    for block in projections.axis_iter(Axis(1)) {
        let border = block
            .slice(s![..w, ..])
            .into_iter()
            .chain(block.slice(s![nv - w.., ..]))
            .chain(block.slice(s![.., nh - w..]))
            .chain(block.slice(s![.., ..w]))
            .copied();
        let hist = histogram_of(border, config.bins, Some(config.range))?;
        let peak = hist
            .counts
            .iter()
            .enumerate()
            .fold(0, |best, (i, &c)| if c > hist.counts[best] { i } else { best });
        air = air.max(hist.centers[peak]);
    }
    Ok(air as f32)
}

/// Subtract the air level from every projection and clamp at zero.
///
/// When `air` is `None` it is estimated with [`estimate_air`]. Returns the
/// value that was subtracted.
pub fn subtract_air(mut projections: ArrayViewMut3<f32>, air: Option<f32>, config: &AirConfig) -> Result<f32> {
    let air = match air {
        Some(a) => a,
        None => estimate_air(projections.view(), config)?,
    };
    tracing::info!("subtracting air intensity {:.6}", air);
    projections.mapv_inplace(|v| (v - air).max(0.0));
    Ok(air)
}

/// Zero every voxel below the first histogram minimum after the air peak.
///
/// The histogram (256 bins over every second voxel along each axis) is
/// log-scaled and smoothed with a σ = 1 Gaussian. Past the air peak, the
/// first local minimum of the slope magnitude ends the air shoulder. If the
/// histogram itself has a local minimum within one bin of it, that bin is
/// the threshold. Otherwise the shoulder is a saddle in front of some other
/// material and the threshold moves a quarter of the way back to the air
/// peak. Returns the threshold.
///
/// # Errors
///
/// [`AlignError::InvalidArgument`] for an empty volume or a histogram that
/// never turns after the air peak.
pub fn remove_dark(mut volume: ArrayViewMut3<f32>) -> Result<f32> {
    if volume.is_empty() {
        return Err(AlignError::InvalidArgument("dark removal on an empty volume".into()));
    }
    let hist = histogram_of(volume.slice(s![..;2, ..;2, ..;2]).iter().copied(), 256, None)?;
    let log_counts: Vec<f64> = hist.counts.iter().map(|&c| (c as f64 + 1.0).ln()).collect();
    let smooth = gaussian_1d(&log_counts, 1.0);

    let air = smooth
        .iter()
        .enumerate()
        .fold(0, |best, (i, &v)| if v > smooth[best] { i } else { best });
    tracing::debug!("air peak at {:.4}", hist.centers[air]);

    let x = &hist.centers[air..];
    let y = &smooth[air..];
    let slope: Vec<f64> = y.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let (Some(shoulder), Some(minimum)) = (first_local_minimum(&slope), first_local_minimum(y)) else {
        return Err(AlignError::InvalidArgument(
            "histogram has no minimum after the air peak".into(),
        ));
    };

    let threshold = if shoulder.abs_diff(minimum) < 2 {
        x[shoulder]
    } else {
        x[shoulder] - (x[shoulder] - x[0]).abs() / 4.0
    };
    tracing::info!("discarding intensities below {:.4}", threshold);
    volume.mapv_inplace(|v| if (v as f64) < threshold { 0.0 } else { v });
    Ok(threshold as f32)
}

/// Index of the first sample strictly below both neighbours.
fn first_local_minimum(y: &[f64]) -> Option<usize> {
    (1..y.len().saturating_sub(1)).find(|&i| y[i] < y[i - 1] && y[i] < y[i + 1])
}

/// Subtract detector-fixed structure from a projection stack laid out as
/// (vertical, angle, horizontal).
///
/// The fine detail of each projection (its difference to a `kernel`-sized
/// median, given as (vertical, horizontal) extents) is averaged over all
/// angles. The object moves between angles and averages out; what stays is
/// tied to detector pixels and shows up as rings after reconstruction. That
/// average is subtracted from every projection.
pub fn residual_rings(mut projections: ArrayViewMut3<f32>, kernel: [usize; 2]) -> Result<()> {
    if kernel.contains(&0) {
        return Err(AlignError::InvalidArgument("median kernel must be at least 1x1".into()));
    }
    let (nv, na, nh) = projections.dim();
    if na == 0 {
        return Ok(());
    }
    let view = projections.view();
    let sum = (0..na)
        .into_par_iter()
        .map(|a| {
            let proj = view.index_axis(Axis(1), a);
            let median = median_filter(proj, kernel);
            Zip::from(&median).and(proj).map_collect(|&m, &p| p as f64 - m)
        })
        .reduce(|| Array2::zeros((nv, nh)), |acc, r| acc + r);
    let residual = sum.mapv(|v| (v / na as f64) as f32);
    tracing::debug!(
        "ring residual spans [{:.4e}, {:.4e}]",
        residual.iter().copied().fold(f32::INFINITY, f32::min),
        residual.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    );

    for mut proj in projections.axis_iter_mut(Axis(1)) {
        proj -= &residual;
    }
    Ok(())
}

/// Median over a `size[0] × size[1]` window with reflecting boundaries.
/// Even extents take the upper median.
fn median_filter(image: ArrayView2<f32>, size: [usize; 2]) -> Array2<f64> {
    let (n0, n1) = image.dim();
    let lo = [(size[0] / 2) as isize, (size[1] / 2) as isize];
    let mut window = Vec::with_capacity(size[0] * size[1]);
    Array2::from_shape_fn((n0, n1), |(i, j)| {
        window.clear();
        for di in 0..size[0] as isize {
            let r = reflect_index(i as isize + di - lo[0], n0);
            for dj in 0..size[1] as isize {
                window.push(image[[r, reflect_index(j as isize + dj - lo[1], n1)]]);
            }
        }
        let mid = window.len() / 2;
        let (_, m, _) = window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        *m as f64
    })
}

/// Reflect an index into `[0, n)`, repeating the edge sample.
fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m >= n as isize {
        (period - 1 - m) as usize
    } else {
        m as usize
    }
}

/// Pad axes 0 and 2 of a projection tile with linear ramps down to zero.
///
/// `width` gives the ramp length for axis 0 and axis 2. Each ramp starts at
/// zero on the outside and rises toward the edge sample it continues,
/// stopping one step short of it. Axis 0 is padded first, so the corners
/// ramp the already padded rows.
pub fn apply_edge_ramp(tile: ArrayView3<f32>, width: [usize; 2]) -> Array3<f32> {
    let padded = ramp_pad(tile, Axis(0), width[0]);
    ramp_pad(padded.view(), Axis(2), width[1])
}

fn ramp_pad(volume: ArrayView3<f32>, axis: Axis, w: usize) -> Array3<f32> {
    let n = volume.len_of(axis);
    let mut dim = volume.raw_dim();
    dim[axis.index()] += 2 * w;
    let mut out = Array3::<f32>::zeros(dim);
    if n == 0 {
        return out;
    }
    Zip::from(out.lanes_mut(axis))
        .and(volume.lanes(axis))
        .for_each(|mut dst, src| {
            let (first, last) = (src[0], src[n - 1]);
            for i in 0..w {
                dst[i] = first * i as f32 / w as f32;
                dst[w + n + i] = last * (w - 1 - i) as f32 / w as f32;
            }
            dst.slice_mut(s![w..w + n]).assign(&src);
        });
    out
}

/// Linear-interpolated percentile `q` in `[0, 100]`.
fn percentile(data: ArrayView3<f32>, q: f64) -> f64 {
    let mut values: Vec<f32> = data.iter().copied().collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let pos = (q / 100.0).clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(values.len() - 1);
    let t = pos - lo as f64;
    values[lo] as f64 * (1.0 - t) + values[hi] as f64 * t
}

/// 1D Gaussian smoothing truncated at 4σ with reflecting boundaries.
fn gaussian_1d(data: &[f64], sigma: f64) -> Vec<f64> {
    let n = data.len() as isize;
    let radius = (4.0 * sigma).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(m, w)| {
                    let mut j = i + m as isize - radius;
                    while j < 0 || j >= n {
                        j = if j < 0 { -j - 1 } else { 2 * n - j - 1 };
                    }
                    w * data[j as usize]
                })
                .sum::<f64>()
                / norm
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn test_histogram_default_range_includes_zero() {
        let v = Array3::from_shape_vec((1, 1, 4), vec![0.5_f32, 1.5, 2.5, 4.0]).unwrap();
        let h = histogram(v.view(), 4, None).unwrap();
        assert_eq!(h.counts, vec![1, 1, 1, 1]);
        assert!((h.centers[0] - 0.5).abs() < 1e-12);
        assert!((h.centers[3] - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_histogram_ignores_out_of_range() {
        let v = Array3::from_shape_vec((1, 2, 2), vec![-5.0_f32, 0.5, 0.7, 9.0]).unwrap();
        let h = histogram(v.view(), 2, Some((0.0, 1.0))).unwrap();
        assert_eq!(h.counts, vec![0, 2]);
        assert!(histogram(v.view(), 0, None).is_err());
    }

    #[test]
    fn test_intensity_range_on_air_and_material() {
        let mut rng = StdRng::seed_from_u64(7);
        let air = Normal::new(0.0, 0.01).unwrap();
        let material = Normal::new(1.0, 0.05).unwrap();
        let v = Array3::from_shape_fn((20, 20, 20), |(i, _, _)| {
            if i < 14 {
                air.sample(&mut rng) as f32
            } else {
                material.sample(&mut rng) as f32
            }
        });
        let r = intensity_range(v.view()).unwrap();
        assert!(r.air.abs() < 0.05, "air {}", r.air);
        assert!(r.high > 1.0 && r.high < 1.4, "high {}", r.high);
        assert!((r.centre - 1.0).abs() < 0.1, "centre {}", r.centre);
    }

    #[test]
    fn test_centre_follows_counts_of_two_materials() {
        let mut rng = StdRng::seed_from_u64(11);
        let air = Normal::new(0.0, 0.01).unwrap();
        let light = Normal::new(0.6, 0.02).unwrap();
        let dense = Normal::new(1.0, 0.02).unwrap();
        // material voxels: 90% light, 10% dense
        let v = Array3::from_shape_fn((20, 20, 20), |(i, _, _)| match i {
            0..=9 => air.sample(&mut rng) as f32,
            10..=18 => light.sample(&mut rng) as f32,
            _ => dense.sample(&mut rng) as f32,
        });
        let r = intensity_range(v.view()).unwrap();
        assert!((r.centre - 0.64).abs() < 0.02, "centre {}", r.centre);
    }

    /// Volume of shape `(2n, 2, 2)` whose every-second-voxel histogram has
    /// `counts[b]` entries at the center of bin `b` (bin width 0.01).
    fn volume_with_histogram(counts: &[usize]) -> Array3<f32> {
        let mut values = vec![0.0_f32, 2.56];
        for (b, &c) in counts.iter().enumerate() {
            values.extend(std::iter::repeat_n((b as f32 + 0.5) * 0.01, c));
        }
        Array3::from_shape_fn((2 * values.len(), 2, 2), |(i, _, _)| values[i / 2])
    }

    fn peak(b: usize, at: f64, sigma: f64, height: f64) -> f64 {
        height * (-0.5 * ((b as f64 - at) / sigma).powi(2)).exp()
    }

    #[test]
    fn test_remove_dark_at_histogram_minimum() {
        let counts: Vec<usize> = (0..256)
            .map(|b| (peak(b, 20.0, 6.0, 3000.0) + peak(b, 50.0, 6.0, 800.0)).round() as usize + 1)
            .collect();
        let mut v = volume_with_histogram(&counts);
        let before = v.clone();
        let threshold = remove_dark(v.view_mut()).unwrap();
        assert!((threshold - 0.365).abs() < 1e-4, "threshold {threshold}");
        Zip::from(&v).and(&before).for_each(|&after, &orig| {
            if orig < 0.36 {
                assert_eq!(after, 0.0);
            } else if orig > 0.37 {
                assert_eq!(after, orig);
            }
        });
    }

    #[test]
    fn test_remove_dark_backs_off_from_saddle() {
        // no valley between air and the material: the slope flattens on a
        // rising floor long before the histogram turns
        let counts: Vec<usize> = (0..256)
            .map(|b| {
                let floor = 20.0 + 0.002 * (b as f64 - 70.0).powi(2);
                (peak(b, 10.0, 4.0, 2000.0) + peak(b, 150.0, 12.0, 300.0) + floor).round() as usize
            })
            .collect();
        let mut v = volume_with_histogram(&counts);
        let threshold = remove_dark(v.view_mut()).unwrap();
        // shoulder at 0.315, a quarter of the way back toward the air at 0.105
        assert!((threshold - 0.2625).abs() < 1e-4, "threshold {threshold}");
    }

    #[test]
    fn test_remove_dark_rejects_flat_histogram() {
        let mut v = Array3::<f32>::ones((4, 4, 4));
        assert!(remove_dark(v.view_mut()).is_err());
    }

    #[test]
    fn test_residual_rings_removes_detector_pattern() {
        let (nv, na, nh) = (12, 16, 14);
        // a smooth object that drifts with the angle, plus a fixed stripe
        let clean = Array3::from_shape_fn((nv, na, nh), |(i, a, j)| {
            let x = j as f32 - 7.0 - 0.2 * a as f32;
            let y = i as f32 - 6.0;
            (-(x * x + y * y) / 200.0).exp()
        });
        let mut proj = clean.clone();
        proj.slice_mut(s![.., .., 5]).mapv_inplace(|v| v + 0.3);

        residual_rings(proj.view_mut(), [3, 3]).unwrap();
        let err_before = 0.3_f32;
        let err_after = (&proj - &clean)
            .slice(s![.., .., 5])
            .iter()
            .fold(0.0_f32, |m, &d| m.max(d.abs()));
        assert!(err_after < 0.15 * err_before, "stripe residue {err_after}");
        assert!(residual_rings(proj.view_mut(), [0, 3]).is_err());
    }

    #[test]
    fn test_median_filter_reflects_at_edges() {
        let img = Array2::from_shape_vec((1, 4), vec![5.0_f32, 1.0, 9.0, 3.0]).unwrap();
        let m = median_filter(img.view(), [1, 3]);
        // windows: [5,5,1] [5,1,9] [1,9,3] [9,3,3]
        assert_eq!(m.row(0).to_vec(), vec![5.0, 5.0, 3.0, 3.0]);
    }

    #[test]
    fn test_edge_ramp() {
        let tile = Array3::<f32>::ones((2, 3, 2));
        let out = apply_edge_ramp(tile.view(), [2, 1]);
        assert_eq!(out.dim(), (6, 3, 4));
        let lane: Vec<f32> = out.slice(s![.., 1, 1]).to_vec();
        assert_eq!(lane, vec![0.0, 0.5, 1.0, 1.0, 0.5, 0.0]);
        // second pass ramps the padded rows along axis 2
        assert_eq!(out.slice(s![1, 0, ..]).to_vec(), vec![0.0, 0.5, 0.5, 0.0]);
        assert_eq!(out[[3, 2, 2]], 1.0);
    }

    #[test]
    fn test_subtract_air_from_border() {
        let mut proj = Array3::<f32>::from_elem((30, 3, 40), 0.02);
        proj.slice_mut(s![12..18, .., 15..25]).fill(0.5);
        let air = subtract_air(proj.view_mut(), None, &AirConfig::default()).unwrap();
        assert!((air - 0.02).abs() < 2e-4, "air {air}");
        assert!(proj[[0, 0, 0]] >= 0.0 && proj[[0, 0, 0]] < 2e-4);
        assert!((proj[[15, 1, 20]] - 0.48).abs() < 2e-4);
    }

    #[test]
    fn test_subtract_given_air_clamps() {
        let mut proj = Array3::<f32>::from_elem((4, 2, 4), 0.1);
        proj[[0, 0, 0]] = 0.05;
        subtract_air(proj.view_mut(), Some(0.08), &AirConfig::default()).unwrap();
        assert_eq!(proj[[0, 0, 0]], 0.0);
        assert!((proj[[1, 1, 1]] - 0.02).abs() < 1e-6);
    }
}
