use ndarray::{Array3, Zip};

use crate::enums::Axis;
use crate::error::{Result, SegmentationError};

/// Retained kernel mass of the discrete Gaussian is at least `1 - MAX_ERROR`.
const GAUSSIAN_MAX_ERROR: f64 = 0.01;
/// Upper bound on the kernel width; odd kernels therefore stop at radius 15.
const GAUSSIAN_MAX_KERNEL_WIDTH: usize = 32;
const GAUSSIAN_MAX_RADIUS: usize = (GAUSSIAN_MAX_KERNEL_WIDTH - 1) / 2;
const MEDIAN_RADIUS: isize = 1;

/// Volume to volume filters. None of them know about labels; every output
/// has the shape of its input and edges replicate the nearest voxel.
pub struct Preprocessor;

impl Preprocessor {
    /// 3x3x3 median filter.
    pub fn denoise(volume: &Array3<f32>) -> Array3<f32> {
        let dim = volume.dim();
        let mut output = Array3::<f32>::zeros(dim);

        Zip::indexed(&mut output).par_for_each(|(r, c, d), out| {
            let mut window = [0.0f32; 27];
            let mut n = 0;
            for dr in -MEDIAN_RADIUS..=MEDIAN_RADIUS {
                for dc in -MEDIAN_RADIUS..=MEDIAN_RADIUS {
                    for dd in -MEDIAN_RADIUS..=MEDIAN_RADIUS {
                        let rr = clamp_index(r as isize + dr, dim.0);
                        let cc = clamp_index(c as isize + dc, dim.1);
                        let zz = clamp_index(d as isize + dd, dim.2);
                        window[n] = volume[[rr, cc, zz]];
                        n += 1;
                    }
                }
            }
            let (_, median, _) = window.select_nth_unstable_by(n / 2, f32::total_cmp);
            *out = *median;
        });

        output
    }

    /// Central-difference gradient magnitude with unit spacing.
    pub fn gradient_magnitude(volume: &Array3<f32>) -> Array3<f32> {
        let dim = volume.dim();
        let mut output = Array3::<f32>::zeros(dim);

        Zip::indexed(&mut output).par_for_each(|index, out| {
            let index = [index.0, index.1, index.2];
            let mut sum_sq = 0.0f32;
            for axis in Axis::ALL {
                let a = axis.index();
                let len = volume.shape()[a];
                let mut next = index;
                let mut prev = index;
                next[a] = clamp_index(index[a] as isize + 1, len);
                prev[a] = clamp_index(index[a] as isize - 1, len);
                let derivative = (volume[next] - volume[prev]) * 0.5;
                sum_sq += derivative * derivative;
            }
            *out = sum_sq.sqrt();
        });

        output
    }

    /// Discrete Gaussian blur, applied separably along all three axes.
    pub fn smooth(volume: &Array3<f32>, variance: f64) -> Result<Array3<f32>> {
        let kernel = gaussian_kernel(variance)?;
        let mut output = volume.clone();
        for axis in Axis::ALL {
            output = convolve_axis(&output, &kernel, axis);
        }
        Ok(output)
    }
}

#[inline]
fn clamp_index(index: isize, len: usize) -> usize {
    index.clamp(0, len as isize - 1) as usize
}

/// `e^-t * I_n(t)` for `t = variance`, via the power series of the modified
/// Bessel function of the first kind.
fn bessel_kernel_tap(n: usize, t: f64) -> f64 {
    let half = t / 2.0;
    let mut term = (1..=n).fold(1.0, |acc, k| acc * half / k as f64);
    let mut sum = term;
    for k in 0..500 {
        let k = k as f64;
        term *= half * half / ((k + 1.0) * (k + 1.0 + n as f64));
        sum += term;
        if term <= sum * 1e-17 {
            break;
        }
    }
    (-t).exp() * sum
}

/// Symmetric, normalised discrete Gaussian kernel of length `2 * radius + 1`.
pub(crate) fn gaussian_kernel(variance: f64) -> Result<Vec<f32>> {
    if !variance.is_finite() || variance <= 0.0 {
        return Err(SegmentationError::InvalidParameter {
            name: "gaussian_variance",
            reason: format!("must be finite and positive, got {variance}"),
        });
    }

    let mut half = vec![bessel_kernel_tap(0, variance)];
    let mut mass = half[0];
    while mass < 1.0 - GAUSSIAN_MAX_ERROR && half.len() <= GAUSSIAN_MAX_RADIUS {
        let tap = bessel_kernel_tap(half.len(), variance);
        mass += 2.0 * tap;
        half.push(tap);
    }

    let radius = half.len() - 1;
    let kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| half[i.abs_diff(radius)])
        .collect();
    let total: f64 = kernel.iter().sum();
    Ok(kernel.into_iter().map(|k| (k / total) as f32).collect())
}

fn convolve_axis(volume: &Array3<f32>, kernel: &[f32], axis: Axis) -> Array3<f32> {
    let a = axis.index();
    let len = volume.shape()[a];
    let radius = (kernel.len() / 2) as isize;
    let mut output = Array3::<f32>::zeros(volume.dim());

    Zip::indexed(&mut output).par_for_each(|index, out| {
        let mut index = [index.0, index.1, index.2];
        let centre = index[a] as isize;
        let mut acc = 0.0f64;
        for (offset, &weight) in (-radius..=radius).zip(kernel) {
            index[a] = clamp_index(centre + offset, len);
            acc += f64::from(weight) * f64::from(volume[index]);
        }
        *out = acc as f32;
    });

    output
}
