//! Foreground "root silhouette" masks.
//!
//! Every depth plane is processed on its own:
//!  1. Otsu threshold over the plane's intensity histogram
//!  2. removal of 4-connected components below a pixel count
//!  3. filling of the convex hull of what remains
//!
//! The mask only serves to reject watershed basins that leak into the
//! background.

use std::collections::VecDeque;

use log::{debug, warn};
use ndarray::{Array2, ArrayView2, s};
use rayon::prelude::*;

use crate::volume::{ForegroundMask, IntensityVolume};

const OTSU_BINS: usize = 256;

/// Otsu's threshold for a set of samples.
///
/// Returns the upper edge of the background class in the sample's units, so
/// `value >= threshold` is foreground. A constant (or empty) sample has no
/// meaningful split and yields `None`.
pub fn otsu_threshold<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64> + Clone,
{
    let (min, max, total) = values
        .clone()
        .into_iter()
        .fold((f64::MAX, f64::MIN, 0usize), |(lo, hi, n), v| {
            (lo.min(v), hi.max(v), n + 1)
        });
    if total == 0 || max - min <= f64::EPSILON * max.abs().max(1.0) {
        return None;
    }

    let bin_width = (max - min) / OTSU_BINS as f64;
    let mut histogram = [0usize; OTSU_BINS];
    for v in values {
        let bin = (((v - min) / bin_width) as usize).min(OTSU_BINS - 1);
        histogram[bin] += 1;
    }

    let total = total as f64;
    let sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_b = 0.0;
    let mut weight_b = 0.0;
    let mut max_variance = 0.0;
    let mut threshold_bin = 0;

    for (i, &count) in histogram.iter().enumerate() {
        weight_b += count as f64;
        if weight_b == 0.0 {
            continue;
        }
        let weight_f = total - weight_b;
        if weight_f == 0.0 {
            break;
        }

        sum_b += i as f64 * count as f64;
        let mean_b = sum_b / weight_b;
        let mean_f = (sum - sum_b) / weight_f;
        let variance = weight_b * weight_f * (mean_b - mean_f).powi(2);

        if variance > max_variance {
            max_variance = variance;
            threshold_bin = i;
        }
    }

    Some(min + (threshold_bin + 1) as f64 * bin_width)
}

/// Zeroes 4-connected foreground components with fewer than `min_size`
/// pixels.
pub fn remove_small_components(mask: &mut Array2<bool>, min_size: usize) {
    let (rows, cols) = mask.dim();
    let mut visited = Array2::<bool>::from_elem((rows, cols), false);
    let mut queue = VecDeque::new();
    let mut component = Vec::new();

    for start in 0..rows * cols {
        let start = (start / cols, start % cols);
        if !mask[start] || visited[start] {
            continue;
        }

        component.clear();
        visited[start] = true;
        queue.push_back(start);
        while let Some((r, c)) = queue.pop_front() {
            component.push((r, c));
            let neighbours = [
                (r.wrapping_sub(1), c),
                (r + 1, c),
                (r, c.wrapping_sub(1)),
                (r, c + 1),
            ];
            for n in neighbours {
                if n.0 < rows && n.1 < cols && mask[n] && !visited[n] {
                    visited[n] = true;
                    queue.push_back(n);
                }
            }
        }

        if component.len() < min_size {
            for &p in &component {
                mask[p] = false;
            }
        }
    }
}

fn cross(o: (i64, i64), a: (i64, i64), b: (i64, i64)) -> i64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Andrew's monotone chain; counter-clockwise, collinear points dropped.
fn convex_hull(mut points: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    points.sort_unstable();
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    let mut hull: Vec<(i64, i64)> = Vec::with_capacity(points.len() * 2);
    for &p in points.iter() {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in points.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Sets every pixel whose centre lies inside or on the convex hull of the
/// current foreground.
pub fn fill_convex_hull(mask: &mut Array2<bool>) {
    let points: Vec<(i64, i64)> = mask
        .indexed_iter()
        .filter(|(_, set)| **set)
        .map(|((r, c), _)| (r as i64, c as i64))
        .collect();
    if points.is_empty() {
        return;
    }

    let hull = convex_hull(points);
    let (r_min, r_max, c_min, c_max) = hull.iter().fold(
        (i64::MAX, i64::MIN, i64::MAX, i64::MIN),
        |(r0, r1, c0, c1), &(r, c)| (r0.min(r), r1.max(r), c0.min(c), c1.max(c)),
    );

    for r in r_min..=r_max {
        for c in c_min..=c_max {
            let p = (r, c);
            let inside = (0..hull.len())
                .all(|i| cross(hull[i], hull[(i + 1) % hull.len()], p) >= 0);
            if inside {
                mask[[r as usize, c as usize]] = true;
            }
        }
    }
}

fn slice_mask(slice: ArrayView2<'_, u16>, min_component_size: usize, depth: usize) -> Array2<bool> {
    let values = slice.iter().map(|&v| f64::from(v));
    let Some(threshold) = otsu_threshold(values) else {
        warn!("Slice {depth} is uniform, no foreground");
        return Array2::from_elem(slice.dim(), false);
    };

    let mut mask = slice.mapv(|v| f64::from(v) >= threshold);
    remove_small_components(&mut mask, min_component_size);
    fill_convex_hull(&mut mask);
    debug!(
        "Slice {depth}: otsu threshold {threshold:.2}, {} foreground pixels",
        mask.iter().filter(|&&m| m).count()
    );
    mask
}

/// Builds the foreground mask of `volume`, one depth plane at a time.
pub fn build_foreground_mask(
    volume: &IntensityVolume,
    min_component_size: usize,
) -> ForegroundMask {
    let (rows, cols, depth) = volume.dim();
    let slices: Vec<Array2<bool>> = (0..depth)
        .into_par_iter()
        .map(|z| slice_mask(volume.data().slice(s![.., .., z]), min_component_size, z))
        .collect();

    let mut mask = ForegroundMask::from_elem((rows, cols, depth), false);
    for (z, slice) in slices.iter().enumerate() {
        mask.slice_mut(s![.., .., z]).assign(slice);
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn mask_from_pattern(pattern: &[&str]) -> Array2<bool> {
        let rows = pattern.len();
        let cols = pattern[0].len();
        Array2::from_shape_fn((rows, cols), |(r, c)| pattern[r].as_bytes()[c] == b'#')
    }

    #[test]
    fn test_otsu_threshold_bimodal() {
        let mut data = Vec::new();
        for i in 0..100 {
            data.push(10.0 + i as f64 * 0.2);
            data.push(200.0 + i as f64 * 0.2);
        }

        let threshold = otsu_threshold(data.iter().copied()).unwrap();

        assert!(threshold > 29.8 && threshold <= 200.0, "threshold {threshold}");
    }

    #[test]
    fn test_otsu_threshold_two_levels_splits_them() {
        let data = [0.0, 0.0, 0.0, 100.0, 100.0];
        let threshold = otsu_threshold(data.iter().copied()).unwrap();
        assert!(threshold > 0.0 && threshold <= 100.0);
    }

    #[test]
    fn test_otsu_threshold_degenerate() {
        assert_eq!(otsu_threshold(std::iter::empty::<f64>()), None);
        assert_eq!(otsu_threshold([5.0; 10].iter().copied()), None);
    }

    #[test]
    fn test_remove_small_components() {
        let mut mask = mask_from_pattern(&[
            "##....",
            "##...#",
            "......",
            "..#...",
            "..#...",
        ]);

        remove_small_components(&mut mask, 3);

        let expected = mask_from_pattern(&[
            "##....",
            "##....",
            "......",
            "......",
            "......",
        ]);
        assert_eq!(mask, expected);
    }

    #[test]
    fn test_diagonal_pixels_are_separate_components() {
        let mut mask = mask_from_pattern(&["#.", ".#"]);
        remove_small_components(&mut mask, 2);
        assert!(mask.iter().all(|&m| !m));
    }

    #[test]
    fn test_fill_convex_hull_of_l_shape() {
        let mut mask = mask_from_pattern(&[
            "#....",
            "#....",
            "#....",
            "#####",
            ".....",
        ]);

        fill_convex_hull(&mut mask);

        let expected = mask_from_pattern(&[
            "#....",
            "##...",
            "###..",
            "#####",
            ".....",
        ]);
        assert_eq!(mask, expected);
    }

    #[test]
    fn test_fill_convex_hull_of_segment_and_point() {
        let mut segment = mask_from_pattern(&["#...#", "....."]);
        fill_convex_hull(&mut segment);
        assert_eq!(segment, mask_from_pattern(&["#####", "....."]));

        let mut point = mask_from_pattern(&["...", ".#.", "..."]);
        fill_convex_hull(&mut point);
        assert_eq!(point, mask_from_pattern(&["...", ".#.", "..."]));
    }

    #[test]
    fn test_build_foreground_mask_per_slice() {
        // Slice 0: a bright L with a one pixel speck; slice 1: uniform.
        let pattern = mask_from_pattern(&[
            "#.....",
            "#.....",
            "#.....",
            "####..",
            "......",
            ".....#",
        ]);
        let data = Array3::from_shape_fn((6, 6, 2), |(r, c, z)| {
            if z == 0 && pattern[[r, c]] { 900 } else { 100 }
        });
        let volume = IntensityVolume::new(data);

        let mask = build_foreground_mask(&volume, 3);

        let expected = mask_from_pattern(&[
            "#.....",
            "##....",
            "###...",
            "####..",
            "......",
            "......",
        ]);
        assert_eq!(mask.slice(s![.., .., 0]), expected);
        assert!(mask.slice(s![.., .., 1]).iter().all(|&m| !m));
    }
}
