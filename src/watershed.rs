//! Morphological watershed on a scalar landscape.
//!
//! Markers are the regional minima of the h-minima transform of the input,
//! so `level` decides how deep a basin has to be to keep its own label.
//! Flooding then grows every marker in order of increasing landscape value;
//! voxels where two basins meet become ridge voxels with label `0`.
//! Connectivity is the 6-neighbourhood throughout.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use log::debug;
use ndarray::Array3;

use crate::error::{Result, SegmentationError};
use crate::volume::LabeledVolume;

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    value: f32,
    order: u64,
    index: usize,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Reversed so `BinaryHeap` pops the lowest value first, oldest first on ties.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .value
            .total_cmp(&self.value)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Priority queue with FIFO ordering among equal priorities.
#[derive(Default)]
struct FloodQueue {
    heap: BinaryHeap<QueueEntry>,
    next_order: u64,
}

impl FloodQueue {
    fn push(&mut self, value: f32, index: usize) {
        self.heap.push(QueueEntry {
            value,
            order: self.next_order,
            index,
        });
        self.next_order += 1;
    }

    fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }
}

/// Flat-index geometry of a standard layout `(rows, columns, depth)` volume.
#[derive(Clone, Copy)]
struct Grid {
    rows: usize,
    cols: usize,
    depth: usize,
}

impl Grid {
    fn len(&self) -> usize {
        self.rows * self.cols * self.depth
    }

    fn neighbours(&self, index: usize) -> impl Iterator<Item = usize> {
        let plane = self.cols * self.depth;
        let r = index / plane;
        let c = (index / self.depth) % self.cols;
        let d = index % self.depth;
        let grid = *self;
        [
            (r > 0).then(|| index - plane),
            (r + 1 < grid.rows).then(|| index + plane),
            (c > 0).then(|| index - grid.depth),
            (c + 1 < grid.cols).then(|| index + grid.depth),
            (d > 0).then(|| index - 1),
            (d + 1 < grid.depth).then(|| index + 1),
        ]
        .into_iter()
        .flatten()
    }
}

/// Reconstruction by erosion of `values + level` above `values`: fills every
/// basin shallower than `level`.
fn h_minima(values: &[f32], grid: Grid, level: f32) -> Vec<f32> {
    let mut reconstructed: Vec<f32> = values.iter().map(|v| v + level).collect();
    let mut queue = FloodQueue::default();
    for (index, &value) in reconstructed.iter().enumerate() {
        queue.push(value, index);
    }

    while let Some(entry) = queue.pop() {
        let current = reconstructed[entry.index];
        if entry.value != current {
            continue;
        }
        for n in grid.neighbours(entry.index) {
            let candidate = current.max(values[n]);
            if candidate < reconstructed[n] {
                reconstructed[n] = candidate;
                queue.push(candidate, n);
            }
        }
    }

    reconstructed
}

/// Labels every regional-minimum plateau of `values` with 1.. in raster
/// order of its first voxel.
fn regional_minima(values: &[f32], grid: Grid) -> (Vec<u32>, u32) {
    let mut labels = vec![0u32; grid.len()];
    let mut visited = vec![false; grid.len()];
    let mut plateau = Vec::new();
    let mut queue = VecDeque::new();
    let mut count = 0u32;

    for start in 0..grid.len() {
        if visited[start] {
            continue;
        }
        let level = values[start];
        let mut is_minimum = true;
        plateau.clear();
        visited[start] = true;
        queue.push_back(start);

        while let Some(index) = queue.pop_front() {
            plateau.push(index);
            for n in grid.neighbours(index) {
                if values[n] < level {
                    is_minimum = false;
                } else if values[n] == level && !visited[n] {
                    visited[n] = true;
                    queue.push_back(n);
                }
            }
        }

        if is_minimum {
            count += 1;
            for &index in &plateau {
                labels[index] = count;
            }
        }
    }

    (labels, count)
}

/// Grows `markers` over `values` in increasing value order. A voxel that
/// touches two different basins when it is reached stays `0`.
fn flood_from_markers(values: &[f32], grid: Grid, mut labels: Vec<u32>) -> Vec<u32> {
    let mut queued: Vec<bool> = labels.iter().map(|&l| l != 0).collect();
    let mut queue = FloodQueue::default();

    for index in 0..grid.len() {
        if labels[index] == 0 {
            continue;
        }
        for n in grid.neighbours(index) {
            if !queued[n] {
                queued[n] = true;
                queue.push(values[n], n);
            }
        }
    }

    while let Some(entry) = queue.pop() {
        let mut basin = None;
        let mut ridge = false;
        for n in grid.neighbours(entry.index) {
            match (labels[n], basin) {
                (0, _) => {}
                (label, None) => basin = Some(label),
                (label, Some(existing)) if label != existing => ridge = true,
                _ => {}
            }
        }

        let Some(basin) = basin else { continue };
        if ridge {
            continue;
        }

        labels[entry.index] = basin;
        for n in grid.neighbours(entry.index) {
            if !queued[n] {
                queued[n] = true;
                queue.push(values[n], n);
            }
        }
    }

    labels
}

/// Watershed labels of `landscape`, typically a smoothed gradient magnitude.
///
/// `level` must be finite and non-negative; higher values merge more basins.
pub fn watershed(landscape: &Array3<f32>, level: f64) -> Result<LabeledVolume> {
    if !level.is_finite() || level < 0.0 {
        return Err(SegmentationError::InvalidParameter {
            name: "watershed_level",
            reason: format!("must be finite and non-negative, got {level}"),
        });
    }

    let (rows, cols, depth) = landscape.dim();
    let grid = Grid { rows, cols, depth };
    if grid.len() == 0 {
        return Ok(LabeledVolume::new(Array3::zeros(landscape.dim())));
    }

    // Logical iteration order is row-major, whatever the memory layout.
    let values: Vec<f32> = landscape.iter().copied().collect();
    let filled = h_minima(&values, grid, level as f32);
    let (markers, basin_count) = regional_minima(&filled, grid);
    debug!("Watershed level {level}: {basin_count} basins");

    let labels = flood_from_markers(&values, grid, markers);
    let plane = cols * depth;
    Ok(LabeledVolume::new(Array3::from_shape_fn(
        (rows, cols, depth),
        |(r, c, d)| labels[r * plane + c * depth + d],
    )))
}
