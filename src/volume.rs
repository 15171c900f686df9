use std::collections::BTreeSet;

use image::{GrayImage, ImageBuffer, Luma};
use ndarray::{Array3, ArrayView2, s};

/// Foreground mask, same `(rows, columns, depth)` shape as its source.
pub type ForegroundMask = Array3<bool>;

/// Scalar intensities of one (file, series, channel) unit.
///
/// Arrays are indexed `[[row, column, depth]]`; each depth plane is one
/// microscope slice.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntensityVolume {
    data: Array3<u16>,
}

impl IntensityVolume {
    pub fn new(data: Array3<u16>) -> Self {
        Self { data }
    }

    /// Get the dimensions of the volume (rows, columns, depth)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    pub fn get_slice(&self, depth: usize) -> Option<ArrayView2<'_, u16>> {
        if depth >= self.data.dim().2 {
            return None;
        }
        Some(self.data.slice(s![.., .., depth]))
    }

    /// Lossless widening for the floating point filters.
    pub fn to_f32(&self) -> Array3<f32> {
        self.data.mapv(f32::from)
    }
}

/// Integer label per voxel, `0` is background.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabeledVolume {
    data: Array3<u32>,
}

impl LabeledVolume {
    pub fn new(data: Array3<u32>) -> Self {
        Self { data }
    }

    /// Get the dimensions of the volume (rows, columns, depth)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<u32> {
        &self.data
    }

    pub fn into_inner(self) -> Array3<u32> {
        self.data
    }

    pub fn get_slice(&self, depth: usize) -> Option<ArrayView2<'_, u32>> {
        if depth >= self.data.dim().2 {
            return None;
        }
        Some(self.data.slice(s![.., .., depth]))
    }

    /// Distinct non-zero labels, ascending.
    pub fn labels(&self) -> BTreeSet<u32> {
        self.data.iter().copied().filter(|&label| label != 0).collect()
    }

    pub fn max_label(&self) -> u32 {
        self.data.iter().copied().max().unwrap_or(0)
    }

    /// Zero every voxel whose label is in `labels`. Labels only ever leave a
    /// volume, they are never reassigned.
    pub(crate) fn remove_labels(&mut self, labels: &BTreeSet<u32>) {
        if labels.is_empty() {
            return;
        }
        self.data.par_map_inplace(|label| {
            if labels.contains(label) {
                *label = 0;
            }
        });
    }
}

#[inline]
fn normalize_to_u8(value: f32, min: f32, range: f32) -> u8 {
    if range <= f32::EPSILON {
        return 0;
    }
    (((value - min) / range) * 255.0).clamp(0.0, 255.0) as u8
}

/// Renders one depth plane of a scalar field as 8-bit greyscale, stretched
/// over the field's `[min, max]`.
pub(crate) fn field_slice_to_image(
    slice: &ArrayView2<'_, f32>,
    min: f32,
    max: f32,
) -> Option<GrayImage> {
    let (height, width) = slice.dim();
    let range = max - min;
    let pixel_data: Vec<u8> = slice
        .iter()
        .map(|&v| normalize_to_u8(v, min, range))
        .collect();
    ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(width as u32, height as u32, pixel_data)
}
