use std::collections::HashMap;
use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use rayon::prelude::*;

use crate::error::Result;
use crate::label_codec::slice_file_name;
use crate::region::RegionTable;
use crate::volume::LabeledVolume;

/// Rendering of a labeled volume where every cell is coloured by its mean
/// intensity: dim cells blue, bright cells light grey-green.
pub struct IntensityStack;

impl IntensityStack {
    /// Colour per label, `(g, g, 255 - g)` with `g` the cell's mean intensity
    /// rescaled over all cells to `0..=255`. Cells without an intensity are
    /// left out.
    pub fn colours(table: &RegionTable) -> HashMap<u32, Rgb<u8>> {
        let means: Vec<(u32, f64)> = table
            .records()
            .filter_map(|r| r.intensity_per_voxel().map(|m| (r.label, m)))
            .collect();
        let min = means.iter().map(|&(_, m)| m).fold(f64::INFINITY, f64::min);
        let max = means.iter().map(|&(_, m)| m).fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;

        means
            .into_iter()
            .map(|(label, mean)| {
                let green = if range > 0.0 {
                    ((mean - min) / range * 255.0).round().clamp(0.0, 255.0) as u8
                } else {
                    0
                };
                (label, Rgb([green, green, u8::MAX - green]))
            })
            .collect()
    }

    /// One RGB image per depth plane; background and uncoloured cells are
    /// black.
    pub fn render(labeled: &LabeledVolume, table: &RegionTable) -> Vec<RgbImage> {
        let colours = Self::colours(table);
        let (rows, cols, depth) = labeled.dim();

        (0..depth)
            .into_par_iter()
            .map(|z| {
                RgbImage::from_fn(cols as u32, rows as u32, |x, y| {
                    let label = labeled.data()[[y as usize, x as usize, z]];
                    colours.get(&label).copied().unwrap_or(Rgb([0, 0, 0]))
                })
            })
            .collect()
    }

    pub fn write(
        labeled: &LabeledVolume,
        table: &RegionTable,
        directory: impl AsRef<Path>,
    ) -> Result<()> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;
        let slices = Self::render(labeled, table);
        let depth = slices.len();
        for (z, slice) in slices.iter().enumerate() {
            slice.save(directory.join(slice_file_name(z, depth)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionAnalyzer;
    use crate::volume::IntensityVolume;
    use ndarray::Array3;

    fn two_cells() -> (LabeledVolume, RegionTable) {
        let labels =
            Array3::from_shape_fn((2, 2, 2), |(r, _, z)| if z == 0 { r as u32 + 1 } else { 0 });
        let intensity = Array3::from_shape_fn((2, 2, 2), |(r, _, _)| if r == 0 { 10 } else { 30 });
        let labeled = LabeledVolume::new(labels);
        let table =
            RegionAnalyzer::compute_region_table(&labeled, Some(&IntensityVolume::new(intensity)))
                .unwrap();
        (labeled, table)
    }

    #[test]
    fn test_colours_span_blue_to_green() {
        let (_, table) = two_cells();

        let colours = IntensityStack::colours(&table);

        assert_eq!(colours[&1], Rgb([0, 0, 255]));
        assert_eq!(colours[&2], Rgb([255, 255, 0]));
    }

    #[test]
    fn test_render_paints_cells_and_leaves_background_black() {
        let (labeled, table) = two_cells();

        let slices = IntensityStack::render(&labeled, &table);

        assert_eq!(slices.len(), 2);
        assert_eq!(*slices[0].get_pixel(1, 0), Rgb([0, 0, 255]));
        assert_eq!(*slices[0].get_pixel(0, 1), Rgb([255, 255, 0]));
        assert!(slices[1].pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_equal_means_and_missing_intensity() {
        let labeled = LabeledVolume::new(Array3::from_elem((1, 1, 1), 4));
        let table = RegionAnalyzer::compute_region_table(&labeled, None).unwrap();
        assert!(IntensityStack::colours(&table).is_empty());

        let intensity = IntensityVolume::new(Array3::from_elem((1, 1, 1), 9));
        let table = RegionAnalyzer::compute_region_table(&labeled, Some(&intensity)).unwrap();
        assert_eq!(IntensityStack::colours(&table)[&4], Rgb([0, 0, 255]));
    }

    #[test]
    fn test_write_creates_one_file_per_slice() {
        let (labeled, table) = two_cells();
        let temp_dir = tempfile::TempDir::new().unwrap();

        IntensityStack::write(&labeled, &table, temp_dir.path()).unwrap();

        assert!(temp_dir.path().join("z0.png").is_file());
        assert!(temp_dir.path().join("z1.png").is_file());
    }
}
