use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;

use crate::error::{Result, SegmentationError};
use crate::volume::IntensityVolume;

/// One (file, series, channel) unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitId {
    pub path: PathBuf,
    pub series: usize,
    pub channel: usize,
}

impl UnitId {
    pub fn new(path: impl Into<PathBuf>, series: usize, channel: usize) -> Self {
        Self {
            path: path.into(),
            series,
            channel,
        }
    }

    pub fn with_channel(&self, channel: usize) -> Self {
        Self {
            channel,
            ..self.clone()
        }
    }
}

/// Source of intensity volumes. Decoding microscopy containers is left to
/// implementors; the pipeline only asks for one unit at a time.
pub trait MicroscopyLoader {
    fn load(&self, unit: &UnitId) -> Result<IntensityVolume>;
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from a directory of greyscale slices, one per depth
    /// plane, ordered by file name.
    ///
    /// # Errors
    ///
    /// Returns error if no slices are found or their dimensions differ
    pub fn load_from_directory(path: impl AsRef<Path>) -> Result<IntensityVolume> {
        let path = path.as_ref();
        let mut paths: Vec<PathBuf> = fs::read_dir(path)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| {
                        ["png", "tif", "tiff"]
                            .iter()
                            .any(|e| ext.eq_ignore_ascii_case(e))
                    })
            })
            .collect();

        if paths.is_empty() {
            return Err(SegmentationError::NoSlices(path.to_path_buf()));
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Self::load_from_file_paths(&paths)
    }

    /// Load a volume from slice file paths, in the given order
    pub fn load_from_file_paths(paths: &[impl AsRef<Path> + Sync]) -> Result<IntensityVolume> {
        let images = paths
            .par_iter()
            .map(|path| Self::decode_slice(path.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        if images.is_empty() {
            return Err(SegmentationError::NoSlices(PathBuf::new()));
        }
        Self::validate_dimensions(&images)?;

        let volume = IntensityVolume::new(Self::build_volume_array(&images));
        info!("Loaded intensity volume {:?}", volume.dim());
        Ok(volume)
    }

    fn decode_slice(path: &Path) -> Result<Array2<u16>> {
        let image = image::open(path)?.into_luma16();
        let (width, height) = image.dimensions();
        Ok(Array2::from_shape_fn((height as usize, width as usize), |(r, c)| {
            image.get_pixel(c as u32, r as u32)[0]
        }))
    }

    fn validate_dimensions(images: &[Array2<u16>]) -> Result<()> {
        let (rows, cols) = images[0].dim();
        let depth = images.len();
        if let Some(image) = images.iter().find(|img| img.dim() != (rows, cols)) {
            let (found_rows, found_cols) = image.dim();
            return Err(SegmentationError::InputShapeMismatch {
                expected: (rows, cols, depth),
                found: (found_rows, found_cols, depth),
            });
        }
        Ok(())
    }

    fn build_volume_array(images: &[Array2<u16>]) -> Array3<u16> {
        let (rows, cols) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<u16>::zeros((rows, cols, depth));

        for (z, image) in images.iter().enumerate() {
            volume.slice_mut(s![.., .., z]).assign(image);
        }

        volume
    }
}

/// Reads units laid out as `<path>/series_<series>/channel_<channel>/`,
/// each holding one greyscale slice per depth plane.
#[derive(Debug, Default, Clone, Copy)]
pub struct SliceDirectoryLoader;

impl SliceDirectoryLoader {
    pub fn unit_directory(unit: &UnitId) -> PathBuf {
        unit.path
            .join(format!("series_{}", unit.series))
            .join(format!("channel_{}", unit.channel))
    }
}

impl MicroscopyLoader for SliceDirectoryLoader {
    fn load(&self, unit: &UnitId) -> Result<IntensityVolume> {
        VolumeLoader::load_from_directory(Self::unit_directory(unit))
    }
}
