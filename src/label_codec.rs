//! Lossless persistence of labeled volumes as RGB slice stacks.
//!
//! A label is written as a base-256 number over the three 8-bit channels,
//! red most significant:
//!
//! ```text
//! label = r * 65536 + g * 256 + b
//! ```
//!
//! Background (`0`) is black. Labels above [`MAX_LABEL`] cannot be
//! represented and are rejected before anything is written.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgb, RgbImage};
use log::info;
use ndarray::{Array2, Array3, ArrayView2, s};
use rayon::prelude::*;

use crate::error::{Result, SegmentationError};
use crate::volume::LabeledVolume;

/// Largest label that fits in three 8-bit channels.
pub const MAX_LABEL: u32 = 0x00FF_FFFF;

const SLICE_EXTENSIONS: [&str; 3] = ["png", "tif", "tiff"];

/// `z<N>.png`, with `N` zero padded to the number of digits of the last
/// slice index.
pub(crate) fn slice_file_name(index: usize, depth: usize) -> String {
    let width = depth.saturating_sub(1).to_string().len();
    format!("z{index:0width$}.png")
}

fn is_slice_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SLICE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

pub struct LabelCodec;

impl LabelCodec {
    /// Color of `label`; fails for labels above [`MAX_LABEL`].
    pub fn encode(label: u32) -> Result<Rgb<u8>> {
        if label > MAX_LABEL {
            return Err(SegmentationError::UnsupportedLabelRange {
                label,
                max: MAX_LABEL,
            });
        }
        Ok(Self::color_of(label))
    }

    /// Label of `color`. Every color decodes to exactly one label.
    pub fn decode(color: Rgb<u8>) -> u32 {
        let [r, g, b] = color.0;
        (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
    }

    #[inline]
    fn color_of(label: u32) -> Rgb<u8> {
        Rgb([(label >> 16) as u8, (label >> 8) as u8, label as u8])
    }

    /// Encodes one depth plane; `slice` is indexed `[[row, column]]`.
    pub fn encode_slice(slice: &ArrayView2<'_, u32>) -> Result<RgbImage> {
        if let Some(&label) = slice.iter().find(|&&l| l > MAX_LABEL) {
            return Err(SegmentationError::UnsupportedLabelRange {
                label,
                max: MAX_LABEL,
            });
        }
        let (rows, cols) = slice.dim();
        Ok(RgbImage::from_fn(cols as u32, rows as u32, |x, y| {
            Self::color_of(slice[[y as usize, x as usize]])
        }))
    }

    /// Decodes one persisted slice. Only opaque 8-bit RGB(A) data is accepted.
    pub fn decode_slice(image: &DynamicImage, slice: usize) -> Result<Array2<u32>> {
        let (width, height) = (image.width(), image.height());
        let mut labels = Array2::<u32>::zeros((height as usize, width as usize));

        match image {
            DynamicImage::ImageRgb8(rgb) => {
                for (x, y, pixel) in rgb.enumerate_pixels() {
                    labels[[y as usize, x as usize]] = Self::decode(*pixel);
                }
            }
            DynamicImage::ImageRgba8(rgba) => {
                for (x, y, pixel) in rgba.enumerate_pixels() {
                    let [r, g, b, a] = pixel.0;
                    if a != u8::MAX {
                        return Err(SegmentationError::DecodeCollision {
                            slice,
                            column: x,
                            row: y,
                            reason: format!("translucent pixel (alpha {a})"),
                        });
                    }
                    labels[[y as usize, x as usize]] = Self::decode(Rgb([r, g, b]));
                }
            }
            other => {
                return Err(SegmentationError::DecodeCollision {
                    slice,
                    column: 0,
                    row: 0,
                    reason: format!("unsupported color type {:?}", other.color()),
                });
            }
        }

        Ok(labels)
    }

    /// Writes one RGB PNG per depth plane into `directory`.
    ///
    /// The label range is validated up front, so an unencodable volume
    /// leaves no slices behind. `directory` must not already hold slices.
    pub fn persist(labeled: &LabeledVolume, directory: impl AsRef<Path>) -> Result<()> {
        let directory = directory.as_ref();
        let max_label = labeled.max_label();
        if max_label > MAX_LABEL {
            return Err(SegmentationError::UnsupportedLabelRange {
                label: max_label,
                max: MAX_LABEL,
            });
        }

        fs::create_dir_all(directory)?;
        if Self::slice_paths(directory)?.next().is_some() {
            return Err(SegmentationError::InvalidParameter {
                name: "directory",
                reason: format!("{} already contains image slices", directory.display()),
            });
        }

        let depth = labeled.dim().2;
        (0..depth).into_par_iter().try_for_each(|z| -> Result<()> {
            let slice = labeled.data().slice(s![.., .., z]);
            let image = Self::encode_slice(&slice)?;
            image.save(directory.join(slice_file_name(z, depth)))?;
            Ok(())
        })?;

        info!("Persisted {depth} label slices to {}", directory.display());
        Ok(())
    }

    /// Reads a stack written by [`LabelCodec::persist`], slices in file name
    /// order.
    pub fn load(directory: impl AsRef<Path>) -> Result<LabeledVolume> {
        let directory = directory.as_ref();
        let mut paths: Vec<PathBuf> = Self::slice_paths(directory)?.collect();
        if paths.is_empty() {
            return Err(SegmentationError::NoSlices(directory.to_path_buf()));
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let slices = paths
            .par_iter()
            .enumerate()
            .map(|(z, path)| -> Result<Array2<u32>> {
                let image = image::open(path)?;
                Self::decode_slice(&image, z)
            })
            .collect::<Result<Vec<Array2<u32>>>>()?;

        let (rows, cols) = slices[0].dim();
        let depth = slices.len();
        if let Some(mismatch) = slices.iter().find(|slice| slice.dim() != (rows, cols)) {
            let (found_rows, found_cols) = mismatch.dim();
            return Err(SegmentationError::InputShapeMismatch {
                expected: (rows, cols, depth),
                found: (found_rows, found_cols, depth),
            });
        }

        let mut data = Array3::<u32>::zeros((rows, cols, depth));
        for (z, slice) in slices.iter().enumerate() {
            data.slice_mut(s![.., .., z]).assign(slice);
        }
        Ok(LabeledVolume::new(data))
    }

    fn slice_paths(directory: &Path) -> Result<impl Iterator<Item = PathBuf>> {
        Ok(fs::read_dir(directory)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_slice_file(path)))
    }
}
