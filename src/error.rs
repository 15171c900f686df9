use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    InputShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    #[error("Cannot decode color at slice {slice} (column {column}, row {row}): {reason}")]
    DecodeCollision {
        slice: usize,
        column: u32,
        row: u32,
        reason: String,
    },

    #[error("Label {label} exceeds the largest encodable label {max}")]
    UnsupportedLabelRange { label: u32, max: u32 },

    #[error("No regions survived {stage}")]
    EmptyRegionSet { stage: &'static str },

    #[error("Region table is stale: label {label} is not consistent with the labeled volume")]
    StaleRegionTable { label: u32 },

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("No image slices found in {0}")]
    NoSlices(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl SegmentationError {
    /// True when the unit produced no regions; callers may still emit an
    /// empty report.
    pub fn is_empty_region_set(&self) -> bool {
        matches!(self, SegmentationError::EmptyRegionSet { .. })
    }
}

pub type Result<T> = std::result::Result<T, SegmentationError>;

pub(crate) fn ensure_same_shape(
    expected: (usize, usize, usize),
    found: (usize, usize, usize),
) -> Result<()> {
    if expected != found {
        return Err(SegmentationError::InputShapeMismatch { expected, found });
    }
    Ok(())
}
