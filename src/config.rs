use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentationError};
use crate::segmenter::SegmentationParams;

/// Every tunable of a pipeline run. Nothing is read from process-wide state.
///
/// Two watershed presets are in use for root stacks: `watershed_level: 250`
/// on raw gradient magnitudes, and `0.664` on rescaled data. Both are plain
/// values here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub gaussian_variance: f64,
    pub watershed_level: f64,
    pub min_connected_component_size: usize,
    pub min_cell_voxels: u64,
    pub max_cell_voxels: u64,
    /// Channel that is segmented.
    pub segmentation_channel: usize,
    /// Channel whose intensities are summed per cell.
    pub intensity_channel: usize,
    /// Write intermediate stacks here when set.
    pub debug_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let params = SegmentationParams::default();
        Self {
            gaussian_variance: params.gaussian_variance,
            watershed_level: params.watershed_level,
            min_connected_component_size: params.min_connected_component_size,
            min_cell_voxels: 10_000,
            max_cell_voxels: 80_000,
            segmentation_channel: 1,
            intensity_channel: 0,
            debug_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&data)
    }

    pub fn segmentation_params(&self) -> SegmentationParams {
        SegmentationParams {
            gaussian_variance: self.gaussian_variance,
            watershed_level: self.watershed_level,
            min_connected_component_size: self.min_connected_component_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.gaussian_variance.is_finite() || self.gaussian_variance <= 0.0 {
            return Err(invalid(
                "gaussian_variance",
                format!("must be finite and positive, got {}", self.gaussian_variance),
            ));
        }
        if !self.watershed_level.is_finite() || self.watershed_level < 0.0 {
            return Err(invalid(
                "watershed_level",
                format!("must be finite and non-negative, got {}", self.watershed_level),
            ));
        }
        if self.min_cell_voxels > self.max_cell_voxels {
            return Err(invalid(
                "min_cell_voxels",
                format!(
                    "{} is above max_cell_voxels {}",
                    self.min_cell_voxels, self.max_cell_voxels
                ),
            ));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: String) -> SegmentationError {
    SegmentationError::InvalidParameter { name, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.gaussian_variance, 2.0);
        assert_eq!(config.watershed_level, 250.0);
        assert_eq!(config.min_connected_component_size, 1000);
        assert_eq!((config.min_cell_voxels, config.max_cell_voxels), (10_000, 80_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = PipelineConfig::from_json_str(r#"{ "watershed_level": 0.664 }"#).unwrap();

        assert_eq!(config.watershed_level, 0.664);
        assert_eq!(config.gaussian_variance, 2.0);
        assert_eq!(config.segmentation_params().watershed_level, 0.664);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(PipelineConfig::from_json_str(r#"{ "gaussian_variance": 0.0 }"#).is_err());
        assert!(PipelineConfig::from_json_str(r#"{ "watershed_level": -3 }"#).is_err());
        assert!(
            PipelineConfig::from_json_str(r#"{ "min_cell_voxels": 9, "max_cell_voxels": 8 }"#)
                .is_err()
        );
        assert!(matches!(
            PipelineConfig::from_json_str("not json"),
            Err(SegmentationError::Config(_))
        ));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "min_cell_voxels": 5, "debug_dir": "/tmp/debug" }}"#).unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();

        assert_eq!(config.min_cell_voxels, 5);
        assert_eq!(config.debug_dir, Some(PathBuf::from("/tmp/debug")));
    }
}
