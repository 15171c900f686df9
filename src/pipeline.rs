use std::path::Path;

use log::info;

use crate::config::PipelineConfig;
use crate::enums::Stage;
use crate::error::{Result, ensure_same_shape};
use crate::intensity_stack::IntensityStack;
use crate::label_codec::LabelCodec;
use crate::region::{RegionAnalyzer, RegionTable};
use crate::region_filter::RegionFilter;
use crate::segmenter::Segmenter;
use crate::trace::PipelineTrace;
use crate::volume::{ForegroundMask, IntensityVolume, LabeledVolume};
use crate::volume_loader::{MicroscopyLoader, UnitId};

/// Region table file written inside every persisted `.istack` directory.
pub const CELLINFO_FILE: &str = "cellinfo.json";

/// Everything one unit produces.
#[derive(Debug)]
pub struct PipelineResult {
    pub mask: ForegroundMask,
    pub segmented: LabeledVolume,
    pub segmented_table: RegionTable,
    pub filtered: LabeledVolume,
    pub filtered_table: RegionTable,
    pub trace: PipelineTrace,
}

impl PipelineResult {
    /// Writes `segmented.istack/`, `filtered.istack/` and `intensity.stack/`
    /// below `directory`. Each `.istack` carries its region table as
    /// `cellinfo.json`.
    pub fn persist(&self, directory: impl AsRef<Path>) -> Result<()> {
        let directory = directory.as_ref();
        for (name, labeled, table) in [
            ("segmented", &self.segmented, &self.segmented_table),
            ("filtered", &self.filtered, &self.filtered_table),
        ] {
            let stack_dir = directory.join(format!("{name}.istack"));
            LabelCodec::persist(labeled, &stack_dir)?;
            table.write_json(stack_dir.join(CELLINFO_FILE))?;
        }
        IntensityStack::write(
            &self.filtered,
            &self.filtered_table,
            directory.join("intensity.stack"),
        )?;
        Ok(())
    }
}

/// Segmentation, statistics and size filtering of single units, one after
/// the other. Independent units share nothing and can run on separate
/// `Pipeline` values.
pub struct Pipeline {
    config: PipelineConfig,
    segmenter: Segmenter,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let segmenter = Segmenter::new(config.segmentation_params());
        Ok(Self { config, segmenter })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Segments `volume` and measures the cells in `intensity`.
    ///
    /// # Errors
    ///
    /// `InputShapeMismatch` before any work if the volumes differ in shape;
    /// `EmptyRegionSet` if segmentation or filtering leaves no cells.
    pub fn run(
        &self,
        volume: &IntensityVolume,
        intensity: &IntensityVolume,
    ) -> Result<PipelineResult> {
        ensure_same_shape(volume.dim(), intensity.dim())?;
        let mut trace = PipelineTrace::with_debug_dir(self.config.debug_dir.clone());

        let segmentation = self.segmenter.segment(volume, &mut trace)?;

        let segmented_table = trace.time(Stage::RegionTable, vec![], || {
            RegionAnalyzer::compute_region_table(&segmentation.labels, Some(intensity))
        })?;

        let (min, max) = (self.config.min_cell_voxels, self.config.max_cell_voxels);
        let (filtered, filtered_table) = trace.time(
            Stage::FilterBySize,
            vec![("min_voxels", min.to_string()), ("max_voxels", max.to_string())],
            || {
                RegionFilter::filter_by_size(
                    segmentation.labels.clone(),
                    segmented_table.clone(),
                    min,
                    max,
                )
            },
        )?;
        trace.dump_labels(Stage::FilterBySize, &filtered)?;
        info!("Post filter {} cells remain", filtered_table.len());

        Ok(PipelineResult {
            mask: segmentation.mask,
            segmented: segmentation.labels,
            segmented_table,
            filtered,
            filtered_table,
            trace,
        })
    }

    /// Loads the segmentation and intensity channels of `unit`'s series and
    /// runs them. The channel of `unit` itself is ignored.
    pub fn analyse_unit(
        &self,
        loader: &impl MicroscopyLoader,
        unit: &UnitId,
    ) -> Result<PipelineResult> {
        info!("Analysing {} series {}", unit.path.display(), unit.series);
        let volume = loader.load(&unit.with_channel(self.config.segmentation_channel))?;
        let intensity = loader.load(&unit.with_channel(self.config.intensity_channel))?;
        self.run(&volume, &intensity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SegmentationError;
    use ndarray::Array3;
    use std::cell::RefCell;

    struct RecordingLoader {
        requested: RefCell<Vec<usize>>,
    }

    impl MicroscopyLoader for RecordingLoader {
        fn load(&self, unit: &UnitId) -> Result<IntensityVolume> {
            self.requested.borrow_mut().push(unit.channel);
            Ok(IntensityVolume::new(Array3::from_elem((3, 3, 3), 100)))
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = PipelineConfig {
            min_cell_voxels: 10,
            max_cell_voxels: 1,
            ..PipelineConfig::default()
        };
        assert!(Pipeline::new(config).is_err());
    }

    #[test]
    fn test_shape_mismatch_is_checked_first() {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let volume = IntensityVolume::new(Array3::zeros((3, 3, 3)));
        let intensity = IntensityVolume::new(Array3::zeros((3, 3, 2)));

        assert!(matches!(
            pipeline.run(&volume, &intensity),
            Err(SegmentationError::InputShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_analyse_unit_loads_configured_channels() {
        let loader = RecordingLoader {
            requested: RefCell::new(Vec::new()),
        };
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();

        let result = pipeline.analyse_unit(&loader, &UnitId::new("root.lif", 2, 9));

        assert!(result.unwrap_err().is_empty_region_set());
        assert_eq!(*loader.requested.borrow(), vec![1, 0]);
    }
}
