use std::collections::BTreeSet;

use log::info;
use ndarray::{Array3, s};

use crate::enums::Stage;
use crate::error::{Result, SegmentationError, ensure_same_shape};
use crate::mask::build_foreground_mask;
use crate::preprocess::Preprocessor;
use crate::trace::PipelineTrace;
use crate::volume::{ForegroundMask, IntensityVolume, LabeledVolume};
use crate::watershed::watershed;

/// Stage parameters of [`Segmenter::segment`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationParams {
    pub gaussian_variance: f64,
    pub watershed_level: f64,
    pub min_connected_component_size: usize,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            gaussian_variance: 2.0,
            watershed_level: 250.0,
            min_connected_component_size: 1000,
        }
    }
}

/// Output of [`Segmenter::segment`].
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub labels: LabeledVolume,
    pub mask: ForegroundMask,
}

pub struct Segmenter {
    params: SegmentationParams,
}

impl Segmenter {
    pub fn new(params: SegmentationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SegmentationParams {
        &self.params
    }

    pub fn build_foreground_mask(&self, volume: &IntensityVolume) -> ForegroundMask {
        build_foreground_mask(volume, self.params.min_connected_component_size)
    }

    pub fn watershed_label(preprocessed: &Array3<f32>, level: f64) -> Result<LabeledVolume> {
        watershed(preprocessed, level)
    }

    /// Removes, in full, every label with at least one voxel outside `mask`.
    pub fn apply_mask(mut labeled: LabeledVolume, mask: &ForegroundMask) -> Result<LabeledVolume> {
        ensure_same_shape(labeled.dim(), mask.dim())?;

        let outside: BTreeSet<u32> = labeled
            .data()
            .iter()
            .zip(mask.iter())
            .filter(|&(&label, &inside)| label != 0 && !inside)
            .map(|(&label, _)| label)
            .collect();
        info!("Mask removes {} labels", outside.len());

        labeled.remove_labels(&outside);
        Ok(labeled)
    }

    /// Removes, in full, every label present on a lateral face (first or
    /// last row, first or last column). The depth faces are not considered
    /// since stacks are routinely cropped in depth.
    pub fn remove_border_touching_labels(mut labeled: LabeledVolume) -> LabeledVolume {
        let (rows, cols, _) = labeled.dim();
        if rows == 0 || cols == 0 {
            return labeled;
        }

        let data = labeled.data();
        let faces = [
            data.slice(s![0, .., ..]),
            data.slice(s![rows - 1, .., ..]),
            data.slice(s![.., 0, ..]),
            data.slice(s![.., cols - 1, ..]),
        ];
        let touching: BTreeSet<u32> = faces
            .iter()
            .flat_map(|face| face.iter().copied())
            .filter(|&label| label != 0)
            .collect();
        info!("Border removes {} labels", touching.len());

        labeled.remove_labels(&touching);
        labeled
    }

    /// Denoise, gradient magnitude and smoothing, recorded in `trace`.
    pub fn preprocess(
        &self,
        volume: &IntensityVolume,
        trace: &mut PipelineTrace,
    ) -> Result<Array3<f32>> {
        let raw = volume.to_f32();

        let denoised = trace.time(Stage::Denoise, vec![("radius", "1".to_string())], || {
            Preprocessor::denoise(&raw)
        });
        trace.dump_field(Stage::Denoise, &denoised)?;

        let gradient = trace.time(Stage::GradientMagnitude, vec![], || {
            Preprocessor::gradient_magnitude(&denoised)
        });
        trace.dump_field(Stage::GradientMagnitude, &gradient)?;

        let variance = self.params.gaussian_variance;
        let smoothed = trace.time(
            Stage::Smooth,
            vec![("variance", variance.to_string())],
            || Preprocessor::smooth(&gradient, variance),
        )?;
        trace.dump_field(Stage::Smooth, &smoothed)?;

        Ok(smoothed)
    }

    /// Full segmentation of one volume: mask, preprocessing, watershed, mask
    /// application and border removal, always in that order.
    ///
    /// # Errors
    ///
    /// `EmptyRegionSet` when no label survives, `InvalidParameter` for a bad
    /// variance or level.
    pub fn segment(
        &self,
        volume: &IntensityVolume,
        trace: &mut PipelineTrace,
    ) -> Result<Segmentation> {
        let mask = trace.time(
            Stage::ForegroundMask,
            vec![(
                "min_connected_component_size",
                self.params.min_connected_component_size.to_string(),
            )],
            || self.build_foreground_mask(volume),
        );
        trace.dump_mask(Stage::ForegroundMask, &mask)?;

        let landscape = self.preprocess(volume, trace)?;

        let level = self.params.watershed_level;
        let labels = trace.time(Stage::Watershed, vec![("level", level.to_string())], || {
            Self::watershed_label(&landscape, level)
        })?;
        trace.dump_labels(Stage::Watershed, &labels)?;

        let labels = trace.time(Stage::ApplyMask, vec![], || Self::apply_mask(labels, &mask))?;
        trace.dump_labels(Stage::ApplyMask, &labels)?;

        let labels = trace.time(Stage::RemoveBorderLabels, vec![], || {
            Self::remove_border_touching_labels(labels)
        });
        trace.dump_labels(Stage::RemoveBorderLabels, &labels)?;

        let count = labels.labels().len();
        info!("Root segmented into {count} cells");
        if count == 0 {
            return Err(SegmentationError::EmptyRegionSet {
                stage: "segmentation",
            });
        }

        Ok(Segmentation { labels, mask })
    }
}
