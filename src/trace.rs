use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::GrayImage;
use log::{debug, info};
use ndarray::{Array3, s};
use web_time::Instant;

use crate::enums::Stage;
use crate::error::{Result, SegmentationError};
use crate::label_codec::{LabelCodec, slice_file_name};
use crate::volume::{ForegroundMask, LabeledVolume, field_slice_to_image};

/// One executed stage: what ran, with which parameters, for how long.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub stage: Stage,
    pub parameters: Vec<(&'static str, String)>,
    pub duration: Duration,
}

/// Explicit history of a pipeline invocation.
///
/// When a debug directory is configured, intermediate volumes are written to
/// `<debug_dir>/<NNN>_<stage>.stack/` in the order they are produced.
#[derive(Debug, Default)]
pub struct PipelineTrace {
    records: Vec<StageRecord>,
    debug_dir: Option<PathBuf>,
    dumps: usize,
}

impl PipelineTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug_dir(debug_dir: Option<PathBuf>) -> Self {
        Self {
            debug_dir,
            ..Self::default()
        }
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.records.iter().map(|r| r.stage).collect()
    }

    pub fn total_duration(&self) -> Duration {
        self.records.iter().map(|r| r.duration).sum()
    }

    pub fn record(
        &mut self,
        stage: Stage,
        parameters: Vec<(&'static str, String)>,
        duration: Duration,
    ) {
        info!("{stage} {parameters:?} took {:.3}s", duration.as_secs_f64());
        self.records.push(StageRecord {
            stage,
            parameters,
            duration,
        });
    }

    /// Runs `f` and records it as `stage`.
    pub fn time<T>(
        &mut self,
        stage: Stage,
        parameters: Vec<(&'static str, String)>,
        f: impl FnOnce() -> T,
    ) -> T {
        let start = Instant::now();
        let output = f();
        self.record(stage, parameters, start.elapsed());
        output
    }

    /// Directory for the next dump, emptied of whatever an earlier run left
    /// under the same name.
    fn next_dump_dir(&mut self, stage: Stage) -> Result<Option<PathBuf>> {
        let Some(dir) = self.debug_dir.as_ref() else {
            return Ok(None);
        };
        let path = dir.join(format!("{:03}_{}.stack", self.dumps, stage));
        self.dumps += 1;
        if path.is_dir() {
            debug!("Replacing stale dump {}", path.display());
            fs::remove_dir_all(&path)?;
        }
        Ok(Some(path))
    }

    pub(crate) fn dump_field(&mut self, stage: Stage, field: &Array3<f32>) -> Result<()> {
        let Some(dir) = self.next_dump_dir(stage)? else {
            return Ok(());
        };
        let min = field.iter().copied().fold(f32::INFINITY, f32::min);
        let max = field.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let depth = field.dim().2;
        write_gray_slices(&dir, depth, |z| {
            field_slice_to_image(&field.slice(s![.., .., z]), min, max)
        })
    }

    pub(crate) fn dump_mask(&mut self, stage: Stage, mask: &ForegroundMask) -> Result<()> {
        let Some(dir) = self.next_dump_dir(stage)? else {
            return Ok(());
        };
        let (rows, cols, depth) = mask.dim();
        write_gray_slices(&dir, depth, |z| {
            let slice = mask.slice(s![.., .., z]);
            let pixels = slice.iter().map(|&m| if m { 255 } else { 0 }).collect();
            GrayImage::from_raw(cols as u32, rows as u32, pixels)
        })
    }

    pub(crate) fn dump_labels(&mut self, stage: Stage, labels: &LabeledVolume) -> Result<()> {
        match self.next_dump_dir(stage)? {
            Some(dir) => LabelCodec::persist(labels, &dir),
            None => Ok(()),
        }
    }
}

fn write_gray_slices(
    dir: &Path,
    depth: usize,
    render: impl Fn(usize) -> Option<GrayImage>,
) -> Result<()> {
    fs::create_dir_all(dir)?;
    for z in 0..depth {
        let image = render(z).ok_or_else(|| SegmentationError::InvalidParameter {
            name: "debug_dir",
            reason: format!("slice {z} could not be rendered"),
        })?;
        image.save(dir.join(slice_file_name(z, depth)))?;
    }
    Ok(())
}
