//! # Root-cell-volume library
//!
//! This crate segments 3D confocal stacks of plant roots into individual
//! cells and measures them.
//!
//! Volumes are dense `[[row, column, depth]]` arrays, one greyscale slice
//! per depth plane. A unit (file, series, channel) is run through a fixed
//! sequence of stages:
//!  - Foreground mask (per-slice Otsu, small-component removal, convex hull)
//!  - Median denoise, gradient magnitude and discrete Gaussian smoothing
//!  - Marker-driven watershed on the smoothed gradient
//!  - Mask application and removal of cells touching the lateral faces
//!  - Per-cell statistics and size filtering
//!
//! Labeled volumes are persisted as directories of RGB slices, one
//! `z<index>.png` per depth plane, with each label packed into the three
//! colour channels. Independent units can be processed in parallel; within
//! a unit the heavier stages use rayon.
//!
//! Stage timings are collected in a [`PipelineTrace`] and logged through the
//! `log` facade. Setting [`PipelineConfig::debug_dir`] also dumps every
//! intermediate stack.
//!
//! # Examples
//!
//! ## Segmenting one series of a slice directory
//!
//! ```no_run
//! # use root_cell_volume::{Pipeline, PipelineConfig, SliceDirectoryLoader, UnitId};
//! let pipeline = Pipeline::new(PipelineConfig::default())
//!     .expect("default configuration should be valid");
//! let result = pipeline
//!     .analyse_unit(&SliceDirectoryLoader, &UnitId::new("stack", 0, 1))
//!     .expect("should have segmented the unit");
//! for record in result.filtered_table.records() {
//!     println!("{} {} {:?}", record.label, record.voxel_count, record.centroid);
//! }
//! result.persist("analysis").expect("should have written the stacks");
//! ```

pub mod config;
pub mod enums;
pub mod error;
pub mod intensity_stack;
pub mod label_codec;
pub mod mask;
pub mod pipeline;
pub mod preprocess;
pub mod region;
pub mod region_filter;
pub mod segmenter;
pub mod trace;
pub mod volume;
pub mod volume_loader;
pub mod watershed;

pub use config::PipelineConfig;
pub use error::{Result, SegmentationError};
pub use label_codec::LabelCodec;
pub use pipeline::{Pipeline, PipelineResult};
pub use region::{RegionAnalyzer, RegionRecord, RegionTable};
pub use trace::PipelineTrace;
pub use volume::{ForegroundMask, IntensityVolume, LabeledVolume};
pub use volume_loader::{MicroscopyLoader, SliceDirectoryLoader, UnitId, VolumeLoader};
