use std::fmt;

/// Array axes of every volume, in storage order `[[row, column, depth]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Row,
    Column,
    Depth,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Row, Axis::Column, Axis::Depth];

    pub fn index(self) -> usize {
        match self {
            Axis::Row => 0,
            Axis::Column => 1,
            Axis::Depth => 2,
        }
    }
}

/// Named pipeline stages, in the order the segmenter runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ForegroundMask,
    Denoise,
    GradientMagnitude,
    Smooth,
    Watershed,
    ApplyMask,
    RemoveBorderLabels,
    RegionTable,
    FilterBySize,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::ForegroundMask => "foreground_mask",
            Stage::Denoise => "denoise",
            Stage::GradientMagnitude => "gradient_magnitude",
            Stage::Smooth => "smooth",
            Stage::Watershed => "watershed",
            Stage::ApplyMask => "apply_mask",
            Stage::RemoveBorderLabels => "remove_border_labels",
            Stage::RegionTable => "region_table",
            Stage::FilterBySize => "filter_by_size",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
