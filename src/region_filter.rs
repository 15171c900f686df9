use log::info;

use crate::error::{Result, SegmentationError};
use crate::region::{RegionRecord, RegionTable};
use crate::volume::LabeledVolume;

/// Removes regions from a labeled volume and its table in lockstep.
pub struct RegionFilter;

impl RegionFilter {
    /// Keeps the regions for which `keep` holds; every other label is zeroed
    /// in the volume and dropped from the table.
    ///
    /// # Errors
    ///
    /// `StaleRegionTable` if `table` does not describe `labeled`, and
    /// `EmptyRegionSet` if nothing survives.
    pub fn filter_by(
        mut labeled: LabeledVolume,
        mut table: RegionTable,
        keep: impl FnMut(&RegionRecord) -> bool,
    ) -> Result<(LabeledVolume, RegionTable)> {
        table.ensure_matches(&labeled)?;

        let before = table.len();
        let rejected = table.retain(keep);
        labeled.remove_labels(&rejected);
        info!("Filter kept {} of {before} regions", table.len());

        if table.is_empty() {
            return Err(SegmentationError::EmptyRegionSet { stage: "filtering" });
        }
        Ok((labeled, table))
    }

    /// Keeps regions whose voxel count lies in `[min_voxels, max_voxels]`.
    pub fn filter_by_size(
        labeled: LabeledVolume,
        table: RegionTable,
        min_voxels: u64,
        max_voxels: u64,
    ) -> Result<(LabeledVolume, RegionTable)> {
        if min_voxels > max_voxels {
            return Err(SegmentationError::InvalidParameter {
                name: "min_cell_voxels",
                reason: format!("{min_voxels} is above max_cell_voxels {max_voxels}"),
            });
        }
        info!("Filter cells < {min_voxels} voxels");
        info!("Filter cells > {max_voxels} voxels");
        Self::filter_by(labeled, table, |record| {
            (min_voxels..=max_voxels).contains(&record.voxel_count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionAnalyzer;
    use ndarray::Array3;

    /// Labels 1..=4 with 1, 2, 3 and 4 voxels respectively along the row axis.
    fn staircase() -> (LabeledVolume, RegionTable) {
        let data = Array3::from_shape_fn((4, 4, 1), |(r, c, _)| {
            if c <= r { r as u32 + 1 } else { 0 }
        });
        let labeled = LabeledVolume::new(data);
        let table = RegionAnalyzer::compute_region_table(&labeled, None).unwrap();
        (labeled, table)
    }

    #[test]
    fn test_size_bounds_are_inclusive() {
        let (labeled, table) = staircase();

        let (filtered, filtered_table) =
            RegionFilter::filter_by_size(labeled, table, 2, 3).unwrap();

        assert_eq!(filtered_table.labels().into_iter().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(filtered.labels(), filtered_table.labels());
        assert_eq!(filtered.data()[[0, 0, 0]], 0);
        assert_eq!(filtered.data()[[3, 3, 0]], 0);
        assert_eq!(filtered.data()[[2, 1, 0]], 3);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let (labeled, table) = staircase();

        let once = RegionFilter::filter_by_size(labeled, table, 2, 4).unwrap();
        let twice = RegionFilter::filter_by_size(once.0.clone(), once.1.clone(), 2, 4).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_filter_never_grows_table() {
        for (min, max) in [(0, 10), (1, 1), (3, 4), (4, 4), (0, 0)] {
            let (labeled, table) = staircase();
            let before = table.len();
            match RegionFilter::filter_by_size(labeled, table, min, max) {
                Ok((filtered, filtered_table)) => {
                    assert!(filtered_table.len() <= before);
                    assert_eq!(filtered.labels(), filtered_table.labels());
                }
                Err(err) => assert!(err.is_empty_region_set()),
            }
        }
    }

    #[test]
    fn test_nothing_survives() {
        let (labeled, table) = staircase();
        let err = RegionFilter::filter_by_size(labeled, table, 100, 200).unwrap_err();
        assert!(err.is_empty_region_set());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let (labeled, table) = staircase();
        assert!(matches!(
            RegionFilter::filter_by_size(labeled, table, 5, 4),
            Err(SegmentationError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_stale_table_rejected() {
        let (labeled, _) = staircase();
        let (_, other_table) = {
            let data = Array3::from_elem((4, 4, 1), 9u32);
            let other = LabeledVolume::new(data);
            let table = RegionAnalyzer::compute_region_table(&other, None).unwrap();
            (other, table)
        };

        assert!(matches!(
            RegionFilter::filter_by_size(labeled, other_table, 0, 100),
            Err(SegmentationError::StaleRegionTable { .. })
        ));
    }

    #[test]
    fn test_filter_by_predicate() {
        let (labeled, table) = staircase();

        let (filtered, filtered_table) =
            RegionFilter::filter_by(labeled, table, |record| record.centroid[0] > 1.5).unwrap();

        assert_eq!(filtered_table.labels().into_iter().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(filtered.labels(), filtered_table.labels());
    }
}
