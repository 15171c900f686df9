use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentationError, ensure_same_shape};
use crate::volume::{IntensityVolume, LabeledVolume};

/// Statistics of one labeled region.
///
/// `centroid` is the mean voxel index in `(row, column, depth)` order, not a
/// physical position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    #[serde(rename = "identifier")]
    pub label: u32,
    #[serde(rename = "voxels")]
    pub voxel_count: u64,
    pub centroid: [f64; 3],
    #[serde(
        rename = "total_intensity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub summed_intensity: Option<u64>,
}

impl RegionRecord {
    /// Mean intensity per voxel, when an intensity channel was supplied.
    pub fn intensity_per_voxel(&self) -> Option<f64> {
        self.summed_intensity
            .map(|sum| sum as f64 / self.voxel_count as f64)
    }
}

/// One record per distinct non-zero label of a [`LabeledVolume`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegionTable {
    records: BTreeMap<u32, RegionRecord>,
}

impl RegionTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, label: u32) -> Option<&RegionRecord> {
        self.records.get(&label)
    }

    pub fn contains(&self, label: u32) -> bool {
        self.records.contains_key(&label)
    }

    pub fn labels(&self) -> BTreeSet<u32> {
        self.records.keys().copied().collect()
    }

    /// Records in ascending label order.
    pub fn records(&self) -> impl Iterator<Item = &RegionRecord> {
        self.records.values()
    }

    pub fn to_vec(&self) -> Vec<RegionRecord> {
        self.records.values().cloned().collect()
    }

    /// Writes the records as a pretty-printed JSON array, ascending by label.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.to_vec())?;
        Ok(())
    }

    /// Reads a table written by [`RegionTable::write_json`].
    pub fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let records: Vec<RegionRecord> = serde_json::from_reader(BufReader::new(file))?;
        Ok(records.into_iter().collect())
    }

    /// Splits the table by `keep`, returning the rejected labels.
    pub(crate) fn retain(
        &mut self,
        mut keep: impl FnMut(&RegionRecord) -> bool,
    ) -> BTreeSet<u32> {
        let mut rejected = BTreeSet::new();
        self.records.retain(|&label, record| {
            let kept = keep(record);
            if !kept {
                rejected.insert(label);
            }
            kept
        });
        rejected
    }

    /// Fails unless the table describes exactly the labels in `labeled`,
    /// with matching voxel counts.
    pub(crate) fn ensure_matches(&self, labeled: &LabeledVolume) -> Result<()> {
        let mut counts: BTreeMap<u32, u64> = BTreeMap::new();
        for &label in labeled.data().iter().filter(|&&label| label != 0) {
            *counts.entry(label).or_default() += 1;
        }

        let missing = counts.keys().find(|label| !self.records.contains_key(label));
        let stale = self.records.values().find(|record| {
            counts.get(&record.label).copied() != Some(record.voxel_count)
        });
        match (missing, stale) {
            (Some(&label), _) => Err(SegmentationError::StaleRegionTable { label }),
            (None, Some(record)) => Err(SegmentationError::StaleRegionTable {
                label: record.label,
            }),
            (None, None) => Ok(()),
        }
    }
}

impl FromIterator<RegionRecord> for RegionTable {
    fn from_iter<T: IntoIterator<Item = RegionRecord>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().map(|r| (r.label, r)).collect(),
        }
    }
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    coordinate_sums: [u64; 3],
    intensity_sum: u64,
}

pub struct RegionAnalyzer;

impl RegionAnalyzer {
    /// Computes the region table of `labeled`.
    ///
    /// When `intensity` is given it must have exactly the shape of `labeled`;
    /// each record then carries the sum of its voxels' intensities.
    pub fn compute_region_table(
        labeled: &LabeledVolume,
        intensity: Option<&IntensityVolume>,
    ) -> Result<RegionTable> {
        if let Some(intensity) = intensity {
            ensure_same_shape(labeled.dim(), intensity.dim())?;
        }

        let mut accumulators: BTreeMap<u32, Accumulator> = BTreeMap::new();
        for ((r, c, d), &label) in labeled.data().indexed_iter() {
            if label == 0 {
                continue;
            }
            let acc = accumulators.entry(label).or_default();
            acc.count += 1;
            acc.coordinate_sums[0] += r as u64;
            acc.coordinate_sums[1] += c as u64;
            acc.coordinate_sums[2] += d as u64;
            if let Some(intensity) = intensity {
                acc.intensity_sum += u64::from(intensity.data()[[r, c, d]]);
            }
        }

        let table: RegionTable = accumulators
            .into_iter()
            .map(|(label, acc)| {
                let n = acc.count as f64;
                RegionRecord {
                    label,
                    voxel_count: acc.count,
                    centroid: acc.coordinate_sums.map(|sum| sum as f64 / n),
                    summed_intensity: intensity.map(|_| acc.intensity_sum),
                }
            })
            .collect();

        debug!("Region table with {} regions", table.len());
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn example_volume() -> LabeledVolume {
        let mut data = Array3::<u32>::from_elem((4, 4, 2), 2);
        data[[0, 0, 0]] = 1;
        data[[0, 1, 0]] = 1;
        data[[1, 0, 0]] = 1;
        LabeledVolume::new(data)
    }

    #[test]
    fn test_statistics_of_small_volume() {
        let labeled = example_volume();
        let intensity = IntensityVolume::new(Array3::from_elem((4, 4, 2), 10));

        let table = RegionAnalyzer::compute_region_table(&labeled, Some(&intensity)).unwrap();

        assert_eq!(table.len(), 2);
        let one = table.get(1).unwrap();
        assert_eq!(one.voxel_count, 3);
        assert_eq!(one.summed_intensity, Some(30));
        assert_relative_eq!(one.centroid[0], 1.0 / 3.0);
        assert_relative_eq!(one.centroid[1], 1.0 / 3.0);
        assert_relative_eq!(one.centroid[2], 0.0);

        let two = table.get(2).unwrap();
        assert_eq!(two.voxel_count, 29);
        assert_eq!(two.summed_intensity, Some(290));
        assert_relative_eq!(two.intensity_per_voxel().unwrap(), 10.0);
    }

    #[test]
    fn test_without_intensity() {
        let table = RegionAnalyzer::compute_region_table(&example_volume(), None).unwrap();
        assert!(table.records().all(|r| r.summed_intensity.is_none()));
        assert_eq!(table.get(1).unwrap().intensity_per_voxel(), None);
    }

    #[test]
    fn test_non_contiguous_labels() {
        let mut data = Array3::<u32>::zeros((3, 3, 3));
        data[[2, 2, 2]] = 900;
        data[[0, 0, 1]] = 17;
        data[[0, 0, 2]] = 17;

        let table = RegionAnalyzer::compute_region_table(&LabeledVolume::new(data), None).unwrap();

        assert_eq!(table.labels(), BTreeSet::from([17, 900]));
        assert_eq!(table.get(17).unwrap().centroid, [0.0, 0.0, 1.5]);
        assert_eq!(table.get(900).unwrap().voxel_count, 1);
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let intensity = IntensityVolume::new(Array3::zeros((4, 4, 3)));

        let err = RegionAnalyzer::compute_region_table(&example_volume(), Some(&intensity))
            .unwrap_err();

        assert!(matches!(
            err,
            SegmentationError::InputShapeMismatch {
                expected: (4, 4, 2),
                found: (4, 4, 3)
            }
        ));
    }

    #[test]
    fn test_record_serializes_with_report_field_names() {
        let record = RegionRecord {
            label: 5,
            voxel_count: 12,
            centroid: [1.0, 2.0, 3.5],
            summed_intensity: Some(480),
        };
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["identifier"], 5);
        assert_eq!(json["voxels"], 12);
        assert_eq!(json["centroid"][2], 3.5);
        assert_eq!(json["total_intensity"], 480);

        let without = RegionRecord {
            summed_intensity: None,
            ..record
        };
        let json = serde_json::to_value(&without).unwrap();
        assert!(json.get("total_intensity").is_none());
    }

    #[test]
    fn test_stale_voxel_count_is_detected() {
        let labeled = example_volume();
        let table = RegionAnalyzer::compute_region_table(&labeled, None).unwrap();

        let mut data = labeled.into_inner();
        data[[3, 3, 1]] = 1;
        let grown = LabeledVolume::new(data);

        assert_eq!(grown.labels(), table.labels());
        assert!(matches!(
            table.ensure_matches(&grown),
            Err(SegmentationError::StaleRegionTable { label: 1 })
        ));
    }

    #[test]
    fn test_json_file_round_trip() {
        let labeled = example_volume();
        let intensity = IntensityVolume::new(Array3::from_elem((4, 4, 2), 10));
        let table = RegionAnalyzer::compute_region_table(&labeled, Some(&intensity)).unwrap();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("cellinfo.json");

        table.write_json(&path).unwrap();
        let read = RegionTable::read_json(&path).unwrap();

        assert_eq!(read.labels(), BTreeSet::from([1, 2]));
        assert_eq!(read.get(2).unwrap().voxel_count, 29);
        assert_eq!(read.get(1).unwrap().summed_intensity, Some(30));
        assert_relative_eq!(read.get(1).unwrap().centroid[0], 1.0 / 3.0, epsilon = 1e-12);
        assert!(read.ensure_matches(&labeled).is_ok());
    }

    #[test]
    fn test_stale_table_is_detected() {
        let labeled = example_volume();
        let table = RegionAnalyzer::compute_region_table(&labeled, None).unwrap();
        assert!(table.ensure_matches(&labeled).is_ok());

        let mut data = labeled.into_inner();
        data[[0, 0, 0]] = 3;
        let changed = LabeledVolume::new(data);
        assert!(matches!(
            table.ensure_matches(&changed),
            Err(SegmentationError::StaleRegionTable { label: 3 })
        ));
    }
}
