use std::path::Path;

use log::{info, warn};
use root_cell_volume::{Pipeline, PipelineConfig, SliceDirectoryLoader, UnitId};

fn main() -> root_cell_volume::Result<()> {
    env_logger::init();

    let config = if Path::new("pipeline.json").is_file() {
        PipelineConfig::from_json_file("pipeline.json")?
    } else {
        PipelineConfig::default()
    };
    let pipeline = Pipeline::new(config)?;

    let unit = UnitId::new("stack", 0, pipeline.config().segmentation_channel);
    match pipeline.analyse_unit(&SliceDirectoryLoader, &unit) {
        Ok(result) => {
            for record in result.filtered_table.records() {
                info!(
                    "cell {} voxels {} centroid {:?} intensity {:?}",
                    record.label, record.voxel_count, record.centroid, record.summed_intensity
                );
            }
            info!("Finished in {:?}", result.trace.total_duration());
            result.persist("analysis")
        }
        Err(err) if err.is_empty_region_set() => {
            warn!("{err}");
            Ok(())
        }
        Err(err) => Err(err),
    }
}
