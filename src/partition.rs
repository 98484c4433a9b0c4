use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::dataset::{Dataset, TIME};
use crate::domain::TimeWindow;
use crate::error::IngestError;
use crate::fs_util::zip_dir;
use crate::source::SourceSpec;
use crate::store::Store;
use crate::zarr::ZarrWriter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyPartition {
    pub date: NaiveDate,
    pub path: Utf8PathBuf,
    pub timestamps: usize,
    pub zipped: bool,
}

/// Splits a harmonized window into one store per calendar day.
pub struct PartitionWriter<'a> {
    store: &'a Store,
    spec: &'a SourceSpec,
    writer: ZarrWriter,
    zip: bool,
}

impl<'a> PartitionWriter<'a> {
    pub fn new(store: &'a Store, spec: &'a SourceSpec, writer: ZarrWriter, zip: bool) -> Self {
        Self {
            store,
            spec,
            writer,
            zip,
        }
    }

    /// Every time index lands in exactly one partition, keyed by the date
    /// of its own timestamp. Null-filled days are written like any other.
    pub fn split_and_persist(
        &self,
        dataset: &Dataset,
        window: TimeWindow,
    ) -> Result<Vec<DailyPartition>, IngestError> {
        let times = dataset.times().ok_or_else(|| {
            IngestError::Dataset(format!("window {window} has no time coordinate"))
        })?;
        let mut groups = BTreeMap::<NaiveDate, Vec<usize>>::new();
        for (index, time) in times.iter().enumerate() {
            groups.entry(time.date()).or_default().push(index);
        }
        self.store.ensure_provider_dir(self.spec.provider)?;

        let mut partitions = Vec::with_capacity(groups.len());
        for (date, indices) in groups {
            let day = dataset.isel(TIME, &indices)?;
            let dir = self.store.partition_dir_path(self.spec, date);
            self.writer.write(&day, dir.as_std_path())?;

            let path = if self.zip {
                let zip_path = self.store.partition_zip_path(self.spec, date);
                zip_dir(dir.as_std_path(), zip_path.as_std_path())?;
                Store::remove_path(&dir)?;
                zip_path
            } else {
                dir
            };
            debug!(date = %date, timestamps = indices.len(), path = %path, "wrote partition");
            partitions.push(DailyPartition {
                date,
                path,
                timestamps: indices.len(),
                zipped: self.zip,
            });
        }
        info!(window = %window, partitions = partitions.len(), "persisted window");
        Ok(partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkCompression, Config, ConfigLoader};
    use crate::dataset::CoordValues;
    use crate::domain::{Provider, Resolution};

    #[test]
    fn keys_follow_timestamps() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let config = ConfigLoader::resolve_config(Config::default()).unwrap();
        let spec = SourceSpec::from_config(Provider::Era5, Resolution::default(), &config).unwrap();
        let store = Store::new(root);

        let day = |d: u32, h: u32| {
            NaiveDate::from_ymd_opt(2020, 1, d)
                .and_then(|date| date.and_hms_opt(h, 0, 0))
                .unwrap()
        };
        // unsorted on purpose: grouping must not rely on position
        let times = vec![day(2, 0), day(1, 0), day(1, 12), day(2, 12), day(3, 6)];
        let dataset = Dataset::new()
            .with_dim(TIME, CoordValues::Time(times))
            .unwrap()
            .with_variable("t", &[TIME], vec![1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap();

        let writer = PartitionWriter::new(&store, &spec, ZarrWriter::new(ChunkCompression::None), true);
        let partitions = writer
            .split_and_persist(&dataset, TimeWindow::new(2020, 1).unwrap())
            .unwrap();
        let summary = partitions
            .iter()
            .map(|p| (p.date.format("%Y%m%d").to_string(), p.timestamps))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                ("20200101".to_string(), 2),
                ("20200102".to_string(), 2),
                ("20200103".to_string(), 1),
            ]
        );
        let json = serde_json::to_value(&partitions[0]).unwrap();
        assert_eq!(json["path"], partitions[0].path.as_str());
        for partition in &partitions {
            assert!(partition.path.as_str().ends_with(".zarr.zip"));
            assert!(partition.path.as_std_path().exists());
            assert!(!store.partition_dir_path(&spec, partition.date).as_std_path().exists());
        }
    }
}
