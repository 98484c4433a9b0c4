use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::{Builder, TempDir};

use crate::domain::{Provider, TimeWindow};
use crate::error::IngestError;
use crate::source::SourceSpec;

pub const ZARR_EXT: &str = "zarr";
pub const ZIP_EXT: &str = "zarr.zip";
pub const MARKER_EXT: &str = "complete";

/// Output directory tree: one sub-directory per provider holding the daily
/// partitions and window sentinels.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn provider_dir(&self, provider: Provider) -> Utf8PathBuf {
        self.root.join(provider.as_str())
    }

    pub fn ensure_provider_dir(&self, provider: Provider) -> Result<Utf8PathBuf, IngestError> {
        let dir = self.provider_dir(provider);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(dir)
    }

    /// `{provider}_full_{res}deg_{YYYYMMDD}`
    pub fn partition_key(spec: &SourceSpec, date: NaiveDate) -> String {
        format!("{}{}", spec.partition_prefix(), date.format("%Y%m%d"))
    }

    /// `{provider}_full_{res}deg_{YYYYMM}`
    pub fn window_prefix(spec: &SourceSpec, window: TimeWindow) -> String {
        format!("{}{}", spec.partition_prefix(), window.compact())
    }

    pub fn partition_dir_path(&self, spec: &SourceSpec, date: NaiveDate) -> Utf8PathBuf {
        self.provider_dir(spec.provider)
            .join(format!("{}.{ZARR_EXT}", Self::partition_key(spec, date)))
    }

    pub fn partition_zip_path(&self, spec: &SourceSpec, date: NaiveDate) -> Utf8PathBuf {
        self.provider_dir(spec.provider)
            .join(format!("{}.{ZIP_EXT}", Self::partition_key(spec, date)))
    }

    pub fn marker_path(&self, spec: &SourceSpec, window: TimeWindow) -> Utf8PathBuf {
        self.provider_dir(spec.provider)
            .join(format!("{}.{MARKER_EXT}", Self::window_prefix(spec, window)))
    }

    /// Persisted partitions (directories or zips) of one window.
    pub fn window_partitions(
        &self,
        spec: &SourceSpec,
        window: TimeWindow,
    ) -> Result<Vec<Utf8PathBuf>, IngestError> {
        let prefix = Self::window_prefix(spec, window);
        let dir = self.provider_dir(spec.provider);
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in dir
            .read_dir_utf8()
            .map_err(|err| IngestError::Filesystem(err.to_string()))?
        {
            let entry = entry.map_err(|err| IngestError::Filesystem(err.to_string()))?;
            let name = entry.file_name();
            let is_partition =
                name.ends_with(&format!(".{ZARR_EXT}")) || name.ends_with(&format!(".{ZIP_EXT}"));
            if name.starts_with(&prefix) && is_partition {
                found.push(entry.path().to_path_buf());
            }
        }
        found.sort();
        Ok(found)
    }

    pub fn has_any_partition(
        &self,
        spec: &SourceSpec,
        window: TimeWindow,
    ) -> Result<bool, IngestError> {
        Ok(!self.window_partitions(spec, window)?.is_empty())
    }

    pub fn has_marker(&self, spec: &SourceSpec, window: TimeWindow) -> bool {
        self.marker_path(spec, window).as_std_path().exists()
    }

    pub fn write_marker(
        &self,
        spec: &SourceSpec,
        window: TimeWindow,
        days: usize,
    ) -> Result<Utf8PathBuf, IngestError> {
        let marker = WindowMarker {
            provider: spec.provider.to_string(),
            resolution: spec.resolution.to_string(),
            window: window.key(),
            days,
            written_at: chrono::Utc::now().to_rfc3339(),
            tool: format!("s2s-ingest/{}", env!("CARGO_PKG_VERSION")),
        };
        let path = self.marker_path(spec, window);
        let content = serde_json::to_vec_pretty(&marker)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(&path, &content)?;
        Ok(path)
    }

    /// Per-window scratch directory for raw fragments and archive side
    /// files. Removed when the guard drops, on success or failure.
    pub fn scratch_dir(&self, spec: &SourceSpec, window: TimeWindow) -> Result<TempDir, IngestError> {
        let parent = self.ensure_provider_dir(spec.provider)?;
        Builder::new()
            .prefix(&format!(".scratch-{}-{}-", spec.provider, window.compact()))
            .tempdir_in(parent.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))
    }

    /// Every partition of this provider/resolution, parsed from its name.
    pub fn list_partitions(&self, spec: &SourceSpec) -> Result<Vec<PartitionEntry>, IngestError> {
        let dir = self.provider_dir(spec.provider);
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let prefix = spec.partition_prefix();
        let mut entries = Vec::new();
        for entry in dir
            .read_dir_utf8()
            .map_err(|err| IngestError::Filesystem(err.to_string()))?
        {
            let entry = entry.map_err(|err| IngestError::Filesystem(err.to_string()))?;
            let name = entry.file_name();
            if !name.starts_with(&prefix) {
                continue;
            }
            if let Some(parsed) = PartitionEntry::parse(name) {
                entries.push(PartitionEntry {
                    path: entry.path().to_path_buf(),
                    ..parsed
                });
            }
        }
        entries.sort_by_key(|entry| entry.date);
        Ok(entries)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), IngestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn remove_path(path: &Utf8Path) -> Result<(), IngestError> {
        let std_path = path.as_std_path();
        let result = if std_path.is_dir() {
            fs::remove_dir_all(std_path)
        } else if std_path.exists() {
            fs::remove_file(std_path)
        } else {
            Ok(())
        };
        result.map_err(|err| IngestError::Filesystem(format!("remove {path}: {err}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowMarker {
    pub provider: String,
    pub resolution: String,
    pub window: String,
    pub days: usize,
    pub written_at: String,
    pub tool: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionEntry {
    pub provider: String,
    pub resolution: String,
    pub date: NaiveDate,
    pub zipped: bool,
    pub path: Utf8PathBuf,
}

impl PartitionEntry {
    pub fn parse(name: &str) -> Option<Self> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| {
                Regex::new(r"^(?P<provider>[a-z0-9]+)_full_(?P<res>[0-9.]+)deg_(?P<date>\d{8})\.zarr(?P<zip>\.zip)?$").ok()
            })
            .as_ref()?;
        let caps = pattern.captures(name)?;
        let date = NaiveDate::parse_from_str(&caps["date"], "%Y%m%d").ok()?;
        Some(Self {
            provider: caps["provider"].to_string(),
            resolution: caps["res"].to_string(),
            date,
            zipped: caps.name("zip").is_some(),
            path: Utf8PathBuf::from(name),
        })
    }
}

pub(crate) fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| IngestError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    items.sort();
    Ok(items)
}

pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_partition_names() {
        let entry = PartitionEntry::parse("ecmwf_full_1.5deg_20200107.zarr").unwrap();
        assert_eq!(entry.provider, "ecmwf");
        assert_eq!(entry.resolution, "1.5");
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2020, 1, 7).unwrap());
        assert!(!entry.zipped);

        let zipped = PartitionEntry::parse("era5_full_0.25deg_20200131.zarr.zip").unwrap();
        assert!(zipped.zipped);

        assert!(PartitionEntry::parse("ecmwf_full_1.5deg_202001.complete").is_none());
        assert!(PartitionEntry::parse(".scratch-ecmwf-202001-abc").is_none());
    }

    #[test]
    fn entries_serialize_paths_as_strings() {
        let entry = PartitionEntry::parse("ncep_full_1.5deg_20200102.zarr.zip").unwrap();
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["path"], "ncep_full_1.5deg_20200102.zarr.zip");
        assert_eq!(value["date"], "2020-01-02");
        assert_eq!(value["zipped"], true);
    }
}
