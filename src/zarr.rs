//! Zarr v2 directory stores: one group, one single-chunk array per
//! coordinate and variable, xarray-compatible `_ARRAY_DIMENSIONS`.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tempfile::Builder;

use crate::cf::{self, EPOCH_HOURS};
use crate::config::ChunkCompression;
use crate::dataset::{CoordValues, Dataset, STEP, TIME};
use crate::error::IngestError;
use crate::store::atomic_rename_dir;

const VALID_TIME: &str = "valid_time";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMetadata {
    pub zarr_format: u8,
    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub dtype: String,
    pub compressor: Option<Value>,
    pub fill_value: Value,
    pub order: String,
    pub filters: Option<Value>,
}

enum Payload {
    F4(Vec<f32>),
    F8(Vec<f64>),
    I8(Vec<i64>),
}

impl Payload {
    fn dtype(&self) -> &'static str {
        match self {
            Payload::F4(_) => "<f4",
            Payload::F8(_) => "<f8",
            Payload::I8(_) => "<i8",
        }
    }

    fn fill_value(&self) -> Value {
        match self {
            Payload::I8(_) => Value::Null,
            _ => json!("NaN"),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::F4(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Payload::F8(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Payload::I8(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZarrWriter {
    compression: ChunkCompression,
}

impl ZarrWriter {
    pub fn new(compression: ChunkCompression) -> Self {
        Self { compression }
    }

    /// Writes `dataset` next to `target` and renames it into place, so a
    /// store either exists complete or not at all.
    pub fn write(&self, dataset: &Dataset, target: &Path) -> Result<(), IngestError> {
        let parent = target.parent().ok_or_else(|| {
            IngestError::Filesystem(format!("{} has no parent directory", target.display()))
        })?;
        fs::create_dir_all(parent).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        let staging = Builder::new()
            .prefix(".tmp-zarr-")
            .tempdir_in(parent)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;

        self.write_tree(dataset, staging.path())?;

        let staged = staging.keep();
        atomic_rename_dir(&staged, target).map_err(|err| {
            let _ = fs::remove_dir_all(&staged);
            IngestError::Filesystem(format!("rename into {}: {err}", target.display()))
        })
    }

    fn write_tree(&self, dataset: &Dataset, root: &Path) -> Result<(), IngestError> {
        write_json(&root.join(".zgroup"), &json!({ "zarr_format": 2 }))?;
        write_json(&root.join(".zattrs"), &json!({}))?;

        for dim in dataset.dims() {
            let (payload, units) = match &dim.coord {
                CoordValues::Time(values) => (
                    Payload::F8(values.iter().map(|t| cf::encode_hours(Some(*t))).collect()),
                    Some(EPOCH_HOURS),
                ),
                CoordValues::Hours(values) => (Payload::I8(values.clone()), Some("hours")),
                CoordValues::Float(values) => (Payload::F8(values.clone()), None),
            };
            let units = units.or(default_units(&dim.name));
            self.write_array(root, &dim.name, &[dim.name.as_str()], &[dim.len()], payload, units, None)?;
        }

        let mut aux = Vec::new();
        if let Some(valid) = dataset.valid_time() {
            let shape = dataset.shape_of(&[TIME, STEP])?;
            let payload = Payload::F8(valid.iter().map(|t| cf::encode_hours(*t)).collect());
            self.write_array(root, VALID_TIME, &[TIME, STEP], &shape, payload, Some(EPOCH_HOURS), None)?;
            aux.push(VALID_TIME.to_string());
        }
        for (name, value) in dataset.scalar_coords() {
            self.write_array(root, name, &[], &[], Payload::F8(vec![*value]), default_units(name), None)?;
            aux.push(name.clone());
        }

        let coordinates = (!aux.is_empty()).then(|| aux.join(" "));
        for (name, variable) in dataset.variables() {
            let dims = variable.dims.iter().map(String::as_str).collect::<Vec<_>>();
            let shape = dataset.shape_of(&dims)?;
            self.write_array(
                root,
                name,
                &dims,
                &shape,
                Payload::F4(variable.data.clone()),
                default_units(name),
                coordinates.as_deref(),
            )?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_array(
        &self,
        root: &Path,
        name: &str,
        dims: &[&str],
        shape: &[usize],
        payload: Payload,
        units: Option<&str>,
        coordinates: Option<&str>,
    ) -> Result<(), IngestError> {
        let dir = root.join(name);
        fs::create_dir_all(&dir).map_err(|err| IngestError::Filesystem(err.to_string()))?;

        let metadata = ArrayMetadata {
            zarr_format: 2,
            shape: shape.to_vec(),
            chunks: shape.iter().map(|len| (*len).max(1)).collect(),
            dtype: payload.dtype().to_string(),
            compressor: match self.compression {
                ChunkCompression::None => None,
                ChunkCompression::Gzip => Some(json!({ "id": "gzip", "level": 1 })),
            },
            fill_value: payload.fill_value(),
            order: "C".to_string(),
            filters: None,
        };
        let metadata = serde_json::to_value(&metadata)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        write_json(&dir.join(".zarray"), &metadata)?;

        let mut attrs = Map::new();
        attrs.insert("_ARRAY_DIMENSIONS".into(), json!(dims));
        if let Some(units) = units {
            attrs.insert("units".into(), json!(units));
        }
        if let Some(coordinates) = coordinates {
            attrs.insert("coordinates".into(), json!(coordinates));
        }
        write_json(&dir.join(".zattrs"), &Value::Object(attrs))?;

        if shape.contains(&0) {
            return Ok(());
        }
        let key = if shape.is_empty() {
            "0".to_string()
        } else {
            vec!["0"; shape.len()].join(".")
        };
        let bytes = payload.to_bytes();
        let bytes = match self.compression {
            ChunkCompression::None => bytes,
            ChunkCompression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::new(1));
                encoder
                    .write_all(&bytes)
                    .map_err(|err| IngestError::Filesystem(err.to_string()))?;
                encoder
                    .finish()
                    .map_err(|err| IngestError::Filesystem(err.to_string()))?
            }
        };
        fs::write(dir.join(key), bytes).map_err(|err| IngestError::Filesystem(err.to_string()))
    }
}

/// One decoded array of a store written by [`ZarrWriter`].
#[derive(Debug, Clone, PartialEq)]
pub struct ZarrArray {
    pub shape: Vec<usize>,
    pub dims: Vec<String>,
    pub units: Option<String>,
    pub values: Vec<f64>,
}

pub fn read_array(store: &Path, name: &str) -> Result<ZarrArray, IngestError> {
    let dir = store.join(name);
    let metadata: ArrayMetadata = read_json(&dir.join(".zarray"))?;
    let attrs: Value = read_json(&dir.join(".zattrs"))?;
    let dims = attrs
        .get("_ARRAY_DIMENSIONS")
        .and_then(Value::as_array)
        .map(|dims| {
            dims.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let units = attrs.get("units").and_then(Value::as_str).map(str::to_string);

    let count = metadata.shape.iter().product::<usize>();
    if count == 0 {
        return Ok(ZarrArray {
            shape: metadata.shape,
            dims,
            units,
            values: Vec::new(),
        });
    }
    let key = if metadata.shape.is_empty() {
        "0".to_string()
    } else {
        vec!["0"; metadata.shape.len()].join(".")
    };
    let raw = fs::read(dir.join(key)).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    let bytes = if metadata.compressor.is_some() {
        let mut decoded = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        decoded
    } else {
        raw
    };
    let values = match metadata.dtype.as_str() {
        "<f4" => bytes
            .chunks_exact(4)
            .map(|chunk| f64::from(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
            .collect(),
        "<f8" => bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf)
            })
            .collect(),
        "<i8" => bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                i64::from_le_bytes(buf) as f64
            })
            .collect(),
        other => {
            return Err(IngestError::Dataset(format!("unsupported zarr dtype {other}")));
        }
    };
    Ok(ZarrArray {
        shape: metadata.shape,
        dims,
        units,
        values,
    })
}

fn default_units(name: &str) -> Option<&'static str> {
    match name {
        "latitude" => Some("degrees_north"),
        "longitude" => Some("degrees_east"),
        "level" => Some("hPa"),
        _ => None,
    }
}

fn write_json(path: &Path, value: &Value) -> Result<(), IngestError> {
    let content =
        serde_json::to_vec_pretty(value).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    fs::write(path, content)
        .map_err(|err| IngestError::Filesystem(format!("write {}: {err}", path.display())))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, IngestError> {
    let content = fs::read(path)
        .map_err(|err| IngestError::Filesystem(format!("read {}: {err}", path.display())))?;
    serde_json::from_slice(&content).map_err(|err| IngestError::Dataset(err.to_string()))
}
