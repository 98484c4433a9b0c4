#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;

use s2s_ingest::archive::{ArchiveClient, RetrievalRequest};
use s2s_ingest::config::{Config, ConfigLoader, ResolvedConfig};
use s2s_ingest::dataset::{CoordValues, Dataset};
use s2s_ingest::error::IngestError;
use s2s_ingest::fragment::{FragmentReader, RawFragment};

pub const LATITUDES: [f64; 2] = [0.0, 1.5];
pub const LONGITUDES: [f64; 2] = [0.0, 1.5];

pub fn resolve(value: Value) -> ResolvedConfig {
    let config: Config = serde_json::from_value(value).unwrap();
    ConfigLoader::resolve_config(config).unwrap()
}

pub fn date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
}

pub fn midnight(value: &str) -> NaiveDateTime {
    date(value).and_hms_opt(0, 0, 0).unwrap()
}

/// Writes each request body as JSON to the destination.
#[derive(Default)]
pub struct MockArchive {
    pub requests: Mutex<Vec<RetrievalRequest>>,
    pub fail: bool,
}

impl MockArchive {
    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn recorded(&self) -> Vec<RetrievalRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ArchiveClient for MockArchive {
    fn retrieve(&self, request: &RetrievalRequest, destination: &Path) -> Result<(), IngestError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(IngestError::ArchiveStatus {
                status: 503,
                message: "archive offline".to_string(),
            });
        }
        let body = serde_json::to_vec(&Value::Object(request.body.clone())).unwrap();
        fs::write(destination, body).unwrap();
        Ok(())
    }
}

/// Synthesizes the dataset the archive would have returned for the
/// request stored in the fragment, with archive-native names.
#[derive(Default)]
pub struct MockReader {
    pub fail: bool,
}

impl FragmentReader for MockReader {
    fn read(&self, fragment: &RawFragment) -> Result<Dataset, IngestError> {
        if self.fail {
            return Err(IngestError::FragmentDecode {
                path: fragment.path.clone(),
                message: "corrupt grib".to_string(),
            });
        }
        let content = fs::read(&fragment.path).unwrap();
        let body: Value = serde_json::from_slice(&content).unwrap();
        if body.get("product_type").is_some() {
            Ok(era5_dataset(&body))
        } else {
            Ok(s2s_dataset(&body))
        }
    }
}

fn s2s_dataset(body: &Value) -> Dataset {
    let times = parse_dates(body["date"].as_str().unwrap())
        .into_iter()
        .map(|day| day.and_hms_opt(0, 0, 0).unwrap())
        .collect::<Vec<_>>();
    let steps = body["step"]
        .as_str()
        .unwrap()
        .split('/')
        .map(|step| step.parse::<i64>().unwrap())
        .collect::<Vec<_>>();
    let levels = body["levelist"]
        .as_str()
        .unwrap()
        .split('/')
        .map(|level| level.parse::<f64>().unwrap())
        .collect::<Vec<_>>();
    let (name, value) = match body["param"].as_str().unwrap() {
        "156" => ("gh", 5500.0),
        "130" => ("t", 250.0),
        "133" => ("q", 0.004),
        other => panic!("unexpected param {other}"),
    };

    let mut dataset = Dataset::new()
        .with_dim("time", CoordValues::Time(times.clone()))
        .unwrap()
        .with_dim("step", CoordValues::Hours(steps.clone()))
        .unwrap();
    let mut dims = vec!["time", "step"];
    let mut size = times.len() * steps.len();
    if levels.len() > 1 {
        dataset
            .add_dim("isobaricInhPa", CoordValues::Float(levels.clone()))
            .unwrap();
        dims.push("isobaricInhPa");
        size *= levels.len();
    } else {
        dataset.set_scalar_coord("isobaricInhPa", levels[0]);
    }
    dataset
        .add_dim("latitude", CoordValues::Float(LATITUDES.to_vec()))
        .unwrap();
    dataset
        .add_dim("longitude", CoordValues::Float(LONGITUDES.to_vec()))
        .unwrap();
    dims.extend(["latitude", "longitude"]);
    size *= LATITUDES.len() * LONGITUDES.len();
    dataset.set_scalar_coord("number", 0.0);
    dataset.add_variable(name, &dims, vec![value; size]).unwrap();
    dataset
}

fn era5_dataset(body: &Value) -> Dataset {
    let year = body["year"].as_str().unwrap().parse::<i32>().unwrap();
    let month = body["month"].as_str().unwrap().parse::<u32>().unwrap();
    let mut times = Vec::new();
    for day in body["day"].as_array().unwrap() {
        let day = day.as_str().unwrap().parse::<u32>().unwrap();
        for time in body["time"].as_array().unwrap() {
            let time = NaiveTime::parse_from_str(time.as_str().unwrap(), "%H:%M").unwrap();
            times.push(NaiveDate::from_ymd_opt(year, month, day).unwrap().and_time(time));
        }
    }
    let levels = body["pressure_level"]
        .as_array()
        .unwrap()
        .iter()
        .map(|level| level.as_str().unwrap().parse::<f64>().unwrap())
        .collect::<Vec<_>>();
    let size = times.len() * levels.len() * LATITUDES.len() * LONGITUDES.len();

    let mut dataset = Dataset::new()
        .with_dim("valid_time", CoordValues::Time(times))
        .unwrap()
        .with_dim("pressure_level", CoordValues::Float(levels))
        .unwrap()
        .with_dim("latitude", CoordValues::Float(LATITUDES.to_vec()))
        .unwrap()
        .with_dim("longitude", CoordValues::Float(LONGITUDES.to_vec()))
        .unwrap();
    let dims = ["valid_time", "pressure_level", "latitude", "longitude"];
    for variable in body["variable"].as_array().unwrap() {
        let (name, value) = match variable.as_str().unwrap() {
            "geopotential" => ("z", 9806.65),
            "temperature" => ("t", 250.0),
            "specific_humidity" => ("q", 0.004),
            "u_component_of_wind" => ("u", 5.0),
            "v_component_of_wind" => ("v", -5.0),
            other => panic!("unexpected variable {other}"),
        };
        dataset.add_variable(name, &dims, vec![value; size]).unwrap();
    }
    dataset
}

fn parse_dates(selector: &str) -> Vec<NaiveDate> {
    let parts = selector.split('/').collect::<Vec<_>>();
    if parts.len() == 3 && parts[1] == "to" {
        let (start, end) = (date(parts[0]), date(parts[2]));
        return start.iter_days().take_while(|day| *day <= end).collect();
    }
    parts.into_iter().map(date).collect()
}
