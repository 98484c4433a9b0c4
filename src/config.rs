use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{FragmentFormat, Provider, TimeWindow};
use crate::error::IngestError;
use crate::schedule::SparseSchedule;

pub const DEFAULT_CONFIG_FILE: &str = "s2s-ingest.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub years: Option<Vec<i32>>,
    #[serde(default)]
    pub era5_years: Option<Vec<i32>>,
    #[serde(default)]
    pub months: Option<Vec<String>>,
    #[serde(default)]
    pub days: Option<Vec<String>>,
    #[serde(default)]
    pub pressure_levels: Option<Vec<String>>,
    #[serde(default)]
    pub era5: Option<Era5Entry>,
    #[serde(default)]
    pub s2s: Option<S2sEntry>,
    #[serde(default)]
    pub store: Option<StoreEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Era5Entry {
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default)]
    pub times: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct S2sEntry {
    #[serde(default)]
    pub centers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub param_levels: Option<Vec<ParamLevelEntry>>,
    #[serde(default)]
    pub steps: Option<Vec<String>>,
    #[serde(default)]
    pub provider_steps: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub exceptions: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub sparse: Option<BTreeMap<String, SparseEntry>>,
    #[serde(default)]
    pub fragment_format: Option<FragmentFormat>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParamLevelEntry {
    pub name: String,
    pub param: String,
    pub levels: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SparseEntry {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub increments: Option<Vec<i64>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StoreEntry {
    #[serde(default)]
    pub compression: Option<ChunkCompression>,
    #[serde(default)]
    pub zip: Option<bool>,
    #[serde(default)]
    pub idempotency: Option<IdempotencyPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkCompression {
    None,
    Gzip,
}

/// How a window is judged already done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdempotencyPolicy {
    /// Any partition of the window counts. A crash mid-window leaves the
    /// window looking complete.
    AnyPartition,
    /// Only the window sentinel, written after every day is persisted.
    CompletionMarker,
}

#[derive(Debug, Clone)]
pub struct Era5Settings {
    pub dataset: String,
    pub variables: Vec<String>,
    pub times: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct S2sSettings {
    pub centers: BTreeMap<String, String>,
    pub param_levels: Vec<ParamLevelEntry>,
    pub steps: Vec<String>,
    pub provider_steps: BTreeMap<String, Vec<String>>,
    pub exceptions: BTreeMap<String, BTreeMap<String, String>>,
    pub sparse: BTreeMap<String, SparseSchedule>,
    pub fragment_format: FragmentFormat,
}

impl S2sSettings {
    pub fn steps_for(&self, provider: Provider) -> &[String] {
        self.provider_steps
            .get(provider.as_str())
            .unwrap_or(&self.steps)
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub compression: ChunkCompression,
    pub zip: bool,
    pub idempotency: IdempotencyPolicy,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_dir: Utf8PathBuf,
    pub years: Vec<i32>,
    pub era5_years: Vec<i32>,
    pub months: Vec<u32>,
    pub days: Vec<u32>,
    pub pressure_levels: Vec<String>,
    pub era5: Era5Settings,
    pub s2s: S2sSettings,
    pub store: StoreSettings,
}

impl ResolvedConfig {
    /// Windows in configuration order: every month of every year.
    pub fn windows(&self, provider: Provider) -> Result<Vec<TimeWindow>, IngestError> {
        let years = if provider.is_reanalysis() {
            &self.era5_years
        } else {
            &self.years
        };
        let mut windows = Vec::with_capacity(years.len() * self.months.len());
        for year in years {
            for month in &self.months {
                windows.push(TimeWindow::new(*year, *month)?);
            }
        }
        Ok(windows)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `s2s-ingest.json` when present, or the built-in
    /// defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, IngestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| IngestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| IngestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, IngestError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let data_dir = Utf8PathBuf::from(config.data_dir.unwrap_or_else(|| "data".to_string()));

        let years = config.years.unwrap_or_else(default_years);
        let era5_years = config.era5_years.unwrap_or_else(default_years);
        let months = config
            .months
            .unwrap_or_else(default_months)
            .iter()
            .map(|value| parse_bounded(value, 1, 12, "month"))
            .collect::<Result<Vec<_>, IngestError>>()?;
        let days = config
            .days
            .unwrap_or_else(default_days)
            .iter()
            .map(|value| parse_bounded(value, 1, 31, "day"))
            .collect::<Result<Vec<_>, IngestError>>()?;
        let pressure_levels = config
            .pressure_levels
            .unwrap_or_else(default_pressure_levels);

        let era5 = config.era5.unwrap_or_default();
        let era5 = Era5Settings {
            dataset: era5
                .dataset
                .unwrap_or_else(|| "reanalysis-era5-pressure-levels".to_string()),
            variables: era5.variables.unwrap_or_else(default_era5_variables),
            times: era5.times.unwrap_or_else(default_era5_times),
        };

        let s2s = config.s2s.unwrap_or_default();
        let centers = s2s.centers.unwrap_or_else(default_centers);
        for name in centers.keys() {
            name.parse::<Provider>()?;
        }
        for (name, table) in &s2s.exceptions {
            name.parse::<Provider>()?;
            for key in table.keys() {
                key.parse::<TimeWindow>()?;
            }
        }
        for name in s2s.provider_steps.keys() {
            name.parse::<Provider>()?;
        }
        let sparse = match s2s.sparse {
            Some(entries) => entries
                .into_iter()
                .map(|(name, entry)| {
                    name.parse::<Provider>()?;
                    Ok((name, resolve_sparse(entry)?))
                })
                .collect::<Result<BTreeMap<_, _>, IngestError>>()?,
            None => default_sparse(),
        };
        let s2s = S2sSettings {
            centers,
            param_levels: s2s.param_levels.unwrap_or_else(default_param_levels),
            steps: s2s.steps.unwrap_or_else(default_steps),
            provider_steps: s2s.provider_steps,
            exceptions: s2s.exceptions,
            sparse,
            fragment_format: s2s.fragment_format.unwrap_or(FragmentFormat::Netcdf),
        };

        let store = config.store.unwrap_or_default();
        let store = StoreSettings {
            compression: store.compression.unwrap_or(ChunkCompression::Gzip),
            zip: store.zip.unwrap_or(false),
            idempotency: store.idempotency.unwrap_or(IdempotencyPolicy::AnyPartition),
        };

        Ok(ResolvedConfig {
            schema_version,
            data_dir,
            years,
            era5_years,
            months,
            days,
            pressure_levels,
            era5,
            s2s,
            store,
        })
    }
}

fn parse_bounded(value: &str, min: u32, max: u32, what: &str) -> Result<u32, IngestError> {
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|parsed| (min..=max).contains(parsed))
        .ok_or_else(|| IngestError::Configuration(format!("invalid {what}: {value}")))
}

fn resolve_sparse(entry: SparseEntry) -> Result<SparseSchedule, IngestError> {
    let parse = |value: &str| {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map_err(|_| IngestError::InvalidDate(value.to_string()))
    };
    Ok(SparseSchedule {
        start: parse(&entry.start)?,
        end: parse(&entry.end)?,
        increments: entry.increments.unwrap_or_else(|| vec![3, 4]),
    })
}

pub fn default_years() -> Vec<i32> {
    (2016..=2023).collect()
}

pub fn default_months() -> Vec<String> {
    (1..=12).map(|month| format!("{month:02}")).collect()
}

pub fn default_days() -> Vec<String> {
    (1..=31).map(|day| format!("{day:02}")).collect()
}

pub fn default_pressure_levels() -> Vec<String> {
    ["10", "50", "100", "200", "300", "500", "700", "850", "925", "1000"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

pub fn default_era5_variables() -> Vec<String> {
    [
        "geopotential",
        "temperature",
        "specific_humidity",
        "u_component_of_wind",
        "v_component_of_wind",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub fn default_era5_times() -> Vec<String> {
    ["00:00", "06:00", "12:00", "18:00"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

pub fn default_centers() -> BTreeMap<String, String> {
    Provider::ALL
        .into_iter()
        .filter_map(|provider| {
            provider
                .default_origin()
                .map(|origin| (provider.as_str().to_string(), origin.to_string()))
        })
        .collect()
}

pub fn default_param_levels() -> Vec<ParamLevelEntry> {
    let all_levels = default_pressure_levels().join("/");
    vec![
        ParamLevelEntry {
            name: "geopotential".to_string(),
            param: "156".to_string(),
            levels: all_levels.clone(),
        },
        ParamLevelEntry {
            name: "temperature".to_string(),
            param: "130".to_string(),
            levels: all_levels,
        },
        ParamLevelEntry {
            name: "specific_humidity".to_string(),
            param: "133".to_string(),
            levels: "850".to_string(),
        },
    ]
}

/// Daily lead times in hours, day 0 through day 44.
pub fn default_steps() -> Vec<String> {
    (0..=44).map(|day| (day * 24).to_string()).collect()
}

pub fn default_sparse() -> BTreeMap<String, SparseSchedule> {
    let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN);
    let end = date(2023, 12, 31);
    BTreeMap::from([
        (
            "ecmwf".to_string(),
            SparseSchedule {
                start: date(2016, 1, 4),
                end,
                increments: vec![3, 4],
            },
        ),
        (
            "cma".to_string(),
            SparseSchedule {
                start: date(2019, 12, 2),
                end,
                increments: vec![3, 4],
            },
        ),
    ])
}
