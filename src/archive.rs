use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::domain::TimeWindow;
use crate::error::IngestError;
use crate::source::{ParameterGroup, SourceSpec};

/// Dates requested for one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DateSelector {
    /// Verbatim override from the provider's exception table.
    Exception { dates: String },
    /// Scheduled initialization dates that fall inside the window.
    Sparse { dates: Vec<NaiveDate> },
    /// First to last calendar day of the window.
    Dense { window: TimeWindow },
}

impl DateSelector {
    pub fn dense(window: TimeWindow) -> Self {
        DateSelector::Dense { window }
    }

    /// True whenever the dates did not come from the dense default.
    pub fn is_exception(&self) -> bool {
        !matches!(self, DateSelector::Dense { .. })
    }

    /// Archive date string: `d1/d2/...` or `YYYY-MM-01/to/YYYY-MM-NN`.
    pub fn render(&self) -> String {
        match self {
            DateSelector::Exception { dates } => dates.clone(),
            DateSelector::Sparse { dates } => dates
                .iter()
                .map(|date| date.format("%Y-%m-%d").to_string())
                .collect::<Vec<_>>()
                .join("/"),
            DateSelector::Dense { window } => format!(
                "{}/to/{}",
                window.first_day().format("%Y-%m-%d"),
                window.last_day().format("%Y-%m-%d")
            ),
        }
    }
}

impl fmt::Display for DateSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// One archive call. Keys of `body` keep insertion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalRequest {
    pub dataset: String,
    pub body: Map<String, Value>,
}

impl RetrievalRequest {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

pub trait ArchiveClient: Send + Sync {
    /// Blocks until the file is fully written to `destination`.
    fn retrieve(&self, request: &RetrievalRequest, destination: &Path) -> Result<(), IngestError>;
}

pub fn s2s_request(
    spec: &SourceSpec,
    group: &ParameterGroup,
    selector: &DateSelector,
) -> Result<RetrievalRequest, IngestError> {
    let origin = spec.origin_id.as_deref().ok_or_else(|| {
        IngestError::Configuration(format!("provider {} has no archive origin", spec.provider))
    })?;
    let grid = format!("{res}/{res}", res = spec.resolution);
    let mut body = Map::new();
    body.insert("class".into(), json!("s2"));
    body.insert("dataset".into(), json!("s2s"));
    body.insert("date".into(), json!(selector.render()));
    body.insert("expver".into(), json!("prod"));
    body.insert("levelist".into(), json!(group.levels));
    body.insert("levtype".into(), json!("pl"));
    body.insert("model".into(), json!("glob"));
    body.insert("origin".into(), json!(origin));
    body.insert("param".into(), json!(group.code));
    body.insert("step".into(), json!(spec.steps.join("/")));
    body.insert("stream".into(), json!("enfo"));
    body.insert("time".into(), json!("00:00:00"));
    body.insert("type".into(), json!("cf"));
    body.insert("grid".into(), json!(grid));
    body.insert("format".into(), json!(spec.fragment_format.to_string()));
    Ok(RetrievalRequest {
        dataset: "s2s".to_string(),
        body,
    })
}

/// Single request covering every variable of a dense reanalysis window.
pub fn era5_request(
    spec: &SourceSpec,
    window: TimeWindow,
    days: &[u32],
) -> Result<RetrievalRequest, IngestError> {
    let reanalysis = spec.reanalysis.as_ref().ok_or_else(|| {
        IngestError::Configuration(format!("provider {} is not a reanalysis", spec.provider))
    })?;
    let days = days
        .iter()
        .filter(|day| **day <= window.num_days())
        .map(|day| format!("{day:02}"))
        .collect::<Vec<_>>();
    let res = spec.resolution.as_str();
    let mut body = Map::new();
    body.insert("product_type".into(), json!(["reanalysis"]));
    body.insert("variable".into(), json!(reanalysis.variables));
    body.insert("pressure_level".into(), json!(reanalysis.pressure_levels));
    body.insert("year".into(), json!(format!("{:04}", window.year)));
    body.insert("month".into(), json!(format!("{:02}", window.month)));
    body.insert("day".into(), json!(days));
    body.insert("time".into(), json!(reanalysis.times));
    body.insert("grid".into(), json!([res, res]));
    body.insert("data_format".into(), json!("netcdf"));
    Ok(RetrievalRequest {
        dataset: reanalysis.dataset.clone(),
        body,
    })
}
