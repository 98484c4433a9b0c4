use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::domain::{FragmentFormat, Provider, Resolution, TimeWindow};
use crate::error::IngestError;
use crate::schedule::{DateSequence, SparseSchedule};

/// Standard gravity, used to turn geopotential into geopotential height.
pub const STANDARD_GRAVITY: f64 = 9.80665;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Reanalysis,
    Forecast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduling {
    Dense,
    Sparse(SparseSchedule),
}

/// One archive parameter group: canonical name, archive code, level spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterGroup {
    pub canonical_name: String,
    pub code: String,
    pub levels: String,
}

/// Everything the pipeline needs to know about one provider, resolved once
/// at startup.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub provider: Provider,
    pub resolution: Resolution,
    pub kind: SourceKind,
    pub origin_id: Option<String>,
    pub variable_level_map: Vec<ParameterGroup>,
    pub steps: Vec<String>,
    pub exceptions: BTreeMap<String, String>,
    pub scheduling: Scheduling,
    pub fragment_format: FragmentFormat,
    /// Reanalysis only: variables, levels, and hours of a single request.
    pub reanalysis: Option<ReanalysisRequest>,
    calendar: Option<DateSequence>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReanalysisRequest {
    pub dataset: String,
    pub variables: Vec<String>,
    pub pressure_levels: Vec<String>,
    pub times: Vec<String>,
}

impl PartialEq for SourceSpec {
    fn eq(&self, other: &Self) -> bool {
        self.provider == other.provider
    }
}

impl SourceSpec {
    pub fn from_config(
        provider: Provider,
        resolution: Resolution,
        config: &ResolvedConfig,
    ) -> Result<Self, IngestError> {
        if provider.is_reanalysis() {
            let era5 = &config.era5;
            return Ok(Self {
                provider,
                resolution,
                kind: SourceKind::Reanalysis,
                origin_id: None,
                variable_level_map: vec![ParameterGroup {
                    canonical_name: "reanalysis".to_string(),
                    code: era5.variables.join("/"),
                    levels: config.pressure_levels.join("/"),
                }],
                steps: Vec::new(),
                exceptions: BTreeMap::new(),
                scheduling: Scheduling::Dense,
                fragment_format: FragmentFormat::Netcdf,
                reanalysis: Some(ReanalysisRequest {
                    dataset: era5.dataset.clone(),
                    variables: era5.variables.clone(),
                    pressure_levels: config.pressure_levels.clone(),
                    times: era5.times.clone(),
                }),
                calendar: None,
            });
        }

        let s2s = &config.s2s;
        let origin_id = s2s
            .centers
            .get(provider.as_str())
            .cloned()
            .ok_or_else(|| IngestError::UnknownProvider(provider.to_string()))?;
        if s2s.param_levels.is_empty() {
            return Err(IngestError::Configuration(
                "s2s.param_levels must declare at least one parameter group".to_string(),
            ));
        }
        let variable_level_map = s2s
            .param_levels
            .iter()
            .map(|entry| ParameterGroup {
                canonical_name: entry.name.clone(),
                code: entry.param.clone(),
                levels: entry.levels.clone(),
            })
            .collect();
        let exceptions = s2s
            .exceptions
            .get(provider.as_str())
            .cloned()
            .unwrap_or_default();
        let (scheduling, calendar) = match s2s.sparse.get(provider.as_str()) {
            Some(schedule) => {
                let calendar = schedule.generate()?;
                (Scheduling::Sparse(schedule.clone()), Some(calendar))
            }
            None => (Scheduling::Dense, None),
        };

        Ok(Self {
            provider,
            resolution,
            kind: SourceKind::Forecast,
            origin_id: Some(origin_id),
            variable_level_map,
            steps: s2s.steps_for(provider).to_vec(),
            exceptions,
            scheduling,
            fragment_format: s2s.fragment_format,
            reanalysis: None,
            calendar,
        })
    }

    pub fn needs_sparse_scheduling(&self) -> bool {
        matches!(self.scheduling, Scheduling::Sparse(_))
    }

    pub fn is_reanalysis(&self) -> bool {
        self.kind == SourceKind::Reanalysis
    }

    pub fn calendar(&self) -> Option<&DateSequence> {
        self.calendar.as_ref()
    }

    pub fn exception(&self, window: TimeWindow) -> Option<&str> {
        self.exceptions.get(&window.key()).map(String::as_str)
    }

    pub fn expected_fragments(&self) -> usize {
        self.variable_level_map.len()
    }

    /// Prefix shared by every partition of this provider/resolution.
    pub fn partition_prefix(&self) -> String {
        format!("{}_full_{}deg_", self.provider, self.resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigLoader};

    #[test]
    fn ecmwf_is_sparse_and_ncep_is_dense() {
        let config = ConfigLoader::resolve_config(Config::default()).unwrap();
        let ecmwf =
            SourceSpec::from_config(Provider::Ecmwf, Resolution::default(), &config).unwrap();
        let ncep = SourceSpec::from_config(Provider::Ncep, Resolution::default(), &config).unwrap();
        assert!(ecmwf.needs_sparse_scheduling());
        assert!(ecmwf.calendar().is_some());
        assert!(!ncep.needs_sparse_scheduling());
        assert_eq!(ncep.origin_id.as_deref(), Some("kwbc"));
        assert_eq!(ecmwf, ecmwf.clone());
        assert!(ecmwf != ncep);
    }

    #[test]
    fn era5_is_single_request() {
        let config = ConfigLoader::resolve_config(Config::default()).unwrap();
        let era5 = SourceSpec::from_config(Provider::Era5, Resolution::default(), &config).unwrap();
        assert!(era5.is_reanalysis());
        assert_eq!(era5.expected_fragments(), 1);
        assert_eq!(era5.partition_prefix(), "era5_full_1.5deg_");
    }
}
