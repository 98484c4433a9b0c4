use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info};

use crate::dataset::{CANONICAL_DIMS, CoordValues, Dataset, LATITUDE, LEVEL, LONGITUDE, STEP, TIME};
use crate::domain::TimeWindow;
use crate::error::IngestError;
use crate::fragment::{FragmentReader, RawFragment};
use crate::source::{STANDARD_GRAVITY, SourceSpec};

const LEVEL_ALIASES: [&str; 4] = ["isobaricInhPa", "pressure_level", "plev", "lev"];
const TIME_ALIASES: [&str; 2] = ["valid_time", "forecast_reference_time"];
const LATITUDE_ALIASES: [&str; 1] = ["lat"];
const LONGITUDE_ALIASES: [&str; 1] = ["lon"];
const VARIABLE_ALIASES: [(&str, &str); 1] = [("gh", "z")];

/// Merges the raw fragments of one window into a single dataset in
/// canonical `(time, step, level, latitude, longitude)` layout.
pub struct Harmonizer<'a, F: FragmentReader> {
    spec: &'a SourceSpec,
    reader: &'a F,
}

impl<'a, F: FragmentReader> Harmonizer<'a, F> {
    pub fn new(spec: &'a SourceSpec, reader: &'a F) -> Self {
        Self { spec, reader }
    }

    pub fn merge(
        &self,
        fragments: &[RawFragment],
        is_exception: bool,
        window: TimeWindow,
    ) -> Result<Dataset, IngestError> {
        let expected = self.spec.expected_fragments();
        if fragments.len() != expected {
            return Err(IngestError::FragmentCount {
                window: window.key(),
                expected,
                actual: fragments.len(),
            });
        }

        let mut datasets = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            debug!(
                window = %window,
                group = fragment.group_index,
                name = %fragment.canonical_name,
                "reading fragment"
            );
            datasets.push(self.reader.read(fragment)?);
        }
        self.merge_datasets(datasets, is_exception, window)
    }

    pub fn merge_datasets(
        &self,
        datasets: Vec<Dataset>,
        is_exception: bool,
        window: TimeWindow,
    ) -> Result<Dataset, IngestError> {
        let mut normalized = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            normalized.push(normalize(dataset)?);
        }

        let mut merged = Dataset::merge(normalized, &[LEVEL])?;
        merged.transpose(&CANONICAL_DIMS)?;

        if self.spec.is_reanalysis() && merged.variable("z").is_some() {
            merged.scale_variable("z", 1.0 / STANDARD_GRAVITY)?;
        }

        if is_exception {
            densify(&mut merged, window)?;
        } else if merged.dim(STEP).is_some() && merged.valid_time().is_none() {
            stamp_native_valid_time(&mut merged)?;
        }

        info!(
            window = %window,
            dims = ?merged.dim_names(),
            variables = merged.variables().len(),
            "harmonized window"
        );
        Ok(merged)
    }
}

fn normalize(mut dataset: Dataset) -> Result<Dataset, IngestError> {
    for alias in LEVEL_ALIASES {
        if has_coord(&dataset, alias) && !has_coord(&dataset, LEVEL) {
            dataset.rename_dim(alias, LEVEL)?;
        }
    }
    if dataset.dim(TIME).is_none() {
        for alias in TIME_ALIASES {
            if dataset.dim(alias).is_some() {
                dataset.rename_dim(alias, TIME)?;
                break;
            }
        }
    }
    for alias in LATITUDE_ALIASES {
        if dataset.dim(alias).is_some() && dataset.dim(LATITUDE).is_none() {
            dataset.rename_dim(alias, LATITUDE)?;
        }
    }
    for alias in LONGITUDE_ALIASES {
        if dataset.dim(alias).is_some() && dataset.dim(LONGITUDE).is_none() {
            dataset.rename_dim(alias, LONGITUDE)?;
        }
    }
    for (from, to) in VARIABLE_ALIASES {
        dataset.rename_var(from, to)?;
    }

    // e.g. the ensemble `number` of a control forecast
    let stray = dataset
        .dims()
        .iter()
        .filter(|dim| !CANONICAL_DIMS.contains(&dim.name.as_str()) && dim.len() == 1)
        .map(|dim| dim.name.clone())
        .collect::<Vec<_>>();
    for name in stray {
        dataset.squeeze(&name)?;
    }

    if dataset.dim(LEVEL).is_none() && dataset.scalar_coord(LEVEL).is_some() {
        dataset.expand_dim(LEVEL)?;
    }
    Ok(dataset)
}

fn has_coord(dataset: &Dataset, name: &str) -> bool {
    dataset.dim(name).is_some() || dataset.scalar_coord(name).is_some()
}

/// Gap-fills a sparse window onto every calendar day and stamps one valid
/// date per step, counted in days from each day's initialization.
fn densify(dataset: &mut Dataset, window: TimeWindow) -> Result<(), IngestError> {
    let days = window
        .days()
        .into_iter()
        .filter_map(|day| day.and_hms_opt(0, 0, 0))
        .collect::<Vec<_>>();
    let present = dataset.times().map(<[NaiveDateTime]>::len).unwrap_or(0);
    dataset.reindex_time(days.clone())?;
    debug!(
        window = %window,
        present,
        days = days.len(),
        "reindexed sparse window onto calendar days"
    );

    let Some(steps) = dataset.dim(STEP).map(|dim| dim.len()) else {
        return Ok(());
    };
    let mut valid = Vec::with_capacity(days.len() * steps);
    for day in &days {
        for step in 0..steps {
            valid.push(day.checked_add_signed(Duration::days(step as i64)));
        }
    }
    dataset.set_valid_time(valid)
}

fn stamp_native_valid_time(dataset: &mut Dataset) -> Result<(), IngestError> {
    let (Some(times), Some(CoordValues::Hours(hours))) =
        (dataset.times(), dataset.dim(STEP).map(|dim| &dim.coord))
    else {
        return Ok(());
    };
    let mut valid = Vec::with_capacity(times.len() * hours.len());
    for time in times {
        for hour in hours {
            valid.push(time.checked_add_signed(Duration::hours(*hour)));
        }
    }
    dataset.set_valid_time(valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_renames_aliases_and_lifts_level() {
        let mut fragment = Dataset::new()
            .with_dim("number", CoordValues::Float(vec![0.0]))
            .unwrap()
            .with_dim("lat", CoordValues::Float(vec![0.0, 1.5]))
            .unwrap()
            .with_dim("lon", CoordValues::Float(vec![0.0]))
            .unwrap()
            .with_variable("gh", &["number", "lat", "lon"], vec![1.0, 2.0])
            .unwrap();
        fragment.set_scalar_coord("isobaricInhPa", 850.0);

        let normalized = normalize(fragment).unwrap();
        assert_eq!(normalized.dim_names(), vec![LEVEL, LATITUDE, LONGITUDE]);
        assert_eq!(
            normalized.dim(LEVEL).unwrap().coord,
            CoordValues::Float(vec![850.0])
        );
        assert_eq!(normalized.scalar_coord("number"), Some(0.0));
        assert_eq!(
            normalized.variable("z").unwrap().dims,
            vec![LEVEL, LATITUDE, LONGITUDE]
        );
    }
}
