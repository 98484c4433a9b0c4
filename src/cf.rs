//! CF-convention time encodings (`<unit> since <epoch>`).

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};

use crate::error::IngestError;

/// Units written to every time coordinate we persist.
pub const EPOCH_HOURS: &str = "hours since 1970-01-01 00:00:00";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUnits {
    pub seconds_per_unit: i64,
    pub epoch: NaiveDateTime,
}

pub fn unit_seconds(unit: &str) -> Option<i64> {
    match unit.trim().to_lowercase().as_str() {
        "second" | "seconds" | "s" => Some(1),
        "minute" | "minutes" | "min" => Some(60),
        "hour" | "hours" | "h" => Some(3_600),
        "day" | "days" | "d" => Some(86_400),
        _ => None,
    }
}

pub fn parse_time_units(units: &str) -> Result<TimeUnits, IngestError> {
    let invalid = || IngestError::Dataset(format!("unsupported time units: '{units}'"));
    let (unit, epoch) = units.split_once(" since ").ok_or_else(invalid)?;
    let seconds_per_unit = unit_seconds(unit).ok_or_else(invalid)?;
    let epoch = epoch.trim().trim_end_matches(" UTC").trim_end_matches('Z');
    let parsed = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(epoch, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(epoch, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(invalid)?;
    Ok(TimeUnits {
        seconds_per_unit,
        epoch: parsed,
    })
}

/// Decodes offsets; NaN decodes to `None`.
pub fn decode_times(values: &[f64], units: &TimeUnits) -> Vec<Option<NaiveDateTime>> {
    values
        .iter()
        .map(|value| {
            if !value.is_finite() {
                return None;
            }
            let seconds = (value * units.seconds_per_unit as f64).round() as i64;
            units.epoch.checked_add_signed(Duration::seconds(seconds))
        })
        .collect()
}

pub fn encode_hours(value: Option<NaiveDateTime>) -> f64 {
    match value {
        Some(value) => {
            let epoch = DateTime::UNIX_EPOCH.naive_utc();
            (value - epoch).num_seconds() as f64 / 3_600.0
        }
        None => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_era5_style_units() {
        let units = parse_time_units("hours since 1900-01-01 00:00:00.0").unwrap();
        let decoded = decode_times(&[1_052_040.0, f64::NAN], &units);
        assert_eq!(
            decoded[0],
            NaiveDate::from_ymd_opt(2020, 1, 7).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(decoded[1], None);
    }

    #[test]
    fn encode_round_trips_epoch_hours() {
        let units = parse_time_units(EPOCH_HOURS).unwrap();
        let when = NaiveDate::from_ymd_opt(2016, 1, 4).unwrap().and_hms_opt(6, 0, 0);
        let hours = encode_hours(when);
        assert_eq!(decode_times(&[hours], &units)[0], when);
    }
}
