use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::TimeWindow;
use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DateSequence(Vec<NaiveDate>);

impl DateSequence {
    pub fn as_slice(&self) -> &[NaiveDate] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn in_window(&self, window: TimeWindow) -> Vec<NaiveDate> {
        self.0
            .iter()
            .copied()
            .filter(|date| window.contains(*date))
            .collect()
    }

    pub fn to_iso_strings(&self) -> Vec<String> {
        self.0.iter().map(|date| date.format("%Y-%m-%d").to_string()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseSchedule {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub increments: Vec<i64>,
}

impl SparseSchedule {
    pub fn generate(&self) -> Result<DateSequence, IngestError> {
        generate(self.start, self.end, &self.increments)
    }
}

/// Builds the calendar starting at `start`, adding `increments` in declared
/// cyclic order while the previous date is still `<= end`. The first date
/// past `end` is therefore part of the output.
pub fn generate(
    start: NaiveDate,
    end: NaiveDate,
    increments: &[i64],
) -> Result<DateSequence, IngestError> {
    if increments.is_empty() {
        return Err(IngestError::Configuration(
            "sparse schedule needs at least one increment".to_string(),
        ));
    }
    if let Some(bad) = increments.iter().find(|step| **step <= 0) {
        return Err(IngestError::Configuration(format!(
            "sparse schedule increments must be positive, got {bad}"
        )));
    }

    let mut dates = vec![start];
    let mut current = start;
    let mut cursor = 0usize;
    while current <= end {
        current = current
            .checked_add_signed(Duration::days(increments[cursor]))
            .ok_or_else(|| IngestError::InvalidDate(format!("{current} + {}", increments[cursor])))?;
        dates.push(current);
        cursor = (cursor + 1) % increments.len();
    }
    Ok(DateSequence(dates))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn start_after_end_yields_only_start() {
        let seq = generate(date("2020-02-01"), date("2020-01-01"), &[3, 4]).unwrap();
        assert_eq!(seq.to_iso_strings(), vec!["2020-02-01"]);
    }

    #[test]
    fn rejects_empty_increments() {
        assert!(generate(date("2020-01-01"), date("2020-01-31"), &[]).is_err());
        assert!(generate(date("2020-01-01"), date("2020-01-31"), &[3, 0]).is_err());
    }
}
