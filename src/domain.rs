use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Finest grid spacing the archives serve, in degrees.
pub const RESOLUTION_FLOOR: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Era5,
    Ecmwf,
    Ncep,
    Ukmo,
    Cma,
    Eccc,
    Jma,
    Bom,
    Hmcr,
    Isac,
    Kma,
    Cnrm,
}

impl Provider {
    pub const ALL: [Provider; 12] = [
        Provider::Era5,
        Provider::Ecmwf,
        Provider::Ncep,
        Provider::Ukmo,
        Provider::Cma,
        Provider::Eccc,
        Provider::Jma,
        Provider::Bom,
        Provider::Hmcr,
        Provider::Isac,
        Provider::Kma,
        Provider::Cnrm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Era5 => "era5",
            Provider::Ecmwf => "ecmwf",
            Provider::Ncep => "ncep",
            Provider::Ukmo => "ukmo",
            Provider::Cma => "cma",
            Provider::Eccc => "eccc",
            Provider::Jma => "jma",
            Provider::Bom => "bom",
            Provider::Hmcr => "hmcr",
            Provider::Isac => "isac",
            Provider::Kma => "kma",
            Provider::Cnrm => "cnrm",
        }
    }

    pub fn is_reanalysis(&self) -> bool {
        matches!(self, Provider::Era5)
    }

    /// WMO origin code used by the S2S archive. Reanalysis has none.
    pub fn default_origin(&self) -> Option<&'static str> {
        match self {
            Provider::Era5 => None,
            Provider::Ecmwf => Some("ecmf"),
            Provider::Ncep => Some("kwbc"),
            Provider::Ukmo => Some("egrr"),
            Provider::Cma => Some("babj"),
            Provider::Eccc => Some("cwao"),
            Provider::Jma => Some("rjtd"),
            Provider::Bom => Some("ammc"),
            Provider::Hmcr => Some("rums"),
            Provider::Isac => Some("isac"),
            Provider::Kma => Some("rksl"),
            Provider::Cnrm => Some("lfpw"),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Provider::ALL
            .into_iter()
            .find(|provider| provider.as_str() == normalized)
            .ok_or_else(|| IngestError::UnknownProvider(value.to_string()))
    }
}

/// Grid spacing in degrees. The user's spelling is kept because it is part
/// of every partition key (`1.5` and `1.50` name different stores).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    text: String,
    degrees: f64,
}

impl Resolution {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn degrees(&self) -> f64 {
        self.degrees
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            text: "1.5".to_string(),
            degrees: 1.5,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl FromStr for Resolution {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let text = value.trim().to_string();
        let degrees = text
            .parse::<f64>()
            .ok()
            .filter(|deg| deg.is_finite() && *deg > 0.0)
            .ok_or_else(|| IngestError::InvalidResolution(value.to_string()))?;
        if degrees < RESOLUTION_FLOOR {
            return Err(IngestError::ResolutionTooFine(text));
        }
        Ok(Self { text, degrees })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    pub year: i32,
    pub month: u32,
}

impl TimeWindow {
    pub fn new(year: i32, month: u32) -> Result<Self, IngestError> {
        if !(1..=12).contains(&month) || NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(IngestError::InvalidWindow(format!("{year}-{month}")));
        }
        Ok(Self { year, month })
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|next| next.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn num_days(&self) -> u32 {
        self.last_day().day()
    }

    /// Every calendar day of the window, first to last.
    pub fn days(&self) -> Vec<NaiveDate> {
        self.first_day()
            .iter_days()
            .take(self.num_days() as usize)
            .collect()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// `YYYY-MM`, the key of the exception tables.
    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    /// `YYYYMM`, the window part of a partition key.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for TimeWindow {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (year, month) = value
            .trim()
            .split_once('-')
            .ok_or_else(|| IngestError::InvalidWindow(value.to_string()))?;
        let year = year
            .parse::<i32>()
            .map_err(|_| IngestError::InvalidWindow(value.to_string()))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| IngestError::InvalidWindow(value.to_string()))?;
        Self::new(year, month)
    }
}

/// Container format requested from the archive for raw fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FragmentFormat {
    Grib,
    Netcdf,
}

impl FragmentFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FragmentFormat::Grib => "grib",
            FragmentFormat::Netcdf => "nc",
        }
    }
}

impl fmt::Display for FragmentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentFormat::Grib => write!(f, "grib"),
            FragmentFormat::Netcdf => write!(f, "netcdf"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_provider_case_insensitive() {
        let provider: Provider = " ECMWF ".parse().unwrap();
        assert_eq!(provider, Provider::Ecmwf);
        assert_eq!(provider.default_origin(), Some("ecmf"));
    }

    #[test]
    fn parse_provider_unknown() {
        let err = "meteofrance".parse::<Provider>().unwrap_err();
        assert_matches!(err, IngestError::UnknownProvider(_));
    }

    #[test]
    fn window_month_lengths() {
        assert_eq!(TimeWindow::new(2020, 2).unwrap().num_days(), 29);
        assert_eq!(TimeWindow::new(2021, 2).unwrap().num_days(), 28);
        assert_eq!(TimeWindow::new(2021, 4).unwrap().num_days(), 30);
        assert_eq!(TimeWindow::new(2021, 12).unwrap().num_days(), 31);
    }

    #[test]
    fn window_rejects_bad_month() {
        assert_matches!(TimeWindow::new(2021, 13), Err(IngestError::InvalidWindow(_)));
    }
}
