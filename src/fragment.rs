use std::path::PathBuf;

use crate::dataset::Dataset;
use crate::domain::TimeWindow;
use crate::error::IngestError;

/// One retrieved file for a single (window, parameter group) pair. Lives
/// in the window's scratch directory and disappears with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFragment {
    pub window: TimeWindow,
    pub group_index: usize,
    pub canonical_name: String,
    pub path: PathBuf,
}

/// Decodes a raw archive file into a [`Dataset`] with its native names.
pub trait FragmentReader: Send + Sync {
    fn read(&self, fragment: &RawFragment) -> Result<Dataset, IngestError>;
}

/// Stand-in used when the binary is built without a fragment codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedFragmentReader;

impl FragmentReader for UnsupportedFragmentReader {
    fn read(&self, fragment: &RawFragment) -> Result<Dataset, IngestError> {
        Err(IngestError::MissingCodec(format!(
            "cannot decode {}",
            fragment.path.display()
        )))
    }
}

#[cfg(feature = "netcdf")]
pub use self::netcdf_reader::NetcdfFragmentReader;

#[cfg(feature = "netcdf")]
mod netcdf_reader {
    use std::path::Path;

    use netcdf::AttributeValue;
    use netcdf::types::NcVariableType;
    use tracing::debug;

    use super::{FragmentReader, RawFragment};
    use crate::cf;
    use crate::dataset::{CoordValues, Dataset};
    use crate::error::IngestError;

    const TIME_NAMES: [&str; 3] = ["time", "valid_time", "forecast_reference_time"];
    const STEP_NAMES: [&str; 2] = ["step", "forecast_period"];

    #[derive(Debug, Clone, Copy, Default)]
    pub struct NetcdfFragmentReader;

    impl FragmentReader for NetcdfFragmentReader {
        fn read(&self, fragment: &RawFragment) -> Result<Dataset, IngestError> {
            let path = fragment.path.as_path();
            let file = netcdf::open(path).map_err(|err| decode_error(path, err))?;
            let mut dataset = Dataset::new();

            let mut dim_names = Vec::new();
            for variable in file.variables() {
                for dim in variable.dimensions() {
                    let name = dim.name();
                    if !dim_names.contains(&name) {
                        dim_names.push(name);
                    }
                }
            }

            for name in &dim_names {
                let coord = match file.variable(name) {
                    Some(variable) if is_numeric(&variable.vartype()) => {
                        let values = variable
                            .get_values::<f64, _>(..)
                            .map_err(|err| decode_error(path, err))?;
                        let units = string_attr(&variable, "units");
                        coord_values(name, values, units.as_deref(), path)?
                    }
                    _ => {
                        let len = file
                            .dimension(name)
                            .map(|dim| dim.len())
                            .unwrap_or_default();
                        CoordValues::Float((0..len).map(|i| i as f64).collect())
                    }
                };
                dataset.add_dim(name, coord)?;
            }

            let mut scalar_time = None;
            for variable in file.variables() {
                let name = variable.name();
                if !is_numeric(&variable.vartype()) {
                    // e.g. the `expver` strings of ERA5 downloads
                    debug!(path = %path.display(), variable = %name, "skipping non-numeric variable");
                    continue;
                }
                let dims = variable
                    .dimensions()
                    .iter()
                    .map(|dim| dim.name())
                    .collect::<Vec<_>>();
                if dims.is_empty() {
                    let values = variable
                        .get_values::<f64, _>(..)
                        .map_err(|err| decode_error(path, err))?;
                    if name == "time" {
                        let units = string_attr(&variable, "units");
                        scalar_time = Some(coord_values(&name, values, units.as_deref(), path)?);
                    } else if let Some(value) = values.first() {
                        dataset.set_scalar_coord(&name, *value);
                    }
                    continue;
                }
                if dims.len() == 1 && dims[0] == name {
                    continue;
                }
                if name == "valid_time" {
                    continue;
                }
                let raw = variable
                    .get_values::<f64, _>(..)
                    .map_err(|err| decode_error(path, err))?;
                let scale = number_attr(&variable, "scale_factor").unwrap_or(1.0);
                let offset = number_attr(&variable, "add_offset").unwrap_or(0.0);
                let fill = number_attr(&variable, "_FillValue")
                    .or_else(|| number_attr(&variable, "missing_value"));
                let data = raw
                    .into_iter()
                    .map(|value| match fill {
                        Some(fill) if value == fill => f32::NAN,
                        _ => (value * scale + offset) as f32,
                    })
                    .collect();
                let dims = dims.iter().map(String::as_str).collect::<Vec<_>>();
                dataset.add_variable(&name, &dims, data)?;
            }
            // Single-date requests carry `time` as a scalar.
            if let Some(time) = scalar_time {
                if dataset.dim("time").is_none() {
                    dataset.expand_dim_with("time", time)?;
                }
            }
            Ok(dataset)
        }
    }

    fn is_numeric(vartype: &NcVariableType) -> bool {
        matches!(vartype, NcVariableType::Int(_) | NcVariableType::Float(_))
    }

    fn coord_values(
        name: &str,
        values: Vec<f64>,
        units: Option<&str>,
        path: &Path,
    ) -> Result<CoordValues, IngestError> {
        if TIME_NAMES.contains(&name) {
            let units = units.ok_or_else(|| IngestError::FragmentDecode {
                path: path.to_path_buf(),
                message: format!("time coordinate `{name}` has no units"),
            })?;
            let parsed = cf::parse_time_units(units)?;
            let times = cf::decode_times(&values, &parsed)
                .into_iter()
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| IngestError::FragmentDecode {
                    path: path.to_path_buf(),
                    message: format!("time coordinate `{name}` has missing labels"),
                })?;
            return Ok(CoordValues::Time(times));
        }
        if STEP_NAMES.contains(&name) {
            let seconds = units.and_then(cf::unit_seconds).unwrap_or(3_600);
            let hours = values
                .iter()
                .map(|value| (value * seconds as f64 / 3_600.0).round() as i64)
                .collect();
            return Ok(CoordValues::Hours(hours));
        }
        Ok(CoordValues::Float(values))
    }

    fn string_attr(variable: &netcdf::Variable<'_>, name: &str) -> Option<String> {
        match variable.attribute_value(name)?.ok()? {
            AttributeValue::Str(value) => Some(value),
            _ => None,
        }
    }

    fn number_attr(variable: &netcdf::Variable<'_>, name: &str) -> Option<f64> {
        match variable.attribute_value(name)?.ok()? {
            AttributeValue::Double(value) => Some(value),
            AttributeValue::Float(value) => Some(f64::from(value)),
            AttributeValue::Int(value) => Some(f64::from(value)),
            AttributeValue::Short(value) => Some(f64::from(value)),
            _ => None,
        }
    }

    fn decode_error(path: &Path, err: netcdf::Error) -> IngestError {
        IngestError::FragmentDecode {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    #[cfg(test)]
    mod tests {
        use netcdf::types::{FloatType, IntType};

        use super::*;

        #[test]
        fn only_numeric_variables_are_decoded() {
            assert!(is_numeric(&NcVariableType::Float(FloatType::F32)));
            assert!(is_numeric(&NcVariableType::Float(FloatType::F64)));
            assert!(is_numeric(&NcVariableType::Int(IntType::I16)));
            assert!(is_numeric(&NcVariableType::Int(IntType::I64)));
            assert!(!is_numeric(&NcVariableType::String));
            assert!(!is_numeric(&NcVariableType::Char));
        }
    }
}
