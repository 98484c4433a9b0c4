use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::error::IngestError;

pub const TIME: &str = "time";
pub const STEP: &str = "step";
pub const LEVEL: &str = "level";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";

pub const CANONICAL_DIMS: [&str; 5] = [TIME, STEP, LEVEL, LATITUDE, LONGITUDE];

#[derive(Debug, Clone, PartialEq)]
pub enum CoordValues {
    Time(Vec<NaiveDateTime>),
    Hours(Vec<i64>),
    Float(Vec<f64>),
}

impl CoordValues {
    pub fn len(&self) -> usize {
        match self {
            CoordValues::Time(values) => values.len(),
            CoordValues::Hours(values) => values.len(),
            CoordValues::Float(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            CoordValues::Time(_) => "time",
            CoordValues::Hours(_) => "hours",
            CoordValues::Float(_) => "float",
        }
    }

    fn select(&self, indices: &[usize]) -> Self {
        match self {
            CoordValues::Time(values) => {
                CoordValues::Time(indices.iter().map(|i| values[*i]).collect())
            }
            CoordValues::Hours(values) => {
                CoordValues::Hours(indices.iter().map(|i| values[*i]).collect())
            }
            CoordValues::Float(values) => {
                CoordValues::Float(indices.iter().map(|i| values[*i]).collect())
            }
        }
    }

    fn union(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (CoordValues::Time(a), CoordValues::Time(b)) => {
                let mut values = a.iter().chain(b).copied().collect::<Vec<_>>();
                values.sort();
                values.dedup();
                Some(CoordValues::Time(values))
            }
            (CoordValues::Hours(a), CoordValues::Hours(b)) => {
                let mut values = a.iter().chain(b).copied().collect::<Vec<_>>();
                values.sort();
                values.dedup();
                Some(CoordValues::Hours(values))
            }
            (CoordValues::Float(a), CoordValues::Float(b)) => {
                let mut values = a.iter().chain(b).copied().collect::<Vec<_>>();
                values.sort_by(f64::total_cmp);
                values.dedup();
                Some(CoordValues::Float(values))
            }
            _ => None,
        }
    }

    fn positions_in(&self, target: &Self) -> Vec<Option<usize>> {
        match (self, target) {
            (CoordValues::Time(a), CoordValues::Time(b)) => {
                a.iter().map(|v| b.iter().position(|t| t == v)).collect()
            }
            (CoordValues::Hours(a), CoordValues::Hours(b)) => {
                a.iter().map(|v| b.iter().position(|t| t == v)).collect()
            }
            (CoordValues::Float(a), CoordValues::Float(b)) => {
                a.iter().map(|v| b.iter().position(|t| t == v)).collect()
            }
            _ => vec![None; self.len()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: String,
    pub coord: CoordValues,
}

impl Dimension {
    pub fn len(&self) -> usize {
        self.coord.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coord.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<String>,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    dims: Vec<Dimension>,
    scalar_coords: BTreeMap<String, f64>,
    variables: BTreeMap<String, Variable>,
    valid_time: Option<Vec<Option<NaiveDateTime>>>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dim(mut self, name: &str, coord: CoordValues) -> Result<Self, IngestError> {
        self.add_dim(name, coord)?;
        Ok(self)
    }

    pub fn with_variable(
        mut self,
        name: &str,
        dims: &[&str],
        data: Vec<f32>,
    ) -> Result<Self, IngestError> {
        self.add_variable(name, dims, data)?;
        Ok(self)
    }

    pub fn add_dim(&mut self, name: &str, coord: CoordValues) -> Result<(), IngestError> {
        if self.dim(name).is_some() {
            return Err(IngestError::Dataset(format!("duplicate dimension `{name}`")));
        }
        self.dims.push(Dimension {
            name: name.to_string(),
            coord,
        });
        Ok(())
    }

    pub fn add_variable(
        &mut self,
        name: &str,
        dims: &[&str],
        data: Vec<f32>,
    ) -> Result<(), IngestError> {
        let shape = self.shape_of(dims)?;
        let expected = shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(IngestError::Dataset(format!(
                "variable `{name}` has {} values, dimensions {dims:?} need {expected}",
                data.len()
            )));
        }
        self.variables.insert(
            name.to_string(),
            Variable {
                dims: dims.iter().map(|dim| dim.to_string()).collect(),
                data,
            },
        );
        Ok(())
    }

    pub fn set_scalar_coord(&mut self, name: &str, value: f64) {
        self.scalar_coords.insert(name.to_string(), value);
    }

    pub fn scalar_coord(&self, name: &str) -> Option<f64> {
        self.scalar_coords.get(name).copied()
    }

    pub fn scalar_coords(&self) -> &BTreeMap<String, f64> {
        &self.scalar_coords
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn dim_names(&self) -> Vec<&str> {
        self.dims.iter().map(|dim| dim.name.as_str()).collect()
    }

    pub fn dim(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|dim| dim.name == name)
    }

    pub fn variables(&self) -> &BTreeMap<String, Variable> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn times(&self) -> Option<&[NaiveDateTime]> {
        match self.dim(TIME).map(|dim| &dim.coord) {
            Some(CoordValues::Time(values)) => Some(values),
            _ => None,
        }
    }

    pub fn valid_time(&self) -> Option<&[Option<NaiveDateTime>]> {
        self.valid_time.as_deref()
    }

    pub fn set_valid_time(&mut self, values: Vec<Option<NaiveDateTime>>) -> Result<(), IngestError> {
        let expected = self.shape_of(&[TIME, STEP])?.iter().product::<usize>();
        if values.len() != expected {
            return Err(IngestError::Dataset(format!(
                "valid_time has {} values, (time, step) needs {expected}",
                values.len()
            )));
        }
        self.valid_time = Some(values);
        Ok(())
    }

    pub fn shape_of(&self, dims: &[&str]) -> Result<Vec<usize>, IngestError> {
        dims.iter()
            .map(|name| {
                self.dim(name)
                    .map(Dimension::len)
                    .ok_or_else(|| IngestError::Dataset(format!("unknown dimension `{name}`")))
            })
            .collect()
    }

    fn variable_shape(&self, variable: &Variable) -> Result<Vec<usize>, IngestError> {
        let dims = variable.dims.iter().map(String::as_str).collect::<Vec<_>>();
        self.shape_of(&dims)
    }

    pub fn rename_dim(&mut self, from: &str, to: &str) -> Result<(), IngestError> {
        if from == to {
            return Ok(());
        }
        if self.dim(to).is_some() || self.scalar_coords.contains_key(to) {
            return Err(IngestError::Dataset(format!(
                "cannot rename `{from}` to existing `{to}`"
            )));
        }
        if let Some(value) = self.scalar_coords.remove(from) {
            self.scalar_coords.insert(to.to_string(), value);
        }
        for dim in self.dims.iter_mut().filter(|dim| dim.name == from) {
            dim.name = to.to_string();
        }
        for variable in self.variables.values_mut() {
            for dim in variable.dims.iter_mut().filter(|dim| *dim == from) {
                *dim = to.to_string();
            }
        }
        Ok(())
    }

    pub fn rename_var(&mut self, from: &str, to: &str) -> Result<(), IngestError> {
        if from == to || !self.variables.contains_key(from) {
            return Ok(());
        }
        if self.variables.contains_key(to) {
            return Err(IngestError::Dataset(format!(
                "cannot rename variable `{from}` to existing `{to}`"
            )));
        }
        if let Some(variable) = self.variables.remove(from) {
            self.variables.insert(to.to_string(), variable);
        }
        Ok(())
    }

    pub fn expand_dim(&mut self, name: &str) -> Result<(), IngestError> {
        if self.dim(name).is_some() {
            return Ok(());
        }
        let value = self.scalar_coords.remove(name).ok_or_else(|| {
            IngestError::Dataset(format!("no scalar coordinate `{name}` to expand"))
        })?;
        self.expand_dim_with(name, CoordValues::Float(vec![value]))
    }

    pub fn expand_dim_with(&mut self, name: &str, coord: CoordValues) -> Result<(), IngestError> {
        if coord.len() != 1 {
            return Err(IngestError::Dataset(format!(
                "expanded dimension `{name}` needs exactly one label, got {}",
                coord.len()
            )));
        }
        if self.dim(name).is_some() {
            return Err(IngestError::Dataset(format!("duplicate dimension `{name}`")));
        }
        self.scalar_coords.remove(name);
        self.dims.insert(
            0,
            Dimension {
                name: name.to_string(),
                coord,
            },
        );
        for variable in self.variables.values_mut() {
            variable.dims.insert(0, name.to_string());
        }
        Ok(())
    }

    pub fn squeeze(&mut self, name: &str) -> Result<(), IngestError> {
        let Some(position) = self.dims.iter().position(|dim| dim.name == name) else {
            return Ok(());
        };
        let dim = &self.dims[position];
        if dim.len() != 1 {
            return Err(IngestError::Dataset(format!(
                "cannot squeeze `{name}` of length {}",
                dim.len()
            )));
        }
        if let CoordValues::Float(values) = &dim.coord {
            self.scalar_coords.insert(name.to_string(), values[0]);
        }
        self.dims.remove(position);
        for variable in self.variables.values_mut() {
            variable.dims.retain(|have| have != name);
        }
        Ok(())
    }

    pub fn transpose(&mut self, order: &[&str]) -> Result<(), IngestError> {
        if let Some(extra) = self.dims.iter().find(|dim| !order.contains(&dim.name.as_str())) {
            return Err(IngestError::Dataset(format!(
                "dimension `{}` is not part of {order:?}",
                extra.name
            )));
        }
        let mut dims = Vec::with_capacity(self.dims.len());
        for name in order {
            if let Some(dim) = self.dim(name) {
                dims.push(dim.clone());
            }
        }
        self.dims = dims;

        let names = self.variables.keys().cloned().collect::<Vec<_>>();
        for name in names {
            let Some(variable) = self.variables.get(&name) else {
                continue;
            };
            let shape = self.variable_shape(variable)?;
            let target = order
                .iter()
                .filter(|dim| variable.dims.iter().any(|have| have == *dim))
                .map(|dim| dim.to_string())
                .collect::<Vec<_>>();
            if target == variable.dims {
                continue;
            }
            let perm = target
                .iter()
                .map(|dim| variable.dims.iter().position(|have| have == dim).unwrap_or(0))
                .collect::<Vec<_>>();
            let data = permute(&variable.data, &shape, &perm);
            self.variables.insert(name, Variable { dims: target, data });
        }
        Ok(())
    }

    /// Conforms `time` to `new_times`. Labels absent from the current index
    /// become null slices; labels not in `new_times` are dropped.
    pub fn reindex_time(&mut self, new_times: Vec<NaiveDateTime>) -> Result<(), IngestError> {
        let old = self
            .dim(TIME)
            .map(|dim| dim.coord.clone())
            .ok_or_else(|| IngestError::Dataset("dataset has no time dimension".to_string()))?;
        let target = CoordValues::Time(new_times);
        let map = old.positions_in(&target);
        self.remap_dim(TIME, target, &map)
    }

    pub fn isel(&self, dim: &str, indices: &[usize]) -> Result<Dataset, IngestError> {
        let coord = self
            .dim(dim)
            .map(|d| d.coord.clone())
            .ok_or_else(|| IngestError::Dataset(format!("unknown dimension `{dim}`")))?;
        if let Some(bad) = indices.iter().find(|i| **i >= coord.len()) {
            return Err(IngestError::Dataset(format!(
                "index {bad} out of bounds for `{dim}` of length {}",
                coord.len()
            )));
        }
        let mut map = vec![None; coord.len()];
        for (new_index, old_index) in indices.iter().enumerate() {
            map[*old_index] = Some(new_index);
        }
        let mut selected = self.clone();
        selected.remap_dim(dim, coord.select(indices), &map)?;
        Ok(selected)
    }

    pub fn scale_variable(&mut self, name: &str, factor: f64) -> Result<(), IngestError> {
        let variable = self
            .variables
            .get_mut(name)
            .ok_or_else(|| IngestError::Dataset(format!("unknown variable `{name}`")))?;
        for value in variable.data.iter_mut() {
            *value = (f64::from(*value) * factor) as f32;
        }
        Ok(())
    }

    fn remap_dim(
        &mut self,
        dim: &str,
        target: CoordValues,
        map: &[Option<usize>],
    ) -> Result<(), IngestError> {
        let names = self.variables.keys().cloned().collect::<Vec<_>>();
        let mut remapped = BTreeMap::new();
        for name in names {
            let Some(variable) = self.variables.get(&name) else {
                continue;
            };
            let Some(axis) = variable.dims.iter().position(|d| d == dim) else {
                continue;
            };
            let old_shape = self.variable_shape(variable)?;
            let mut new_shape = old_shape.clone();
            new_shape[axis] = target.len();
            let maps = axis_maps(&old_shape, axis, map);
            let data = remap(&variable.data, &old_shape, &new_shape, &maps, f32::NAN);
            remapped.insert(name, data);
        }

        if let Some(valid) = self.valid_time.take() {
            let axis = match dim {
                TIME => Some(0),
                STEP => Some(1),
                _ => None,
            };
            let old_shape = self.shape_of(&[TIME, STEP])?;
            self.valid_time = Some(match axis {
                Some(axis) => {
                    let mut new_shape = old_shape.clone();
                    new_shape[axis] = target.len();
                    let maps = axis_maps(&old_shape, axis, map);
                    remap(&valid, &old_shape, &new_shape, &maps, None)
                }
                None => valid,
            });
        }

        for (name, data) in remapped {
            if let Some(variable) = self.variables.get_mut(&name) {
                variable.data = data;
            }
        }
        for existing in self.dims.iter_mut().filter(|d| d.name == dim) {
            existing.coord = target.clone();
        }
        Ok(())
    }

    /// Coordinate-aligned union. Dimensions listed in `outer` take the
    /// sorted union of their labels (uncovered cells become null); every
    /// other shared dimension and scalar coordinate must agree exactly.
    pub fn merge(datasets: Vec<Dataset>, outer: &[&str]) -> Result<Dataset, IngestError> {
        let mut merged = Dataset::new();
        for dataset in &datasets {
            for dim in &dataset.dims {
                match merged.dims.iter_mut().find(|have| have.name == dim.name) {
                    None => merged.dims.push(dim.clone()),
                    Some(have) if have.coord == dim.coord => {}
                    Some(have) if outer.contains(&dim.name.as_str()) => {
                        have.coord = have.coord.union(&dim.coord).ok_or_else(|| {
                            IngestError::CoordinateMismatch {
                                name: dim.name.clone(),
                                details: format!(
                                    "cannot join {} labels with {} labels",
                                    have.coord.kind(),
                                    dim.coord.kind()
                                ),
                            }
                        })?;
                    }
                    Some(have) => {
                        return Err(IngestError::CoordinateMismatch {
                            name: dim.name.clone(),
                            details: format!(
                                "{} labels ({} values) differ from {} labels ({} values)",
                                have.coord.kind(),
                                have.len(),
                                dim.coord.kind(),
                                dim.len()
                            ),
                        });
                    }
                }
            }
            for (name, value) in &dataset.scalar_coords {
                match merged.scalar_coords.get(name) {
                    Some(have) if have != value => {
                        return Err(IngestError::CoordinateMismatch {
                            name: name.clone(),
                            details: format!("scalar value {have} differs from {value}"),
                        });
                    }
                    _ => {
                        merged.scalar_coords.insert(name.clone(), *value);
                    }
                }
            }
        }

        for dataset in datasets {
            for (name, variable) in &dataset.variables {
                if merged.variables.contains_key(name) {
                    return Err(IngestError::CoordinateMismatch {
                        name: name.clone(),
                        details: "variable provided by more than one fragment".to_string(),
                    });
                }
                let old_shape = dataset.variable_shape(variable)?;
                let dims = variable.dims.iter().map(String::as_str).collect::<Vec<_>>();
                let new_shape = merged.shape_of(&dims)?;
                let maps = variable
                    .dims
                    .iter()
                    .map(|dim| {
                        let source = dataset.dim(dim).map(|d| &d.coord);
                        let target = merged.dim(dim).map(|d| &d.coord);
                        match (source, target) {
                            (Some(source), Some(target)) => Ok(source.positions_in(target)),
                            _ => Err(IngestError::Dataset(format!("unknown dimension `{dim}`"))),
                        }
                    })
                    .collect::<Result<Vec<_>, IngestError>>()?;
                let identity = old_shape == new_shape
                    && maps.iter().all(|map| {
                        map.iter()
                            .enumerate()
                            .all(|(old, new)| *new == Some(old))
                    });
                let data = if identity {
                    variable.data.clone()
                } else {
                    remap(&variable.data, &old_shape, &new_shape, &maps, f32::NAN)
                };
                merged.variables.insert(
                    name.clone(),
                    Variable {
                        dims: variable.dims.clone(),
                        data,
                    },
                );
            }
            if merged.valid_time.is_none() && dataset.valid_time.is_some() {
                let same_axes = [TIME, STEP]
                    .iter()
                    .all(|dim| dataset.dim(dim).map(|d| &d.coord) == merged.dim(dim).map(|d| &d.coord));
                if same_axes {
                    merged.valid_time = dataset.valid_time.clone();
                }
            }
        }
        Ok(merged)
    }
}

fn axis_maps(shape: &[usize], axis: usize, map: &[Option<usize>]) -> Vec<Vec<Option<usize>>> {
    shape
        .iter()
        .enumerate()
        .map(|(i, len)| {
            if i == axis {
                map.to_vec()
            } else {
                (0..*len).map(Some).collect()
            }
        })
        .collect()
}

/// Scatters row-major `data` into a `new_shape` array filled with `fill`.
/// `maps[axis][old]` is the new position of an old label, or `None` to drop.
fn remap<T: Copy>(
    data: &[T],
    old_shape: &[usize],
    new_shape: &[usize],
    maps: &[Vec<Option<usize>>],
    fill: T,
) -> Vec<T> {
    let mut out = vec![fill; new_shape.iter().product()];
    let new_strides = strides(new_shape);
    let mut index = vec![0usize; old_shape.len()];
    for value in data {
        let target = index
            .iter()
            .enumerate()
            .try_fold(0usize, |acc, (axis, i)| {
                maps[axis][*i].map(|pos| acc + pos * new_strides[axis])
            });
        if let Some(target) = target {
            out[target] = *value;
        }
        increment(&mut index, old_shape);
    }
    out
}

fn permute(data: &[f32], shape: &[usize], perm: &[usize]) -> Vec<f32> {
    let old_strides = strides(shape);
    let new_shape = perm.iter().map(|axis| shape[*axis]).collect::<Vec<_>>();
    let mut index = vec![0usize; new_shape.len()];
    let mut out = Vec::with_capacity(data.len());
    for _ in 0..data.len() {
        let source = index
            .iter()
            .zip(perm)
            .map(|(i, axis)| i * old_strides[*axis])
            .sum::<usize>();
        out.push(data[source]);
        increment(&mut index, &new_shape);
    }
    out
}

fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

fn increment(index: &mut [usize], shape: &[usize]) {
    for axis in (0..index.len()).rev() {
        index[axis] += 1;
        if index[axis] < shape[axis] {
            return;
        }
        index[axis] = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permute_swaps_axes() {
        // 2x3 -> 3x2
        let data = vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let out = permute(&data, &[2, 3], &[1, 0]);
        assert_eq!(out, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn expand_then_merge_unions_levels() {
        let upper = Dataset::new()
            .with_dim(LEVEL, CoordValues::Float(vec![500.0, 850.0]))
            .unwrap()
            .with_dim(LATITUDE, CoordValues::Float(vec![0.0]))
            .unwrap()
            .with_variable("t", &[LEVEL, LATITUDE], vec![1.0, 2.0])
            .unwrap();
        let mut single = Dataset::new()
            .with_dim(LATITUDE, CoordValues::Float(vec![0.0]))
            .unwrap()
            .with_variable("q", &[LATITUDE], vec![9.0])
            .unwrap();
        single.set_scalar_coord(LEVEL, 1000.0);
        single.expand_dim(LEVEL).unwrap();

        let merged = Dataset::merge(vec![upper, single], &[LEVEL]).unwrap();
        assert_eq!(
            merged.dim(LEVEL).unwrap().coord,
            CoordValues::Float(vec![500.0, 850.0, 1000.0])
        );
        let q = &merged.variable("q").unwrap().data;
        assert!(q[0].is_nan() && q[1].is_nan());
        assert_eq!(q[2], 9.0);
        assert_eq!(merged.variable("t").unwrap().data[..2], [1.0, 2.0]);
    }

    #[test]
    fn merge_realigns_same_shape_fragments() {
        let descending = Dataset::new()
            .with_dim(LEVEL, CoordValues::Float(vec![850.0, 500.0]))
            .unwrap()
            .with_variable("t", &[LEVEL], vec![1.0, 2.0])
            .unwrap();
        let ascending = Dataset::new()
            .with_dim(LEVEL, CoordValues::Float(vec![500.0, 850.0]))
            .unwrap()
            .with_variable("q", &[LEVEL], vec![3.0, 4.0])
            .unwrap();

        let merged = Dataset::merge(vec![descending, ascending], &[LEVEL]).unwrap();
        assert_eq!(
            merged.dim(LEVEL).unwrap().coord,
            CoordValues::Float(vec![500.0, 850.0])
        );
        assert_eq!(merged.variable("t").unwrap().data, vec![2.0, 1.0]);
        assert_eq!(merged.variable("q").unwrap().data, vec![3.0, 4.0]);
    }

    #[test]
    fn merge_rejects_mismatched_latitudes() {
        let a = Dataset::new()
            .with_dim(LATITUDE, CoordValues::Float(vec![0.0, 1.5]))
            .unwrap();
        let b = Dataset::new()
            .with_dim(LATITUDE, CoordValues::Float(vec![0.0, 3.0]))
            .unwrap();
        let err = Dataset::merge(vec![a, b], &[LEVEL]).unwrap_err();
        assert!(matches!(err, IngestError::CoordinateMismatch { .. }));
    }
}
