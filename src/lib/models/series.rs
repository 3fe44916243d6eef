use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::{concatenate, Array2, Axis};

use crate::models::{
    cell::CellId,
    grid::GridPoint,
    image::VariableAttributes,
};

/// Series of one variable for every point of a cell, shaped (points, time)
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesVariable {
    pub name: String,
    pub attributes: VariableAttributes,
    pub values: Array2<f32>,
}

/// What a single flush hands to the cell writer
#[derive(Debug, Clone)]
pub struct CellSegment {
    pub cell: CellId,
    /// number of timestamps of this cell already flushed in this run
    pub time_offset: usize,
    pub points: Vec<GridPoint>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub variables: Vec<SeriesVariable>,
}

impl CellSegment {
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn n_times(&self) -> usize {
        self.timestamps.len()
    }

    pub fn lons(&self) -> Vec<f32> {
        self.points.iter().map(|p| p.lon).collect()
    }

    pub fn lats(&self) -> Vec<f32> {
        self.points.iter().map(|p| p.lat).collect()
    }

    pub fn variable(&self, name: &str) -> Option<&SeriesVariable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

/// Accumulates the time series of every point of one cell between flushes.
/// Values are stored time-major: one block of `points.len()` values per timestamp.
#[derive(Debug)]
pub struct TimeSeriesBuffer {
    pub cell: CellId,
    points: Vec<GridPoint>,
    timestamps: Vec<DateTime<Utc>>,
    values: BTreeMap<String, Vec<f32>>,
    time_offset: usize,
    flushes: usize,
}

impl TimeSeriesBuffer {
    pub fn new(cell: CellId, points: Vec<GridPoint>, variables: &[String]) -> Self {
        let values = variables
            .iter()
            .map(|v| (v.clone(), Vec::new()))
            .collect();
        TimeSeriesBuffer {
            cell,
            points,
            timestamps: Vec::new(),
            values,
            time_offset: 0,
            flushes: 0,
        }
    }

    pub fn points(&self) -> &[GridPoint] {
        &self.points
    }

    /// Buffered timestamps not yet flushed
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Timestamps already handed to the writer
    pub fn time_offset(&self) -> usize {
        self.time_offset
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub fn push_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamps.push(timestamp);
    }

    pub fn values_mut(&mut self, variable: &str) -> Option<&mut Vec<f32>> {
        self.values.get_mut(variable)
    }

    /// Moves the buffered data into a segment and resets the buffer.
    /// `attributes` supplies the canonical record of each variable.
    pub fn take_segment<F>(&mut self, attributes: F) -> CellSegment
    where
        F: Fn(&str) -> VariableAttributes,
    {
        let n_points = self.points.len();
        let n_times = self.timestamps.len();
        let timestamps = std::mem::take(&mut self.timestamps);

        let variables = self
            .values
            .iter_mut()
            .map(|(name, values)| {
                let values = std::mem::take(values);
                let mut series = Array2::<f32>::zeros((n_points, n_times));
                for (t, block) in values.chunks_exact(n_points.max(1)).enumerate() {
                    for (p, v) in block.iter().enumerate() {
                        series[[p, t]] = *v;
                    }
                }
                SeriesVariable {
                    name: name.clone(),
                    attributes: attributes(name),
                    values: series,
                }
            })
            .collect();

        let segment = CellSegment {
            cell: self.cell,
            time_offset: self.time_offset,
            points: self.points.clone(),
            timestamps,
            variables,
        };
        self.time_offset += n_times;
        self.flushes += 1;
        segment
    }

    /// Drops buffered data without flushing it
    pub fn discard(&mut self) {
        self.timestamps.clear();
        self.values.values_mut().for_each(|v| v.clear());
    }
}

/// File-level attributes of a cell file (product, version, ...)
pub type GlobalAttributes = BTreeMap<String, String>;

/// Full content of one cell file: every point of the cell over every timestamp written so far
#[derive(Debug, Clone, PartialEq)]
pub struct CellArchive {
    pub cell: CellId,
    pub global_attributes: GlobalAttributes,
    pub indices: Vec<u32>,
    pub lons: Vec<f32>,
    pub lats: Vec<f32>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub variables: Vec<SeriesVariable>,
}

impl CellArchive {
    pub fn from_segment(segment: &CellSegment) -> Self {
        CellArchive {
            cell: segment.cell,
            global_attributes: GlobalAttributes::new(),
            indices: segment.points.iter().map(|p| p.index as u32).collect(),
            lons: segment.lons(),
            lats: segment.lats(),
            timestamps: segment.timestamps.clone(),
            variables: segment.variables.clone(),
        }
    }

    pub fn with_global_attributes(mut self, attributes: &GlobalAttributes) -> Self {
        self.global_attributes = attributes.clone();
        self
    }

    pub fn n_points(&self) -> usize {
        self.indices.len()
    }

    pub fn n_times(&self) -> usize {
        self.timestamps.len()
    }

    pub fn variable(&self, name: &str) -> Option<&SeriesVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Row of grid point `index` in the archive
    pub fn position(&self, index: usize) -> Option<usize> {
        self.indices.iter().position(|i| *i as usize == index)
    }

    /// Time series of `variable` at grid point `index`
    pub fn series(&self, index: usize, variable: &str) -> Option<Vec<f32>> {
        let pos = self.position(index)?;
        let var = self.variable(variable)?;
        Some(var.values.row(pos).to_vec())
    }

    /// Appends a later segment of the same cell along the time axis.
    /// The point set and the variables must match and the new timestamps
    /// must all come after the stored ones.
    pub fn extend(&mut self, segment: &CellSegment) -> Result<(), String> {
        if segment.cell != self.cell {
            return Err(format!("segment of cell {} appended to cell {}", segment.cell, self.cell));
        }
        let indices = segment.points.iter().map(|p| p.index as u32);
        if !indices.eq(self.indices.iter().copied()) {
            return Err("point set differs from the stored one".into());
        }
        if let (Some(last), Some(first)) = (self.timestamps.last(), segment.timestamps.first()) {
            if first <= last {
                return Err(format!(
                    "timestamp {first} is not after the last stored timestamp {last}"
                ));
            }
        }
        if segment.variables.len() != self.variables.len() {
            return Err("variable set differs from the stored one".into());
        }

        let mut merged = Vec::with_capacity(self.variables.len());
        for stored in &self.variables {
            let new = segment
                .variable(&stored.name)
                .ok_or_else(|| format!("variable {} missing from segment", stored.name))?;
            let values = concatenate(Axis(1), &[stored.values.view(), new.values.view()])
                .map_err(|err| format!("cannot append {}: {}", stored.name, err))?;
            merged.push(SeriesVariable {
                name: stored.name.clone(),
                attributes: stored.attributes.clone(),
                values,
            });
        }
        self.variables = merged;
        self.timestamps.extend(segment.timestamps.iter().copied());
        Ok(())
    }
}
