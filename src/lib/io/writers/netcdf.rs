use std::path::{Path, PathBuf};

use log::debug;
use netcdf::{extent::Extents, AttributeValue, MutableFile};

use crate::{
    constants::GRID_LOOKUP_NAME,
    error::ReshuffleError,
    models::{
        cell::{CellId, CellPartitioner},
        grid::GridSubset,
        image::VariableAttributes,
        series::{CellSegment, GlobalAttributes},
    },
};

use super::prelude::{CellHandle, CellWriter};

const TIME_UNITS: &str = "days since 1970-01-01 00:00:00";
const SECONDS_PER_DAY: f64 = 86400.0;

pub fn cell_file_name(cell: CellId) -> String {
    format!("{cell:04}.nc")
}

fn nc_err(err: netcdf::error::Error) -> String {
    err.to_string()
}

fn add_locations(
    file: &mut MutableFile,
    indices: &[u32],
    lons: &[f32],
    lats: &[f32],
) -> Result<(), String> {
    file.add_dimension("locations", indices.len()).map_err(nc_err)?;

    let mut var = file
        .add_variable::<u32>("location_id", &["locations"])
        .map_err(nc_err)?;
    var.put_values(indices, Extents::All).map_err(nc_err)?;

    let mut var = file.add_variable::<f32>("lon", &["locations"]).map_err(nc_err)?;
    var.add_attribute("standard_name", "longitude").map_err(nc_err)?;
    var.add_attribute("units", "degrees_east").map_err(nc_err)?;
    var.put_values(lons, Extents::All).map_err(nc_err)?;

    let mut var = file.add_variable::<f32>("lat", &["locations"]).map_err(nc_err)?;
    var.add_attribute("standard_name", "latitude").map_err(nc_err)?;
    var.add_attribute("units", "degrees_north").map_err(nc_err)?;
    var.put_values(lats, Extents::All).map_err(nc_err)?;
    Ok(())
}

fn add_series_attributes(
    var: &mut netcdf::VariableMut,
    attributes: &VariableAttributes,
) -> Result<(), String> {
    if let Some(units) = &attributes.units {
        var.add_attribute("units", units.as_str()).map_err(nc_err)?;
    }
    if let Some(long_name) = &attributes.long_name {
        var.add_attribute("long_name", long_name.as_str()).map_err(nc_err)?;
    }
    if let Some(missing_value) = attributes.missing_value {
        var.add_attribute("missing_value", missing_value).map_err(nc_err)?;
    }
    if let Some(scale_factor) = attributes.scale_factor {
        var.add_attribute("scale_factor", scale_factor).map_err(nc_err)?;
    }
    if let Some(add_offset) = attributes.add_offset {
        var.add_attribute("add_offset", add_offset).map_err(nc_err)?;
    }
    Ok(())
}

/// New cell file in the CF orthogonal multidimensional time series layout
fn create_cell_file(
    file_name: &Path,
    segment: &CellSegment,
    global_attributes: &GlobalAttributes,
) -> Result<MutableFile, String> {
    let mut file = netcdf::create_with(file_name, netcdf::Options::NETCDF4)
        .map_err(|err| format!("can't create file {file_name:?}: {err}"))?;

    for (name, value) in global_attributes {
        file.add_attribute(name, value.as_str()).map_err(nc_err)?;
    }

    file.add_attribute("Conventions", "CF-1.6").map_err(nc_err)?;
    file.add_attribute("featureType", "timeSeries").map_err(nc_err)?;
    file.add_attribute("cell", segment.cell).map_err(nc_err)?;

    let indices: Vec<u32> = segment.points.iter().map(|p| p.index as u32).collect();
    add_locations(&mut file, &indices, &segment.lons(), &segment.lats())?;

    file.add_unlimited_dimension("time").map_err(nc_err)?;
    let mut time_var = file.add_variable::<f64>("time", &["time"]).map_err(nc_err)?;
    time_var.add_attribute("units", TIME_UNITS).map_err(nc_err)?;
    time_var.add_attribute("standard_name", "time").map_err(nc_err)?;

    for series in &segment.variables {
        let mut var = file
            .add_variable::<f32>(&series.name, &["locations", "time"])
            .map_err(nc_err)?;
        add_series_attributes(&mut var, &series.attributes)?;
    }
    Ok(file)
}

/// Writes one `NNNN.nc` file per cell.
/// The netCDF library is not thread safe: cells are flushed one at a time.
pub struct NetCdfCellWriter {
    path: PathBuf,
    global_attributes: GlobalAttributes,
}

impl NetCdfCellWriter {
    pub fn new(path: &Path) -> Result<Self, ReshuffleError> {
        std::fs::create_dir_all(path)?;
        Ok(NetCdfCellWriter {
            path: path.to_path_buf(),
            global_attributes: GlobalAttributes::new(),
        })
    }

    /// File attributes of the cell files created from now on
    pub fn with_global_attributes(mut self, attributes: GlobalAttributes) -> Self {
        self.global_attributes = attributes;
        self
    }

    pub fn cell_path(&self, cell: CellId) -> PathBuf {
        self.path.join(cell_file_name(cell))
    }
}

impl CellWriter for NetCdfCellWriter {
    fn create_or_open(&self, cell: CellId) -> Result<Box<dyn CellHandle + '_>, ReshuffleError> {
        let file_name = self.cell_path(cell);
        let file = if file_name.is_file() {
            Some(netcdf::append(&file_name).map_err(|err| ReshuffleError::write(cell, err))?)
        } else {
            None
        };
        Ok(Box::new(NetCdfCellHandle {
            cell,
            file_name,
            file,
            global_attributes: &self.global_attributes,
        }))
    }

    fn write_grid_lookup(
        &self,
        subset: &GridSubset,
        partitioner: &CellPartitioner,
    ) -> Result<(), ReshuffleError> {
        let file_name = self.path.join(format!("{GRID_LOOKUP_NAME}.nc"));
        let points = subset.points();
        let indices: Vec<u32> = points.iter().map(|p| p.index as u32).collect();
        let lons: Vec<f32> = points.iter().map(|p| p.lon).collect();
        let lats: Vec<f32> = points.iter().map(|p| p.lat).collect();
        let cells: Vec<u32> = points.iter().map(|p| partitioner.cell_of(p)).collect();

        let write = || -> Result<(), String> {
            let mut file = netcdf::create_with(&file_name, netcdf::Options::NETCDF4)
                .map_err(|err| format!("can't create file {file_name:?}: {err}"))?;
            add_locations(&mut file, &indices, &lons, &lats)?;
            let mut var = file.add_variable::<u32>("cell", &["locations"]).map_err(nc_err)?;
            var.put_values(&cells, Extents::All).map_err(nc_err)?;
            Ok(())
        };
        write().map_err(ReshuffleError::from)?;
        debug!("[NC] Grid lookup written to {:?}", file_name);
        Ok(())
    }

    fn concurrent_cells(&self) -> bool {
        false
    }
}

struct NetCdfCellHandle<'a> {
    cell: CellId,
    file_name: PathBuf,
    file: Option<MutableFile>,
    global_attributes: &'a GlobalAttributes,
}

impl NetCdfCellHandle<'_> {
    /// Stored point ids and timestamps of an existing file
    fn check_existing(file: &MutableFile, segment: &CellSegment) -> Result<usize, String> {
        let ids = file
            .variable("location_id")
            .ok_or("variable not found: location_id")?
            .values::<u32, _>(Extents::All)
            .map_err(nc_err)?;
        let expected = segment.points.iter().map(|p| p.index as u32);
        if !ids.iter().copied().eq(expected) {
            return Err("point set differs from the stored one".into());
        }

        let time_var = file.variable("time").ok_or("variable not found: time")?;
        let len = time_var.len();
        if len > 0 {
            let last = time_var
                .values::<f64, _>(Extents::All)
                .map_err(nc_err)?
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            if let Some(first) = segment.timestamps.first() {
                if first.timestamp() as f64 / SECONDS_PER_DAY <= last {
                    return Err(format!("timestamp {first} is not after the stored ones"));
                }
            }
        }
        Ok(len)
    }

    fn write(&mut self, segment: &CellSegment) -> Result<(), String> {
        let offset = match &self.file {
            Some(file) => Self::check_existing(file, segment)?,
            None => {
                self.file = Some(create_cell_file(
                    &self.file_name,
                    segment,
                    self.global_attributes,
                )?);
                0
            }
        };
        let file = self.file.as_mut().ok_or("cell file not open")?;

        let n_times = segment.n_times();
        let times: Vec<f64> = segment
            .timestamps
            .iter()
            .map(|t| t.timestamp() as f64 / SECONDS_PER_DAY)
            .collect();
        let mut time_var = file.variable_mut("time").ok_or("variable not found: time")?;
        let extents: Extents = (&[offset], &[n_times])
            .try_into()
            .map_err(|_| "invalid time extent".to_string())?;
        time_var.put_values(&times, extents).map_err(nc_err)?;

        for series in &segment.variables {
            let mut var = file
                .variable_mut(&series.name)
                .ok_or_else(|| format!("variable not found: {}", series.name))?;
            if offset > 0 {
                check_missing_value(&var, &series.attributes)?;
            }
            let values: Vec<f32> = series.values.iter().copied().collect();
            let extents: Extents = (&[0, offset], &[segment.n_points(), n_times])
                .try_into()
                .map_err(|_| "invalid series extent".to_string())?;
            var.put_values(&values, extents).map_err(nc_err)?;
        }
        debug!(
            "[NC] Cell {} written to {:?} ({} timestamps)",
            self.cell,
            self.file_name,
            offset + n_times
        );
        Ok(())
    }
}

fn check_missing_value(var: &netcdf::VariableMut, attributes: &VariableAttributes) -> Result<(), String> {
    let stored = var
        .attribute("missing_value")
        .and_then(|a| a.value().ok())
        .and_then(|v| match v {
            AttributeValue::Float(f) => Some(f),
            AttributeValue::Double(d) => Some(d as f32),
            _ => None,
        });
    let stored = VariableAttributes {
        missing_value: stored,
        ..Default::default()
    };
    if !stored.same_missing_value(attributes) {
        return Err(format!(
            "missing value of {} differs from the stored one",
            var.name()
        ));
    }
    Ok(())
}

impl CellHandle for NetCdfCellHandle<'_> {
    fn append(&mut self, segment: &CellSegment) -> Result<(), ReshuffleError> {
        self.write(segment)
            .map_err(|msg| ReshuffleError::write(self.cell, msg))
    }

    fn close(self: Box<Self>) -> Result<(), ReshuffleError> {
        // the file is synced and closed on drop
        drop(self.file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::{grid::GridIndex, series::TimeSeriesBuffer};

    #[test]
    fn appends_along_time() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut product = GlobalAttributes::new();
        product.insert("product".to_string(), "COMBINED".to_string());
        let writer = NetCdfCellWriter::new(dir.path())
            .expect("writer")
            .with_global_attributes(product);
        let grid = GridIndex::new(1.0).expect("valid grid");
        let points = vec![grid.point_at(10, 20), grid.point_at(10, 21)];
        let mut buffer = TimeSeriesBuffer::new(3, points, &["sm".to_string()]);
        let attrs = VariableAttributes::new("%", "SM", -9999.0);

        for day in 1..=3 {
            buffer.push_timestamp(Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap());
            buffer
                .values_mut("sm")
                .expect("sm")
                .extend_from_slice(&[day as f32, -(day as f32)]);
            let segment = buffer.take_segment(|_| attrs.clone());
            let mut handle = writer.create_or_open(3).expect("open");
            handle.append(&segment).expect("append");
            handle.close().expect("close");
        }

        let file = netcdf::open(writer.cell_path(3)).expect("readable");
        let product = file.attribute("product").and_then(|a| a.value().ok());
        assert!(matches!(product, Some(AttributeValue::Str(p)) if p == "COMBINED"));
        let time = file.variable("time").expect("time");
        assert_eq!(time.len(), 3);
        let sm = file
            .variable("sm")
            .expect("sm")
            .values::<f32, _>(Extents::All)
            .expect("values");
        assert_eq!(sm.iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0, -1.0, -2.0, -3.0]);
    }
}
