use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::{Array2, Axis};
use netcdf::{extent::Extents, AttributeValue, Variable};

use crate::{
    constants::COORDINATE_NAMES,
    error::ReshuffleError,
    models::image::{Image, VariableAttributes, VariableData},
    modules::cursor::config::{FileTemplate, DEFAULT_NETCDF_TEMPLATE},
};

use super::prelude::ImageDecoder;

fn attribute_f64(var: &Variable, name: &str) -> Option<f64> {
    match var.attribute(name)?.value().ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(v as f64),
        AttributeValue::Int(v) => Some(v as f64),
        AttributeValue::Short(v) => Some(v as f64),
        AttributeValue::Schar(v) => Some(v as f64),
        AttributeValue::Longlong(v) => Some(v as f64),
        _ => None,
    }
}

fn attribute_str(var: &Variable, name: &str) -> Option<String> {
    match var.attribute(name)?.value().ok()? {
        AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

fn read_attributes(var: &Variable) -> VariableAttributes {
    VariableAttributes {
        units: attribute_str(var, "units"),
        long_name: attribute_str(var, "long_name"),
        missing_value: attribute_f64(var, "_FillValue")
            .or_else(|| attribute_f64(var, "missing_value"))
            .map(|v| v as f32),
        scale_factor: attribute_f64(var, "scale_factor"),
        add_offset: attribute_f64(var, "add_offset"),
    }
}

/// Decoder for one-image-per-file NetCDF products on a regular lat/lon grid
#[derive(Debug, Clone)]
pub struct NetCdfImageDecoder {
    template: FileTemplate,
    lat_name: String,
    lon_name: String,
}

impl Default for NetCdfImageDecoder {
    fn default() -> Self {
        NetCdfImageDecoder {
            template: FileTemplate {
                template: DEFAULT_NETCDF_TEMPLATE.to_string(),
                datetime_format: "%Y%m%d%H%M%S".to_string(),
                fields: Default::default(),
            },
            lat_name: "lat".to_string(),
            lon_name: "lon".to_string(),
        }
    }
}

impl NetCdfImageDecoder {
    pub fn new(template: FileTemplate) -> Self {
        NetCdfImageDecoder {
            template,
            ..Default::default()
        }
    }

    pub fn with_coordinate_names(mut self, lat_name: &str, lon_name: &str) -> Self {
        self.lat_name = lat_name.to_string();
        self.lon_name = lon_name.to_string();
        self
    }

    fn read(&self, path: &Path, variables: &[String], timestamp: &DateTime<Utc>) -> Result<Image, String> {
        let file = netcdf::open(path).map_err(|err| err.to_string())?;

        let lats = file
            .variable(&self.lat_name)
            .ok_or_else(|| format!("Could not find variable {}", self.lat_name))?
            .values::<f64, _>(Extents::All)
            .map_err(|err| err.to_string())?
            .into_iter()
            .collect::<Vec<f64>>();
        let north_up = matches!((lats.first(), lats.last()), (Some(first), Some(last)) if first > last);
        let n_lons = file
            .variable(&self.lon_name)
            .ok_or_else(|| format!("Could not find variable {}", self.lon_name))?
            .len();

        let mut image = Image::new(*timestamp);
        for name in variables {
            let var = file
                .variable(name)
                .ok_or_else(|| format!("Could not find variable {name}"))?;
            let dims = var.dimensions();
            let (extents, nrows, ncols): (Extents, usize, usize) = match dims.len() {
                2 => (Extents::All, dims[0].len(), dims[1].len()),
                3 => {
                    let extents = (0, .., ..)
                        .try_into()
                        .map_err(|_| format!("Could not slice variable {name}"))?;
                    (extents, dims[1].len(), dims[2].len())
                }
                n => return Err(format!("variable {name} has {n} dimensions")),
            };
            if (nrows, ncols) != (lats.len(), n_lons) {
                return Err(format!(
                    "variable {name} is {nrows}x{ncols}, coordinates are {}x{}",
                    lats.len(),
                    n_lons
                ));
            }

            let values: Vec<f32> = var
                .values::<f32, _>(extents)
                .map_err(|err| err.to_string())?
                .into_iter()
                .collect();
            let mut values = Array2::from_shape_vec((nrows, ncols), values)
                .map_err(|err| err.to_string())?;
            if north_up {
                values.invert_axis(Axis(0));
                values = values.as_standard_layout().to_owned();
            }
            image.variables.insert(
                name.clone(),
                VariableData {
                    values,
                    attributes: read_attributes(&var),
                },
            );
        }
        Ok(image)
    }
}

impl ImageDecoder for NetCdfImageDecoder {
    fn resolve(&self, root: &Path, date: &DateTime<Utc>) -> Result<PathBuf, ReshuffleError> {
        self.template.resolve(root, date)
    }

    fn available(&self, root: &Path) -> Result<Vec<DateTime<Utc>>, ReshuffleError> {
        self.template.image_dates(root)
    }

    fn variables(&self, path: &Path) -> Result<Vec<String>, ReshuffleError> {
        let file = netcdf::open(path).map_err(|err| ReshuffleError::decode(path, err))?;
        let dimensions: Vec<String> = file.dimensions().map(|d| d.name()).collect();
        let names = file
            .variables()
            .map(|v| v.name())
            .filter(|name| {
                *name != self.lat_name
                    && *name != self.lon_name
                    && !COORDINATE_NAMES.contains(&name.as_str())
                    && !dimensions.contains(name)
            })
            .collect();
        Ok(names)
    }

    fn decode(
        &self,
        path: &Path,
        variables: &[String],
        timestamp: &DateTime<Utc>,
    ) -> Result<Image, ReshuffleError> {
        self.read(path, variables, timestamp)
            .map_err(|msg| ReshuffleError::decode(path, msg))
    }
}
