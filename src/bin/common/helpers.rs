use std::{fmt::Display, path::Path};

use cellshuffle::{
    io::{
        readers::{prelude::ImageDecoder, zbin::ZBinImageDecoder},
        writers::{prelude::CellWriter, zbin::ZBinCellWriter},
    },
    models::series::GlobalAttributes,
    modules::cursor::config::FileTemplate,
    ReshuffleError,
};
use chrono::{DateTime, NaiveDate, Utc};

use super::config::builder::OutputFormat;

#[derive(Debug)]
pub struct CliError {
    msg: String,
}

impl From<String> for CliError {
    fn from(msg: String) -> Self {
        CliError { msg }
    }
}

impl From<&str> for CliError {
    fn from(msg: &str) -> Self {
        CliError { msg: msg.into() }
    }
}

impl From<ReshuffleError> for CliError {
    fn from(err: ReshuffleError) -> Self {
        CliError {
            msg: err.to_string(),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for CliError {}

/// `YYYY-MM-DD` at midnight UTC
pub fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("Could not parse date '{value}', expected YYYY-MM-DD"))?;
    let date = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("Invalid date '{value}'"))?;
    Ok(DateTime::from_naive_utc_and_offset(date, Utc))
}

/// `key=value` template field
pub fn parse_field(value: &str) -> Result<(String, String), String> {
    let (key, val) = value
        .split_once('=')
        .ok_or_else(|| format!("Invalid field '{value}', expected key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Invalid field '{value}': empty key"));
    }
    Ok((key.to_string(), val.trim().to_string()))
}

/// Decoder matching the extension of the template: `.nc` files are NetCDF
pub fn build_decoder(template: &FileTemplate) -> Result<Box<dyn ImageDecoder>, CliError> {
    if template.template.ends_with(".nc") {
        #[cfg(feature = "netcdf")]
        {
            use cellshuffle::io::readers::netcdf::NetCdfImageDecoder;
            return Ok(Box::new(NetCdfImageDecoder::new(template.clone())));
        }
        #[cfg(not(feature = "netcdf"))]
        return Err("NetCDF images require the 'netcdf' feature".into());
    }
    Ok(Box::new(ZBinImageDecoder::new(template.clone())))
}

pub fn build_writer(
    format: OutputFormat,
    ts_path: &Path,
    global_attributes: &GlobalAttributes,
) -> Result<Box<dyn CellWriter>, CliError> {
    match format {
        OutputFormat::Zbin => Ok(Box::new(
            ZBinCellWriter::new(ts_path)?.with_global_attributes(global_attributes.clone()),
        )),
        #[cfg(feature = "netcdf")]
        OutputFormat::Netcdf => {
            use cellshuffle::io::writers::netcdf::NetCdfCellWriter;
            Ok(Box::new(
                NetCdfCellWriter::new(ts_path)?.with_global_attributes(global_attributes.clone()),
            ))
        }
        #[cfg(not(feature = "netcdf"))]
        OutputFormat::Netcdf => Err("NetCDF output requires the 'netcdf' feature".into()),
    }
}
