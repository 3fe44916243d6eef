use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use libflate::gzip::{self, EncodeOptions, HeaderBuilder};
use log::warn;
use ndarray::Array2;

use crate::{
    constants::{ZBIN_IMAGE_TAG, ZBIN_RASTER_TAG},
    error::ReshuffleError,
    models::{grid::GridIndex, image::Image},
};

/// gzip encoder with a zeroed modification time, so equal content gives equal bytes
pub fn zbin_encoder<W: Write>(inner: W) -> io::Result<gzip::Encoder<W>> {
    let header = HeaderBuilder::new().modification_time(0).finish();
    gzip::Encoder::with_options(inner, EncodeOptions::new().header(header))
}

pub fn write_u32<W: Write>(w: &mut W, value: u32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

pub fn write_i64<W: Write>(w: &mut W, value: i64) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

pub fn write_f32s<'a, W: Write>(w: &mut W, values: impl IntoIterator<Item = &'a f32>) -> io::Result<()> {
    let buf: Vec<u8> = values
        .into_iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    w.write_all(&buf)
}

pub fn write_u32s<'a, W: Write>(w: &mut W, values: impl IntoIterator<Item = &'a u32>) -> io::Result<()> {
    let buf: Vec<u8> = values
        .into_iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    w.write_all(&buf)
}

/// length-prefixed UTF-8 string
pub fn write_str<W: Write>(w: &mut W, value: &str) -> io::Result<()> {
    write_u32(w, value.len() as u32)?;
    w.write_all(value.as_bytes())
}

/// Writes through `<file>.tmp` and renames, so readers never see a partial file
pub fn write_atomically<F>(file: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut gzip::Encoder<BufWriter<File>>) -> io::Result<()>,
{
    let mut tmp = PathBuf::from(file);
    tmp.set_extension("tmp");

    let output = BufWriter::new(File::create(&tmp)?);
    let mut encoder = zbin_encoder(output)?;
    let result = write(&mut encoder).and_then(|_| encoder.finish().into_result());
    match result {
        Ok(mut output) => {
            output.flush()?;
            drop(output);
            fs::rename(&tmp, file)
        }
        Err(err) => {
            if let Err(rm_err) = fs::remove_file(&tmp) {
                warn!("Cannot remove {:?}: {}", tmp, rm_err);
            }
            Err(err)
        }
    }
}

/// Grid-shaped raster (e.g. a land mask), row 0 = south
pub fn write_raster_file(file: &Path, grid: &GridIndex, values: &[f32]) -> io::Result<()> {
    if values.len() != grid.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("raster has {} values, grid has {}", values.len(), grid.len()),
        ));
    }
    write_atomically(file, |w| {
        write_u32(w, ZBIN_RASTER_TAG)?;
        write_u32(w, grid.nrows as u32)?;
        write_u32(w, grid.ncols as u32)?;
        let half = (grid.resolution / 2.0) as f32;
        write_f32s(w, &[-90.0 + half, 90.0 - half, -180.0 + half, 180.0 - half])?;
        write_f32s(w, values)
    })
}

/// Multi-variable image for one timestamp
pub fn write_image_file(file: &Path, image: &Image) -> Result<(), ReshuffleError> {
    let shape = image
        .variables
        .values()
        .next()
        .map(|v| v.values.dim())
        .unwrap_or((0, 0));
    if image.variables.values().any(|v| v.values.dim() != shape) {
        return Err("all variables of an image must share one shape".into());
    }

    let blocks = image
        .variables
        .iter()
        .map(|(name, data)| {
            serde_json::to_string(&data.attributes)
                .map(|attrs| (name, attrs, &data.values))
                .map_err(|err| format!("cannot encode attributes of {name}: {err}"))
        })
        .collect::<Result<Vec<(&String, String, &Array2<f32>)>, String>>()?;

    write_atomically(file, |w| {
        write_u32(w, ZBIN_IMAGE_TAG)?;
        write_u32(w, shape.0 as u32)?;
        write_u32(w, shape.1 as u32)?;
        write_u32(w, blocks.len() as u32)?;
        write_i64(w, image.timestamp.timestamp())?;
        for (name, attrs, values) in &blocks {
            write_str(w, name)?;
            write_str(w, attrs)?;
            write_f32s(w, values.iter())?;
        }
        Ok(())
    })?;
    Ok(())
}

/// Logs every failure and returns the first one
pub fn extract_errors<T>(label: &str, results: Vec<Result<T, ReshuffleError>>) -> Result<Vec<T>, ReshuffleError> {
    let mut values = Vec::with_capacity(results.len());
    let mut first: Option<ReshuffleError> = None;
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(err) => {
                warn!("{}: {}", label, err);
                if first.is_none() {
                    first = Some(err);
                }
            }
        }
    }
    match first {
        Some(err) => Err(err),
        None => Ok(values),
    }
}
