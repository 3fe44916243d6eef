use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use libflate::gzip::Decoder;
use ndarray::Array2;
use serde_derive::Serialize;

use crate::{
    constants::{COORDINATE_NAMES, MAX_RASTER_POINTS, ZBIN_CELL_TAG, ZBIN_GRID_TAG, ZBIN_IMAGE_TAG, ZBIN_RASTER_TAG},
    error::ReshuffleError,
    io::writers::zbin::{cell_file_name, grid_file_name},
    models::{
        cell::CellId,
        grid::{great_circle_distance, GridIndex},
        image::{Image, VariableAttributes, VariableData},
        series::{CellArchive, GlobalAttributes, SeriesVariable},
    },
    modules::cursor::config::FileTemplate,
};

use super::prelude::ImageDecoder;

type ZBinDecoder = Decoder<BufReader<File>>;

fn open(file: &Path) -> io::Result<ZBinDecoder> {
    let input = BufReader::new(File::open(file)?);
    Decoder::new(input)
}

fn read_u32<T: Read>(decoder: &mut T) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    decoder.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i64<T: Read>(decoder: &mut T) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    decoder.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn checked_len(a: usize, b: usize) -> io::Result<usize> {
    a.checked_mul(b)
        .ok_or_else(|| invalid(format!("record size {a} x {b} overflows")))
}

/// Size of a raster record; the header is rejected before anything is allocated
fn raster_len(nrows: usize, ncols: usize) -> io::Result<usize> {
    let len = checked_len(nrows, ncols)?;
    if len == 0 || len > MAX_RASTER_POINTS {
        return Err(invalid(format!("implausible raster shape {nrows}x{ncols}")));
    }
    Ok(len)
}

/// Grows the buffer as data arrives, so a lying header on a short file
/// fails on the missing bytes instead of on the allocation
fn read_bytes<T: Read>(decoder: &mut T, len: usize) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    Read::take(&mut *decoder, len as u64).read_to_end(&mut buffer)?;
    if buffer.len() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes, found {}", buffer.len()),
        ));
    }
    Ok(buffer)
}

fn read_f32s<T: Read>(decoder: &mut T, len: usize) -> io::Result<Vec<f32>> {
    let buffer = read_bytes(decoder, checked_len(len, 4)?)?;
    Ok(buffer
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn read_u32s<T: Read>(decoder: &mut T, len: usize) -> io::Result<Vec<u32>> {
    let buffer = read_bytes(decoder, checked_len(len, 4)?)?;
    Ok(buffer
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn read_string<T: Read>(decoder: &mut T) -> io::Result<String> {
    let len = read_u32(decoder)? as usize;
    let bytes = read_bytes(decoder, len)?;
    String::from_utf8(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

fn read_timestamp<T: Read>(decoder: &mut T) -> io::Result<DateTime<Utc>> {
    let secs = read_i64(decoder)?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("timestamp {secs} out of range"),
        )
    })
}

fn read_attributes<T: Read>(decoder: &mut T) -> io::Result<VariableAttributes> {
    let json = read_string(decoder)?;
    serde_json::from_str(&json).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

fn expect_tag<T: Read>(decoder: &mut T, expected: u32) -> io::Result<()> {
    let tag = read_u32(decoder)?;
    if tag != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected zbin record {tag}, expected {expected}"),
        ));
    }
    Ok(())
}

/// Grid-shaped raster, row 0 = south
pub fn read_raster_file(file: &Path) -> Result<Array2<f32>, ReshuffleError> {
    let read = || -> io::Result<Array2<f32>> {
        let mut decoder = open(file)?;
        expect_tag(&mut decoder, ZBIN_RASTER_TAG)?;
        let nrows = read_u32(&mut decoder)? as usize;
        let ncols = read_u32(&mut decoder)? as usize;
        // lat/lon extent, implied by the grid shape
        read_f32s(&mut decoder, 4)?;
        let values = read_f32s(&mut decoder, raster_len(nrows, ncols)?)?;
        Array2::from_shape_vec((nrows, ncols), values)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    };
    read().map_err(|err| ReshuffleError::decode(file, err))
}

/// Land mask for `grid`: strictly positive values are land
pub fn read_land_mask(file: &Path, grid: &GridIndex) -> Result<Vec<bool>, ReshuffleError> {
    let raster = read_raster_file(file)?;
    if raster.dim() != grid.shape() {
        return Err(format!(
            "land mask {:?} has shape {:?}, grid has {:?}",
            file,
            raster.dim(),
            grid.shape()
        )
        .into());
    }
    Ok(raster.iter().map(|v| *v > 0.0).collect())
}

/// Every variable of a zbin image, row 0 = south
pub fn read_image_file(file: &Path) -> Result<Image, ReshuffleError> {
    let read = || -> io::Result<Image> {
        let mut decoder = open(file)?;
        expect_tag(&mut decoder, ZBIN_IMAGE_TAG)?;
        let nrows = read_u32(&mut decoder)? as usize;
        let ncols = read_u32(&mut decoder)? as usize;
        let len = raster_len(nrows, ncols)?;
        let nvars = read_u32(&mut decoder)?;
        let timestamp = read_timestamp(&mut decoder)?;

        let mut image = Image::new(timestamp);
        for _ in 0..nvars {
            let name = read_string(&mut decoder)?;
            let attributes = read_attributes(&mut decoder)?;
            let values = read_f32s(&mut decoder, len)?;
            let values = Array2::from_shape_vec((nrows, ncols), values)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            image
                .variables
                .insert(name, VariableData { values, attributes });
        }
        Ok(image)
    };
    read().map_err(|err| ReshuffleError::decode(file, err))
}

/// Reads images written as `IMG_<datetime>.zbin`, or any other template
#[derive(Debug, Clone, Default)]
pub struct ZBinImageDecoder {
    template: FileTemplate,
}

impl ZBinImageDecoder {
    pub fn new(template: FileTemplate) -> Self {
        ZBinImageDecoder { template }
    }
}

impl ImageDecoder for ZBinImageDecoder {
    fn resolve(&self, root: &Path, date: &DateTime<Utc>) -> Result<PathBuf, ReshuffleError> {
        self.template.resolve(root, date)
    }

    fn available(&self, root: &Path) -> Result<Vec<DateTime<Utc>>, ReshuffleError> {
        self.template.image_dates(root)
    }

    fn variables(&self, path: &Path) -> Result<Vec<String>, ReshuffleError> {
        let image = read_image_file(path)?;
        Ok(image
            .variables
            .into_keys()
            .filter(|name| !COORDINATE_NAMES.contains(&name.as_str()))
            .collect())
    }

    fn decode(
        &self,
        path: &Path,
        variables: &[String],
        timestamp: &DateTime<Utc>,
    ) -> Result<Image, ReshuffleError> {
        let mut image = read_image_file(path)?;
        if image.timestamp != *timestamp {
            return Err(ReshuffleError::decode(
                path,
                format!("file holds {}, expected {}", image.timestamp, timestamp),
            ));
        }
        image.variables.retain(|name, _| variables.contains(name));
        if let Some(missing) = variables.iter().find(|v| !image.variables.contains_key(*v)) {
            return Err(ReshuffleError::decode(
                path,
                format!("variable {missing} not found"),
            ));
        }
        Ok(image)
    }
}

pub fn read_cell_file(file: &Path) -> Result<CellArchive, ReshuffleError> {
    let read = || -> io::Result<CellArchive> {
        let mut decoder = open(file)?;
        expect_tag(&mut decoder, ZBIN_CELL_TAG)?;
        let n_points = read_u32(&mut decoder)? as usize;
        let n_times = read_u32(&mut decoder)? as usize;
        let n_vars = read_u32(&mut decoder)?;
        let cell = read_u32(&mut decoder)?;
        let len = checked_len(n_points, n_times)?;
        checked_len(len, 4)?;
        let global_attributes: GlobalAttributes = serde_json::from_str(&read_string(&mut decoder)?)
            .map_err(|err| invalid(err.to_string()))?;
        let indices = read_u32s(&mut decoder, n_points)?;
        let lons = read_f32s(&mut decoder, n_points)?;
        let lats = read_f32s(&mut decoder, n_points)?;
        let timestamps = (0..n_times)
            .map(|_| read_timestamp(&mut decoder))
            .collect::<io::Result<Vec<_>>>()?;

        let mut variables = Vec::new();
        for _ in 0..n_vars {
            let name = read_string(&mut decoder)?;
            let attributes = read_attributes(&mut decoder)?;
            let values = read_f32s(&mut decoder, len)?;
            let values = Array2::from_shape_vec((n_points, n_times), values)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            variables.push(SeriesVariable {
                name,
                attributes,
                values,
            });
        }
        Ok(CellArchive {
            cell,
            global_attributes,
            indices,
            lons,
            lats,
            timestamps,
            variables,
        })
    };
    read().map_err(|err| ReshuffleError::decode(file, err))
}

/// Active points of an archive and the cell owning each of them
#[derive(Debug, Clone, PartialEq)]
pub struct GridLookup {
    pub indices: Vec<u32>,
    pub lons: Vec<f32>,
    pub lats: Vec<f32>,
    pub cells: Vec<CellId>,
}

impl GridLookup {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn cell_of(&self, index: usize) -> Option<CellId> {
        self.indices
            .binary_search(&(index as u32))
            .ok()
            .map(|pos| self.cells[pos])
    }

    /// Closest active point; the lowest index wins a tie
    pub fn nearest(&self, lon: f64, lat: f64) -> Result<(usize, f64), ReshuffleError> {
        let mut best: Option<(usize, f64)> = None;
        for pos in 0..self.len() {
            let dist = great_circle_distance(lon, lat, self.lons[pos] as f64, self.lats[pos] as f64);
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((pos, dist));
            }
        }
        best.map(|(pos, dist)| (self.indices[pos] as usize, dist))
            .ok_or(ReshuffleError::EmptyGrid)
    }
}

pub fn read_grid_lookup(file: &Path) -> Result<GridLookup, ReshuffleError> {
    let read = || -> io::Result<GridLookup> {
        let mut decoder = open(file)?;
        expect_tag(&mut decoder, ZBIN_GRID_TAG)?;
        let len = read_u32(&mut decoder)? as usize;
        Ok(GridLookup {
            indices: read_u32s(&mut decoder, len)?,
            lons: read_f32s(&mut decoder, len)?,
            lats: read_f32s(&mut decoder, len)?,
            cells: read_u32s(&mut decoder, len)?,
        })
    };
    read().map_err(|err| ReshuffleError::decode(file, err))
}

/// Time series of a single grid point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointSeries {
    pub index: usize,
    pub lon: f32,
    pub lat: f32,
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: BTreeMap<String, Vec<f32>>,
}

/// Random access to a zbin time series archive
#[derive(Debug)]
pub struct ZBinArchiveReader {
    path: PathBuf,
    lookup: GridLookup,
}

impl ZBinArchiveReader {
    pub fn new(path: &Path) -> Result<Self, ReshuffleError> {
        let lookup = read_grid_lookup(&path.join(grid_file_name()))?;
        Ok(ZBinArchiveReader {
            path: path.to_path_buf(),
            lookup,
        })
    }

    pub fn lookup(&self) -> &GridLookup {
        &self.lookup
    }

    pub fn read_cell(&self, cell: CellId) -> Result<CellArchive, ReshuffleError> {
        read_cell_file(&self.path.join(cell_file_name(cell)))
    }

    pub fn read_point(&self, index: usize) -> Result<PointSeries, ReshuffleError> {
        let cell = self
            .lookup
            .cell_of(index)
            .ok_or_else(|| format!("grid point {index} is not part of the archive"))?;
        let archive = self.read_cell(cell)?;
        let pos = archive
            .position(index)
            .ok_or_else(|| format!("grid point {index} missing from cell {cell}"))?;
        let values = archive
            .variables
            .iter()
            .map(|v| (v.name.clone(), v.values.row(pos).to_vec()))
            .collect();
        Ok(PointSeries {
            index,
            lon: archive.lons[pos],
            lat: archive.lats[pos],
            timestamps: archive.timestamps.clone(),
            values,
        })
    }

    /// Series of the active point closest to the location
    pub fn read_location(&self, lon: f64, lat: f64) -> Result<PointSeries, ReshuffleError> {
        let (index, _) = self.lookup.nearest(lon, lat)?;
        self.read_point(index)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use ndarray::Array2;

    use super::*;
    use crate::io::writers::helpers::{
        write_atomically, write_i64, write_image_file, write_raster_file, write_u32,
    };

    #[test]
    fn image_file_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let date = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let values = Array2::from_shape_fn((4, 8), |(r, c)| (r * 8 + c) as f32);
        let image = Image::new(date)
            .with_variable("sm", values.clone(), VariableAttributes::new("%", "SM", -9999.0))
            .with_variable("flag", values.mapv(|_| 1.0), VariableAttributes::default());

        let decoder = ZBinImageDecoder::default();
        let path = decoder.resolve(dir.path(), &date).expect("template resolves");
        assert!(path.ends_with("IMG_202001010000.zbin"));
        write_image_file(&path, &image).expect("image written");

        let read = decoder
            .decode(&path, &["sm".to_string()], &date)
            .expect("image decoded");
        assert_eq!(read.variables.len(), 1);
        assert_eq!(read.get("sm").map(|v| &v.values), Some(&values));
        assert_eq!(
            read.get("sm").and_then(|v| v.attributes.missing_value),
            Some(-9999.0)
        );

        let missing = decoder.decode(&path, &["vod".to_string()], &date);
        assert!(matches!(missing, Err(ReshuffleError::Decode { .. })));
        let later = date + chrono::Duration::days(1);
        assert!(decoder.decode(&path, &["sm".to_string()], &later).is_err());
    }

    #[test]
    fn land_mask_from_raster() {
        let dir = tempfile::tempdir().expect("temp dir");
        let grid = GridIndex::new(10.0).expect("valid grid");
        let mut values = vec![0.0; grid.len()];
        values[5] = 1.0;
        values[7] = f32::NAN;
        let file = dir.path().join("land.zbin");
        write_raster_file(&file, &grid, &values).expect("raster written");

        let mask = read_land_mask(&file, &grid).expect("mask read");
        assert_eq!(mask.iter().filter(|l| **l).count(), 1);
        assert!(mask[5]);

        let other = GridIndex::new(5.0).expect("valid grid");
        assert!(read_land_mask(&file, &other).is_err());
    }

    #[test]
    fn corrupt_file_is_a_decode_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("IMG_202001010000.zbin");
        std::fs::write(&file, b"not gzip").expect("file written");
        assert!(matches!(
            read_image_file(&file),
            Err(ReshuffleError::Decode { .. })
        ));
    }

    #[test]
    fn oversized_headers_are_decode_errors() {
        let dir = tempfile::tempdir().expect("temp dir");

        let huge = dir.path().join("huge.zbin");
        write_atomically(&huge, |w| {
            write_u32(w, ZBIN_IMAGE_TAG)?;
            write_u32(w, u32::MAX)?;
            write_u32(w, u32::MAX)?;
            write_u32(w, 1)?;
            write_i64(w, 0)
        })
        .expect("file written");
        assert!(matches!(read_image_file(&huge), Err(ReshuffleError::Decode { .. })));

        // plausible global shape but no payload
        let short = dir.path().join("short.zbin");
        write_atomically(&short, |w| {
            write_u32(w, ZBIN_RASTER_TAG)?;
            write_u32(w, 720)?;
            write_u32(w, 1440)
        })
        .expect("file written");
        assert!(matches!(read_raster_file(&short), Err(ReshuffleError::Decode { .. })));

        let cell = dir.path().join("0001.zbin");
        write_atomically(&cell, |w| {
            write_u32(w, ZBIN_CELL_TAG)?;
            write_u32(w, u32::MAX)?;
            write_u32(w, u32::MAX)?;
            write_u32(w, 1)?;
            write_u32(w, 1)
        })
        .expect("file written");
        assert!(matches!(read_cell_file(&cell), Err(ReshuffleError::Decode { .. })));
    }
}
