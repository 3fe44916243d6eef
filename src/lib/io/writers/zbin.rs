use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, trace};

use crate::{
    constants::{GRID_LOOKUP_NAME, ZBIN_CELL_TAG, ZBIN_GRID_TAG},
    error::ReshuffleError,
    io::readers::zbin::read_cell_file,
    models::{
        cell::{CellId, CellPartitioner},
        grid::GridSubset,
        series::{CellArchive, CellSegment, GlobalAttributes},
    },
};

use super::{
    helpers::{write_atomically, write_f32s, write_i64, write_str, write_u32, write_u32s},
    prelude::{CellHandle, CellWriter},
};

pub fn cell_file_name(cell: CellId) -> String {
    format!("{cell:04}.zbin")
}

pub fn grid_file_name() -> String {
    format!("{GRID_LOOKUP_NAME}.zbin")
}

/// Writes one gzip-compressed `NNNN.zbin` file per cell.
///
/// A gzip member cannot be extended in place, so every append reads the whole
/// cell back, concatenates the new segment and rewrites the file. A flush
/// therefore holds the complete history of one cell in memory (at most
/// 400 points x all timestamps per variable), and a run writing T timestamps
/// moves about T² / flush_limit values through the disk per cell. Keep
/// `flush_limit` high for long archives, or use the NetCDF writer, which
/// appends along its unlimited time dimension.
pub struct ZBinCellWriter {
    path: PathBuf,
    global_attributes: GlobalAttributes,
}

impl ZBinCellWriter {
    pub fn new(path: &Path) -> Result<Self, ReshuffleError> {
        fs::create_dir_all(path)?;
        Ok(ZBinCellWriter {
            path: path.to_path_buf(),
            global_attributes: GlobalAttributes::new(),
        })
    }

    /// Attributes stored in every cell file this writer creates.
    /// Existing cell files keep the ones they were created with.
    pub fn with_global_attributes(mut self, attributes: GlobalAttributes) -> Self {
        self.global_attributes = attributes;
        self
    }

    pub fn cell_path(&self, cell: CellId) -> PathBuf {
        self.path.join(cell_file_name(cell))
    }
}

impl CellWriter for ZBinCellWriter {
    fn create_or_open(&self, cell: CellId) -> Result<Box<dyn CellHandle + '_>, ReshuffleError> {
        let file = self.cell_path(cell);
        let archive = if file.is_file() {
            let archive = read_cell_file(&file).map_err(|err| ReshuffleError::write(cell, err))?;
            if archive.cell != cell {
                return Err(ReshuffleError::write(
                    cell,
                    format!("{:?} holds cell {}", file, archive.cell),
                ));
            }
            Some(archive)
        } else {
            None
        };
        Ok(Box::new(ZBinCellHandle {
            cell,
            file,
            archive,
            global_attributes: &self.global_attributes,
        }))
    }

    fn write_grid_lookup(
        &self,
        subset: &GridSubset,
        partitioner: &CellPartitioner,
    ) -> Result<(), ReshuffleError> {
        let file = self.path.join(grid_file_name());
        let points = subset.points();
        let indices: Vec<u32> = points.iter().map(|p| p.index as u32).collect();
        let lons: Vec<f32> = points.iter().map(|p| p.lon).collect();
        let lats: Vec<f32> = points.iter().map(|p| p.lat).collect();
        let cells: Vec<u32> = points.iter().map(|p| partitioner.cell_of(p)).collect();

        write_atomically(&file, |w| {
            write_u32(w, ZBIN_GRID_TAG)?;
            write_u32(w, indices.len() as u32)?;
            write_u32s(w, &indices)?;
            write_f32s(w, &lons)?;
            write_f32s(w, &lats)?;
            write_u32s(w, &cells)
        })?;
        debug!("Grid lookup written to {:?} ({} points)", file, indices.len());
        Ok(())
    }
}

struct ZBinCellHandle<'a> {
    cell: CellId,
    file: PathBuf,
    archive: Option<CellArchive>,
    global_attributes: &'a GlobalAttributes,
}

impl CellHandle for ZBinCellHandle<'_> {
    fn append(&mut self, segment: &CellSegment) -> Result<(), ReshuffleError> {
        match self.archive.as_mut() {
            Some(archive) => archive
                .extend(segment)
                .map_err(|msg| ReshuffleError::write(self.cell, msg))?,
            None => {
                let archive =
                    CellArchive::from_segment(segment).with_global_attributes(self.global_attributes);
                self.archive = Some(archive);
            }
        }
        if let Some(archive) = &self.archive {
            write_cell_file(&self.file, archive).map_err(|err| ReshuffleError::write(self.cell, err))?;
            trace!(
                "Cell {} now holds {} timestamps",
                self.cell,
                archive.n_times()
            );
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), ReshuffleError> {
        Ok(())
    }
}

pub fn write_cell_file(file: &Path, archive: &CellArchive) -> Result<(), ReshuffleError> {
    let attrs = archive
        .variables
        .iter()
        .map(|v| serde_json::to_string(&v.attributes))
        .collect::<Result<Vec<String>, _>>()
        .map_err(|err| format!("cannot encode attributes: {err}"))?;
    let global = serde_json::to_string(&archive.global_attributes)
        .map_err(|err| format!("cannot encode global attributes: {err}"))?;

    write_atomically(file, |w| {
        write_u32(w, ZBIN_CELL_TAG)?;
        write_u32(w, archive.n_points() as u32)?;
        write_u32(w, archive.n_times() as u32)?;
        write_u32(w, archive.variables.len() as u32)?;
        write_u32(w, archive.cell)?;
        write_str(w, &global)?;
        write_u32s(w, &archive.indices)?;
        write_f32s(w, &archive.lons)?;
        write_f32s(w, &archive.lats)?;
        for ts in &archive.timestamps {
            write_i64(w, ts.timestamp())?;
        }
        for (var, attrs) in archive.variables.iter().zip(&attrs) {
            write_str(w, &var.name)?;
            write_str(w, attrs)?;
            write_f32s(w, var.values.iter())?;
        }
        Ok(())
    })?;
    Ok(())
}
