use std::collections::BTreeMap;

use itertools::Itertools;

use crate::{
    constants::CELL_SIZE,
    error::ReshuffleError,
    models::grid::{GridIndex, GridPoint, GridSubset},
};

pub type CellId = u32;

/// Maps grid points onto fixed, non-overlapping square cells.
/// Cells are numbered latitude-first: `cell = lon_block * n_lat_blocks + lat_block`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellPartitioner {
    cell_size: f64,
    points_per_edge: usize,
    n_lat_blocks: usize,
    n_lon_blocks: usize,
}

impl CellPartitioner {
    pub fn new(grid: &GridIndex, cell_size: f64) -> Result<Self, ReshuffleError> {
        let ratio = cell_size / grid.resolution;
        let points_per_edge = ratio.round() as usize;
        if points_per_edge == 0 || (ratio - points_per_edge as f64).abs() > 1e-9 {
            return Err(format!(
                "cell size {cell_size} is not a multiple of the grid resolution {}",
                grid.resolution
            )
            .into());
        }
        if grid.nrows % points_per_edge != 0 || grid.ncols % points_per_edge != 0 {
            return Err(format!("cell size {cell_size} does not tile the globe").into());
        }
        Ok(CellPartitioner {
            cell_size,
            points_per_edge,
            n_lat_blocks: grid.nrows / points_per_edge,
            n_lon_blocks: grid.ncols / points_per_edge,
        })
    }

    /// 5 degree cells on `grid`
    pub fn for_grid(grid: &GridIndex) -> Result<Self, ReshuffleError> {
        CellPartitioner::new(grid, CELL_SIZE)
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn n_cells(&self) -> usize {
        self.n_lat_blocks * self.n_lon_blocks
    }

    /// Largest number of grid points a single cell can hold
    pub fn max_points_per_cell(&self) -> usize {
        self.points_per_edge * self.points_per_edge
    }

    pub fn cell_of(&self, point: &GridPoint) -> CellId {
        let lat_block = point.row / self.points_per_edge;
        let lon_block = point.col / self.points_per_edge;
        (lon_block * self.n_lat_blocks + lat_block) as CellId
    }

    /// Points of `subset` belonging to `cell`, in subset order
    pub fn points_of(&self, cell: CellId, subset: &GridSubset) -> Vec<GridPoint> {
        subset
            .points()
            .iter()
            .filter(|p| self.cell_of(p) == cell)
            .copied()
            .collect()
    }

    /// Distinct cells touched by `subset`, ascending
    pub fn cells_of(&self, subset: &GridSubset) -> Vec<CellId> {
        subset
            .points()
            .iter()
            .map(|p| self.cell_of(p))
            .sorted()
            .dedup()
            .collect()
    }

    /// Positions inside `subset` grouped by owning cell
    pub fn group(&self, subset: &GridSubset) -> BTreeMap<CellId, Vec<usize>> {
        let mut groups: BTreeMap<CellId, Vec<usize>> = BTreeMap::new();
        for (pos, point) in subset.points().iter().enumerate() {
            groups.entry(self.cell_of(point)).or_default().push(pos);
        }
        groups
    }
}
