use crate::{
    error::ReshuffleError,
    models::{
        cell::{CellId, CellPartitioner},
        grid::GridSubset,
        series::CellSegment,
    },
};

/// Destination of the reshuffled time series, one file per cell
pub trait CellWriter: Send + Sync {
    /// Opens the cell file for appending, creating it on first use
    fn create_or_open(&self, cell: CellId) -> Result<Box<dyn CellHandle + '_>, ReshuffleError>;

    /// Writes the point-to-cell lookup of the active subset
    fn write_grid_lookup(
        &self,
        subset: &GridSubset,
        partitioner: &CellPartitioner,
    ) -> Result<(), ReshuffleError>;

    /// Whether different cells may be flushed from several threads at once
    fn concurrent_cells(&self) -> bool {
        true
    }
}

/// An open cell file
pub trait CellHandle: Send {
    /// Appends a segment; its timestamps must follow the ones already stored
    fn append(&mut self, segment: &CellSegment) -> Result<(), ReshuffleError>;

    fn close(self: Box<Self>) -> Result<(), ReshuffleError>;
}
