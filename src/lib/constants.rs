/// Spacing of the fixed global grid [degrees]
pub const GRID_RESOLUTION: f64 = 0.25;

/// Edge of a spatial cell [degrees]
pub const CELL_SIZE: f64 = 5.0;

/// Mean earth radius used for great-circle distances [m]
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Default number of timestamps a cell buffers before it is flushed
pub const DEFAULT_FLUSH_LIMIT: usize = 250;

/// Name of the point-to-cell lookup asset (without extension)
pub const GRID_LOOKUP_NAME: &str = "grid";

/// Name of the archive overview written by the driver
pub const OVERVIEW_FILE: &str = "000_overview.yml";

/// Variables of an image that describe its axes rather than data
pub const COORDINATE_NAMES: [&str; 3] = ["lat", "lon", "time"];

/// Largest raster accepted from a zbin file (a 0.125 degree global grid)
pub const MAX_RASTER_POINTS: usize = 2880 * 1440;

pub const ZBIN_RASTER_TAG: u32 = 1;
pub const ZBIN_IMAGE_TAG: u32 = 2;
pub const ZBIN_CELL_TAG: u32 = 3;
pub const ZBIN_GRID_TAG: u32 = 4;
