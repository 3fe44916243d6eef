use std::fmt::Debug;

use serde_derive::{Deserialize, Serialize};

use crate::{
    constants::{EARTH_RADIUS, GRID_RESOLUTION},
    error::ReshuffleError,
};

/// A single point of the global grid.
/// `row` 0 is the southernmost row and `col` 0 the westernmost column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub lon: f32,
    pub lat: f32,
}

/// Rectangular lon/lat region, inclusive on every edge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> Result<Self, ReshuffleError> {
        if min_lon > max_lon {
            return Err(ReshuffleError::InvalidRange {
                axis: "longitude",
                min: min_lon,
                max: max_lon,
            });
        }
        if min_lat > max_lat {
            return Err(ReshuffleError::InvalidRange {
                axis: "latitude",
                min: min_lat,
                max: max_lat,
            });
        }
        Ok(BoundingBox {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    /// west, south, east, north
    pub fn from_corners(corners: &[f64]) -> Result<Self, ReshuffleError> {
        match corners {
            [west, south, east, north] => BoundingBox::new(*west, *south, *east, *north),
            _ => Err(ReshuffleError::Configuration(format!(
                "bounding box needs 4 values, got {}",
                corners.len()
            ))),
        }
    }

    pub fn contains(&self, lon: f32, lat: f32) -> bool {
        let (lon, lat) = (lon as f64, lat as f64);
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// Immutable description of the fixed global lon/lat grid.
/// Point indices run row by row starting from the south-west corner.
#[derive(Clone)]
pub struct GridIndex {
    pub nrows: usize,
    pub ncols: usize,
    pub resolution: f64,
    land: Option<Vec<bool>>,
}

impl Debug for GridIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "GridIndex {:?} @ {}°, land mask: {}",
            self.shape(),
            self.resolution,
            self.land.is_some()
        )
    }
}

impl GridIndex {
    pub fn new(resolution: f64) -> Result<Self, ReshuffleError> {
        if resolution <= 0.0 {
            return Err(format!("invalid grid resolution {resolution}").into());
        }
        let nrows = (180.0 / resolution).round() as usize;
        let ncols = (360.0 / resolution).round() as usize;
        if (nrows as f64 * resolution - 180.0).abs() > 1e-9
            || (ncols as f64 * resolution - 360.0).abs() > 1e-9
        {
            return Err(format!("resolution {resolution} does not divide the globe").into());
        }
        Ok(GridIndex {
            nrows,
            ncols,
            resolution,
            land: None,
        })
    }

    /// The 0.25 degree global grid
    pub fn global() -> Self {
        GridIndex {
            nrows: (180.0 / GRID_RESOLUTION) as usize,
            ncols: (360.0 / GRID_RESOLUTION) as usize,
            resolution: GRID_RESOLUTION,
            land: None,
        }
    }

    /// Attach a land mask, one flag per grid point in index order
    pub fn with_land_mask(mut self, mask: Vec<bool>) -> Result<Self, ReshuffleError> {
        if mask.len() != self.len() {
            return Err(format!(
                "land mask has {} points, grid has {}",
                mask.len(),
                self.len()
            )
            .into());
        }
        self.land = Some(mask);
        Ok(self)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn len(&self) -> usize {
        self.nrows * self.ncols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_land_mask(&self) -> bool {
        self.land.is_some()
    }

    pub fn is_land(&self, index: usize) -> bool {
        self.land
            .as_ref()
            .and_then(|mask| mask.get(index).copied())
            .unwrap_or(false)
    }

    fn lon_of(&self, col: usize) -> f32 {
        (-180.0 + self.resolution * (col as f64 + 0.5)) as f32
    }

    fn lat_of(&self, row: usize) -> f32 {
        (-90.0 + self.resolution * (row as f64 + 0.5)) as f32
    }

    pub fn point_at(&self, row: usize, col: usize) -> GridPoint {
        GridPoint {
            index: row * self.ncols + col,
            row,
            col,
            lon: self.lon_of(col),
            lat: self.lat_of(row),
        }
    }

    pub fn point(&self, index: usize) -> Option<GridPoint> {
        if index >= self.len() {
            return None;
        }
        Some(self.point_at(index / self.ncols, index % self.ncols))
    }

    pub fn lonlat(&self, index: usize) -> Option<(f32, f32)> {
        self.point(index).map(|p| (p.lon, p.lat))
    }

    /// Index of the grid box containing the coordinate
    pub fn index(&self, lat: &f32, lon: &f32) -> Option<usize> {
        let (lat, lon) = (*lat as f64, *lon as f64);
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        let row = usize::min(((lat + 90.0) / self.resolution) as usize, self.nrows - 1);
        let col = usize::min(((lon + 180.0) / self.resolution) as usize, self.ncols - 1);
        Some(row * self.ncols + col)
    }

    pub fn points(&self) -> impl Iterator<Item = GridPoint> + '_ {
        (0..self.nrows).flat_map(move |row| (0..self.ncols).map(move |col| self.point_at(row, col)))
    }

    pub fn points_in_bbox(
        &self,
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> Result<Vec<GridPoint>, ReshuffleError> {
        let bbox = BoundingBox::new(min_lon, min_lat, max_lon, max_lat)?;
        Ok(self.points_in(&bbox))
    }

    fn points_in(&self, bbox: &BoundingBox) -> Vec<GridPoint> {
        let rows = (0..self.nrows).filter(|row| {
            let lat = self.lat_of(*row) as f64;
            lat >= bbox.min_lat && lat <= bbox.max_lat
        });
        rows.flat_map(|row| {
            (0..self.ncols)
                .map(move |col| self.point_at(row, col))
                .filter(|p| bbox.contains(p.lon, p.lat))
        })
        .collect()
    }

    pub fn land_points(&self) -> Result<GridSubset, ReshuffleError> {
        let mask = self
            .land
            .as_ref()
            .ok_or_else(|| ReshuffleError::from("grid has no land mask"))?;
        let points = self
            .points()
            .filter(|p| mask[p.index])
            .collect::<Vec<_>>();
        Ok(GridSubset { points })
    }

    /// Every point of the grid
    pub fn full(&self) -> GridSubset {
        GridSubset {
            points: self.points().collect(),
        }
    }

    /// Active points: inside `bbox` (when given) and on land (when requested)
    pub fn subset(
        &self,
        bbox: Option<&BoundingBox>,
        land_only: bool,
    ) -> Result<GridSubset, ReshuffleError> {
        if land_only && self.land.is_none() {
            return Err("land-only subset requested but the grid has no land mask".into());
        }
        let points = match bbox {
            Some(bbox) => self.points_in(bbox),
            None => self.points().collect(),
        };
        let points = points
            .into_iter()
            .filter(|p| !land_only || self.is_land(p.index))
            .collect();
        Ok(GridSubset { points })
    }

    /// Closest grid point, searched among the boxes around the one containing
    /// the coordinate. Polar rows are searched whole, since their boxes all
    /// meet at the pole.
    pub fn nearest(&self, lon: f64, lat: f64) -> Result<(GridPoint, f64), ReshuffleError> {
        let Some(index) = self.index(&(lat as f32), &(lon as f32)) else {
            return nearest_of(self.points(), lon, lat);
        };
        let (row, col) = (index / self.ncols, index % self.ncols);
        let rows = row.saturating_sub(1)..=usize::min(row + 1, self.nrows - 1);
        let polar = row == 0 || row == self.nrows - 1;

        let candidates = rows.flat_map(move |r| {
            let cols: Vec<usize> = if polar {
                (0..self.ncols).collect()
            } else {
                [self.ncols - 1, 0, 1]
                    .iter()
                    .map(|offset| (col + offset) % self.ncols)
                    .collect()
            };
            cols.into_iter().map(move |c| self.point_at(r, c))
        });
        nearest_of(candidates, lon, lat)
    }
}

/// Ordered set of active grid points, ascending by index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridSubset {
    points: Vec<GridPoint>,
}

impl GridSubset {
    pub fn from_points(mut points: Vec<GridPoint>) -> Self {
        points.sort_by_key(|p| p.index);
        points.dedup_by_key(|p| p.index);
        GridSubset { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[GridPoint] {
        &self.points
    }

    pub fn indices(&self) -> Vec<usize> {
        self.points.iter().map(|p| p.index).collect()
    }

    pub fn get(&self, index: usize) -> Option<&GridPoint> {
        self.points
            .binary_search_by_key(&index, |p| p.index)
            .ok()
            .map(|pos| &self.points[pos])
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    pub fn intersect(&self, other: &GridSubset) -> GridSubset {
        let points = self
            .points
            .iter()
            .filter(|p| other.contains(p.index))
            .copied()
            .collect();
        GridSubset { points }
    }

    pub fn nearest(&self, lon: f64, lat: f64) -> Result<(GridPoint, f64), ReshuffleError> {
        nearest_of(self.points.iter().copied(), lon, lat)
    }
}

/// Haversine distance in metres
pub fn great_circle_distance(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS * a.sqrt().min(1.0).asin()
}

/// Closest point by great-circle distance; the lowest index wins a tie
fn nearest_of(
    points: impl Iterator<Item = GridPoint>,
    lon: f64,
    lat: f64,
) -> Result<(GridPoint, f64), ReshuffleError> {
    let mut best: Option<(GridPoint, f64)> = None;
    for p in points {
        let dist = great_circle_distance(lon, lat, p.lon as f64, p.lat as f64);
        best = match best {
            Some((b, d)) if d < dist || (d == dist && b.index < p.index) => Some((b, d)),
            _ => Some((p, dist)),
        };
    }
    best.ok_or(ReshuffleError::EmptyGrid)
}
