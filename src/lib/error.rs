use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::cell::CellId;

/// Errors raised while building grids, reading images or writing cells
#[derive(Debug, Error)]
pub enum ReshuffleError {
    /// Invalid run configuration, reported before any image is read
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid {axis} range: min {min} > max {max}")]
    InvalidRange { axis: &'static str, min: f64, max: f64 },

    #[error("grid subset is empty")]
    EmptyGrid,

    /// A single image could not be decoded; recovered by the cursor as a gap
    #[error("cannot decode {path:?}: {msg}")]
    Decode { path: PathBuf, msg: String },

    #[error(
        "missing value of '{variable}' changed at {timestamp}: expected {expected}, found {found}"
    )]
    MetadataConflict {
        variable: String,
        timestamp: DateTime<Utc>,
        expected: String,
        found: String,
    },

    #[error("no images found between {start} and {end}")]
    NoData {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("cannot write cell {cell}: {msg}")]
    Write { cell: CellId, msg: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReshuffleError {
    pub fn decode(path: impl Into<PathBuf>, msg: impl ToString) -> Self {
        ReshuffleError::Decode {
            path: path.into(),
            msg: msg.to_string(),
        }
    }

    pub fn write(cell: CellId, msg: impl ToString) -> Self {
        ReshuffleError::Write {
            cell,
            msg: msg.to_string(),
        }
    }

    /// Fatal errors abort the run; decode errors only open a gap
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReshuffleError::Decode { .. })
    }
}

impl From<String> for ReshuffleError {
    fn from(msg: String) -> Self {
        ReshuffleError::Configuration(msg)
    }
}

impl From<&str> for ReshuffleError {
    fn from(msg: &str) -> Self {
        ReshuffleError::Configuration(msg.into())
    }
}
