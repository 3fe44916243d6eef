pub mod constants;
pub mod error;
pub mod io;
pub mod models;
pub mod modules;
pub mod version;

pub use error::ReshuffleError;
pub use models::cell::{CellId, CellPartitioner};
pub use models::grid::{BoundingBox, GridIndex, GridPoint, GridSubset};
pub use models::image::{Image, VariableAttributes, VariableData};
pub use modules::cursor::models::{Frequency, ImageStackCursor};
pub use modules::metadata::models::MetadataPropagator;
pub use modules::reshuffle::config::RepartitionConfig;
pub use modules::reshuffle::models::{CancelToken, EngineState, RepartitionEngine, RunSummary};
