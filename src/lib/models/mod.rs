pub mod cell;
pub mod grid;
pub mod image;
pub mod series;
