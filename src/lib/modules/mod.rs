pub mod cursor;
pub mod metadata;
pub mod reshuffle;
