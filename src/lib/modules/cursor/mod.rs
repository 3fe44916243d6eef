pub mod config;
pub mod functions;
pub mod models;
