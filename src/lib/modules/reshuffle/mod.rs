pub mod config;
pub mod functions;
pub mod models;

#[cfg(test)]
mod test;
