pub mod helpers;
#[cfg(feature = "netcdf")]
pub mod netcdf;
pub mod prelude;
pub mod zbin;
