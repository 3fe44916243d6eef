use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::{error::ReshuffleError, models::image::Image};

/// Trait implemented by image stack decoders (ZBIN, NetCDF).
/// A decoder owns the naming convention of its files and turns one file into an [`Image`].
pub trait ImageDecoder: Send + Sync {
    /// expected path of the image for `date` below `root`
    fn resolve(&self, root: &Path, date: &DateTime<Utc>) -> Result<PathBuf, ReshuffleError>;

    /// timestamps of every image found below `root`, ascending
    fn available(&self, root: &Path) -> Result<Vec<DateTime<Utc>>, ReshuffleError>;

    /// data variables of the image at `path`, coordinates excluded
    fn variables(&self, path: &Path) -> Result<Vec<String>, ReshuffleError>;

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// decode the requested variables of the file at `path`
    fn decode(
        &self,
        path: &Path,
        variables: &[String],
        timestamp: &DateTime<Utc>,
    ) -> Result<Image, ReshuffleError>;
}
