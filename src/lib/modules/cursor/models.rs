use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_derive::{Deserialize, Serialize};

use crate::{error::ReshuffleError, io::readers::prelude::ImageDecoder, models::image::Image};

pub use super::config::Frequency;
use super::functions::timestamps_for_range;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "lowercase")]
pub enum GapReason {
    /// no file for the timestamp
    Missing,
    /// the file exists but could not be decoded
    Decode(String),
}

/// A timestamp of the requested range that produced no image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub reason: GapReason,
}

/// Lazy, forward-only sequence of decoded images over an inclusive date range.
///
/// Every yielded [`Image`] is owned by the caller. Once exhausted the cursor
/// cannot be rewound: build a new one to read the stack again.
/// When the whole range produced no image the last item is a `NoData` error.
pub struct ImageStackCursor {
    decoder: Box<dyn ImageDecoder>,
    root: PathBuf,
    variables: Vec<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    timestamps: std::vec::IntoIter<DateTime<Utc>>,
    produced: usize,
    gaps: Vec<Gap>,
    exhausted: bool,
}

impl ImageStackCursor {
    pub fn new(
        decoder: Box<dyn ImageDecoder>,
        root: &Path,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        frequency: Frequency,
        variables: &[String],
    ) -> Result<Self, ReshuffleError> {
        let timestamps = timestamps_for_range(&start, &end, frequency)?;
        ImageStackCursor::with_timestamps(decoder, root, timestamps, variables)
    }

    /// Cursor over an explicit, increasing list of timestamps
    pub fn with_timestamps(
        decoder: Box<dyn ImageDecoder>,
        root: &Path,
        timestamps: Vec<DateTime<Utc>>,
        variables: &[String],
    ) -> Result<Self, ReshuffleError> {
        if variables.is_empty() {
            return Err("at least one variable must be requested".into());
        }
        let (Some(start), Some(end)) = (timestamps.first().copied(), timestamps.last().copied())
        else {
            return Err("date range is empty".into());
        };
        if timestamps.windows(2).any(|w| w[0] >= w[1]) {
            return Err("timestamps must be strictly increasing".into());
        }

        Ok(ImageStackCursor {
            decoder,
            root: root.to_path_buf(),
            variables: variables.to_vec(),
            start,
            end,
            timestamps: timestamps.into_iter(),
            produced: 0,
            gaps: Vec::new(),
            exhausted: false,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Timestamps skipped so far
    pub fn gaps(&self) -> &[Gap] {
        &self.gaps
    }

    /// Records a gap for an image the consumer had to reject
    pub fn record_gap(&mut self, timestamp: DateTime<Utc>, reason: GapReason) {
        warn!("Skipping image {}: {:?}", timestamp.format("%Y-%m-%d %H:%M"), reason);
        self.gaps.push(Gap {
            timestamp,
            path: PathBuf::new(),
            reason,
        });
    }

    fn load(&mut self, timestamp: DateTime<Utc>) -> Option<Image> {
        let path = match self.decoder.resolve(&self.root, &timestamp) {
            Ok(path) => path,
            Err(err) => {
                warn!("Cannot resolve image for {}: {}", timestamp, err);
                self.gaps.push(Gap {
                    timestamp,
                    path: PathBuf::new(),
                    reason: GapReason::Decode(err.to_string()),
                });
                return None;
            }
        };

        if !self.decoder.exists(&path) {
            warn!("No image for {} ({:?})", timestamp.format("%Y-%m-%d %H:%M"), path);
            self.gaps.push(Gap {
                timestamp,
                path,
                reason: GapReason::Missing,
            });
            return None;
        }

        debug!("Decoding {:?}", path);
        match self.decoder.decode(&path, &self.variables, &timestamp) {
            Ok(image) => Some(image),
            Err(err) => {
                warn!("Error decoding image {:?}: {}", path, err);
                self.gaps.push(Gap {
                    timestamp,
                    path,
                    reason: GapReason::Decode(err.to_string()),
                });
                None
            }
        }
    }
}

impl Iterator for ImageStackCursor {
    type Item = Result<Image, ReshuffleError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        while let Some(timestamp) = self.timestamps.next() {
            if let Some(image) = self.load(timestamp) {
                self.produced += 1;
                return Some(Ok(image));
            }
        }
        self.exhausted = true;
        if self.produced == 0 {
            return Some(Err(ReshuffleError::NoData {
                start: self.start,
                end: self.end,
            }));
        }
        None
    }
}
