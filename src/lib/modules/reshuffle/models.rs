use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};
use strum_macros::Display;

use crate::{
    error::ReshuffleError,
    io::writers::{helpers::extract_errors, prelude::CellWriter},
    models::{
        cell::{CellId, CellPartitioner},
        grid::{GridIndex, GridSubset},
        image::{Image, VariableAttributes},
        series::{CellSegment, TimeSeriesBuffer},
    },
    modules::{
        cursor::models::{Gap, GapReason, ImageStackCursor},
        metadata::models::{Discrepancy, MetadataPropagator, SentinelConflict},
    },
};

use super::{
    config::RepartitionConfig,
    functions::{accumulate, build_buffers, cells_to_flush, flush_error, validate_image},
};

fn sentinel_label(value: Option<f32>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EngineState {
    Init,
    Streaming,
    Draining,
    Done,
    Failed,
}

/// Shared flag to stop a run at the next image boundary
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellReport {
    pub points: usize,
    pub timestamps: usize,
    pub flushes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub images: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub gaps: Vec<Gap>,
    pub discrepancies: Vec<Discrepancy>,
    pub cells: BTreeMap<CellId, CellReport>,
}

/// Turns a stack of images into per-cell time series files.
///
/// Values are buffered per cell and handed to the writer whenever a cell holds
/// `flush_limit` timestamps; every remaining buffer is written once the images
/// run out or the run is cancelled. The engine runs once: build a new one for
/// the next run.
pub struct RepartitionEngine<'a> {
    config: RepartitionConfig,
    grid: &'a GridIndex,
    subset: &'a GridSubset,
    partitioner: &'a CellPartitioner,
    writer: &'a dyn CellWriter,
    metadata: MetadataPropagator,
    state: EngineState,
    buffers: BTreeMap<CellId, TimeSeriesBuffer>,
    cancel: CancelToken,
    pool: Option<rayon::ThreadPool>,
}

impl<'a> RepartitionEngine<'a> {
    pub fn new(
        config: RepartitionConfig,
        grid: &'a GridIndex,
        subset: &'a GridSubset,
        partitioner: &'a CellPartitioner,
        writer: &'a dyn CellWriter,
    ) -> Result<Self, ReshuffleError> {
        config.validate()?;
        if subset.is_empty() {
            return Err(ReshuffleError::EmptyGrid);
        }

        let pool = if config.n_proc > 1 && writer.concurrent_cells() {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.n_proc)
                .build()
                .map_err(|err| format!("cannot start {} workers: {}", config.n_proc, err))?;
            Some(pool)
        } else {
            if config.n_proc > 1 {
                warn!("Cell writer does not support parallel flushes, using one worker");
            }
            None
        };

        let buffers = build_buffers(subset, partitioner, &config.variables);
        Ok(RepartitionEngine {
            config,
            grid,
            subset,
            partitioner,
            writer,
            metadata: MetadataPropagator::new(),
            state: EngineState::Init,
            buffers,
            cancel: CancelToken::new(),
            pool,
        })
    }

    /// Starts from known attributes, e.g. the ones of an archive being extended
    pub fn with_metadata(mut self, metadata: MetadataPropagator) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn metadata(&self) -> &MetadataPropagator {
        &self.metadata
    }

    pub fn run(&mut self, cursor: &mut ImageStackCursor) -> Result<RunSummary, ReshuffleError> {
        if self.state != EngineState::Init {
            return Err(format!("engine already used (state {})", self.state).into());
        }
        let start_time = Utc::now();
        info!(
            "Reshuffling {} points in {} cells, {} to {}",
            self.subset.len(),
            self.buffers.len(),
            self.config.start.format("%Y-%m-%d"),
            self.config.end.format("%Y-%m-%d")
        );

        if cursor.start() < self.config.start || cursor.end() > self.config.end {
            let err = ReshuffleError::Configuration(format!(
                "images from {} to {} fall outside the configured range {} to {}",
                cursor.start(),
                cursor.end(),
                self.config.start,
                self.config.end
            ));
            return Err(self.fail(err));
        }
        if let Err(err) = self.writer.write_grid_lookup(self.subset, self.partitioner) {
            return Err(self.fail(err));
        }
        self.state = EngineState::Streaming;

        let mut images = 0;
        let mut first_timestamp = None;
        let mut last_timestamp = None;
        let mut cancelled = false;

        loop {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled, writing buffered data");
                cancelled = true;
                break;
            }
            let Some(item) = cursor.next() else {
                break;
            };
            let image = match item {
                Ok(image) => image,
                Err(err) => return Err(self.fail(err)),
            };
            if let Err(msg) = validate_image(&image, self.grid, &self.config.variables) {
                cursor.record_gap(image.timestamp, GapReason::Decode(msg));
                continue;
            }
            info!("Processing {}", image.timestamp.format("%Y-%m-%d %H:%M"));
            let step_time = Utc::now();
            if let Err(err) = self.ingest(&image) {
                return Err(self.fail(err));
            }

            images += 1;
            first_timestamp.get_or_insert(image.timestamp);
            last_timestamp = Some(image.timestamp);

            let ready = cells_to_flush(&self.buffers, self.config.flush_limit);
            if let Err(err) = self.flush(&ready) {
                return Err(self.fail(err));
            }
            trace!("Image took {} ms", (Utc::now() - step_time).num_milliseconds());
        }

        if images == 0 && !cancelled {
            let err = ReshuffleError::NoData {
                start: cursor.start(),
                end: cursor.end(),
            };
            return Err(self.fail(err));
        }

        self.state = EngineState::Draining;
        let remaining: Vec<CellId> = self.buffers.keys().copied().collect();
        if let Err(err) = self.flush(&remaining) {
            return Err(self.fail(err));
        }
        self.state = EngineState::Done;

        let cells = self
            .buffers
            .iter()
            .map(|(cell, b)| {
                let report = CellReport {
                    points: b.points().len(),
                    timestamps: b.time_offset(),
                    flushes: b.flushes(),
                };
                (*cell, report)
            })
            .collect();

        let elapsed = Utc::now() - start_time;
        info!(
            "Reshuffled {} images ({} gaps) in {} ms",
            images,
            cursor.gaps().len(),
            elapsed.num_milliseconds()
        );

        Ok(RunSummary {
            images,
            first_timestamp,
            last_timestamp,
            cancelled,
            gaps: cursor.gaps().to_vec(),
            discrepancies: self.metadata.discrepancies().to_vec(),
            cells,
        })
    }

    /// Registers the attributes of the image, then gathers its values.
    /// Nothing is buffered when a variable changed its missing value.
    fn ingest(&mut self, image: &Image) -> Result<(), ReshuffleError> {
        let conflict = |c: SentinelConflict| ReshuffleError::MetadataConflict {
            variable: c.variable,
            timestamp: image.timestamp,
            expected: sentinel_label(c.expected),
            found: sentinel_label(c.found),
        };

        let variables = &self.config.variables;
        if !self.config.ignore_meta {
            for var in variables {
                if let Some(data) = image.get(var) {
                    self.metadata.check(var, &data.attributes).map_err(conflict)?;
                }
            }
            for var in variables {
                if let Some(data) = image.get(var) {
                    self.metadata.observe(var, &data.attributes).map_err(conflict)?;
                }
            }
        }

        match &self.pool {
            Some(pool) => pool.install(|| {
                self.buffers
                    .par_iter_mut()
                    .for_each(|(_, buffer)| accumulate(buffer, image, variables))
            }),
            None => self
                .buffers
                .values_mut()
                .for_each(|buffer| accumulate(buffer, image, variables)),
        }
        Ok(())
    }

    fn flush(&mut self, cells: &[CellId]) -> Result<(), ReshuffleError> {
        let cells: BTreeSet<&CellId> = cells.iter().collect();
        let canonical = self.metadata.canonical_all();
        let ignore_meta = self.config.ignore_meta;
        let attributes = |var: &str| {
            if ignore_meta {
                VariableAttributes::default()
            } else {
                canonical.get(var).cloned().unwrap_or_default()
            }
        };
        let segments: Vec<CellSegment> = self
            .buffers
            .iter_mut()
            .filter(|(cell, buffer)| cells.contains(cell) && !buffer.is_empty())
            .map(|(_, buffer)| buffer.take_segment(attributes))
            .collect();
        if segments.is_empty() {
            return Ok(());
        }
        debug!("Flushing {} cells", segments.len());

        let writer = self.writer;
        let write = |segment: &CellSegment| -> Result<(), ReshuffleError> {
            let mut handle = writer
                .create_or_open(segment.cell)
                .map_err(|err| flush_error(segment.cell, err))?;
            handle
                .append(segment)
                .map_err(|err| flush_error(segment.cell, err))?;
            handle.close().map_err(|err| flush_error(segment.cell, err))
        };

        let results: Vec<Result<(), ReshuffleError>> = match &self.pool {
            Some(pool) => pool.install(|| segments.par_iter().map(write).collect()),
            None => segments.iter().map(write).collect(),
        };
        extract_errors("Error writing cell", results).map(|_| ())
    }

    /// Moves to FAILED and drops whatever was not written yet
    fn fail(&mut self, err: ReshuffleError) -> ReshuffleError {
        error!("Reshuffle failed: {}", err);
        self.state = EngineState::Failed;
        self.buffers.values_mut().for_each(|b| b.discard());
        err
    }
}
