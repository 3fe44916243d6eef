use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Duration, TimeZone, Utc};
use ndarray::Array2;

use crate::{
    error::ReshuffleError,
    io::{
        readers::{
            prelude::ImageDecoder,
            zbin::{read_cell_file, read_grid_lookup, ZBinArchiveReader},
        },
        writers::{
            prelude::{CellHandle, CellWriter},
            zbin::{grid_file_name, ZBinCellWriter},
        },
    },
    models::{
        cell::{CellId, CellPartitioner},
        grid::{BoundingBox, GridIndex, GridSubset},
        image::{Image, VariableAttributes},
        series::{CellSegment, GlobalAttributes},
    },
    modules::cursor::models::{Frequency, GapReason, ImageStackCursor},
};

use super::{
    config::RepartitionConfig,
    models::{CancelToken, EngineState, RepartitionEngine},
};

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap()
}

/// Mostly finite values, with NaN and the -9999 sentinel moving through the stack
fn value_at(row: usize, col: usize, ts: &DateTime<Utc>) -> f32 {
    let days = (ts.timestamp() / 86400) as usize;
    match (row + col + days) % 5 {
        0 => f32::NAN,
        1 => -9999.0,
        _ => (row * 1000 + col) as f32 + days as f32,
    }
}

fn bits(values: &[f32]) -> Vec<u32> {
    values.iter().map(|v| v.to_bits()).collect()
}

fn synthetic_image(grid: &GridIndex, ts: DateTime<Utc>) -> Image {
    let sm = Array2::from_shape_fn(grid.shape(), |(r, c)| value_at(r, c, &ts));
    let flag = Array2::from_shape_fn(grid.shape(), |(r, _)| (r % 3) as f32);
    Image::new(ts)
        .with_variable(
            "sm",
            sm,
            VariableAttributes::new("m3 m-3", "Volumetric Soil Moisture", -9999.0),
        )
        .with_variable("flag", flag, VariableAttributes::new("-", "Flag", 0.0))
}

/// Images kept in memory, keyed by timestamp
struct MemoryDecoder {
    images: BTreeMap<i64, Image>,
    cancel_on: Option<(DateTime<Utc>, CancelToken)>,
}

impl MemoryDecoder {
    fn new(images: Vec<Image>) -> Self {
        MemoryDecoder {
            images: images
                .into_iter()
                .map(|i| (i.timestamp.timestamp(), i))
                .collect(),
            cancel_on: None,
        }
    }

    fn key(path: &Path) -> Option<i64> {
        path.file_name()?.to_str()?.parse().ok()
    }
}

impl ImageDecoder for MemoryDecoder {
    fn resolve(&self, root: &Path, date: &DateTime<Utc>) -> Result<PathBuf, ReshuffleError> {
        Ok(root.join(date.timestamp().to_string()))
    }

    fn available(&self, _root: &Path) -> Result<Vec<DateTime<Utc>>, ReshuffleError> {
        Ok(self.images.values().map(|i| i.timestamp).collect())
    }

    fn variables(&self, path: &Path) -> Result<Vec<String>, ReshuffleError> {
        MemoryDecoder::key(path)
            .and_then(|k| self.images.get(&k))
            .map(|i| i.variables.keys().cloned().collect())
            .ok_or_else(|| ReshuffleError::decode(path, "not in memory"))
    }

    fn exists(&self, path: &Path) -> bool {
        MemoryDecoder::key(path).is_some_and(|k| self.images.contains_key(&k))
    }

    fn decode(
        &self,
        path: &Path,
        _variables: &[String],
        timestamp: &DateTime<Utc>,
    ) -> Result<Image, ReshuffleError> {
        if let Some((at, token)) = &self.cancel_on {
            if at == timestamp {
                token.cancel();
            }
        }
        MemoryDecoder::key(path)
            .and_then(|k| self.images.get(&k))
            .cloned()
            .ok_or_else(|| ReshuffleError::decode(path, "not in memory"))
    }
}

fn variables() -> Vec<String> {
    vec!["sm".to_string(), "flag".to_string()]
}

fn cursor(decoder: MemoryDecoder, start: u32, end: u32) -> ImageStackCursor {
    ImageStackCursor::new(
        Box::new(decoder),
        Path::new("/images"),
        day(start),
        day(end),
        Frequency::Daily,
        &variables(),
    )
    .expect("valid cursor")
}

fn config(start: u32, end: u32) -> RepartitionConfig {
    RepartitionConfig::new(day(start), day(end), &["sm", "flag"])
}

/// 1 degree grid, 10 x 5 degree box: two cells of 25 points
fn small_setup() -> (GridIndex, GridSubset, CellPartitioner) {
    let grid = GridIndex::new(1.0).expect("valid grid");
    let bbox = BoundingBox::new(0.0, 0.0, 10.0, 5.0).expect("valid bbox");
    let subset = grid.subset(Some(&bbox), false).expect("subset");
    let partitioner = CellPartitioner::new(&grid, 5.0).expect("valid cells");
    (grid, subset, partitioner)
}

fn read_all(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    std::fs::read_dir(dir)
        .expect("readable dir")
        .map(|e| e.expect("dir entry").path())
        .map(|p| {
            let name = p.file_name().unwrap().to_string_lossy().to_string();
            (name, std::fs::read(&p).expect("readable file"))
        })
        .collect()
}

#[test]
fn three_images_two_variables() {
    let (grid, subset, partitioner) = small_setup();
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = ZBinCellWriter::new(dir.path()).expect("writer");
    let images = (1..=3).map(|d| synthetic_image(&grid, day(d))).collect();

    let mut engine = RepartitionEngine::new(config(1, 3), &grid, &subset, &partitioner, &writer)
        .expect("valid engine");
    let summary = engine
        .run(&mut cursor(MemoryDecoder::new(images), 1, 3))
        .expect("run succeeds");

    assert_eq!(engine.state(), EngineState::Done);
    assert_eq!(summary.images, 3);
    assert!(summary.gaps.is_empty());
    assert_eq!(summary.cells.len(), 2);
    assert_eq!(summary.first_timestamp, Some(day(1)));
    assert_eq!(summary.last_timestamp, Some(day(3)));

    let lookup = read_grid_lookup(&dir.path().join(grid_file_name())).expect("lookup");
    assert_eq!(lookup.len(), 50);

    for (cell, report) in &summary.cells {
        assert_eq!(report.points, 25);
        assert_eq!(report.timestamps, 3);
        let archive = read_cell_file(&writer.cell_path(*cell)).expect("cell file");
        assert_eq!(archive.cell, *cell);
        assert_eq!(archive.n_points(), 25);
        assert_eq!(archive.timestamps, vec![day(1), day(2), day(3)]);
        assert_eq!(
            archive.variables.iter().map(|v| v.name.as_str()).collect::<Vec<_>>(),
            vec!["flag", "sm"]
        );
        let sm = archive.variable("sm").expect("sm");
        assert_eq!(sm.attributes.missing_value, Some(-9999.0));
        assert_eq!(sm.values.shape(), &[25, 3]);

        for index in &archive.indices {
            let point = grid.point(*index as usize).expect("grid point");
            let stored = archive.series(*index as usize, "sm").expect("sm series");
            let expected: Vec<f32> =
                (1..=3).map(|d| value_at(point.row, point.col, &day(d))).collect();
            assert_eq!(bits(&stored), bits(&expected));
        }
    }
    let stored: Vec<f32> = summary
        .cells
        .keys()
        .flat_map(|cell| {
            let archive = read_cell_file(&writer.cell_path(*cell)).expect("cell file");
            archive.variable("sm").expect("sm").values.iter().copied().collect::<Vec<_>>()
        })
        .collect();
    assert!(stored.iter().any(|v| v.is_nan()));
    assert!(stored.iter().any(|v| *v == -9999.0));

    let reader = ZBinArchiveReader::new(dir.path()).expect("archive");
    let series = reader.read_location(7.6, 2.4).expect("point series");
    let point = grid.point(series.index).expect("grid point");
    assert_eq!((point.lon, point.lat), (7.5, 2.5));
    let expected: Vec<f32> = (1..=3).map(|d| value_at(point.row, point.col, &day(d))).collect();
    assert_eq!(bits(&series.values["sm"]), bits(&expected));
    assert_eq!(series.values["flag"], vec![(point.row % 3) as f32; 3]);
}

#[test]
fn flush_limit_does_not_change_output() {
    let (grid, subset, partitioner) = small_setup();
    let mut outputs = Vec::new();

    for (flush_limit, n_proc) in [(1, 1), (2, 1), (100, 1), (1, 3)] {
        let dir = tempfile::tempdir().expect("temp dir");
        let writer = ZBinCellWriter::new(dir.path()).expect("writer");
        let images = (1..=5).map(|d| synthetic_image(&grid, day(d))).collect();
        let config = config(1, 5)
            .with_flush_limit(flush_limit)
            .with_n_proc(n_proc);
        let mut engine = RepartitionEngine::new(config, &grid, &subset, &partitioner, &writer)
            .expect("valid engine");
        let summary = engine
            .run(&mut cursor(MemoryDecoder::new(images), 1, 5))
            .expect("run succeeds");

        let expected_flushes = match flush_limit {
            1 => 5,
            2 => 3,
            _ => 1,
        };
        assert!(summary.cells.values().all(|r| r.flushes == expected_flushes));
        outputs.push(read_all(dir.path()));
    }

    assert_eq!(outputs[0].len(), 3);
    assert!(outputs.iter().all(|o| *o == outputs[0]));
}

#[test]
fn missing_images_become_gaps() {
    let (grid, subset, partitioner) = small_setup();
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = ZBinCellWriter::new(dir.path()).expect("writer");
    let images = vec![synthetic_image(&grid, day(1)), synthetic_image(&grid, day(3))];

    let mut engine = RepartitionEngine::new(config(1, 3), &grid, &subset, &partitioner, &writer)
        .expect("valid engine");
    let summary = engine
        .run(&mut cursor(MemoryDecoder::new(images), 1, 3))
        .expect("run succeeds");

    assert_eq!(summary.images, 2);
    assert_eq!(summary.gaps.len(), 1);
    assert_eq!(summary.gaps[0].timestamp, day(2));
    assert_eq!(summary.gaps[0].reason, GapReason::Missing);

    let cell = *summary.cells.keys().next().expect("one cell");
    let archive = read_cell_file(&writer.cell_path(cell)).expect("cell file");
    assert_eq!(archive.timestamps, vec![day(1), day(3)]);
}

#[test]
fn wrong_shape_is_skipped() {
    let (grid, subset, partitioner) = small_setup();
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = ZBinCellWriter::new(dir.path()).expect("writer");
    let coarse = GridIndex::new(5.0).expect("valid grid");
    let images = vec![synthetic_image(&grid, day(1)), synthetic_image(&coarse, day(2))];

    let mut engine = RepartitionEngine::new(config(1, 2), &grid, &subset, &partitioner, &writer)
        .expect("valid engine");
    let summary = engine
        .run(&mut cursor(MemoryDecoder::new(images), 1, 2))
        .expect("run succeeds");

    assert_eq!(summary.images, 1);
    assert_eq!(summary.gaps.len(), 1);
    assert!(matches!(summary.gaps[0].reason, GapReason::Decode(_)));
}

#[test]
fn empty_stack_is_no_data() {
    let (grid, subset, partitioner) = small_setup();
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = ZBinCellWriter::new(dir.path()).expect("writer");

    let mut engine = RepartitionEngine::new(config(1, 3), &grid, &subset, &partitioner, &writer)
        .expect("valid engine");
    let result = engine.run(&mut cursor(MemoryDecoder::new(vec![]), 1, 3));

    assert!(matches!(result, Err(ReshuffleError::NoData { .. })));
    assert_eq!(engine.state(), EngineState::Failed);
    assert!(!writer.cell_path(0).exists());
}

#[test]
fn sentinel_change_fails_the_run() {
    let (grid, subset, partitioner) = small_setup();
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = ZBinCellWriter::new(dir.path()).expect("writer");

    let mut second = synthetic_image(&grid, day(2));
    if let Some(sm) = second.variables.get_mut("sm") {
        sm.attributes.missing_value = Some(-1.0);
    }
    let images = vec![synthetic_image(&grid, day(1)), second];

    let mut engine = RepartitionEngine::new(config(1, 2), &grid, &subset, &partitioner, &writer)
        .expect("valid engine");
    let result = engine.run(&mut cursor(MemoryDecoder::new(images), 1, 2));

    match result {
        Err(ReshuffleError::MetadataConflict {
            variable,
            timestamp,
            ..
        }) => {
            assert_eq!(variable, "sm");
            assert_eq!(timestamp, day(2));
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Failed);
    let cells = partitioner.cells_of(&subset);
    assert!(cells.iter().all(|c| !writer.cell_path(*c).exists()));
}

#[test]
fn cursor_outside_the_configured_range_is_rejected() {
    let (grid, subset, partitioner) = small_setup();
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = ZBinCellWriter::new(dir.path()).expect("writer");
    let images = (1..=3).map(|d| synthetic_image(&grid, day(d))).collect();

    let mut engine = RepartitionEngine::new(config(1, 2), &grid, &subset, &partitioner, &writer)
        .expect("valid engine");
    let result = engine.run(&mut cursor(MemoryDecoder::new(images), 1, 3));

    assert!(matches!(result, Err(ReshuffleError::Configuration(_))));
    assert_eq!(engine.state(), EngineState::Failed);
    assert!(!dir.path().join(grid_file_name()).exists());
}

#[test]
fn ignore_meta_skips_attribute_checks() {
    let (grid, subset, partitioner) = small_setup();
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = ZBinCellWriter::new(dir.path()).expect("writer");

    let mut second = synthetic_image(&grid, day(2));
    if let Some(sm) = second.variables.get_mut("sm") {
        sm.attributes.missing_value = Some(-1.0);
        sm.attributes.units = Some("%".to_string());
    }
    let images = vec![synthetic_image(&grid, day(1)), second];

    let mut engine = RepartitionEngine::new(
        config(1, 2).with_ignore_meta(true),
        &grid,
        &subset,
        &partitioner,
        &writer,
    )
    .expect("valid engine");
    let summary = engine
        .run(&mut cursor(MemoryDecoder::new(images), 1, 2))
        .expect("run succeeds");

    assert!(summary.discrepancies.is_empty());
    let cell = *summary.cells.keys().next().expect("one cell");
    let archive = read_cell_file(&writer.cell_path(cell)).expect("cell file");
    assert_eq!(archive.timestamps, vec![day(1), day(2)]);
    let sm = archive.variable("sm").expect("sm");
    assert_eq!(sm.attributes, VariableAttributes::default());
}

#[test]
fn global_attributes_stay_with_the_first_run() {
    let (grid, subset, partitioner) = small_setup();
    let dir = tempfile::tempdir().expect("temp dir");
    let images: Vec<Image> = (1..=4).map(|d| synthetic_image(&grid, day(d))).collect();

    let product = |name: &str| -> GlobalAttributes {
        [("product".to_string(), name.to_string())].into_iter().collect()
    };
    for ((start, end), name) in [((1, 2), "ACTIVE"), ((3, 4), "PASSIVE")] {
        let writer = ZBinCellWriter::new(dir.path())
            .expect("writer")
            .with_global_attributes(product(name));
        let mut engine =
            RepartitionEngine::new(config(start, end), &grid, &subset, &partitioner, &writer)
                .expect("valid engine");
        engine
            .run(&mut cursor(MemoryDecoder::new(images.clone()), start, end))
            .expect("run succeeds");
    }

    let writer = ZBinCellWriter::new(dir.path()).expect("writer");
    for cell in partitioner.cells_of(&subset) {
        let archive = read_cell_file(&writer.cell_path(cell)).expect("cell file");
        assert_eq!(archive.global_attributes, product("ACTIVE"));
        assert_eq!(archive.timestamps.len(), 4);
    }
}

#[test]
fn attribute_changes_are_reported() {
    let (grid, subset, partitioner) = small_setup();
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = ZBinCellWriter::new(dir.path()).expect("writer");

    let mut second = synthetic_image(&grid, day(2));
    if let Some(sm) = second.variables.get_mut("sm") {
        sm.attributes.units = Some("%".to_string());
    }
    let images = vec![synthetic_image(&grid, day(1)), second];

    let mut engine = RepartitionEngine::new(config(1, 2), &grid, &subset, &partitioner, &writer)
        .expect("valid engine");
    let summary = engine
        .run(&mut cursor(MemoryDecoder::new(images), 1, 2))
        .expect("run succeeds");

    assert_eq!(summary.discrepancies.len(), 1);
    let cell = *summary.cells.keys().next().expect("one cell");
    let archive = read_cell_file(&writer.cell_path(cell)).expect("cell file");
    let sm = archive.variable("sm").expect("sm");
    assert_eq!(sm.attributes.units.as_deref(), Some("m3 m-3"));
}

#[test]
fn cancel_drains_buffers() {
    let (grid, subset, partitioner) = small_setup();
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = ZBinCellWriter::new(dir.path()).expect("writer");
    let token = CancelToken::new();

    let images = (1..=4).map(|d| synthetic_image(&grid, day(d))).collect();
    let mut decoder = MemoryDecoder::new(images);
    decoder.cancel_on = Some((day(2), token.clone()));

    let mut engine = RepartitionEngine::new(config(1, 4), &grid, &subset, &partitioner, &writer)
        .expect("valid engine")
        .with_cancel_token(token);
    let summary = engine
        .run(&mut cursor(decoder, 1, 4))
        .expect("cancelled run still succeeds");

    assert!(summary.cancelled);
    assert_eq!(summary.images, 2);
    assert_eq!(engine.state(), EngineState::Done);
    let cell = *summary.cells.keys().next().expect("one cell");
    let archive = read_cell_file(&writer.cell_path(cell)).expect("cell file");
    assert_eq!(archive.timestamps, vec![day(1), day(2)]);
}

#[test]
fn later_run_appends() {
    let (grid, subset, partitioner) = small_setup();
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = ZBinCellWriter::new(dir.path()).expect("writer");
    let images: Vec<Image> = (1..=4).map(|d| synthetic_image(&grid, day(d))).collect();

    for (start, end) in [(1, 2), (3, 4)] {
        let mut engine =
            RepartitionEngine::new(config(start, end), &grid, &subset, &partitioner, &writer)
                .expect("valid engine");
        engine
            .run(&mut cursor(MemoryDecoder::new(images.clone()), start, end))
            .expect("run succeeds");
    }

    let cell = partitioner.cells_of(&subset)[0];
    let archive = read_cell_file(&writer.cell_path(cell)).expect("cell file");
    assert_eq!(archive.timestamps, (1..=4).map(day).collect::<Vec<_>>());

    let mut engine = RepartitionEngine::new(config(3, 4), &grid, &subset, &partitioner, &writer)
        .expect("valid engine");
    let result = engine.run(&mut cursor(MemoryDecoder::new(images), 3, 4));
    assert!(matches!(result, Err(ReshuffleError::Write { .. })));
    assert_eq!(engine.state(), EngineState::Failed);
}

/// Keeps segments in memory and refuses to write one cell
struct RecordingWriter {
    failing: Option<CellId>,
    segments: Mutex<Vec<(CellId, usize, usize)>>,
}

struct RecordingHandle<'a> {
    cell: CellId,
    writer: &'a RecordingWriter,
}

impl CellWriter for RecordingWriter {
    fn create_or_open(&self, cell: CellId) -> Result<Box<dyn CellHandle + '_>, ReshuffleError> {
        Ok(Box::new(RecordingHandle { cell, writer: self }))
    }

    fn write_grid_lookup(&self, _: &GridSubset, _: &CellPartitioner) -> Result<(), ReshuffleError> {
        Ok(())
    }

    fn concurrent_cells(&self) -> bool {
        false
    }
}

impl CellHandle for RecordingHandle<'_> {
    fn append(&mut self, segment: &CellSegment) -> Result<(), ReshuffleError> {
        if self.writer.failing == Some(self.cell) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
        }
        self.writer.segments.lock().unwrap().push((
            self.cell,
            segment.time_offset,
            segment.n_times(),
        ));
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), ReshuffleError> {
        Ok(())
    }
}

#[test]
fn write_error_names_the_cell() {
    let (grid, subset, partitioner) = small_setup();
    let cells = partitioner.cells_of(&subset);
    let writer = RecordingWriter {
        failing: Some(cells[1]),
        segments: Mutex::new(Vec::new()),
    };
    let images = (1..=2).map(|d| synthetic_image(&grid, day(d))).collect();

    let mut engine = RepartitionEngine::new(
        config(1, 2).with_n_proc(4),
        &grid,
        &subset,
        &partitioner,
        &writer,
    )
    .expect("valid engine");
    let result = engine.run(&mut cursor(MemoryDecoder::new(images), 1, 2));

    match result {
        Err(ReshuffleError::Write { cell, .. }) => assert_eq!(cell, cells[1]),
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Failed);
    assert_eq!(*writer.segments.lock().unwrap(), vec![(cells[0], 0, 2)]);
}

#[test]
fn segments_carry_time_offsets() {
    let (grid, subset, partitioner) = small_setup();
    let writer = RecordingWriter {
        failing: None,
        segments: Mutex::new(Vec::new()),
    };
    let images = (1..=5).map(|d| synthetic_image(&grid, day(d))).collect();

    let mut engine = RepartitionEngine::new(
        config(1, 5).with_flush_limit(2),
        &grid,
        &subset,
        &partitioner,
        &writer,
    )
    .expect("valid engine");
    engine
        .run(&mut cursor(MemoryDecoder::new(images), 1, 5))
        .expect("run succeeds");

    let cell = partitioner.cells_of(&subset)[0];
    let segments: Vec<(usize, usize)> = writer
        .segments
        .lock()
        .unwrap()
        .iter()
        .filter(|(c, _, _)| *c == cell)
        .map(|(_, offset, len)| (*offset, *len))
        .collect();
    assert_eq!(segments, vec![(0, 2), (2, 2), (4, 1)]);
}

#[test]
fn monthly_box_on_the_global_grid() {
    let grid = GridIndex::global();
    let partitioner = CellPartitioner::for_grid(&grid).expect("5 degree cells");
    let bbox = BoundingBox::new(70.0, 10.0, 80.0, 20.0).expect("valid bbox");
    let subset = grid.subset(Some(&bbox), false).expect("subset");
    let dir = tempfile::tempdir().expect("temp dir");
    let writer = ZBinCellWriter::new(dir.path()).expect("writer");

    let start = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2018, 12, 1, 0, 0, 0).unwrap();
    let mut dates = vec![start];
    while let Some(next) = dates.last().and_then(|d| d.checked_add_months(chrono::Months::new(1))) {
        if next > end {
            break;
        }
        dates.push(next);
    }
    assert_eq!(dates.len(), 12);

    let sm = Array2::from_elem(grid.shape(), 0.25f32);
    let images = dates
        .iter()
        .map(|d| {
            Image::new(*d).with_variable("sm", sm.clone(), VariableAttributes::new("%", "SM", -9999.0))
        })
        .collect();
    let cursor = ImageStackCursor::new(
        Box::new(MemoryDecoder::new(images)),
        Path::new("/images"),
        start,
        end,
        Frequency::Monthly,
        &["sm".to_string()],
    );

    let config = RepartitionConfig::new(start, end, &["sm"]);
    let mut engine = RepartitionEngine::new(config, &grid, &subset, &partitioner, &writer)
        .expect("valid engine");
    let summary = engine
        .run(&mut cursor.expect("valid cursor"))
        .expect("run succeeds");

    assert_eq!(summary.cells.len(), 4);
    for (cell, report) in &summary.cells {
        assert_eq!((report.points, report.timestamps), (400, 12));
        let archive = read_cell_file(&writer.cell_path(*cell)).expect("cell file");
        assert_eq!(archive.variable("sm").map(|v| v.values.dim()), Some((400, 12)));
    }
    assert!(summary.last_timestamp.is_some_and(|t| t - start > Duration::days(300)));
}
