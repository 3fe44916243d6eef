mod common;

use std::collections::BTreeMap;
use std::env::{set_var, var};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use cellshuffle::{
    constants::DEFAULT_FLUSH_LIMIT,
    io::{
        readers::{prelude::ImageDecoder, zbin::read_land_mask},
        writers::prelude::CellWriter,
    },
    modules::cursor::{
        config::{FileTemplate, DEFAULT_ZBIN_TEMPLATE},
        functions::{infer_date_range, infer_variables, next_timestamp},
    },
    version::LONG_VERSION,
    BoundingBox, CellPartitioner, Frequency, GridIndex, ImageStackCursor, MetadataPropagator,
    RepartitionConfig, RepartitionEngine, ReshuffleError, RunSummary, VariableAttributes,
};
use chrono::{DateTime, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};
use log::{info, trace, warn};

use common::config::builder::{FileConfig, OutputFormat, Overview, RunSettings};
use common::helpers::{build_decoder, build_writer, parse_date, parse_field};

#[derive(Parser, Debug)]
#[command(
    version,
    long_version = LONG_VERSION,
    about = "Converts a stack of global images into per-cell time series files",
    long_about = "cellshuffle reads a time-ordered stack of gridded images on the 0.25 degree global grid \
and rewrites them as time series, one file per 5 degree cell, so that the history of a single location \
can be read without scanning every image."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reshuffle the images between START and END into cell files
    Reshuffle(ReshuffleArgs),
    /// Extend an existing archive with the images following its last timestamp
    Update(UpdateArgs),
}

#[derive(Args, Debug)]
struct ReshuffleArgs {
    #[arg(help = "Root directory of the image stack", index = 1)]
    img_path: PathBuf,

    #[arg(help = "Destination directory of the cell files", index = 2)]
    ts_path: PathBuf,

    #[arg(
        help = "First date, YYYY-MM-DD, defaults to the first image",
        index = 3,
        value_parser = parse_date
    )]
    start: Option<DateTime<Utc>>,

    #[arg(
        help = "Last date (inclusive), YYYY-MM-DD, defaults to the last image",
        index = 4,
        value_parser = parse_date
    )]
    end: Option<DateTime<Utc>>,

    #[arg(
        short = 'p',
        long = "parameters",
        num_args = 1..,
        help = "Variables to reshuffle, defaults to every variable of the first image"
    )]
    parameters: Vec<String>,

    #[arg(long, help = "Copy the values only: no attribute checks, no variable attributes")]
    ignore_meta: bool,

    #[arg(long, value_parser = parse_field, help = "Global attribute of the cell files as key=value")]
    global_attr: Vec<(String, String)>,

    #[arg(long, help = "Only keep land points (needs a land mask)")]
    land: bool,

    #[arg(long, help = "Grid-shaped zbin raster, values > 0 are land")]
    land_mask: Option<PathBuf>,

    #[arg(
        long,
        num_args = 4,
        value_names = ["W", "S", "E", "N"],
        allow_negative_numbers = true,
        help = "Bounding box: min lon, min lat, max lon, max lat"
    )]
    bbox: Option<Vec<f64>>,

    #[arg(long, help = "Image frequency: daily, dekadal or monthly")]
    freq: Option<Frequency>,

    #[arg(long, help = "File name template, must contain {datetime}")]
    template: Option<String>,

    #[arg(long, value_parser = parse_field, help = "Template field as key=value")]
    field: Vec<(String, String)>,

    #[arg(long, help = "Cell file format: zbin or netcdf")]
    format: Option<OutputFormat>,

    #[arg(long, help = "Images buffered per cell before writing")]
    imgbuffer: Option<usize>,

    #[arg(long, help = "Worker threads used to write cells")]
    n_proc: Option<usize>,

    #[arg(long, help = "Delete the destination before writing")]
    overwrite: bool,

    #[arg(long, help = "YAML file with default options")]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct UpdateArgs {
    #[arg(help = "Root directory of the image stack", index = 1)]
    img_path: PathBuf,

    #[arg(help = "Directory of an existing archive", index = 2)]
    ts_path: PathBuf,

    #[arg(long, value_parser = parse_date, help = "Last date (inclusive), defaults to today")]
    end: Option<DateTime<Utc>>,

    #[arg(long, help = "Worker threads used to write cells")]
    n_proc: Option<usize>,
}

fn settings_from_args(args: ReshuffleArgs) -> Result<RunSettings, Box<dyn Error>> {
    let file_config = match &args.config {
        Some(path) => FileConfig::from_yaml(path)?,
        None => FileConfig::default(),
    };

    let template = args
        .template
        .or(file_config.template)
        .unwrap_or_else(|| DEFAULT_ZBIN_TEMPLATE.to_string());
    let mut template = FileTemplate::new(&template)?;
    if let Some(format) = &file_config.datetime_format {
        template = template.with_datetime_format(format);
    }
    let cli_fields = args.field.iter().map(|(k, v)| (k, v));
    for (key, value) in file_config.fields.iter().chain(cli_fields) {
        template = template.with_field(key, value);
    }

    let bbox = args
        .bbox
        .map(|corners| BoundingBox::from_corners(&corners))
        .transpose()?;
    let land_mask = args.land_mask.or(file_config.land_mask);
    if args.land && land_mask.is_none() {
        return Err("--land requires a land mask (--land-mask or land_mask in the config file)".into());
    }

    let (start, end) = match (args.start, args.end) {
        (Some(start), Some(end)) => (start, end),
        (start, end) => {
            let decoder = build_decoder(&template)?;
            let (first, last) = infer_date_range(decoder.as_ref(), &args.img_path)?;
            info!(
                "Image stack spans {} to {}",
                first.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            );
            (start.unwrap_or(first), end.unwrap_or(last))
        }
    };
    let variables = if args.parameters.is_empty() {
        let decoder = build_decoder(&template)?;
        let variables = infer_variables(decoder.as_ref(), &args.img_path)?;
        info!("Reshuffling every variable: {}", variables.join(", "));
        variables
    } else {
        args.parameters
    };

    let ignore_meta = args.ignore_meta || file_config.ignore_meta.unwrap_or(false);
    let global_attributes = if ignore_meta {
        BTreeMap::new()
    } else {
        let cli_attributes = args.global_attr.into_iter();
        template
            .fields
            .clone()
            .into_iter()
            .chain(file_config.global_attributes)
            .chain(cli_attributes)
            .collect()
    };

    Ok(RunSettings {
        img_path: args.img_path,
        start,
        end,
        variables,
        frequency: args.freq.or(file_config.frequency).unwrap_or(Frequency::Daily),
        template,
        format: args.format.or(file_config.format).unwrap_or_default(),
        land: args.land,
        land_mask,
        bbox,
        imgbuffer: args.imgbuffer.or(file_config.imgbuffer).unwrap_or(DEFAULT_FLUSH_LIMIT),
        n_proc: args.n_proc.or(file_config.n_proc).unwrap_or(1),
        ignore_meta,
        global_attributes,
    })
}

/// Runs the engine over the images described by `settings`
fn execute(
    settings: &RunSettings,
    decoder: Box<dyn ImageDecoder>,
    writer: &dyn CellWriter,
    metadata: MetadataPropagator,
) -> Result<(RunSummary, BTreeMap<String, VariableAttributes>), ReshuffleError> {
    let c = Utc::now();
    let mut grid = GridIndex::global();
    if let Some(mask_path) = &settings.land_mask {
        let mask = read_land_mask(mask_path, &grid)?;
        grid = grid.with_land_mask(mask)?;
    }
    let subset = grid.subset(settings.bbox.as_ref(), settings.land)?;
    let partitioner = CellPartitioner::for_grid(&grid)?;
    trace!("Loading grid took {} ms", (Utc::now() - c).num_milliseconds());

    let mut cursor = ImageStackCursor::new(
        decoder,
        &settings.img_path,
        settings.start,
        settings.end,
        settings.frequency,
        &settings.variables,
    )?;
    let config = RepartitionConfig {
        start: settings.start,
        end: settings.end,
        variables: settings.variables.clone(),
        flush_limit: settings.imgbuffer,
        n_proc: settings.n_proc,
        ignore_meta: settings.ignore_meta,
    };
    let mut engine = RepartitionEngine::new(config, &grid, &subset, &partitioner, writer)?
        .with_metadata(metadata);
    let summary = engine.run(&mut cursor)?;

    for gap in &summary.gaps {
        warn!("Gap at {}: {:?}", gap.timestamp.format("%Y-%m-%d"), gap.reason);
    }
    Ok((summary, engine.metadata().canonical_all().clone()))
}

fn run_reshuffle(args: ReshuffleArgs) -> Result<(), Box<dyn Error>> {
    let ts_path = args.ts_path.clone();
    let overwrite = args.overwrite;
    let settings = settings_from_args(args)?;

    if overwrite && ts_path.exists() {
        warn!("Removing existing archive {:?}", ts_path);
        fs::remove_dir_all(&ts_path)?;
    }

    let decoder = build_decoder(&settings.template)?;
    let writer = build_writer(settings.format, &ts_path, &settings.global_attributes)?;
    let (summary, attributes) =
        execute(&settings, decoder, writer.as_ref(), MetadataPropagator::new())?;

    let overview = Overview {
        version: env!("CARGO_PKG_VERSION").to_string(),
        last_timestamp: summary.last_timestamp,
        settings,
        attributes,
        summary,
    };
    overview.write(&ts_path)?;
    Ok(())
}

fn today() -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(Utc::now().date_naive().and_time(NaiveTime::MIN), Utc)
}

fn run_update(args: UpdateArgs) -> Result<(), Box<dyn Error>> {
    let previous = Overview::from_file(&args.ts_path)?;
    let last = previous
        .last_timestamp
        .ok_or("The archive holds no timestamps, run reshuffle instead")?;

    let mut settings = previous.settings.clone();
    settings.img_path = args.img_path;
    settings.start = next_timestamp(&last, settings.frequency)
        .ok_or_else(|| format!("No timestamp follows {last}"))?;
    settings.end = args.end.unwrap_or_else(today);
    if let Some(n_proc) = args.n_proc {
        settings.n_proc = n_proc;
    }
    if settings.start > settings.end {
        info!("Archive is up to date (last timestamp {})", last.format("%Y-%m-%d"));
        return Ok(());
    }
    info!(
        "Updating {:?} from {} to {}",
        args.ts_path,
        settings.start.format("%Y-%m-%d"),
        settings.end.format("%Y-%m-%d")
    );

    let decoder = build_decoder(&settings.template)?;
    let writer = build_writer(settings.format, &args.ts_path, &settings.global_attributes)?;
    let metadata = MetadataPropagator::with_canonical(previous.attributes.clone());
    let (summary, attributes) = match execute(&settings, decoder, writer.as_ref(), metadata) {
        Ok(result) => result,
        Err(ReshuffleError::NoData { start, end }) => {
            info!("No new images between {} and {}", start, end);
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    settings.start = previous.settings.start;
    let overview = Overview {
        version: env!("CARGO_PKG_VERSION").to_string(),
        last_timestamp: summary.last_timestamp.or(previous.last_timestamp),
        settings,
        attributes,
        summary,
    };
    overview.write(&args.ts_path)?;
    Ok(())
}

fn check_paths(img_path: &Path) -> Result<(), Box<dyn Error>> {
    if !img_path.is_dir() {
        return Err(format!("Image path {:?} is not a directory", img_path).into());
    }
    Ok(())
}

/// main function
fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if var("RUST_LOG").is_err() {
        set_var("RUST_LOG", "info")
    }
    pretty_env_logger::init();

    let start_time = Utc::now();
    match cli.command {
        Command::Reshuffle(args) => {
            check_paths(&args.img_path)?;
            run_reshuffle(args)?
        }
        Command::Update(args) => {
            check_paths(&args.img_path)?;
            run_update(args)?
        }
    }
    let elapsed_time = Utc::now() - start_time;
    info!("Elapsed time: {} seconds", elapsed_time.num_seconds());
    Ok(())
}
