use std::{
    collections::BTreeMap,
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use cellshuffle::{
    constants::OVERVIEW_FILE,
    modules::cursor::config::FileTemplate,
    BoundingBox, Frequency, RunSummary, VariableAttributes,
};
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::common::helpers::CliError;

/// Storage format of the cell files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, Serialize, Deserialize)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Zbin,
    Netcdf,
}

fn read_yaml<T: serde::de::DeserializeOwned>(file_name: &Path) -> Result<T, CliError> {
    let mut file = File::open(file_name)
        .map_err(|err| format!("Cannot open config file {:?}: {}", file_name, err))?;

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|err| format!("Cannot read config file {:?}: {}", file_name, err))?;

    let conf = serde_yaml::from_str(&contents)
        .map_err(|err| format!("Cannot parse config file {:?}: {}", file_name, err))?;
    Ok(conf)
}

/// Optional `--config` file: defaults for the command line options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub template: Option<String>,
    pub datetime_format: Option<String>,
    pub fields: BTreeMap<String, String>,
    pub frequency: Option<Frequency>,
    pub format: Option<OutputFormat>,
    pub land_mask: Option<PathBuf>,
    pub imgbuffer: Option<usize>,
    pub n_proc: Option<usize>,
    pub ignore_meta: Option<bool>,
    /// written on every cell file, before `--global-attr` values
    pub global_attributes: BTreeMap<String, String>,
}

impl FileConfig {
    pub fn from_yaml(file_name: &Path) -> Result<Self, CliError> {
        read_yaml(file_name)
    }
}

/// Everything needed to repeat or extend a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub img_path: PathBuf,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub variables: Vec<String>,
    pub frequency: Frequency,
    pub template: FileTemplate,
    pub format: OutputFormat,
    pub land: bool,
    pub land_mask: Option<PathBuf>,
    pub bbox: Option<BoundingBox>,
    pub imgbuffer: usize,
    pub n_proc: usize,
    #[serde(default)]
    pub ignore_meta: bool,
    #[serde(default)]
    pub global_attributes: BTreeMap<String, String>,
}

/// Content of the overview file written next to the cell files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub version: String,
    pub settings: RunSettings,
    /// last timestamp stored in the archive
    pub last_timestamp: Option<DateTime<Utc>>,
    /// attributes written to the cell files, per variable
    pub attributes: BTreeMap<String, VariableAttributes>,
    pub summary: RunSummary,
}

impl Overview {
    pub fn path(ts_path: &Path) -> PathBuf {
        ts_path.join(OVERVIEW_FILE)
    }

    pub fn from_file(ts_path: &Path) -> Result<Self, CliError> {
        read_yaml(&Overview::path(ts_path))
    }

    pub fn write(&self, ts_path: &Path) -> Result<(), CliError> {
        let file_name = Overview::path(ts_path);
        let contents = serde_yaml::to_string(self)
            .map_err(|err| format!("Cannot serialize overview: {err}"))?;
        let mut file = File::create(&file_name)
            .map_err(|err| format!("Cannot create {:?}: {}", file_name, err))?;
        file.write_all(contents.as_bytes())
            .map_err(|err| format!("Cannot write {:?}: {}", file_name, err))?;
        Ok(())
    }
}
