use std::{collections::BTreeMap, path::PathBuf, str::FromStr};

use cellshuffle::{
    modules::cursor::config::FileTemplate, BoundingBox, Frequency, RunSummary, VariableAttributes,
};
use chrono::{TimeZone, Utc};

use super::builder::*;
use crate::common::helpers::{parse_date, parse_field};

#[test]
fn parse_cli_values() {
    assert_eq!(
        parse_date("2020-02-29").expect("valid date"),
        Utc.with_ymd_and_hms(2020, 2, 29, 0, 0, 0).unwrap()
    );
    assert!(parse_date("2020-02-30").is_err());
    assert!(parse_date("20200101").is_err());

    assert_eq!(
        parse_field("product=COMBINED").expect("valid field"),
        ("product".to_string(), "COMBINED".to_string())
    );
    assert!(parse_field("product").is_err());
    assert!(parse_field("=COMBINED").is_err());

    assert_eq!(OutputFormat::from_str("NetCDF").ok(), Some(OutputFormat::Netcdf));
    assert_eq!(OutputFormat::Zbin.to_string(), "zbin");
    assert_eq!(Frequency::from_str("dekadal").ok(), Some(Frequency::Dekadal));
}

#[test]
fn file_config_from_yaml() {
    let dir = tempfile::tempdir().expect("temp dir");
    let file = dir.path().join("config.yml");
    std::fs::write(
        &file,
        "template: \"SM_{product}_{datetime}.zbin\"\n\
         datetime_format: \"%Y%m%d\"\n\
         fields:\n  product: COMBINED\n\
         frequency: DEKADAL\n\
         format: zbin\n\
         imgbuffer: 50\n\
         ignore_meta: false\n\
         global_attributes:\n  sensor: AMSR2\n",
    )
    .expect("config written");

    let config = FileConfig::from_yaml(&file).expect("valid config");
    assert_eq!(config.template.as_deref(), Some("SM_{product}_{datetime}.zbin"));
    assert_eq!(config.fields.get("product").map(String::as_str), Some("COMBINED"));
    assert_eq!(config.frequency, Some(Frequency::Dekadal));
    assert_eq!(config.format, Some(OutputFormat::Zbin));
    assert_eq!(config.imgbuffer, Some(50));
    assert_eq!(config.n_proc, None);
    assert_eq!(config.ignore_meta, Some(false));
    assert_eq!(
        config.global_attributes.get("sensor").map(String::as_str),
        Some("AMSR2")
    );

    assert!(FileConfig::from_yaml(&dir.path().join("missing.yml")).is_err());
}

#[test]
fn overview_round_trip() {
    let dir = tempfile::tempdir().expect("temp dir");
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2020, 1, 31, 0, 0, 0).unwrap();

    let mut attributes = BTreeMap::new();
    attributes.insert(
        "sm".to_string(),
        VariableAttributes::new("m3 m-3", "Volumetric Soil Moisture", -9999.0),
    );
    let overview = Overview {
        version: "test".to_string(),
        settings: RunSettings {
            img_path: PathBuf::from("/data/images"),
            start,
            end,
            variables: vec!["sm".to_string()],
            frequency: Frequency::Daily,
            template: FileTemplate::default().with_field("product", "COMBINED"),
            format: OutputFormat::Zbin,
            land: false,
            land_mask: None,
            bbox: Some(BoundingBox::new(70.0, 10.0, 80.0, 20.0).expect("valid bbox")),
            imgbuffer: 250,
            n_proc: 2,
            ignore_meta: false,
            global_attributes: [("product".to_string(), "COMBINED".to_string())]
                .into_iter()
                .collect(),
        },
        last_timestamp: Some(end),
        attributes,
        summary: RunSummary {
            images: 31,
            first_timestamp: Some(start),
            last_timestamp: Some(end),
            cancelled: false,
            gaps: vec![],
            discrepancies: vec![],
            cells: BTreeMap::new(),
        },
    };

    overview.write(dir.path()).expect("overview written");
    assert!(dir.path().join("000_overview.yml").is_file());
    let read = Overview::from_file(dir.path()).expect("overview read");
    assert_eq!(read, overview);
}
