use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::ReshuffleError;

pub const DATETIME_PLACEHOLDER: &str = "{datetime}";
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y%m%d%H%M";
pub const DEFAULT_ZBIN_TEMPLATE: &str = "IMG_{datetime}.zbin";
pub const DEFAULT_NETCDF_TEMPLATE: &str =
    "C3S-SOILMOISTURE-L3S-SSM{unit}-{product}-{freq}-{datetime}-{record}-{version}.{subversion}.nc";

/// Temporal sampling of the image stack
#[allow(clippy::upper_case_acronyms)]
#[derive(
    Debug, PartialEq, Eq, Hash, Copy, Clone, EnumString, EnumIter, Display, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive, serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    /// 1st, 11th and 21st of each month
    Dekadal,
    Monthly,
}

/// File naming convention of an image stack.
/// `{name}` placeholders are filled from `fields`, `{datetime}` from the timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTemplate {
    pub template: String,
    pub datetime_format: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl FileTemplate {
    pub fn new(template: &str) -> Result<Self, ReshuffleError> {
        if !template.contains(DATETIME_PLACEHOLDER) {
            return Err(format!("file template '{template}' has no {DATETIME_PLACEHOLDER} field").into());
        }
        Ok(FileTemplate {
            template: template.to_string(),
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
            fields: BTreeMap::new(),
        })
    }

    pub fn with_datetime_format(mut self, format: &str) -> Self {
        self.datetime_format = format.to_string();
        self
    }

    pub fn with_field(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }

    pub fn file_name(&self, date: &DateTime<Utc>) -> Result<String, ReshuffleError> {
        let mut name = self.template.clone();
        for (key, value) in &self.fields {
            name = name.replace(&format!("{{{key}}}"), value);
        }
        let name = name.replace(
            DATETIME_PLACEHOLDER,
            &date.format(&self.datetime_format).to_string(),
        );
        if let Some(start) = name.find('{') {
            let field = name[start..].split('}').next().unwrap_or_default();
            return Err(format!("file template field {field}}} has no value").into());
        }
        Ok(name)
    }

    /// Expected location of the image for `date`: inside a `YYYY` sub-directory
    /// when the root has one for that year, else directly in the root.
    pub fn resolve(&self, root: &Path, date: &DateTime<Utc>) -> Result<PathBuf, ReshuffleError> {
        let name = self.file_name(date)?;
        let year_dir = root.join(format!("{:04}", date.year()));
        if year_dir.is_dir() {
            Ok(year_dir.join(name))
        } else {
            Ok(root.join(name))
        }
    }
}

enum Token {
    Text(String),
    /// a field without a configured value, matches anything
    Any,
    Datetime,
}

impl FileTemplate {
    fn tokens(&self) -> Vec<Token> {
        let mut filled = self.template.clone();
        for (key, value) in &self.fields {
            filled = filled.replace(&format!("{{{key}}}"), value);
        }

        let mut tokens = Vec::new();
        let mut rest = filled.as_str();
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            if start > 0 {
                tokens.push(Token::Text(rest[..start].to_string()));
            }
            let field = &rest[start..start + len + 1];
            tokens.push(if field == DATETIME_PLACEHOLDER {
                Token::Datetime
            } else {
                Token::Any
            });
            rest = &rest[start + len + 1..];
        }
        if !rest.is_empty() {
            tokens.push(Token::Text(rest.to_string()));
        }
        tokens
    }

    fn parse_datetime(&self, value: &str) -> Option<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(value, &self.datetime_format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(value, &self.datetime_format)
                    .ok()
                    .map(|d| d.and_time(NaiveTime::MIN))
            })?;
        let date = DateTime::from_naive_utc_and_offset(naive, Utc);
        // chrono accepts short numbers, only the canonical rendering counts
        (date.format(&self.datetime_format).to_string() == value).then_some(date)
    }

    fn match_tokens(
        &self,
        tokens: &[Token],
        name: &str,
        date: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match tokens.split_first() {
            None => date.filter(|_| name.is_empty()),
            Some((Token::Text(text), rest)) => name
                .strip_prefix(text.as_str())
                .and_then(|tail| self.match_tokens(rest, tail, date)),
            Some((token, rest)) => (1..=name.len())
                .filter(|end| name.is_char_boundary(*end))
                .find_map(|end| {
                    let (head, tail) = name.split_at(end);
                    let date = match token {
                        Token::Datetime => Some(self.parse_datetime(head)?),
                        _ => date,
                    };
                    self.match_tokens(rest, tail, date)
                }),
        }
    }

    /// Timestamp of a file name following the template, `None` for any other name
    pub fn parse_date(&self, file_name: &str) -> Option<DateTime<Utc>> {
        self.match_tokens(&self.tokens(), file_name, None)
    }

    fn collect_dates(&self, dir: &Path, dates: &mut Vec<DateTime<Utc>>) -> Result<(), ReshuffleError> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if path.is_file() {
                dates.extend(self.parse_date(name));
            } else if dir_is_year(name) && path.is_dir() {
                self.collect_dates(&path, dates)?;
            }
        }
        Ok(())
    }

    /// Timestamps of every image below `root` and its `YYYY` sub-directories, ascending
    pub fn image_dates(&self, root: &Path) -> Result<Vec<DateTime<Utc>>, ReshuffleError> {
        let mut dates = Vec::new();
        self.collect_dates(root, &mut dates)?;
        dates.sort();
        dates.dedup();
        Ok(dates)
    }
}

fn dir_is_year(name: &str) -> bool {
    name.len() == 4 && name.chars().all(|c| c.is_ascii_digit())
}

impl Default for FileTemplate {
    fn default() -> Self {
        FileTemplate {
            template: DEFAULT_ZBIN_TEMPLATE.to_string(),
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
            fields: BTreeMap::new(),
        }
    }
}
