use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde_derive::{Deserialize, Serialize};

use crate::{constants::DEFAULT_FLUSH_LIMIT, error::ReshuffleError};

fn default_flush_limit() -> usize {
    DEFAULT_FLUSH_LIMIT
}

fn default_n_proc() -> usize {
    1
}

/// Settings of a single repartition run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepartitionConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub variables: Vec<String>,
    /// buffered timestamps per cell before the cell is written out
    #[serde(default = "default_flush_limit")]
    pub flush_limit: usize,
    /// worker threads used to flush cells
    #[serde(default = "default_n_proc")]
    pub n_proc: usize,
    /// reshuffle the values only: no attribute checks, empty attributes in the cell files
    #[serde(default)]
    pub ignore_meta: bool,
}

impl RepartitionConfig {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, variables: &[&str]) -> Self {
        RepartitionConfig {
            start,
            end,
            variables: variables.iter().map(|v| v.to_string()).collect(),
            flush_limit: DEFAULT_FLUSH_LIMIT,
            n_proc: 1,
            ignore_meta: false,
        }
    }

    pub fn with_flush_limit(mut self, flush_limit: usize) -> Self {
        self.flush_limit = flush_limit;
        self
    }

    pub fn with_n_proc(mut self, n_proc: usize) -> Self {
        self.n_proc = n_proc;
        self
    }

    pub fn with_ignore_meta(mut self, ignore_meta: bool) -> Self {
        self.ignore_meta = ignore_meta;
        self
    }

    pub fn validate(&self) -> Result<(), ReshuffleError> {
        if self.start > self.end {
            return Err(format!("start {} is after end {}", self.start, self.end).into());
        }
        if self.variables.is_empty() {
            return Err("at least one variable must be requested".into());
        }
        if let Some(dup) = self.variables.iter().duplicates().next() {
            return Err(format!("variable {dup} requested twice").into());
        }
        if self.flush_limit == 0 {
            return Err("flush limit must be at least 1".into());
        }
        if self.n_proc == 0 {
            return Err("n_proc must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn validation() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 12, 1, 0, 0, 0).unwrap();

        let config = RepartitionConfig::new(start, end, &["sm", "flag"]);
        assert_eq!(config.flush_limit, 250);
        assert!(config.validate().is_ok());

        assert!(RepartitionConfig::new(end, start, &["sm"]).validate().is_err());
        assert!(RepartitionConfig::new(start, end, &[]).validate().is_err());
        assert!(RepartitionConfig::new(start, end, &["sm", "sm"]).validate().is_err());
        assert!(config.clone().with_flush_limit(0).validate().is_err());
        assert!(config.with_n_proc(0).validate().is_err());
    }
}
