use std::collections::BTreeMap;

use log::warn;
use serde_derive::{Deserialize, Serialize};

use crate::models::image::VariableAttributes;

/// Non-fatal mismatch between a variable's canonical attributes and a later image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub variable: String,
    pub fields: Vec<String>,
}

/// The missing-value sentinel of a variable changed during the run
#[derive(Debug, Clone, PartialEq)]
pub struct SentinelConflict {
    pub variable: String,
    pub expected: Option<f32>,
    pub found: Option<f32>,
}

/// Keeps one attribute record per variable: the first one seen wins.
#[derive(Debug, Default, Clone)]
pub struct MetadataPropagator {
    canonical: BTreeMap<String, VariableAttributes>,
    discrepancies: Vec<Discrepancy>,
}

impl MetadataPropagator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the canonical records, e.g. from an archive being extended
    pub fn with_canonical(canonical: BTreeMap<String, VariableAttributes>) -> Self {
        MetadataPropagator {
            canonical,
            discrepancies: Vec::new(),
        }
    }

    /// Checks `attributes` without storing anything
    pub fn check(
        &self,
        variable: &str,
        attributes: &VariableAttributes,
    ) -> Result<(), SentinelConflict> {
        match self.canonical.get(variable) {
            Some(canonical) if !canonical.same_missing_value(attributes) => Err(SentinelConflict {
                variable: variable.to_string(),
                expected: canonical.missing_value,
                found: attributes.missing_value,
            }),
            _ => Ok(()),
        }
    }

    /// Registers the attributes of `variable` as read from one image.
    /// Differences other than the missing value are recorded and logged.
    pub fn observe(
        &mut self,
        variable: &str,
        attributes: &VariableAttributes,
    ) -> Result<(), SentinelConflict> {
        self.check(variable, attributes)?;

        let Some(canonical) = self.canonical.get(variable) else {
            self.canonical
                .insert(variable.to_string(), attributes.clone());
            return Ok(());
        };

        let fields = canonical.differences(attributes);
        if !fields.is_empty() {
            warn!(
                "Attributes of {} differ from the first image: {}",
                variable,
                fields.join(", ")
            );
            self.discrepancies.push(Discrepancy {
                variable: variable.to_string(),
                fields: fields.iter().map(|f| f.to_string()).collect(),
            });
        }
        Ok(())
    }

    pub fn canonical(&self, variable: &str) -> Option<&VariableAttributes> {
        self.canonical.get(variable)
    }

    pub fn canonical_all(&self) -> &BTreeMap<String, VariableAttributes> {
        &self.canonical
    }

    pub fn discrepancies(&self) -> &[Discrepancy] {
        &self.discrepancies
    }
}
