use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde_derive::{Deserialize, Serialize};

/// Fixed-shape attribute record carried from images to cell files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    /// code denoting "no data"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_value: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_offset: Option<f64>,
}

impl VariableAttributes {
    pub fn new(units: &str, long_name: &str, missing_value: f32) -> Self {
        VariableAttributes {
            units: Some(units.to_string()),
            long_name: Some(long_name.to_string()),
            missing_value: Some(missing_value),
            ..Default::default()
        }
    }

    /// Sentinels compare bit for bit, so two NaN codes are the same sentinel
    pub fn same_missing_value(&self, other: &VariableAttributes) -> bool {
        match (self.missing_value, other.missing_value) {
            (Some(a), Some(b)) => a.to_bits() == b.to_bits(),
            (None, None) => true,
            _ => false,
        }
    }

    /// Names of the non-sentinel fields that differ
    pub fn differences(&self, other: &VariableAttributes) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.units != other.units {
            fields.push("units");
        }
        if self.long_name != other.long_name {
            fields.push("long_name");
        }
        if self.scale_factor != other.scale_factor {
            fields.push("scale_factor");
        }
        if self.add_offset != other.add_offset {
            fields.push("add_offset");
        }
        fields
    }
}

/// One variable of a decoded image, aligned to the full raster (row 0 = south)
#[derive(Debug, Clone)]
pub struct VariableData {
    pub values: Array2<f32>,
    pub attributes: VariableAttributes,
}

/// One decoded timestamp
#[derive(Debug, Clone)]
pub struct Image {
    pub timestamp: DateTime<Utc>,
    pub variables: BTreeMap<String, VariableData>,
}

impl Image {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Image {
            timestamp,
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(
        mut self,
        name: &str,
        values: Array2<f32>,
        attributes: VariableAttributes,
    ) -> Self {
        self.variables
            .insert(name.to_string(), VariableData { values, attributes });
        self
    }

    pub fn get(&self, name: &str) -> Option<&VariableData> {
        self.variables.get(name)
    }
}
