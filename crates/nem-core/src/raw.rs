//! Wire-shape records as returned by the telemetry provider, before any
//! validation. Field values stay as loose JSON until the validator coerces
//! them to the declared numeric types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One raw observation from the provider: an unparsed timestamp and a map
/// of column name to JSON value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub timestamp: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl RawRecord {
    pub fn new(timestamp: impl Into<String>) -> Self {
        RawRecord {
            timestamp: timestamp.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, column: &str, value: f64) -> Self {
        self.values
            .insert(column.to_string(), serde_json::json!(value));
        self
    }
}
