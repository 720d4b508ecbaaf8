//! Pipeline configuration.
//!
//! Deployment-dependent thresholds (publication delay, plausible value
//! bounds) are parameters here rather than constants at the use sites.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dataset::ImputeStrategy;
use crate::market::Field;

/// Inclusive plausible bounds for a field's values; observations outside
/// are flagged suspect, never removed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlausibleRange {
    pub min: f64,
    pub max: f64,
}

impl PlausibleRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Longest span the provider accepts per query; longer requests are
    /// split into consecutive chunks
    #[serde(default = "default_max_range_days")]
    pub provider_max_range_days: i64,
    /// Token-bucket rate applied to all outbound provider queries
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Per-column overrides on top of the built-in category defaults,
    /// keyed by storage column name (`demand_mw`, `gen_wind`, ...)
    #[serde(default)]
    pub plausible_ranges: BTreeMap<String, PlausibleRange>,
    #[serde(default = "default_impute_strategy")]
    pub default_impute_strategy: ImputeStrategy,
    /// Comparable same-time samples required before a seasonal mean is
    /// trusted
    #[serde(default = "default_seasonal_min_periods")]
    pub seasonal_min_periods: usize,
    /// Grid points newer than this are assumed simply not yet published
    #[serde(default = "default_publication_delay")]
    pub publication_delay_minutes: i64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
}

fn default_max_range_days() -> i64 {
    7
}

fn default_rate_limit() -> u32 {
    60
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_impute_strategy() -> ImputeStrategy {
    ImputeStrategy::LinearInterpolate
}

fn default_seasonal_min_periods() -> usize {
    4
}

fn default_publication_delay() -> i64 {
    60
}

fn default_request_timeout() -> u64 {
    300
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            provider_max_range_days: default_max_range_days(),
            rate_limit_per_minute: default_rate_limit(),
            retry_max_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            plausible_ranges: BTreeMap::new(),
            default_impute_strategy: default_impute_strategy(),
            seasonal_min_periods: default_seasonal_min_periods(),
            publication_delay_minutes: default_publication_delay(),
            request_timeout_secs: default_request_timeout(),
            storage_root: default_storage_root(),
        }
    }
}

impl PipelineConfig {
    /// Plausible bounds for a field: an explicit per-column override when
    /// configured, else the built-in default for the field's category.
    pub fn plausible_range_for(&self, field: &Field) -> PlausibleRange {
        if let Some(range) = self.plausible_ranges.get(&field.column_name()) {
            return *range;
        }
        match field {
            Field::Demand => PlausibleRange {
                min: 0.0,
                max: 20_000.0,
            },
            // Charging batteries and pumping hydro report negative output
            Field::Generation(_) => PlausibleRange {
                min: -2_000.0,
                max: 16_000.0,
            },
            Field::SpotPrice => PlausibleRange {
                min: -1_000.0,
                max: 15_000.0,
            },
            Field::Temperature => PlausibleRange {
                min: -20.0,
                max: 55.0,
            },
        }
    }
}

pub fn load_config_from_path(path: &Path) -> Result<PipelineConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading pipeline config '{}'", path.display()))?;
    serde_json::from_str(&data).context("parsing pipeline config json")
}
