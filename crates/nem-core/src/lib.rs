//! # nem-core: NEM Telemetry Domain Model
//!
//! Fundamental types for the wholesale electricity market data pipeline:
//! regions, fuel technologies, the observation grid, tagged dataset cells,
//! and the mutable-then-frozen [`Dataset`] lifecycle.
//!
//! The central design decision is that every dataset cell carries an
//! explicit state rather than a sentinel value:
//!
//! - [`CellValue::Genuine`] — an observation as published by the provider
//! - [`CellValue::Suspect`] — present but outside its plausible range
//! - [`CellValue::Imputed`] — synthesized by a declared strategy
//! - [`CellValue::Missing`] — a grid point the source never delivered
//!
//! Downstream consumers can always reconstruct what is genuine, repaired,
//! or absent; nothing is patched silently.

pub mod config;
pub mod dataset;
pub mod error;
pub mod market;
pub mod raw;

pub use config::{load_config_from_path, PipelineConfig, PlausibleRange};
pub use dataset::{
    CellValue, Dataset, DatasetBuilder, GapReason, ImputeStrategy, Row,
};
pub use error::{NemError, NemResult};
pub use raw::RawRecord;
pub use market::{market_offset, Field, FuelType, Region, Resolution, TimeRange};
