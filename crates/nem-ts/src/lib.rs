//! In-memory time-series stages of the pipeline: schema validation, gap and
//! anomaly detection, imputation, and summary statistics.
//!
//! Every stage operates on a [`nem_core::DatasetBuilder`] (the mutable
//! accumulation phase) and reports what it changed; nothing here touches
//! the network or the filesystem.

pub mod detect;
pub mod impute;
pub mod stats;
pub mod validate;

pub use detect::{detect, DetectReport};
pub use impute::{impute, require_complete, ImputeSummary, UnresolvedGap};
pub use stats::{summarize, FieldStatistics};
pub use validate::{validate, DroppedRecord, ValidationReport};
