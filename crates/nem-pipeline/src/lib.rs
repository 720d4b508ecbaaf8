//! Pipeline orchestrator: composes fetch → validate → detect → impute →
//! store per provider-sized sub-range, continues past sub-range failures,
//! and fans independent requests out over a thread pool.

pub mod job;
pub mod manifest;
pub mod runner;

pub use job::{CollectOutcome, CollectRequest, SubRangeRecord, SubRangeStatus};
pub use manifest::{write_collect_manifest, CollectManifest};
pub use runner::Pipeline;
