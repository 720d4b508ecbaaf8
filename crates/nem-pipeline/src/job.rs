//! Collection requests and per-sub-range outcome records.

use serde::{Deserialize, Serialize};

use nem_core::{Dataset, ImputeStrategy, Region, Resolution, TimeRange};

/// One collection request: a region and range at a resolution, with the
/// strategy used to repair whatever gaps survive detection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CollectRequest {
    pub region: Region,
    pub range: TimeRange,
    pub resolution: Resolution,
    pub strategy: ImputeStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubRangeStatus {
    /// Everything fetched, validated and (where needed) repaired
    Ok,
    /// Persisted, but with dropped records or unresolved gaps
    Partial,
    /// Nothing persisted for this sub-range
    Failed,
}

impl SubRangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubRangeStatus::Ok => "ok",
            SubRangeStatus::Partial => "partial",
            SubRangeStatus::Failed => "failed",
        }
    }
}

/// Outcome of one provider-sized sub-range within a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubRangeRecord {
    pub range: TimeRange,
    pub status: SubRangeStatus,
    pub rows: usize,
    pub dropped: usize,
    pub gaps_detected: usize,
    pub suspects_flagged: usize,
    pub imputed: usize,
    pub unresolved_gaps: usize,
    pub error: Option<String>,
}

impl SubRangeRecord {
    pub fn failed(range: TimeRange, error: String) -> Self {
        SubRangeRecord {
            range,
            status: SubRangeStatus::Failed,
            rows: 0,
            dropped: 0,
            gaps_detected: 0,
            suspects_flagged: 0,
            imputed: 0,
            unresolved_gaps: 0,
            error: Some(error),
        }
    }
}

/// Aggregate result of a collect call: the merged dataset plus the
/// per-sub-range records — never an all-or-nothing answer.
#[derive(Debug)]
pub struct CollectOutcome {
    pub dataset: Dataset,
    pub records: Vec<SubRangeRecord>,
}

impl CollectOutcome {
    pub fn succeeded(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.status == SubRangeStatus::Ok)
            .count()
    }

    pub fn partial(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.status == SubRangeStatus::Partial)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.status == SubRangeStatus::Failed)
            .count()
    }
}
