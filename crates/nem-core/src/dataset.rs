//! Tagged dataset cells and the mutable-then-frozen dataset lifecycle.
//!
//! A [`DatasetBuilder`] is the mutable accumulation stage the validator,
//! detector and imputer operate on. [`DatasetBuilder::freeze`] produces an
//! immutable [`Dataset`] that is handed to storage and every downstream
//! consumer; [`Dataset::thaw`] reopens a loaded dataset when a caller wants
//! to impute it further.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NemError;
use crate::market::{Field, Region, Resolution, TimeRange};

/// Why a grid point has no genuine observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    /// Newer than the provider's typical publication delay
    NotYetPublished,
    /// The source should have published this point and did not, or the
    /// record it published could not be salvaged
    SourceError,
    Unknown,
}

impl GapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapReason::NotYetPublished => "not_yet_published",
            GapReason::SourceError => "source_error",
            GapReason::Unknown => "unknown",
        }
    }
}

impl FromStr for GapReason {
    type Err = NemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_yet_published" => Ok(GapReason::NotYetPublished),
            "source_error" => Ok(GapReason::SourceError),
            "unknown" => Ok(GapReason::Unknown),
            other => Err(NemError::Validation(format!("unknown gap reason '{other}'"))),
        }
    }
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gap repair strategies. Every substituted value is tagged with the
/// strategy that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeStrategy {
    /// Leave gaps in place; callers handle them downstream
    None,
    /// Carry the last known value forward
    ForwardFill,
    /// Midpoint-weighted interpolation between the neighbouring values
    LinearInterpolate,
    /// Mean of the same time-of-day across the other days of the dataset
    SeasonalMean,
}

impl ImputeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImputeStrategy::None => "none",
            ImputeStrategy::ForwardFill => "forward_fill",
            ImputeStrategy::LinearInterpolate => "linear_interpolate",
            ImputeStrategy::SeasonalMean => "seasonal_mean",
        }
    }
}

impl FromStr for ImputeStrategy {
    type Err = NemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ImputeStrategy::None),
            "forward_fill" => Ok(ImputeStrategy::ForwardFill),
            "linear_interpolate" => Ok(ImputeStrategy::LinearInterpolate),
            "seasonal_mean" => Ok(ImputeStrategy::SeasonalMean),
            other => Err(NemError::Validation(format!(
                "unknown imputation strategy '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ImputeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one (timestamp, field) cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellValue {
    Genuine(f64),
    /// Present but outside the plausible range; retained, excluded from
    /// default statistics
    Suspect(f64),
    Imputed { value: f64, strategy: ImputeStrategy },
    Missing(GapReason),
}

impl CellValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            CellValue::Genuine(v) | CellValue::Suspect(v) => Some(*v),
            CellValue::Imputed { value, .. } => Some(*value),
            CellValue::Missing(_) => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing(_))
    }

    pub fn is_suspect(&self) -> bool {
        matches!(self, CellValue::Suspect(_))
    }

    pub fn is_imputed(&self) -> bool {
        matches!(self, CellValue::Imputed { .. })
    }
}

/// One grid timestamp with its per-field cells. A field absent from the map
/// was never part of this observation (e.g. a fuel the region does not
/// run); that is distinct from [`CellValue::Missing`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: DateTime<FixedOffset>,
    pub cells: BTreeMap<Field, CellValue>,
}

impl Row {
    pub fn observation(timestamp: DateTime<FixedOffset>) -> Self {
        Row {
            timestamp,
            cells: BTreeMap::new(),
        }
    }

    /// A row for a grid point the source never delivered: every field in
    /// the dataset's observed schema marked missing with the same reason.
    pub fn gap(timestamp: DateTime<FixedOffset>, fields: &[Field], reason: GapReason) -> Self {
        let cells = fields
            .iter()
            .map(|field| (*field, CellValue::Missing(reason)))
            .collect();
        Row { timestamp, cells }
    }

    pub fn set(&mut self, field: Field, cell: CellValue) {
        self.cells.insert(field, cell);
    }

    pub fn get(&self, field: &Field) -> Option<&CellValue> {
        self.cells.get(field)
    }

    pub fn is_gap(&self) -> bool {
        !self.cells.is_empty() && self.cells.values().all(CellValue::is_missing)
    }

    pub fn is_imputed(&self) -> bool {
        self.cells.values().any(CellValue::is_imputed)
    }

    pub fn is_suspect(&self) -> bool {
        self.cells.values().any(CellValue::is_suspect)
    }

    pub fn has_missing(&self) -> bool {
        self.cells.values().any(CellValue::is_missing)
    }

    pub fn gap_reason(&self) -> Option<GapReason> {
        self.cells.values().find_map(|cell| match cell {
            CellValue::Missing(reason) => Some(*reason),
            _ => None,
        })
    }

    /// Strategy tag when every imputed cell agrees (the common whole-row
    /// case produced by a single impute pass).
    pub fn imputation_strategy(&self) -> Option<ImputeStrategy> {
        self.cells.values().find_map(|cell| match cell {
            CellValue::Imputed { strategy, .. } => Some(*strategy),
            _ => None,
        })
    }
}

/// Mutable accumulation stage of a dataset. Rows are keyed by timestamp so
/// the (region, timestamp) uniqueness invariant holds by construction.
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    pub region: Region,
    pub resolution: Resolution,
    pub range: TimeRange,
    pub source: String,
    pub retrieved_at: DateTime<Utc>,
    rows: BTreeMap<DateTime<FixedOffset>, Row>,
}

impl DatasetBuilder {
    pub fn new(
        region: Region,
        resolution: Resolution,
        range: TimeRange,
        source: impl Into<String>,
    ) -> Self {
        DatasetBuilder {
            region,
            resolution,
            range,
            source: source.into(),
            retrieved_at: Utc::now(),
            rows: BTreeMap::new(),
        }
    }

    /// Insert a row; returns false (leaving the existing row in place) when
    /// the timestamp is already occupied.
    pub fn insert(&mut self, row: Row) -> bool {
        if self.rows.contains_key(&row.timestamp) {
            return false;
        }
        self.rows.insert(row.timestamp, row);
        true
    }

    pub fn contains(&self, ts: &DateTime<FixedOffset>) -> bool {
        self.rows.contains_key(ts)
    }

    pub fn row(&self, ts: &DateTime<FixedOffset>) -> Option<&Row> {
        self.rows.get(ts)
    }

    pub fn row_mut(&mut self, ts: &DateTime<FixedOffset>) -> Option<&mut Row> {
        self.rows.get_mut(ts)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut Row> {
        self.rows.values_mut()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of fields observed across all rows, in column order.
    pub fn observed_fields(&self) -> Vec<Field> {
        let mut fields: Vec<Field> = self
            .rows
            .values()
            .flat_map(|row| row.cells.keys().copied())
            .collect();
        fields.sort();
        fields.dedup();
        fields
    }

    /// Freeze into an immutable, timestamp-ordered dataset.
    pub fn freeze(self) -> Dataset {
        Dataset {
            region: self.region,
            resolution: self.resolution,
            range: self.range,
            source: self.source,
            retrieved_at: self.retrieved_at,
            rows: self.rows.into_values().collect(),
        }
    }
}

/// Immutable, validated dataset: strictly timestamp-ordered rows for one
/// region over one requested range, plus retrieval provenance.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub region: Region,
    pub resolution: Resolution,
    pub range: TimeRange,
    pub source: String,
    pub retrieved_at: DateTime<Utc>,
    rows: Vec<Row>,
}

impl Dataset {
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn observed_fields(&self) -> Vec<Field> {
        let mut fields: Vec<Field> = self
            .rows
            .iter()
            .flat_map(|row| row.cells.keys().copied())
            .collect();
        fields.sort();
        fields.dedup();
        fields
    }

    pub fn gap_count(&self) -> usize {
        self.rows.iter().filter(|row| row.is_gap()).count()
    }

    pub fn imputed_count(&self) -> usize {
        self.rows.iter().filter(|row| row.is_imputed()).count()
    }

    pub fn suspect_count(&self) -> usize {
        self.rows.iter().filter(|row| row.is_suspect()).count()
    }

    /// Reopen for further mutation (e.g. imputing a loaded dataset).
    pub fn thaw(self) -> DatasetBuilder {
        DatasetBuilder {
            region: self.region,
            resolution: self.resolution,
            range: self.range,
            source: self.source,
            retrieved_at: self.retrieved_at,
            rows: self
                .rows
                .into_iter()
                .map(|row| (row.timestamp, row))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::market_offset;
    use chrono::TimeZone;

    fn ts(h: u32, mi: u32) -> DateTime<FixedOffset> {
        market_offset().with_ymd_and_hms(2020, 1, 1, h, mi, 0).unwrap()
    }

    fn day_range() -> TimeRange {
        TimeRange::new(ts(0, 0), market_offset().with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap())
            .unwrap()
    }

    #[test]
    fn duplicate_timestamps_are_rejected() {
        let mut builder =
            DatasetBuilder::new(Region::Sa, Resolution::ThirtyMinute, day_range(), "test");
        let mut row = Row::observation(ts(0, 0));
        row.set(Field::Demand, CellValue::Genuine(1000.0));
        assert!(builder.insert(row.clone()));
        assert!(!builder.insert(row));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn freeze_orders_rows_by_timestamp() {
        let mut builder =
            DatasetBuilder::new(Region::Sa, Resolution::ThirtyMinute, day_range(), "test");
        for h in [3u32, 1, 2] {
            let mut row = Row::observation(ts(h, 0));
            row.set(Field::Demand, CellValue::Genuine(f64::from(h)));
            builder.insert(row);
        }
        let dataset = builder.freeze();
        let stamps: Vec<_> = dataset.rows().iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![ts(1, 0), ts(2, 0), ts(3, 0)]);
    }

    #[test]
    fn gap_rows_report_reason_and_state() {
        let fields = [Field::Demand, Field::SpotPrice];
        let row = Row::gap(ts(12, 0), &fields, GapReason::SourceError);
        assert!(row.is_gap());
        assert!(!row.is_imputed());
        assert_eq!(row.gap_reason(), Some(GapReason::SourceError));
    }

    #[test]
    fn imputed_cells_are_never_conflated_with_genuine() {
        let mut row = Row::observation(ts(12, 0));
        row.set(
            Field::Demand,
            CellValue::Imputed {
                value: 1500.0,
                strategy: ImputeStrategy::ForwardFill,
            },
        );
        assert!(row.is_imputed());
        assert_eq!(row.imputation_strategy(), Some(ImputeStrategy::ForwardFill));
        assert_eq!(row.get(&Field::Demand).and_then(CellValue::value), Some(1500.0));
    }

    #[test]
    fn thaw_round_trips_rows() {
        let mut builder =
            DatasetBuilder::new(Region::Sa, Resolution::ThirtyMinute, day_range(), "test");
        let mut row = Row::observation(ts(0, 30));
        row.set(Field::SpotPrice, CellValue::Suspect(99000.0));
        builder.insert(row);
        let dataset = builder.freeze();
        let rows: Vec<Row> = dataset.rows().to_vec();
        let thawed = dataset.thaw().freeze();
        assert_eq!(thawed.rows(), rows.as_slice());
    }
}
