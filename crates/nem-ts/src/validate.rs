//! Schema validation of raw provider records.
//!
//! Policy: a record with an unrecoverable fault is dropped and, when its
//! timestamp is still usable, replaced by a source-error gap row. Partial
//! corruption never fails the whole range.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use tracing::{debug, warn};

use nem_core::{
    market_offset, CellValue, DatasetBuilder, Field, GapReason, NemError, NemResult, RawRecord,
    Region, Resolution, Row, TimeRange,
};

/// One dropped raw record and why it was dropped.
#[derive(Debug, Clone)]
pub struct DroppedRecord {
    /// Parsed timestamp when the raw one was usable
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub raw_timestamp: String,
    pub reason: String,
}

/// What the validator accepted, dropped and reordered.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub accepted: usize,
    pub dropped: Vec<DroppedRecord>,
    pub duplicates: usize,
    pub out_of_order: usize,
    /// Provider columns that map to no known field
    pub unknown_columns: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty() && self.duplicates == 0 && self.out_of_order == 0
    }
}

/// Validate raw records into a dataset builder.
///
/// Checks per record: a parseable timestamp on the resolution grid and
/// inside the requested range, the required numeric fields (`demand_mw`,
/// `spot_price`), and coercible values for every recognized column.
/// Duplicated (region, timestamp) keys keep the first record seen.
pub fn validate(
    raw: &[RawRecord],
    region: Region,
    resolution: Resolution,
    range: TimeRange,
    source: &str,
) -> NemResult<(DatasetBuilder, ValidationReport)> {
    if !range.is_aligned(resolution) {
        return Err(NemError::InvalidRange(format!(
            "range {range} is not aligned to the {resolution} grid"
        )));
    }

    let mut builder = DatasetBuilder::new(region, resolution, range, source);
    let mut report = ValidationReport::default();
    let mut last_seen: Option<DateTime<FixedOffset>> = None;

    for record in raw {
        let ts = match parse_timestamp(&record.timestamp) {
            Some(ts) => ts,
            None => {
                drop_record(&mut report, None, record, "unparseable timestamp");
                continue;
            }
        };
        if !resolution.aligns(&ts) {
            drop_record(&mut report, Some(ts), record, "timestamp off the resolution grid");
            continue;
        }
        if !range.contains(&ts) {
            drop_record(&mut report, Some(ts), record, "timestamp outside requested range");
            continue;
        }
        if let Some(last) = last_seen {
            if ts < last {
                // Recoverable: the builder keys rows by timestamp, so the
                // record lands in order anyway.
                report.out_of_order += 1;
                debug!(timestamp = %ts, "raw record out of order");
            }
        }
        last_seen = Some(last_seen.map_or(ts, |last| last.max(ts)));

        match build_row(ts, record, &mut report) {
            Ok(row) => {
                if builder.insert(row) {
                    report.accepted += 1;
                } else {
                    report.duplicates += 1;
                    warn!(timestamp = %ts, "duplicate key dropped");
                }
            }
            Err(reason) => {
                drop_record(&mut report, Some(ts), record, &reason);
                // The fault is the record's, not the grid's: mark the slot
                // as a source error rather than leaving a silent hole.
                builder.insert(Row::gap(
                    ts,
                    &[Field::Demand, Field::SpotPrice],
                    GapReason::SourceError,
                ));
            }
        }
    }

    Ok((builder, report))
}

fn drop_record(
    report: &mut ValidationReport,
    timestamp: Option<DateTime<FixedOffset>>,
    record: &RawRecord,
    reason: &str,
) {
    warn!(raw_timestamp = %record.timestamp, reason, "dropping raw record");
    report.dropped.push(DroppedRecord {
        timestamp,
        raw_timestamp: record.timestamp.clone(),
        reason: reason.to_string(),
    });
}

fn build_row(
    ts: DateTime<FixedOffset>,
    record: &RawRecord,
    report: &mut ValidationReport,
) -> Result<Row, String> {
    let mut row = Row::observation(ts);
    for (column, value) in &record.values {
        let field = match Field::from_column_name(column) {
            Some(field) => field,
            None => {
                if !report.unknown_columns.contains(column) {
                    report.unknown_columns.push(column.clone());
                }
                continue;
            }
        };
        match coerce_number(value) {
            Coerced::Value(v) => row.set(field, CellValue::Genuine(v)),
            Coerced::Absent => {}
            Coerced::Mismatch => {
                return Err(format!("column '{column}' has non-numeric value {value}"));
            }
        }
    }
    for required in [Field::Demand, Field::SpotPrice] {
        if row.get(&required).is_none() {
            return Err(format!("required column '{required}' missing"));
        }
    }
    Ok(row)
}

enum Coerced {
    Value(f64),
    Absent,
    Mismatch,
}

fn coerce_number(value: &serde_json::Value) -> Coerced {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map_or(Coerced::Mismatch, Coerced::Value),
        // Providers occasionally quote numerics; coerce rather than drop
        serde_json::Value::String(s) => s.trim().parse::<f64>().map_or(Coerced::Mismatch, Coerced::Value),
        serde_json::Value::Null => Coerced::Absent,
        _ => Coerced::Mismatch,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&market_offset()));
    }
    // Naive timestamps are market-local by the provider contract
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .and_then(|naive| naive.and_local_timezone(market_offset()).single())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, mi: u32) -> DateTime<FixedOffset> {
        market_offset().with_ymd_and_hms(2020, 1, 1, h, mi, 0).unwrap()
    }

    fn day_range() -> TimeRange {
        TimeRange::new(
            ts(0, 0),
            market_offset().with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn record(stamp: &str, demand: f64, price: f64) -> RawRecord {
        RawRecord::new(stamp)
            .with_value("demand_mw", demand)
            .with_value("spot_price", price)
    }

    #[test]
    fn accepts_clean_records() {
        let raw = vec![
            record("2020-01-01 00:00:00", 1200.0, 55.0),
            record("2020-01-01 00:30:00", 1250.0, 60.0),
        ];
        let (builder, report) =
            validate(&raw, Region::Sa, Resolution::ThirtyMinute, day_range(), "test").unwrap();
        assert_eq!(report.accepted, 2);
        assert!(report.is_clean());
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn bad_value_becomes_source_error_gap_not_abort() {
        let mut broken = RawRecord::new("2020-01-01 00:30:00")
            .with_value("spot_price", 60.0);
        broken
            .values
            .insert("demand_mw".into(), serde_json::json!({"oops": true}));
        let raw = vec![record("2020-01-01 00:00:00", 1200.0, 55.0), broken];
        let (builder, report) =
            validate(&raw, Region::Sa, Resolution::ThirtyMinute, day_range(), "test").unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.dropped.len(), 1);
        let gap = builder
            .rows()
            .find(|row| row.timestamp == ts(0, 30))
            .expect("gap row inserted");
        assert!(gap.is_gap());
        assert_eq!(gap.gap_reason(), Some(GapReason::SourceError));
    }

    #[test]
    fn quoted_numbers_are_coerced() {
        let mut raw = RawRecord::new("2020-01-01 00:00:00").with_value("spot_price", 60.0);
        raw.values
            .insert("demand_mw".into(), serde_json::json!("1234.5"));
        let (builder, report) =
            validate(&[raw], Region::Sa, Resolution::ThirtyMinute, day_range(), "test").unwrap();
        assert_eq!(report.accepted, 1);
        let row = builder.rows().next().unwrap();
        assert_eq!(row.get(&Field::Demand).and_then(CellValue::value), Some(1234.5));
    }

    #[test]
    fn duplicates_keep_first_record() {
        let raw = vec![
            record("2020-01-01 00:00:00", 1200.0, 55.0),
            record("2020-01-01 00:00:00", 9999.0, 99.0),
        ];
        let (builder, report) =
            validate(&raw, Region::Sa, Resolution::ThirtyMinute, day_range(), "test").unwrap();
        assert_eq!(report.duplicates, 1);
        let row = builder.rows().next().unwrap();
        assert_eq!(row.get(&Field::Demand).and_then(CellValue::value), Some(1200.0));
    }

    #[test]
    fn off_grid_and_out_of_range_records_are_dropped() {
        let raw = vec![
            record("2020-01-01 00:07:00", 1200.0, 55.0),
            record("2020-03-01 00:00:00", 1200.0, 55.0),
            record("not a time", 1200.0, 55.0),
        ];
        let (builder, report) =
            validate(&raw, Region::Sa, Resolution::ThirtyMinute, day_range(), "test").unwrap();
        assert_eq!(report.accepted, 0);
        assert_eq!(report.dropped.len(), 3);
        assert!(builder.is_empty());
    }

    #[test]
    fn unaligned_request_range_is_invalid() {
        let range = TimeRange::new(ts(0, 7), ts(12, 7)).unwrap();
        let err = validate(&[], Region::Sa, Resolution::ThirtyMinute, range, "test");
        assert!(matches!(err, Err(NemError::InvalidRange(_))));
    }
}
