//! Tabular views of a dataset.
//!
//! [`storage_frame`] is the full persistence schema; [`view_frame`] is the
//! narrow timestamp-plus-fields table handed to the plotting sink and other
//! external consumers.

use anyhow::{Context, Result};
use polars::prelude::*;

use nem_core::{Dataset, Field, Row};

/// Full storage schema: timestamp, every known value column, and the
/// annotation columns that keep genuine, synthesized and missing data
/// distinguishable after a round-trip.
pub fn storage_frame(rows: &[Row]) -> Result<DataFrame> {
    let timestamps: Vec<String> = rows.iter().map(|row| row.timestamp.to_rfc3339()).collect();

    let mut columns = vec![Series::new("timestamp", timestamps)];
    for field in Field::all() {
        let values: Vec<Option<f64>> = rows
            .iter()
            .map(|row| row.get(&field).and_then(|cell| cell.value()))
            .collect();
        columns.push(Series::new(&field.column_name(), values));
    }

    let is_imputed: Vec<bool> = rows.iter().map(Row::is_imputed).collect();
    let strategies: Vec<Option<&str>> = rows
        .iter()
        .map(|row| row.imputation_strategy().map(|s| s.as_str()))
        .collect();
    let is_suspect: Vec<bool> = rows.iter().map(Row::is_suspect).collect();
    let gap_reasons: Vec<Option<&str>> = rows
        .iter()
        .map(|row| row.gap_reason().map(|r| r.as_str()))
        .collect();

    columns.push(Series::new("is_imputed", is_imputed));
    columns.push(Series::new("imputation_strategy", strategies));
    columns.push(Series::new("is_suspect", is_suspect));
    columns.push(Series::new("gap_reason", gap_reasons));

    DataFrame::new(columns).context("building storage frame")
}

/// Timestamp plus the selected field columns, one row per grid point.
/// Suspect and imputed values appear as plain values here; callers that
/// need the annotations use the dataset itself.
pub fn view_frame(dataset: &Dataset, fields: &[Field]) -> Result<DataFrame> {
    let timestamps: Vec<String> = dataset
        .rows()
        .iter()
        .map(|row| row.timestamp.to_rfc3339())
        .collect();

    let mut columns = vec![Series::new("timestamp", timestamps)];
    for field in fields {
        let values: Vec<Option<f64>> = dataset
            .rows()
            .iter()
            .map(|row| row.get(field).and_then(|cell| cell.value()))
            .collect();
        columns.push(Series::new(&field.column_name(), values));
    }

    DataFrame::new(columns).context("building view frame")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nem_core::{
        market_offset, CellValue, DatasetBuilder, GapReason, ImputeStrategy, Region, Resolution,
        TimeRange,
    };

    fn sample_dataset() -> Dataset {
        let offset = market_offset();
        let range = TimeRange::new(
            offset.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            offset.with_ymd_and_hms(2020, 1, 1, 1, 30, 0).unwrap(),
        )
        .unwrap();
        let mut builder =
            DatasetBuilder::new(Region::Sa, Resolution::ThirtyMinute, range, "test");
        let mut row = Row::observation(offset.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        row.set(Field::Demand, CellValue::Genuine(1000.0));
        row.set(Field::SpotPrice, CellValue::Genuine(50.0));
        builder.insert(row);
        let mut row = Row::observation(offset.with_ymd_and_hms(2020, 1, 1, 0, 30, 0).unwrap());
        row.set(
            Field::Demand,
            CellValue::Imputed {
                value: 1010.0,
                strategy: ImputeStrategy::ForwardFill,
            },
        );
        row.set(Field::SpotPrice, CellValue::Suspect(90_000.0));
        builder.insert(row);
        builder.insert(Row::gap(
            offset.with_ymd_and_hms(2020, 1, 1, 1, 0, 0).unwrap(),
            &[Field::Demand, Field::SpotPrice],
            GapReason::SourceError,
        ));
        builder.freeze()
    }

    #[test]
    fn storage_frame_has_full_schema() {
        let dataset = sample_dataset();
        let df = storage_frame(dataset.rows()).unwrap();
        assert_eq!(df.height(), 3);
        // timestamp + all fields + four annotation columns
        assert_eq!(df.width(), 1 + Field::all().len() + 4);
        let imputed = df.column("is_imputed").unwrap().bool().unwrap();
        assert_eq!(imputed.get(1), Some(true));
        let reasons = df.column("gap_reason").unwrap().utf8().unwrap();
        assert_eq!(reasons.get(2), Some("source_error"));
    }

    #[test]
    fn view_frame_selects_fields_and_keeps_values() {
        let dataset = sample_dataset();
        let df = view_frame(&dataset, &[Field::Demand]).unwrap();
        assert_eq!(df.width(), 2);
        let demand = df.column("demand_mw").unwrap().f64().unwrap();
        assert_eq!(demand.get(0), Some(1000.0));
        assert_eq!(demand.get(1), Some(1010.0));
        assert_eq!(demand.get(2), None);
    }
}
