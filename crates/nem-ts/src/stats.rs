//! Per-field summary statistics over a dataset snapshot.

use std::collections::BTreeMap;

use nem_core::{CellValue, Dataset, Field};

/// Summary of one field over a dataset. `std` is the sample standard
/// deviation (n - 1); empty selections report NaN for the moments.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStatistics {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub sum: f64,
    pub missing_count: usize,
}

/// Summarize the given fields. Suspect and missing cells are excluded by
/// default; `include_flagged` opts suspect values in. Imputed values always
/// participate — they are the declared repair, and remain distinguishable
/// in the dataset itself. Deterministic, no side effects.
pub fn summarize(
    dataset: &Dataset,
    fields: &[Field],
    include_flagged: bool,
) -> BTreeMap<Field, FieldStatistics> {
    let mut out = BTreeMap::new();
    for field in fields {
        let mut values: Vec<f64> = Vec::new();
        let mut missing = 0usize;
        for row in dataset.rows() {
            match row.get(field) {
                Some(CellValue::Genuine(v)) => values.push(*v),
                Some(CellValue::Imputed { value, .. }) => values.push(*value),
                Some(CellValue::Suspect(v)) => {
                    if include_flagged {
                        values.push(*v);
                    }
                }
                Some(CellValue::Missing(_)) => missing += 1,
                // Field not part of this row's observation
                None => {}
            }
        }
        out.insert(*field, field_statistics(&mut values, missing));
    }
    out
}

fn field_statistics(values: &mut Vec<f64>, missing_count: usize) -> FieldStatistics {
    let count = values.len();
    if count == 0 {
        return FieldStatistics {
            count,
            mean: f64::NAN,
            std: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            median: f64::NAN,
            sum: 0.0,
            missing_count,
        };
    }

    let sum: f64 = values.iter().sum();
    let mean = sum / count as f64;
    let std = if count > 1 {
        let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (count - 1) as f64).sqrt()
    } else {
        f64::NAN
    };

    values.sort_by(|a, b| a.total_cmp(b));
    let median = if count % 2 == 1 {
        values[count / 2]
    } else {
        (values[count / 2 - 1] + values[count / 2]) / 2.0
    };

    FieldStatistics {
        count,
        mean,
        std,
        min: values[0],
        max: values[count - 1],
        median,
        sum,
        missing_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset, TimeZone};
    use nem_core::{
        market_offset, DatasetBuilder, GapReason, Region, Resolution, Row, TimeRange,
    };

    fn ts(h: u32, mi: u32) -> DateTime<FixedOffset> {
        market_offset().with_ymd_and_hms(2020, 1, 1, h, mi, 0).unwrap()
    }

    fn dataset_with_demand(cells: &[CellValue]) -> Dataset {
        let range = TimeRange::new(
            ts(0, 0),
            market_offset().with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let mut builder =
            DatasetBuilder::new(Region::Sa, Resolution::ThirtyMinute, range, "test");
        for (i, cell) in cells.iter().enumerate() {
            let at = ts((i / 2) as u32, (i % 2) as u32 * 30);
            match cell {
                CellValue::Missing(reason) => {
                    builder.insert(Row::gap(at, &[Field::Demand], *reason));
                }
                other => {
                    let mut row = Row::observation(at);
                    row.set(Field::Demand, *other);
                    builder.insert(row);
                }
            }
        }
        builder.freeze()
    }

    #[test]
    fn suspect_values_are_excluded_by_default() {
        let dataset = dataset_with_demand(&[
            CellValue::Genuine(100.0),
            CellValue::Genuine(100.0),
            CellValue::Genuine(100.0),
            CellValue::Suspect(999_999.0),
        ]);
        let stats = summarize(&dataset, &[Field::Demand], false);
        let demand = &stats[&Field::Demand];
        assert_eq!(demand.count, 3);
        assert_eq!(demand.mean, 100.0);
        assert_eq!(demand.max, 100.0);
    }

    #[test]
    fn include_flagged_opts_suspects_in() {
        let dataset = dataset_with_demand(&[
            CellValue::Genuine(100.0),
            CellValue::Suspect(300.0),
        ]);
        let stats = summarize(&dataset, &[Field::Demand], true);
        let demand = &stats[&Field::Demand];
        assert_eq!(demand.count, 2);
        assert_eq!(demand.mean, 200.0);
    }

    #[test]
    fn missing_cells_are_counted_not_averaged() {
        let dataset = dataset_with_demand(&[
            CellValue::Genuine(10.0),
            CellValue::Missing(GapReason::SourceError),
            CellValue::Genuine(20.0),
        ]);
        let stats = summarize(&dataset, &[Field::Demand], false);
        let demand = &stats[&Field::Demand];
        assert_eq!(demand.count, 2);
        assert_eq!(demand.missing_count, 1);
        assert_eq!(demand.mean, 15.0);
        assert_eq!(demand.sum, 30.0);
    }

    #[test]
    fn sample_std_and_median_match_hand_calc() {
        let dataset = dataset_with_demand(&[
            CellValue::Genuine(2.0),
            CellValue::Genuine(4.0),
            CellValue::Genuine(4.0),
            CellValue::Genuine(6.0),
        ]);
        let stats = summarize(&dataset, &[Field::Demand], false);
        let demand = &stats[&Field::Demand];
        assert_eq!(demand.median, 4.0);
        // variance = (4 + 0 + 0 + 4) / 3
        assert!((demand.std - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn imputed_values_participate() {
        let dataset = dataset_with_demand(&[
            CellValue::Genuine(10.0),
            CellValue::Imputed {
                value: 20.0,
                strategy: nem_core::ImputeStrategy::ForwardFill,
            },
        ]);
        let stats = summarize(&dataset, &[Field::Demand], false);
        assert_eq!(stats[&Field::Demand].mean, 15.0);
    }

    #[test]
    fn empty_selection_reports_nan() {
        let dataset = dataset_with_demand(&[CellValue::Missing(GapReason::Unknown)]);
        let stats = summarize(&dataset, &[Field::SpotPrice], false);
        let price = &stats[&Field::SpotPrice];
        assert_eq!(price.count, 0);
        assert!(price.mean.is_nan());
    }
}
