//! Gap imputation strategies.
//!
//! Strategies are pure functions of the surrounding data. Every filled cell
//! is tagged [`CellValue::Imputed`] with its originating strategy, and gaps
//! a strategy cannot fill are reported per cell rather than failing the
//! dataset.

use chrono::{DateTime, FixedOffset, Timelike};
use tracing::debug;

use nem_core::{
    CellValue, DatasetBuilder, Field, ImputeStrategy, NemError, NemResult,
};

/// Outcome of one impute pass.
#[derive(Debug, Clone, Default)]
pub struct ImputeSummary {
    pub strategy: Option<ImputeStrategy>,
    pub filled: usize,
    pub unresolved: Vec<UnresolvedGap>,
}

/// A missing cell the strategy could not fill, with the reason.
#[derive(Debug, Clone)]
pub struct UnresolvedGap {
    pub timestamp: DateTime<FixedOffset>,
    pub field: Field,
    pub reason: String,
}

/// Escalate unresolved gaps into an error, for callers that asked for a
/// complete dataset.
pub fn require_complete(summary: &ImputeSummary) -> NemResult<()> {
    match summary.unresolved.first() {
        None => Ok(()),
        Some(first) => Err(NemError::InsufficientHistory(format!(
            "{} gaps unresolved; first: {} at {} ({})",
            summary.unresolved.len(),
            first.field,
            first.timestamp,
            first.reason
        ))),
    }
}

/// Fill missing cells with the selected strategy.
///
/// `min_periods` bounds the seasonal mean: at least that many same-time
/// samples must exist elsewhere in the dataset before a mean is trusted.
pub fn impute(
    builder: &mut DatasetBuilder,
    strategy: ImputeStrategy,
    min_periods: usize,
) -> ImputeSummary {
    let mut summary = ImputeSummary {
        strategy: Some(strategy),
        ..ImputeSummary::default()
    };
    if strategy == ImputeStrategy::None {
        return summary;
    }

    let timestamps: Vec<DateTime<FixedOffset>> =
        builder.rows().map(|row| row.timestamp).collect();

    for field in builder.observed_fields() {
        let slots: Vec<Slot> = timestamps
            .iter()
            .map(|ts| {
                match builder.row(ts).and_then(|row| row.get(&field).copied()) {
                    None => Slot::Absent,
                    Some(CellValue::Missing(_)) => Slot::Gap,
                    Some(cell) => match cell.value() {
                        Some(v) => Slot::Known(v),
                        None => Slot::Gap,
                    },
                }
            })
            .collect();

        let fills = match strategy {
            ImputeStrategy::None => Vec::new(),
            ImputeStrategy::ForwardFill => forward_fill(&slots),
            ImputeStrategy::LinearInterpolate => linear_interpolate(&slots, &timestamps),
            ImputeStrategy::SeasonalMean => seasonal_mean(&slots, &timestamps, min_periods),
        };

        for (index, outcome) in fills {
            let ts = timestamps[index];
            match outcome {
                Ok(value) => {
                    if let Some(row) = builder.row_mut(&ts) {
                        row.set(field, CellValue::Imputed { value, strategy });
                        summary.filled += 1;
                        debug!(timestamp = %ts, field = %field, value, strategy = %strategy, "gap filled");
                    }
                }
                Err(reason) => summary.unresolved.push(UnresolvedGap {
                    timestamp: ts,
                    field,
                    reason,
                }),
            }
        }
    }

    summary
}

#[derive(Clone, Copy)]
enum Slot {
    /// Field not part of this row's observation; not a gap
    Absent,
    Known(f64),
    Gap,
}

type Fill = (usize, Result<f64, String>);

fn forward_fill(slots: &[Slot]) -> Vec<Fill> {
    let mut fills = Vec::new();
    let mut last: Option<f64> = None;
    for (index, slot) in slots.iter().enumerate() {
        match slot {
            Slot::Known(v) => last = Some(*v),
            Slot::Gap => match last {
                Some(v) => {
                    fills.push((index, Ok(v)));
                    // Carried values seed later gaps in the same run
                    last = Some(v);
                }
                None => fills.push((index, Err("no preceding value in dataset".into()))),
            },
            Slot::Absent => {}
        }
    }
    fills
}

fn linear_interpolate(slots: &[Slot], timestamps: &[DateTime<FixedOffset>]) -> Vec<Fill> {
    // Nearest known neighbour on each side of every slot, by index.
    let mut prev_known: Vec<Option<usize>> = Vec::with_capacity(slots.len());
    let mut last = None;
    for (index, slot) in slots.iter().enumerate() {
        prev_known.push(last);
        if matches!(slot, Slot::Known(_)) {
            last = Some(index);
        }
    }
    let mut next_known: Vec<Option<usize>> = vec![None; slots.len()];
    let mut next = None;
    for index in (0..slots.len()).rev() {
        next_known[index] = next;
        if matches!(slots[index], Slot::Known(_)) {
            next = Some(index);
        }
    }

    let known = |index: usize| match slots[index] {
        Slot::Known(v) => v,
        _ => f64::NAN,
    };

    let mut fills = Vec::new();
    for (index, slot) in slots.iter().enumerate() {
        if !matches!(slot, Slot::Gap) {
            continue;
        }
        match (prev_known[index], next_known[index]) {
            (Some(p), Some(n)) => {
                let (v0, v1) = (known(p), known(n));
                let span = (timestamps[n] - timestamps[p]).num_seconds() as f64;
                let offset = (timestamps[index] - timestamps[p]).num_seconds() as f64;
                fills.push((index, Ok(v0 + (v1 - v0) * offset / span)));
            }
            // Boundary gaps stay unresolved; interpolation needs both sides
            (None, _) => fills.push((index, Err("gap at dataset start".into()))),
            (_, None) => fills.push((index, Err("gap at dataset end".into()))),
        }
    }
    fills
}

fn seasonal_mean(
    slots: &[Slot],
    timestamps: &[DateTime<FixedOffset>],
    min_periods: usize,
) -> Vec<Fill> {
    use std::collections::BTreeMap;

    let mut samples: BTreeMap<(u32, u32), (f64, usize)> = BTreeMap::new();
    for (index, slot) in slots.iter().enumerate() {
        if let Slot::Known(v) = slot {
            let key = time_of_day(&timestamps[index]);
            let entry = samples.entry(key).or_insert((0.0, 0));
            entry.0 += v;
            entry.1 += 1;
        }
    }

    let mut fills = Vec::new();
    for (index, slot) in slots.iter().enumerate() {
        if !matches!(slot, Slot::Gap) {
            continue;
        }
        let key = time_of_day(&timestamps[index]);
        match samples.get(&key) {
            Some((sum, count)) if *count >= min_periods => {
                fills.push((index, Ok(sum / *count as f64)));
            }
            Some((_, count)) => fills.push((
                index,
                Err(format!(
                    "only {count} comparable same-time samples (need {min_periods})"
                )),
            )),
            None => fills.push((
                index,
                Err(format!(
                    "no comparable same-time samples (need {min_periods})"
                )),
            )),
        }
    }
    fills
}

fn time_of_day(ts: &DateTime<FixedOffset>) -> (u32, u32) {
    (ts.hour(), ts.minute())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nem_core::{market_offset, GapReason, Region, Resolution, Row, TimeRange};

    fn ts(d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
        market_offset().with_ymd_and_hms(2020, 1, d, h, mi, 0).unwrap()
    }

    fn builder(days: u32) -> DatasetBuilder {
        let range = TimeRange::new(ts(1, 0, 0), ts(1 + days, 0, 0)).unwrap();
        DatasetBuilder::new(Region::Sa, Resolution::ThirtyMinute, range, "test")
    }

    fn insert_demand(builder: &mut DatasetBuilder, at: DateTime<FixedOffset>, value: f64) {
        let mut row = Row::observation(at);
        row.set(Field::Demand, CellValue::Genuine(value));
        builder.insert(row);
    }

    fn insert_gap(builder: &mut DatasetBuilder, at: DateTime<FixedOffset>) {
        builder.insert(Row::gap(at, &[Field::Demand], GapReason::SourceError));
    }

    fn demand_at(builder: &DatasetBuilder, at: DateTime<FixedOffset>) -> CellValue {
        *builder
            .rows()
            .find(|row| row.timestamp == at)
            .and_then(|row| row.get(&Field::Demand))
            .expect("row exists")
    }

    #[test]
    fn linear_interpolation_hits_the_midpoint() {
        let mut b = builder(1);
        insert_demand(&mut b, ts(1, 0, 0), 10.0);
        insert_gap(&mut b, ts(1, 0, 30));
        insert_demand(&mut b, ts(1, 1, 0), 20.0);
        let summary = impute(&mut b, ImputeStrategy::LinearInterpolate, 4);
        assert_eq!(summary.filled, 1);
        assert!(summary.unresolved.is_empty());
        assert_eq!(
            demand_at(&b, ts(1, 0, 30)),
            CellValue::Imputed {
                value: 15.0,
                strategy: ImputeStrategy::LinearInterpolate
            }
        );
    }

    #[test]
    fn linear_interpolation_leaves_boundary_gaps() {
        let mut b = builder(1);
        insert_gap(&mut b, ts(1, 0, 0));
        insert_demand(&mut b, ts(1, 0, 30), 20.0);
        let summary = impute(&mut b, ImputeStrategy::LinearInterpolate, 4);
        assert_eq!(summary.filled, 0);
        assert_eq!(summary.unresolved.len(), 1);
        assert!(require_complete(&summary).is_err());
        assert!(demand_at(&b, ts(1, 0, 0)).is_missing());
    }

    #[test]
    fn forward_fill_is_idempotent() {
        let mut b = builder(1);
        insert_demand(&mut b, ts(1, 0, 0), 100.0);
        insert_gap(&mut b, ts(1, 0, 30));
        insert_gap(&mut b, ts(1, 1, 0));
        let first = impute(&mut b, ImputeStrategy::ForwardFill, 4);
        assert_eq!(first.filled, 2);
        assert_eq!(demand_at(&b, ts(1, 1, 0)).value(), Some(100.0));

        let snapshot: Vec<Row> = b.rows().cloned().collect();
        let second = impute(&mut b, ImputeStrategy::ForwardFill, 4);
        assert_eq!(second.filled, 0);
        assert!(second.unresolved.is_empty());
        let after: Vec<Row> = b.rows().cloned().collect();
        assert_eq!(snapshot, after);
    }

    #[test]
    fn forward_fill_without_history_is_unresolved() {
        let mut b = builder(1);
        insert_gap(&mut b, ts(1, 0, 0));
        insert_demand(&mut b, ts(1, 0, 30), 100.0);
        let summary = impute(&mut b, ImputeStrategy::ForwardFill, 4);
        assert_eq!(summary.filled, 0);
        assert_eq!(summary.unresolved.len(), 1);
        assert!(summary.unresolved[0].reason.contains("no preceding value"));
    }

    #[test]
    fn seasonal_mean_uses_same_time_of_day() {
        let mut b = builder(5);
        // Five days of noon observations, one of them missing
        for (day, value) in [(1u32, 100.0), (2, 110.0), (3, 120.0), (4, 130.0)] {
            insert_demand(&mut b, ts(day, 12, 0), value);
        }
        insert_gap(&mut b, ts(5, 12, 0));
        let summary = impute(&mut b, ImputeStrategy::SeasonalMean, 4);
        assert_eq!(summary.filled, 1);
        assert_eq!(
            demand_at(&b, ts(5, 12, 0)),
            CellValue::Imputed {
                value: 115.0,
                strategy: ImputeStrategy::SeasonalMean
            }
        );
    }

    #[test]
    fn seasonal_mean_needs_min_periods() {
        let mut b = builder(3);
        insert_demand(&mut b, ts(1, 12, 0), 100.0);
        insert_demand(&mut b, ts(2, 12, 0), 110.0);
        insert_gap(&mut b, ts(3, 12, 0));
        let summary = impute(&mut b, ImputeStrategy::SeasonalMean, 4);
        assert_eq!(summary.filled, 0);
        assert_eq!(summary.unresolved.len(), 1);
        assert!(summary.unresolved[0].reason.contains("only 2"));
    }

    #[test]
    fn none_strategy_leaves_gaps_untouched() {
        let mut b = builder(1);
        insert_gap(&mut b, ts(1, 0, 0));
        let summary = impute(&mut b, ImputeStrategy::None, 4);
        assert_eq!(summary.filled, 0);
        assert!(summary.unresolved.is_empty());
        assert!(demand_at(&b, ts(1, 0, 0)).is_missing());
    }
}
