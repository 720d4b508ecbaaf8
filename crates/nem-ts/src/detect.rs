//! Gap and anomaly detection over the expected observation grid.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use nem_core::{CellValue, DatasetBuilder, Field, GapReason, PipelineConfig, Row};

/// What the detector inserted and flagged.
#[derive(Debug, Clone, Default)]
pub struct DetectReport {
    pub gaps_inserted: usize,
    pub not_yet_published: usize,
    pub source_errors: usize,
    pub suspects_flagged: usize,
}

/// Walk the expected grid for the builder's range, inserting a gap row for
/// every absent point, then flag genuine values outside their plausible
/// range as suspect.
///
/// Points newer than `now - publication_delay_minutes` are assumed simply
/// not yet published; older holes are the source's fault. `now` is injected
/// so the split is deterministic under test.
pub fn detect(
    builder: &mut DatasetBuilder,
    config: &PipelineConfig,
    now: DateTime<Utc>,
) -> DetectReport {
    let mut report = DetectReport::default();

    let mut fields = builder.observed_fields();
    if fields.is_empty() {
        // Nothing arrived at all; the gap rows still need a schema
        fields = vec![Field::Demand, Field::SpotPrice];
    }
    let horizon = now - Duration::minutes(config.publication_delay_minutes);

    let grid: Vec<_> = builder.range.grid(builder.resolution).collect();
    for ts in grid {
        if builder.contains(&ts) {
            continue;
        }
        let reason = if ts.with_timezone(&Utc) > horizon {
            report.not_yet_published += 1;
            GapReason::NotYetPublished
        } else {
            report.source_errors += 1;
            GapReason::SourceError
        };
        debug!(timestamp = %ts, reason = %reason, "grid point missing from source");
        builder.insert(Row::gap(ts, &fields, reason));
        report.gaps_inserted += 1;
    }

    for row in builder.rows_mut() {
        for (field, cell) in row.cells.iter_mut() {
            if let CellValue::Genuine(value) = *cell {
                let bounds = config.plausible_range_for(field);
                if !bounds.contains(value) {
                    warn!(
                        timestamp = %row.timestamp,
                        field = %field,
                        value,
                        "value outside plausible range, flagging suspect"
                    );
                    *cell = CellValue::Suspect(value);
                    report.suspects_flagged += 1;
                }
            }
        }
    }

    report
}
