//! Local tabular store: one CSV per (region, resolution) pair.
//!
//! Writes go to a staging file and are renamed into place, so a stored file
//! is never observed partially written. Saves merge by range — rows inside
//! the dataset's range are replaced, rows outside are preserved — which
//! makes saving the same range twice an overwrite rather than a duplicate.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::DateTime;
use parking_lot::Mutex;
use polars::prelude::*;
use tracing::info;

use nem_core::{
    market_offset, CellValue, Dataset, DatasetBuilder, Field, GapReason, ImputeStrategy, NemError,
    NemResult, PipelineConfig, Region, Resolution, Row, TimeRange,
};

use crate::frame::storage_frame;

/// Result of a load: either the full requested range was covered, or only
/// part of it, with the uncovered sub-ranges listed so the caller can decide
/// whether to re-fetch.
#[derive(Debug)]
pub enum LoadOutcome {
    Complete(Dataset),
    Partial {
        dataset: Dataset,
        missing: Vec<TimeRange>,
    },
}

impl LoadOutcome {
    pub fn dataset(&self) -> &Dataset {
        match self {
            LoadOutcome::Complete(dataset) => dataset,
            LoadOutcome::Partial { dataset, .. } => dataset,
        }
    }

    pub fn into_dataset(self) -> Dataset {
        match self {
            LoadOutcome::Complete(dataset) => dataset,
            LoadOutcome::Partial { dataset, .. } => dataset,
        }
    }

    pub fn missing(&self) -> &[TimeRange] {
        match self {
            LoadOutcome::Complete(_) => &[],
            LoadOutcome::Partial { missing, .. } => missing,
        }
    }
}

pub struct StorageManager {
    root: PathBuf,
    config: PipelineConfig,
    // One writer at a time per file; writers to different keys do not block
    // each other
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl StorageManager {
    pub fn new(root: impl Into<PathBuf>, config: PipelineConfig) -> Self {
        StorageManager {
            root: root.into(),
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, region: Region, resolution: Resolution) -> PathBuf {
        self.root.join(format!(
            "{}_{}min.csv",
            region.as_str().to_ascii_lowercase(),
            resolution.minutes()
        ))
    }

    fn file_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persist a frozen dataset. Rows already stored for timestamps inside
    /// the dataset's range are replaced; everything else is kept.
    pub fn save(&self, dataset: &Dataset) -> Result<PathBuf> {
        let path = self.file_path(dataset.region, dataset.resolution);
        let lock = self.file_lock(&path);
        let _guard = lock.lock();

        let mut merged: BTreeMap<_, Row> = BTreeMap::new();
        if path.exists() {
            for row in self.read_rows(&path)? {
                if !dataset.range.contains(&row.timestamp) {
                    merged.insert(row.timestamp, row);
                }
            }
        }
        for row in dataset.rows() {
            merged.insert(row.timestamp, row.clone());
        }

        let rows: Vec<Row> = merged.into_values().collect();
        let mut df = storage_frame(&rows)?;

        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating storage root '{}'", self.root.display()))?;
        let staging_dir = self.root.join("staging");
        fs::create_dir_all(&staging_dir)
            .with_context(|| format!("creating staging dir '{}'", staging_dir.display()))?;
        let staged = staging_dir.join(
            path.file_name()
                .ok_or_else(|| anyhow!("storage path '{}' has no file name", path.display()))?,
        );

        let mut file = File::create(&staged)
            .with_context(|| format!("creating staged file '{}'", staged.display()))?;
        CsvWriter::new(&mut file)
            .finish(&mut df)
            .context("writing staged CSV")?;
        fs::rename(&staged, &path)
            .with_context(|| format!("renaming staged file into '{}'", path.display()))?;

        info!(path = %path.display(), rows = rows.len(), "dataset saved");
        Ok(path)
    }

    /// Load the stored rows covering `range`.
    ///
    /// Returns `NotFound` when nothing in the range is stored, `Complete`
    /// when every grid point has a row, and `Partial` (with the exact
    /// missing sub-ranges) otherwise.
    pub fn load(
        &self,
        region: Region,
        resolution: Resolution,
        range: TimeRange,
    ) -> NemResult<LoadOutcome> {
        let path = self.file_path(region, resolution);
        if !path.exists() {
            return Err(NemError::NotFound(format!(
                "no stored data for {region} at {resolution}"
            )));
        }
        let lock = self.file_lock(&path);
        let _guard = lock.lock();

        let mut in_range: BTreeMap<_, Row> = BTreeMap::new();
        for row in self.read_rows(&path)? {
            if range.contains(&row.timestamp) {
                in_range.insert(row.timestamp, row);
            }
        }
        if in_range.is_empty() {
            return Err(NemError::NotFound(format!(
                "stored data for {region} at {resolution} does not cover {range}"
            )));
        }

        let missing = missing_sub_ranges(&range, resolution, |ts| in_range.contains_key(ts))?;

        let mut builder = DatasetBuilder::new(region, resolution, range, "local-store");
        for row in in_range.into_values() {
            builder.insert(row);
        }
        let dataset = builder.freeze();

        if missing.is_empty() {
            Ok(LoadOutcome::Complete(dataset))
        } else {
            Ok(LoadOutcome::Partial { dataset, missing })
        }
    }

    fn read_rows(&self, path: &Path) -> Result<Vec<Row>> {
        let mut file =
            File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
        let df = CsvReader::new(&mut file)
            .has_header(true)
            .finish()
            .with_context(|| format!("reading stored CSV '{}'", path.display()))?;
        if df.height() == 0 {
            return Ok(Vec::new());
        }

        let timestamps = df
            .column("timestamp")
            .context("stored CSV lacks timestamp column")?
            .utf8()
            .context("timestamp column is not text")?
            .clone();

        let mut field_columns: Vec<(Field, Float64Chunked)> = Vec::new();
        for field in Field::all() {
            let name = field.column_name();
            if let Ok(column) = df.column(&name) {
                let casted = column
                    .cast(&DataType::Float64)
                    .with_context(|| format!("casting column '{name}' to Float64"))?;
                field_columns.push((field, casted.f64()?.clone()));
            }
        }

        let is_imputed = bool_column(&df, "is_imputed")?;
        let is_suspect = bool_column(&df, "is_suspect")?;
        let strategies = utf8_column(&df, "imputation_strategy")?;
        let gap_reasons = utf8_column(&df, "gap_reason")?;

        // Columns that carry data anywhere in the file: null cells of gap
        // rows in these columns are missing observations, nulls elsewhere
        // mean the field was never reported.
        let observed: BTreeSet<Field> = field_columns
            .iter()
            .filter(|(_, ca)| ca.into_iter().any(|v| v.is_some()))
            .map(|(field, _)| *field)
            .collect();

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let ts_str = timestamps
                .get(i)
                .ok_or_else(|| anyhow!("null timestamp at row {i}"))?;
            let ts = DateTime::parse_from_rfc3339(ts_str)
                .with_context(|| format!("parsing stored timestamp '{ts_str}'"))?
                .with_timezone(&market_offset());

            let imputed = is_imputed.get(i).unwrap_or(false);
            let suspect = is_suspect.get(i).unwrap_or(false);
            let strategy = strategies
                .get(i)
                .map(str::parse::<ImputeStrategy>)
                .transpose()?;
            let reason = gap_reasons.get(i).map(str::parse::<GapReason>).transpose()?;

            let mut row = Row::observation(ts);
            for (field, ca) in &field_columns {
                match ca.get(i) {
                    Some(value) => {
                        let cell = match strategy {
                            Some(strategy) if imputed => CellValue::Imputed { value, strategy },
                            _ => {
                                let bounds = self.config.plausible_range_for(field);
                                if suspect && !bounds.contains(value) {
                                    CellValue::Suspect(value)
                                } else {
                                    CellValue::Genuine(value)
                                }
                            }
                        };
                        row.set(*field, cell);
                    }
                    None => {
                        if let Some(reason) = reason {
                            if observed.contains(field) {
                                row.set(*field, CellValue::Missing(reason));
                            }
                        }
                    }
                }
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

fn bool_column(df: &DataFrame, name: &str) -> Result<BooleanChunked> {
    Ok(df
        .column(name)
        .with_context(|| format!("stored CSV lacks '{name}' column"))?
        .cast(&DataType::Boolean)
        .with_context(|| format!("casting '{name}' to Boolean"))?
        .bool()?
        .clone())
}

fn utf8_column(df: &DataFrame, name: &str) -> Result<Utf8Chunked> {
    Ok(df
        .column(name)
        .with_context(|| format!("stored CSV lacks '{name}' column"))?
        .cast(&DataType::Utf8)
        .with_context(|| format!("casting '{name}' to Utf8"))?
        .utf8()?
        .clone())
}

/// Maximal runs of grid points for which `covered` is false.
fn missing_sub_ranges(
    range: &TimeRange,
    resolution: Resolution,
    covered: impl Fn(&chrono::DateTime<chrono::FixedOffset>) -> bool,
) -> NemResult<Vec<TimeRange>> {
    let mut missing = Vec::new();
    let mut run_start = None;
    for ts in range.grid(resolution) {
        if covered(&ts) {
            if let Some(start) = run_start.take() {
                missing.push(TimeRange::new(start, ts)?);
            }
        } else if run_start.is_none() {
            run_start = Some(ts);
        }
    }
    if let Some(start) = run_start {
        missing.push(TimeRange::new(start, range.end())?);
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn ts(d: u32, h: u32, mi: u32) -> chrono::DateTime<FixedOffset> {
        market_offset().with_ymd_and_hms(2020, 1, d, h, mi, 0).unwrap()
    }

    fn range(start: chrono::DateTime<FixedOffset>, end: chrono::DateTime<FixedOffset>) -> TimeRange {
        TimeRange::new(start, end).unwrap()
    }

    fn observation(at: chrono::DateTime<FixedOffset>, demand: f64, price: f64) -> Row {
        let mut row = Row::observation(at);
        row.set(Field::Demand, CellValue::Genuine(demand));
        row.set(Field::SpotPrice, CellValue::Genuine(price));
        row
    }

    fn dataset_over(r: TimeRange, rows: Vec<Row>) -> Dataset {
        let mut builder = DatasetBuilder::new(Region::Sa, Resolution::ThirtyMinute, r, "test");
        for row in rows {
            builder.insert(row);
        }
        builder.freeze()
    }

    fn store(dir: &Path) -> StorageManager {
        StorageManager::new(dir, PipelineConfig::default())
    }

    #[test]
    fn save_load_round_trip_preserves_annotations() {
        let dir = tempfile::tempdir().unwrap();
        let manager = store(dir.path());

        let r = range(ts(1, 0, 0), ts(1, 2, 0));
        let mut rows = vec![observation(ts(1, 0, 0), 1000.0, 50.0)];
        let mut suspect_row = Row::observation(ts(1, 0, 30));
        suspect_row.set(Field::Demand, CellValue::Genuine(1010.0));
        suspect_row.set(Field::SpotPrice, CellValue::Suspect(99_000.0));
        rows.push(suspect_row);
        let mut imputed_row = Row::observation(ts(1, 1, 0));
        imputed_row.set(
            Field::Demand,
            CellValue::Imputed {
                value: 1005.0,
                strategy: ImputeStrategy::LinearInterpolate,
            },
        );
        imputed_row.set(
            Field::SpotPrice,
            CellValue::Imputed {
                value: 55.0,
                strategy: ImputeStrategy::LinearInterpolate,
            },
        );
        rows.push(imputed_row);
        rows.push(Row::gap(
            ts(1, 1, 30),
            &[Field::Demand, Field::SpotPrice],
            GapReason::SourceError,
        ));
        let dataset = dataset_over(r, rows);

        manager.save(&dataset).unwrap();
        let outcome = manager
            .load(Region::Sa, Resolution::ThirtyMinute, r)
            .unwrap();
        assert!(matches!(outcome, LoadOutcome::Complete(_)));
        assert_eq!(outcome.dataset().rows(), dataset.rows());
    }

    #[test]
    fn save_is_idempotent_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let manager = store(dir.path());
        let r = range(ts(1, 0, 0), ts(1, 1, 0));
        let dataset = dataset_over(
            r,
            vec![
                observation(ts(1, 0, 0), 1000.0, 50.0),
                observation(ts(1, 0, 30), 1010.0, 51.0),
            ],
        );
        manager.save(&dataset).unwrap();
        manager.save(&dataset).unwrap();
        let loaded = manager
            .load(Region::Sa, Resolution::ThirtyMinute, r)
            .unwrap();
        assert_eq!(loaded.dataset().len(), 2);
    }

    #[test]
    fn resave_overwrites_range_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = store(dir.path());
        let full = range(ts(1, 0, 0), ts(1, 1, 30));
        manager
            .save(&dataset_over(
                full,
                vec![
                    observation(ts(1, 0, 0), 1000.0, 50.0),
                    observation(ts(1, 0, 30), 1010.0, 51.0),
                    observation(ts(1, 1, 0), 1020.0, 52.0),
                ],
            ))
            .unwrap();
        // Re-save just the middle slot with a corrected value
        let middle = range(ts(1, 0, 30), ts(1, 1, 0));
        manager
            .save(&dataset_over(middle, vec![observation(ts(1, 0, 30), 2000.0, 60.0)]))
            .unwrap();

        let loaded = manager
            .load(Region::Sa, Resolution::ThirtyMinute, full)
            .unwrap();
        let rows = loaded.dataset().rows().to_vec();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get(&Field::Demand).and_then(CellValue::value), Some(1000.0));
        assert_eq!(rows[1].get(&Field::Demand).and_then(CellValue::value), Some(2000.0));
        assert_eq!(rows[2].get(&Field::Demand).and_then(CellValue::value), Some(1020.0));
    }

    #[test]
    fn load_reports_the_hole_between_stored_sub_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let manager = store(dir.path());
        let morning = range(ts(1, 0, 0), ts(1, 1, 0));
        let evening = range(ts(1, 2, 0), ts(1, 3, 0));
        manager
            .save(&dataset_over(
                morning,
                vec![
                    observation(ts(1, 0, 0), 1000.0, 50.0),
                    observation(ts(1, 0, 30), 1010.0, 51.0),
                ],
            ))
            .unwrap();
        manager
            .save(&dataset_over(
                evening,
                vec![
                    observation(ts(1, 2, 0), 1040.0, 54.0),
                    observation(ts(1, 2, 30), 1050.0, 55.0),
                ],
            ))
            .unwrap();

        let outcome = manager
            .load(Region::Sa, Resolution::ThirtyMinute, range(ts(1, 0, 0), ts(1, 3, 0)))
            .unwrap();
        match outcome {
            LoadOutcome::Partial { dataset, missing } => {
                assert_eq!(dataset.len(), 4);
                assert_eq!(missing, vec![range(ts(1, 1, 0), ts(1, 2, 0))]);
            }
            LoadOutcome::Complete(_) => panic!("expected partial coverage"),
        }
    }

    #[test]
    fn load_outside_stored_data_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = store(dir.path());
        let err = manager
            .load(Region::Sa, Resolution::ThirtyMinute, range(ts(1, 0, 0), ts(1, 1, 0)))
            .unwrap_err();
        assert!(matches!(err, NemError::NotFound(_)));

        manager
            .save(&dataset_over(
                range(ts(1, 0, 0), ts(1, 0, 30)),
                vec![observation(ts(1, 0, 0), 1000.0, 50.0)],
            ))
            .unwrap();
        let err = manager
            .load(Region::Sa, Resolution::ThirtyMinute, range(ts(2, 0, 0), ts(2, 1, 0)))
            .unwrap_err();
        assert!(matches!(err, NemError::NotFound(_)));
    }

    #[test]
    fn different_keys_use_different_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = store(dir.path());
        let r = range(ts(1, 0, 0), ts(1, 0, 30));
        manager
            .save(&dataset_over(r, vec![observation(ts(1, 0, 0), 1000.0, 50.0)]))
            .unwrap();
        assert!(dir.path().join("sa_30min.csv").exists());
        let err = manager.load(Region::Vic, Resolution::ThirtyMinute, r);
        assert!(matches!(err, Err(NemError::NotFound(_))));
    }
}
