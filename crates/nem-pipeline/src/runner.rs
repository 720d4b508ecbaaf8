//! The collect runner.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{info, warn};

use nem_core::{
    Dataset, DatasetBuilder, NemError, NemResult, PipelineConfig, TimeRange,
};
use nem_io::{RateGate, SourceAdapter, StorageManager, TelemetryProvider};
use nem_ts::{detect, impute, validate};

use crate::job::{CollectOutcome, CollectRequest, SubRangeRecord, SubRangeStatus};

pub struct Pipeline {
    adapter: SourceAdapter,
    store: StorageManager,
    config: PipelineConfig,
}

impl Pipeline {
    /// Build a pipeline around a provider. The rate gate is constructed
    /// here, once, and shared by every fetch this pipeline issues.
    pub fn new(provider: Arc<dyn TelemetryProvider>, config: PipelineConfig) -> Self {
        let gate = Arc::new(RateGate::per_minute(config.rate_limit_per_minute));
        let adapter = SourceAdapter::new(provider, gate, &config);
        let store = StorageManager::new(config.storage_root.clone(), config.clone());
        Pipeline {
            adapter,
            store,
            config,
        }
    }

    pub fn store(&self) -> &StorageManager {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Collect, repair and persist one request.
    ///
    /// The range is processed in provider-sized sub-ranges; a failing
    /// sub-range is recorded and the remainder continues. Errors only when
    /// no sub-range could be persisted at all — otherwise the outcome
    /// carries the merged dataset plus every sub-range record.
    pub fn collect(&self, request: &CollectRequest) -> NemResult<CollectOutcome> {
        let deadline = Instant::now() + Duration::from_secs(self.config.request_timeout_secs);
        self.collect_until(request, deadline)
    }

    fn collect_until(
        &self,
        request: &CollectRequest,
        deadline: Instant,
    ) -> NemResult<CollectOutcome> {
        if !request.range.is_aligned(request.resolution) {
            return Err(NemError::InvalidRange(format!(
                "range {} is not aligned to the {} grid",
                request.range, request.resolution
            )));
        }

        let sub_ranges = request.range.split_days(self.config.provider_max_range_days);
        let mut records = Vec::with_capacity(sub_ranges.len());
        let mut merged: Option<DatasetBuilder> = None;
        let mut first_error: Option<NemError> = None;

        for sub in sub_ranges {
            if Instant::now() >= deadline {
                // Already-persisted sub-ranges stay on disk; the rest are
                // marked timed out without being attempted.
                warn!(range = %sub, "deadline expired before sub-range was processed");
                records.push(SubRangeRecord::failed(sub, "request deadline expired".into()));
                if first_error.is_none() {
                    first_error = Some(NemError::Timeout(Duration::from_secs(
                        self.config.request_timeout_secs,
                    )));
                }
                continue;
            }

            match self.run_sub_range(request, sub) {
                Ok((dataset, record)) => {
                    info!(
                        range = %sub,
                        status = record.status.as_str(),
                        rows = record.rows,
                        "sub-range persisted"
                    );
                    let builder = merged.get_or_insert_with(|| {
                        DatasetBuilder::new(
                            request.region,
                            request.resolution,
                            request.range,
                            dataset.source.clone(),
                        )
                    });
                    for row in dataset.rows() {
                        builder.insert(row.clone());
                    }
                    records.push(record);
                }
                Err(err) => {
                    warn!(range = %sub, error = %err, "sub-range failed");
                    records.push(SubRangeRecord::failed(sub, err.to_string()));
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        match merged {
            Some(builder) => Ok(CollectOutcome {
                dataset: builder.freeze(),
                records,
            }),
            None => Err(first_error.unwrap_or_else(|| {
                NemError::InvalidRange(format!("request range {} is empty", request.range))
            })),
        }
    }

    fn run_sub_range(
        &self,
        request: &CollectRequest,
        sub: TimeRange,
    ) -> NemResult<(Dataset, SubRangeRecord)> {
        let raw = self
            .adapter
            .fetch(request.region, sub, request.resolution)?;
        let (mut builder, validation) = validate(
            &raw,
            request.region,
            request.resolution,
            sub,
            self.adapter.provider_name(),
        )?;
        let detection = detect(&mut builder, &self.config, Utc::now());
        let summary = impute(&mut builder, request.strategy, self.config.seasonal_min_periods);

        let dataset = builder.freeze();
        self.store
            .save(&dataset)
            .with_context(|| format!("persisting {} {}", request.region, sub))?;

        let unresolved_gaps = dataset
            .rows()
            .iter()
            .filter(|row| row.has_missing())
            .count();
        let status = if validation.dropped.is_empty() && unresolved_gaps == 0 {
            SubRangeStatus::Ok
        } else {
            SubRangeStatus::Partial
        };
        let record = SubRangeRecord {
            range: sub,
            status,
            rows: dataset.len(),
            dropped: validation.dropped.len(),
            gaps_detected: detection.gaps_inserted,
            suspects_flagged: detection.suspects_flagged,
            imputed: summary.filled,
            unresolved_gaps,
            error: None,
        };
        Ok((dataset, record))
    }

    /// Run independent requests in parallel. Each request produces its own
    /// dataset; the rate gate is the only shared resource between them.
    pub fn collect_many(
        &self,
        requests: &[CollectRequest],
        threads: usize,
    ) -> anyhow::Result<Vec<NemResult<CollectOutcome>>> {
        let thread_count = if threads == 0 {
            num_cpus::get()
        } else {
            threads
        };
        let pool = ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .build()
            .context("building thread pool for collection")?;
        Ok(pool.install(|| {
            requests
                .par_iter()
                .map(|request| self.collect(request))
                .collect()
        }))
    }
}
