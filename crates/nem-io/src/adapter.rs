//! Source adapter: the only component that talks to the provider.
//!
//! Responsibilities: split requests longer than the provider's maximum
//! queryable span, pass every outbound call through the shared rate gate,
//! and retry transient failures with bounded exponential backoff. The rest
//! of the pipeline only ever sees "this sub-range fetched or failed".

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use nem_core::{NemError, NemResult, PipelineConfig, RawRecord, Region, Resolution, TimeRange};

use crate::provider::TelemetryProvider;
use crate::ratelimit::RateGate;

pub struct SourceAdapter {
    provider: Arc<dyn TelemetryProvider>,
    gate: Arc<RateGate>,
    max_range_days: i64,
    retry_max_attempts: u32,
    retry_base_delay: Duration,
}

impl SourceAdapter {
    pub fn new(
        provider: Arc<dyn TelemetryProvider>,
        gate: Arc<RateGate>,
        config: &PipelineConfig,
    ) -> Self {
        SourceAdapter {
            provider,
            gate,
            max_range_days: config.provider_max_range_days,
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Fetch raw records for the range, splitting into provider-sized
    /// chunks and concatenating in order.
    pub fn fetch(
        &self,
        region: Region,
        range: TimeRange,
        resolution: Resolution,
    ) -> NemResult<Vec<RawRecord>> {
        let mut records = Vec::new();
        for chunk in range.split_days(self.max_range_days) {
            debug!(%region, range = %chunk, "fetching chunk");
            records.extend(self.fetch_chunk(region, chunk, resolution)?);
        }
        Ok(records)
    }

    fn fetch_chunk(
        &self,
        region: Region,
        chunk: TimeRange,
        resolution: Resolution,
    ) -> NemResult<Vec<RawRecord>> {
        let mut attempt = 0u32;
        loop {
            self.gate.acquire();
            match self.provider.query(region, chunk, resolution) {
                Ok(records) => return Ok(records),
                // Fetch is read-only, so retrying is safe; only transient
                // failures are worth another attempt.
                Err(NemError::SourceUnavailable(message))
                    if attempt + 1 < self.retry_max_attempts =>
                {
                    let delay = self.retry_base_delay * 2u32.saturating_pow(attempt);
                    warn!(
                        %region,
                        range = %chunk,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        message,
                        "provider query failed, backing off"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
