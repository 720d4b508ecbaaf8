//! Telemetry provider contract and implementations.
//!
//! The rest of the pipeline only ever sees [`TelemetryProvider::query`]:
//! ordered raw records for one region and range, or a typed failure. All
//! retry, splitting and rate limiting lives in the adapter on top.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};
use nem_core::{market_offset, NemError, NemResult, RawRecord, Region, Resolution, TimeRange};

/// Narrow query contract against the external telemetry source.
pub trait TelemetryProvider: Send + Sync {
    /// Short provenance label recorded on every dataset.
    fn name(&self) -> &str;

    /// Ordered raw records for the region/range/resolution, or
    /// `SourceUnavailable` / `InvalidRange`.
    fn query(
        &self,
        region: Region,
        range: TimeRange,
        resolution: Resolution,
    ) -> NemResult<Vec<RawRecord>>;
}

/// HTTP provider speaking the OpenNEM-style JSON contract:
/// `GET {base}/telemetry/{region}?start=..&end=..&resolution=..` returning
/// `{"data": [{"timestamp": "...", "demand_mw": ..., ...}, ...]}`.
pub struct OpenNemProvider {
    base_url: String,
}

impl OpenNemProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        OpenNemProvider {
            base_url: base_url.into(),
        }
    }
}

impl Default for OpenNemProvider {
    fn default() -> Self {
        OpenNemProvider::new("https://api.opennem.org.au/v1")
    }
}

impl TelemetryProvider for OpenNemProvider {
    fn name(&self) -> &str {
        "opennem"
    }

    fn query(
        &self,
        region: Region,
        range: TimeRange,
        resolution: Resolution,
    ) -> NemResult<Vec<RawRecord>> {
        // Naive market-local endpoints keep the URL free of offset escapes
        let url = format!(
            "{}/telemetry/{}?start={}&end={}&resolution={}",
            self.base_url,
            region.provider_id(),
            range.start().format("%Y-%m-%dT%H:%M:%S"),
            range.end().format("%Y-%m-%dT%H:%M:%S"),
            resolution,
        );

        let response = match ureq::get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(400, _)) => {
                return Err(NemError::InvalidRange(format!(
                    "provider rejected query for {region} {range}"
                )));
            }
            Err(ureq::Error::Status(code, _)) => {
                return Err(NemError::SourceUnavailable(format!(
                    "provider returned status {code}"
                )));
            }
            Err(err) => {
                return Err(NemError::SourceUnavailable(err.to_string()));
            }
        };

        let body: serde_json::Value = response
            .into_json()
            .map_err(|err| NemError::SourceUnavailable(format!("bad provider payload: {err}")))?;

        let mut records = Vec::new();
        if let Some(data) = body["data"].as_array() {
            for item in data {
                if let Some(record) = raw_record_from_json(item) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }
}

fn raw_record_from_json(item: &serde_json::Value) -> Option<RawRecord> {
    let object = item.as_object()?;
    let timestamp = object.get("timestamp")?.as_str()?.to_string();
    let values: BTreeMap<String, serde_json::Value> = object
        .iter()
        .filter(|(key, _)| key.as_str() != "timestamp")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Some(RawRecord { timestamp, values })
}

/// In-memory provider serving pre-recorded telemetry. Used for offline
/// replay and as the test double behind the adapter and pipeline.
#[derive(Default)]
pub struct ReplayProvider {
    records: Vec<(Region, Resolution, RawRecord)>,
}

impl ReplayProvider {
    pub fn new() -> Self {
        ReplayProvider::default()
    }

    pub fn push(&mut self, region: Region, resolution: Resolution, record: RawRecord) {
        self.records.push((region, resolution, record));
    }

    fn parse_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&market_offset()));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .and_then(|naive| naive.and_local_timezone(market_offset()).single())
    }
}

impl TelemetryProvider for ReplayProvider {
    fn name(&self) -> &str {
        "replay"
    }

    fn query(
        &self,
        region: Region,
        range: TimeRange,
        resolution: Resolution,
    ) -> NemResult<Vec<RawRecord>> {
        let mut hits: Vec<RawRecord> = self
            .records
            .iter()
            .filter(|(r, res, record)| {
                *r == region
                    && *res == resolution
                    && Self::parse_timestamp(&record.timestamp)
                        .map(|ts| range.contains(&ts))
                        .unwrap_or(false)
            })
            .map(|(_, _, record)| record.clone())
            .collect();
        hits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(hits)
    }
}
