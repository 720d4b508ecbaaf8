//! Market geography and the observation grid.
//!
//! The NEM is a five-region wholesale market running on market time
//! (UTC+10:00, no daylight saving). All timestamps in the pipeline are
//! market-local and aligned to a fixed 5- or 30-minute grid.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{NemError, NemResult};

/// Market time offset (UTC+10:00). The NEM runs on a fixed offset with no
/// daylight-saving transitions.
pub fn market_offset() -> FixedOffset {
    FixedOffset::east_opt(10 * 3600).expect("static +10:00 offset is in range")
}

/// NEM market regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    Tas,
    Sa,
    Vic,
    Nsw,
    Qld,
}

impl Region {
    pub const ALL: [Region; 5] = [Region::Tas, Region::Sa, Region::Vic, Region::Nsw, Region::Qld];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Tas => "TAS",
            Region::Sa => "SA",
            Region::Vic => "VIC",
            Region::Nsw => "NSW",
            Region::Qld => "QLD",
        }
    }

    pub fn full_name(&self) -> &'static str {
        match self {
            Region::Tas => "Tasmania",
            Region::Sa => "South Australia",
            Region::Vic => "Victoria",
            Region::Nsw => "New South Wales",
            Region::Qld => "Queensland",
        }
    }

    /// Region identifier used by the provider API (`sa1`, `nsw1`, ...).
    pub fn provider_id(&self) -> &'static str {
        match self {
            Region::Tas => "tas1",
            Region::Sa => "sa1",
            Region::Vic => "vic1",
            Region::Nsw => "nsw1",
            Region::Qld => "qld1",
        }
    }
}

impl FromStr for Region {
    type Err = NemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accepts both the canonical short code and the provider's legacy
        // `<region>1` identifiers.
        match s.to_ascii_lowercase().as_str() {
            "tas" | "tas1" => Ok(Region::Tas),
            "sa" | "sa1" => Ok(Region::Sa),
            "vic" | "vic1" => Ok(Region::Vic),
            "nsw" | "nsw1" => Ok(Region::Nsw),
            "qld" | "qld1" => Ok(Region::Qld),
            other => Err(NemError::InvalidRange(format!(
                "unknown region '{other}'; expected one of TAS, SA, VIC, NSW, QLD"
            ))),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fuel technologies reported by the provider. Fuels a region does not run
/// are simply absent from its records, never reported as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelType {
    BatteryCharging,
    BatteryDischarging,
    Biomass,
    BlackCoal,
    BrownCoal,
    Distillate,
    GasCcgt,
    GasOcgt,
    GasSteam,
    Hydro,
    SolarRooftop,
    SolarUtility,
    Wind,
}

impl FuelType {
    pub const ALL: [FuelType; 13] = [
        FuelType::BatteryCharging,
        FuelType::BatteryDischarging,
        FuelType::Biomass,
        FuelType::BlackCoal,
        FuelType::BrownCoal,
        FuelType::Distillate,
        FuelType::GasCcgt,
        FuelType::GasOcgt,
        FuelType::GasSteam,
        FuelType::Hydro,
        FuelType::SolarRooftop,
        FuelType::SolarUtility,
        FuelType::Wind,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FuelType::BatteryCharging => "battery_charging",
            FuelType::BatteryDischarging => "battery_discharging",
            FuelType::Biomass => "biomass",
            FuelType::BlackCoal => "black_coal",
            FuelType::BrownCoal => "brown_coal",
            FuelType::Distillate => "distillate",
            FuelType::GasCcgt => "gas_ccgt",
            FuelType::GasOcgt => "gas_ocgt",
            FuelType::GasSteam => "gas_steam",
            FuelType::Hydro => "hydro",
            FuelType::SolarRooftop => "solar_rooftop",
            FuelType::SolarUtility => "solar_utility",
            FuelType::Wind => "wind",
        }
    }
}

impl FromStr for FuelType {
    type Err = NemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FuelType::ALL
            .iter()
            .copied()
            .find(|fuel| fuel.as_str() == s)
            .ok_or_else(|| NemError::Validation(format!("unknown fuel type '{s}'")))
    }
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed quantity within a record. The variant order matches
/// the storage column order: demand, generation by fuel, price, temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Demand,
    Generation(FuelType),
    SpotPrice,
    Temperature,
}

impl Field {
    /// All storable fields, in storage column order.
    pub fn all() -> Vec<Field> {
        let mut fields = vec![Field::Demand];
        fields.extend(FuelType::ALL.iter().map(|fuel| Field::Generation(*fuel)));
        fields.push(Field::SpotPrice);
        fields.push(Field::Temperature);
        fields
    }

    pub fn column_name(&self) -> String {
        match self {
            Field::Demand => "demand_mw".to_string(),
            Field::Generation(fuel) => format!("gen_{}", fuel.as_str()),
            Field::SpotPrice => "spot_price".to_string(),
            Field::Temperature => "temperature_c".to_string(),
        }
    }

    pub fn from_column_name(name: &str) -> Option<Field> {
        match name {
            "demand_mw" => Some(Field::Demand),
            "spot_price" => Some(Field::SpotPrice),
            "temperature_c" => Some(Field::Temperature),
            other => other
                .strip_prefix("gen_")
                .and_then(|fuel| fuel.parse::<FuelType>().ok())
                .map(Field::Generation),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.column_name())
    }
}

/// Grid spacing of observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    FiveMinute,
    ThirtyMinute,
}

impl Resolution {
    pub fn minutes(&self) -> i64 {
        match self {
            Resolution::FiveMinute => 5,
            Resolution::ThirtyMinute => 30,
        }
    }

    pub fn step(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::FiveMinute => "5m",
            Resolution::ThirtyMinute => "30m",
        }
    }

    /// Whether a timestamp sits on this resolution's grid.
    pub fn aligns(&self, ts: &DateTime<FixedOffset>) -> bool {
        ts.second() == 0 && ts.nanosecond() == 0 && ts.minute() as i64 % self.minutes() == 0
    }
}

impl FromStr for Resolution {
    type Err = NemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches("in").trim_end_matches('m') {
            "5" => Ok(Resolution::FiveMinute),
            "30" => Ok(Resolution::ThirtyMinute),
            other => Err(NemError::InvalidRange(format!(
                "unsupported resolution '{other}'; expected 5m or 30m"
            ))),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open time span `[start, end)` in market time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl TimeRange {
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> NemResult<Self> {
        if start > end {
            return Err(NemError::InvalidRange(format!(
                "range start {start} is after end {end}"
            )));
        }
        Ok(TimeRange { start, end })
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.end
    }

    pub fn contains(&self, ts: &DateTime<FixedOffset>) -> bool {
        *ts >= self.start && *ts < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether both endpoints sit on the resolution grid.
    pub fn is_aligned(&self, resolution: Resolution) -> bool {
        resolution.aligns(&self.start) && resolution.aligns(&self.end)
    }

    /// Expected grid timestamps for this range at the given resolution.
    pub fn grid(&self, resolution: Resolution) -> impl Iterator<Item = DateTime<FixedOffset>> {
        let step = resolution.step();
        let end = self.end;
        std::iter::successors(Some(self.start), move |ts| Some(*ts + step))
            .take_while(move |ts| *ts < end)
    }

    pub fn grid_len(&self, resolution: Resolution) -> usize {
        let span = (self.end - self.start).num_minutes();
        (span / resolution.minutes()).max(0) as usize
    }

    /// Split into consecutive chunks of at most `max_days`, preserving order.
    pub fn split_days(&self, max_days: i64) -> Vec<TimeRange> {
        let span = Duration::days(max_days.max(1));
        let mut chunks = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let stop = (cursor + span).min(self.end);
            chunks.push(TimeRange {
                start: cursor,
                end: stop,
            });
            cursor = stop;
        }
        chunks
    }

    /// Compact label for logs and manifests.
    pub fn label(&self) -> String {
        format!(
            "{}..{}",
            self.start.format("%Y-%m-%dT%H:%M"),
            self.end.format("%Y-%m-%dT%H:%M")
        )
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
