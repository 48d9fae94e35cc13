//! Shared types for the weather relay.
//!
//! The domain model uses SI units throughout (kelvin, pascals, metres,
//! metres per second, radians, 0–1 ratios). Optional fields are omitted
//! from serialized output rather than written as `null`, so "absent"
//! and "zero" never collapse into each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Position / cell
// ---------------------------------------------------------------------------

/// A geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Whether both coordinates are finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.latitude, self.longitude)
    }
}

/// Geohash cell identifier. Precision is fixed cache-wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Weather records
// ---------------------------------------------------------------------------

/// What a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Observation,
    /// Hourly point-in-time forecast.
    Point,
    Daily,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Observation => write!(f, "observation"),
            RecordKind::Point => write!(f, "point"),
            RecordKind::Daily => write!(f, "daily"),
        }
    }
}

/// Forecast flavours a caller can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastKind {
    Point,
    Daily,
}

impl ForecastKind {
    pub fn record_kind(self) -> RecordKind {
        match self {
            ForecastKind::Point => RecordKind::Point,
            ForecastKind::Daily => RecordKind::Daily,
        }
    }
}

impl std::str::FromStr for ForecastKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "point" | "hourly" => Ok(ForecastKind::Point),
            "daily" => Ok(ForecastKind::Daily),
            other => Err(format!("Unknown forecast type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TendencyKind {
    Steady,
    Decreasing,
    Increasing,
    #[serde(rename = "not available")]
    NotAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrecipitationKind {
    #[serde(rename = "rain")]
    Rain,
    #[serde(rename = "thunderstorm")]
    Thunderstorm,
    #[serde(rename = "freezing rain")]
    FreezingRain,
    #[serde(rename = "mixed/ice")]
    MixedIce,
    #[serde(rename = "snow")]
    Snow,
    #[serde(rename = "not available")]
    NotAvailable,
}

impl fmt::Display for PrecipitationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrecipitationKind::Rain => "rain",
            PrecipitationKind::Thunderstorm => "thunderstorm",
            PrecipitationKind::FreezingRain => "freezing rain",
            PrecipitationKind::MixedIce => "mixed/ice",
            PrecipitationKind::Snow => "snow",
            PrecipitationKind::NotAvailable => "not available",
        };
        f.write_str(s)
    }
}

/// Atmospheric values. Temperatures in K, pressure in Pa, ratios 0–1,
/// visibility and precipitation in metres.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutsideBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feels_like_temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dew_point_temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure_tendency: Option<TendencyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_cover: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal_visibility: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uv_index: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precipitation_volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precipitation_type: Option<PrecipitationKind>,
}

/// Marine values. Heights in m, periods in s, directions in rad.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_tendency: Option<TendencyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface_current_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface_current_direction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salinity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_significant_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_period: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_direction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swell_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swell_period: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swell_direction: Option<f64>,
}

/// Wind values. Speeds in m/s, directions in rad (true).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_true: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction_true: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gust: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gust_direction: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SunBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sunrise: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sunset: Option<DateTime<Utc>>,
}

/// A normalised observation or forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outside: Option<OutsideBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water: Option<WaterBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind: Option<WindBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sun: Option<SunBlock>,
}

impl WeatherRecord {
    /// An empty record of the given kind at `date`.
    pub fn new(kind: RecordKind, date: DateTime<Utc>) -> Self {
        Self {
            date,
            kind,
            description: None,
            outside: None,
            water: None,
            wind: None,
            sun: None,
        }
    }
}

/// Weather warning as published by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub details: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Everything cached for one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherPayload {
    pub id: CellId,
    pub position: Position,
    pub observations: Vec<WeatherRecord>,
    pub forecasts: Vec<WeatherRecord>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

impl WeatherPayload {
    /// Forecast records of one kind, in upstream order.
    pub fn forecasts_of(&self, kind: ForecastKind) -> Vec<WeatherRecord> {
        let wanted = kind.record_kind();
        self.forecasts
            .iter()
            .filter(|r| r.kind == wanted)
            .cloned()
            .collect()
    }
}

/// Query options for provider requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReqParams {
    /// Upper bound on returned records.
    #[serde(default)]
    pub max_count: Option<usize>,
    /// Records dated before this are dropped.
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
}

impl WeatherReqParams {
    /// Apply start-date filtering, then the count bound.
    pub fn apply(&self, records: Vec<WeatherRecord>) -> Vec<WeatherRecord> {
        let filtered = records
            .into_iter()
            .filter(|r| self.start_date.map_or(true, |start| r.date >= start));
        match self.max_count {
            Some(n) => filtered.take(n).collect(),
            None => filtered.collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Published update
// ---------------------------------------------------------------------------

/// One flattened (path, value) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathValue {
    pub path: String,
    pub value: serde_json::Value,
}

/// Update event handed to the host publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherDelta {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub position: Position,
    pub values: Vec<PathValue>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GeohashError {
    #[error("Invalid geohash character '{character}' in {cell}")]
    InvalidCharacter { cell: String, character: char },
}

/// Blob store failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Key not found in store: {0}")]
    NotFound(String),

    #[error("Storage I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Spatial cache failures.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Unable to initialise cache storage at {path}: {source}")]
    StorageInit {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("Error writing cache entry {cell}: {source}")]
    StorageWrite {
        cell: CellId,
        #[source]
        source: StorageError,
    },

    #[error("Error reading cache entry {cell}: {source}")]
    StorageRead {
        cell: CellId,
        #[source]
        source: StorageError,
    },

    #[error("Error serialising cache entry {cell}: {source}")]
    Serialize {
        cell: CellId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cache entry not found: {0}")]
    NotFound(CellId),
}

/// Why an upstream request failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Parse(String),
}

/// Upstream fetch failure, tagged with the position that was requested.
#[derive(Debug, thiserror::Error)]
#[error("Weather fetch failed at {position}: {cause}")]
pub struct FetchError {
    pub position: Position,
    #[source]
    pub cause: FetchFailure,
}

impl FetchError {
    pub fn new(position: Position, cause: impl Into<FetchFailure>) -> Self {
        Self {
            position,
            cause: cause.into(),
        }
    }

    pub fn parse(position: Position, message: impl Into<String>) -> Self {
        Self {
            position,
            cause: FetchFailure::Parse(message.into()),
        }
    }
}

/// Cache-first acquisition failure.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Terminal scheduler failures. Any of these stops polling until restart.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Watchdog: wake timer fired after {elapsed_ms} ms, expected at least {min_ms} ms")]
    Watchdog { elapsed_ms: i64, min_ms: i64 },

    #[error("Giving up after {attempts} failed fetch attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("No position available after {attempts} attempts")]
    PositionUnavailable { attempts: u32 },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
