//! Unit conversions from upstream units to SI.
//!
//! The translator routes every numeric field through these helpers so
//! there is exactly one place where source units meet domain units.

use chrono::{DateTime, SecondsFormat, Utc};

const KELVIN_OFFSET: f64 = 273.15;

// -- Temperature -------------------------------------------------------------

pub fn celsius_to_kelvin(value: f64) -> f64 {
    value + KELVIN_OFFSET
}

pub fn kelvin_to_celsius(value: f64) -> f64 {
    value - KELVIN_OFFSET
}

// -- Angles ------------------------------------------------------------------

pub fn degrees_to_radians(value: f64) -> f64 {
    value.to_radians()
}

pub fn radians_to_degrees(value: f64) -> f64 {
    value.to_degrees()
}

// -- Pressure ----------------------------------------------------------------

pub fn hpa_to_pa(value: f64) -> f64 {
    value * 100.0
}

// -- Distance / speed --------------------------------------------------------

/// km/h → m/s
pub fn kmh_to_ms(value: f64) -> f64 {
    value / 3.6
}

pub fn mm_to_m(value: f64) -> f64 {
    value / 1000.0
}

/// Percent (0–100) → ratio (0–1).
pub fn percent_to_ratio(value: f64) -> f64 {
    value / 100.0
}

// -- Time --------------------------------------------------------------------

/// Unix seconds → UTC timestamp. `None` when out of chrono's range.
pub fn from_unix_time(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}

/// Millisecond-precision ISO-8601 with a `Z` suffix.
pub fn to_iso8601(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Unix seconds straight to an ISO-8601 string.
pub fn unix_to_iso8601(seconds: i64) -> Option<String> {
    from_unix_time(seconds).map(|t| to_iso8601(&t))
}
