//! Open-Meteo weather source.
//!
//! Requests current conditions, hourly and daily forecasts from the
//! Open-Meteo forecast API and maps the column-oriented response into
//! `WeatherRecord`s. Upstream units (°C, hPa, km/h, %, °, mm, unix
//! seconds) are converted to SI through `crate::convert`.
//!
//! API: `https://api.open-meteo.com/v1/forecast`
//! Auth: none, or `apikey` against the commercial host.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::WeatherSource;
use crate::convert;
use crate::types::{
    CellId, FetchError, FetchFailure, ForecastKind, OutsideBlock, Position, PrecipitationKind,
    RecordKind, SunBlock, WeatherPayload, WeatherRecord, WeatherReqParams, WindBlock,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const FREE_API_URL: &str = "https://api.open-meteo.com/v1/forecast";
const CUSTOMER_API_URL: &str = "https://customer-api.open-meteo.com/v1/forecast";
const USER_AGENT: &str = "meteo-relay/0.1.0";
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Open-Meteo caps forecast_days at 16.
const MAX_FORECAST_DAYS: u32 = 16;
const MAX_FORECAST_HOURS: u32 = MAX_FORECAST_DAYS * 24;

/// Error bodies are trimmed to this many characters.
const MAX_ERROR_BODY: usize = 200;

const CURRENT_FIELDS: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "apparent_temperature",
    "pressure_msl",
    "cloud_cover",
    "wind_speed_10m",
    "wind_direction_10m",
    "wind_gusts_10m",
    "precipitation",
    "rain",
    "showers",
    "snowfall",
    "weather_code",
    "surface_pressure",
];

const HOURLY_FIELDS: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "dew_point_2m",
    "apparent_temperature",
    "pressure_msl",
    "cloud_cover",
    "wind_speed_10m",
    "wind_direction_10m",
    "wind_gusts_10m",
    "precipitation",
    "visibility",
    "weather_code",
];

const DAILY_FIELDS: &[&str] = &[
    "temperature_2m_max",
    "temperature_2m_min",
    "sunrise",
    "sunset",
    "uv_index_max",
    "precipitation_sum",
    "weather_code",
    "wind_speed_10m_max",
    "wind_direction_10m_dominant",
    "wind_gusts_10m_max",
];

/// Client settings.
#[derive(Debug, Clone)]
pub struct OpenMeteoSettings {
    /// Overrides the endpoint (tests, proxies).
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub forecast_hours: u32,
    pub forecast_days: u32,
}

impl Default for OpenMeteoSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            forecast_hours: 8,
            forecast_days: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// WMO weather codes
// ---------------------------------------------------------------------------

/// Human-readable text for a WMO weather interpretation code.
pub fn wmo_description(code: i64) -> Option<&'static str> {
    let text = match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing rime fog",
        51 => "Drizzle: Light",
        53 => "Drizzle: Moderate",
        55 => "Drizzle: Dense intensity",
        56 => "Freezing Drizzle: Light",
        57 => "Freezing Drizzle: Dense intensity",
        61 => "Rain: Slight",
        63 => "Rain: Moderate",
        65 => "Rain: Heavy intensity",
        66 => "Freezing Rain: Light",
        67 => "Freezing Rain: Heavy intensity",
        71 => "Snow fall: Slight",
        73 => "Snow fall: Moderate",
        75 => "Snow fall: Heavy intensity",
        77 => "Snow grains",
        80 => "Rain showers: Slight",
        81 => "Rain showers: Moderate",
        82 => "Rain showers: Violent",
        85 => "Snow showers: Slight",
        86 => "Snow showers: Heavy",
        95 => "Thunderstorm: Slight or moderate",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => return None,
    };
    Some(text)
}

/// Precipitation type implied by a WMO code, if it implies any.
pub fn precipitation_kind(code: i64) -> Option<PrecipitationKind> {
    match code {
        51 | 53 | 55 | 61 | 63 | 65 | 80..=82 => Some(PrecipitationKind::Rain),
        56 | 57 | 66 | 67 => Some(PrecipitationKind::FreezingRain),
        71 | 73 | 75 | 77 | 85 | 86 => Some(PrecipitationKind::Snow),
        95 | 96 | 99 => Some(PrecipitationKind::Thunderstorm),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Open-Meteo response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct OpenMeteoResponse {
    #[serde(default)]
    current: Option<OpenMeteoCurrent>,
    #[serde(default)]
    hourly: Option<OpenMeteoHourly>,
    #[serde(default)]
    daily: Option<OpenMeteoDaily>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenMeteoCurrent {
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    temperature_2m: Option<f64>,
    #[serde(default)]
    relative_humidity_2m: Option<f64>,
    #[serde(default)]
    apparent_temperature: Option<f64>,
    #[serde(default)]
    pressure_msl: Option<f64>,
    #[serde(default)]
    cloud_cover: Option<f64>,
    #[serde(default)]
    wind_speed_10m: Option<f64>,
    #[serde(default)]
    wind_direction_10m: Option<f64>,
    #[serde(default)]
    wind_gusts_10m: Option<f64>,
    #[serde(default)]
    precipitation: Option<f64>,
    #[serde(default)]
    weather_code: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenMeteoHourly {
    #[serde(default)]
    time: Vec<i64>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    dew_point_2m: Vec<Option<f64>>,
    #[serde(default)]
    apparent_temperature: Vec<Option<f64>>,
    #[serde(default)]
    pressure_msl: Vec<Option<f64>>,
    #[serde(default)]
    cloud_cover: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    wind_direction_10m: Vec<Option<f64>>,
    #[serde(default)]
    wind_gusts_10m: Vec<Option<f64>>,
    #[serde(default)]
    precipitation: Vec<Option<f64>>,
    #[serde(default)]
    visibility: Vec<Option<f64>>,
    #[serde(default)]
    weather_code: Vec<Option<i64>>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenMeteoDaily {
    #[serde(default)]
    time: Vec<i64>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    sunrise: Vec<Option<i64>>,
    #[serde(default)]
    sunset: Vec<Option<i64>>,
    #[serde(default)]
    uv_index_max: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    weather_code: Vec<Option<i64>>,
    #[serde(default)]
    wind_speed_10m_max: Vec<Option<f64>>,
    #[serde(default)]
    wind_direction_10m_dominant: Vec<Option<f64>>,
    #[serde(default)]
    wind_gusts_10m_max: Vec<Option<f64>>,
}

/// Which column groups to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Query {
    Current,
    Hourly { hours: u32 },
    Daily { days: u32 },
    All { hours: u32, days: u32 },
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

fn at<T: Copy>(column: &[Option<T>], i: usize) -> Option<T> {
    column.get(i).copied().flatten()
}

fn non_empty<T: Default + PartialEq>(block: T) -> Option<T> {
    if block == T::default() {
        None
    } else {
        Some(block)
    }
}

fn describe(code: Option<i64>) -> Option<String> {
    code.and_then(wmo_description).map(str::to_string)
}

fn translate_current(current: &OpenMeteoCurrent) -> Vec<WeatherRecord> {
    let Some(date) = current.time.and_then(convert::from_unix_time) else {
        return Vec::new();
    };

    let mut record = WeatherRecord::new(RecordKind::Observation, date);
    record.description = describe(current.weather_code);
    record.outside = non_empty(OutsideBlock {
        temperature: current.temperature_2m.map(convert::celsius_to_kelvin),
        feels_like_temperature: current.apparent_temperature.map(convert::celsius_to_kelvin),
        pressure: current.pressure_msl.map(convert::hpa_to_pa),
        relative_humidity: current.relative_humidity_2m.map(convert::percent_to_ratio),
        cloud_cover: current.cloud_cover.map(convert::percent_to_ratio),
        precipitation_volume: current.precipitation.map(convert::mm_to_m),
        precipitation_type: current.weather_code.and_then(precipitation_kind),
        ..OutsideBlock::default()
    });
    record.wind = non_empty(WindBlock {
        speed_true: current.wind_speed_10m.map(convert::kmh_to_ms),
        direction_true: current.wind_direction_10m.map(convert::degrees_to_radians),
        gust: current.wind_gusts_10m.map(convert::kmh_to_ms),
        ..WindBlock::default()
    });

    vec![record]
}

fn translate_hourly(hourly: &OpenMeteoHourly) -> Vec<WeatherRecord> {
    hourly
        .time
        .iter()
        .enumerate()
        .filter_map(|(i, &t)| {
            let date = convert::from_unix_time(t)?;
            let code = at(&hourly.weather_code, i);

            let mut record = WeatherRecord::new(RecordKind::Point, date);
            record.description = describe(code);
            record.outside = non_empty(OutsideBlock {
                temperature: at(&hourly.temperature_2m, i).map(convert::celsius_to_kelvin),
                feels_like_temperature: at(&hourly.apparent_temperature, i)
                    .map(convert::celsius_to_kelvin),
                dew_point_temperature: at(&hourly.dew_point_2m, i).map(convert::celsius_to_kelvin),
                pressure: at(&hourly.pressure_msl, i).map(convert::hpa_to_pa),
                relative_humidity: at(&hourly.relative_humidity_2m, i)
                    .map(convert::percent_to_ratio),
                cloud_cover: at(&hourly.cloud_cover, i).map(convert::percent_to_ratio),
                horizontal_visibility: at(&hourly.visibility, i),
                precipitation_volume: at(&hourly.precipitation, i).map(convert::mm_to_m),
                precipitation_type: code.and_then(precipitation_kind),
                ..OutsideBlock::default()
            });
            record.wind = non_empty(WindBlock {
                speed_true: at(&hourly.wind_speed_10m, i).map(convert::kmh_to_ms),
                direction_true: at(&hourly.wind_direction_10m, i).map(convert::degrees_to_radians),
                gust: at(&hourly.wind_gusts_10m, i).map(convert::kmh_to_ms),
                ..WindBlock::default()
            });
            Some(record)
        })
        .collect()
}

fn translate_daily(daily: &OpenMeteoDaily) -> Vec<WeatherRecord> {
    daily
        .time
        .iter()
        .enumerate()
        .filter_map(|(i, &t)| {
            let date = convert::from_unix_time(t)?;
            let code = at(&daily.weather_code, i);

            let mut record = WeatherRecord::new(RecordKind::Daily, date);
            record.description = describe(code);
            record.outside = non_empty(OutsideBlock {
                min_temperature: at(&daily.temperature_2m_min, i).map(convert::celsius_to_kelvin),
                max_temperature: at(&daily.temperature_2m_max, i).map(convert::celsius_to_kelvin),
                uv_index: at(&daily.uv_index_max, i),
                precipitation_volume: at(&daily.precipitation_sum, i).map(convert::mm_to_m),
                precipitation_type: code.and_then(precipitation_kind),
                ..OutsideBlock::default()
            });
            record.wind = non_empty(WindBlock {
                speed_true: at(&daily.wind_speed_10m_max, i).map(convert::kmh_to_ms),
                direction_true: at(&daily.wind_direction_10m_dominant, i)
                    .map(convert::degrees_to_radians),
                gust: at(&daily.wind_gusts_10m_max, i).map(convert::kmh_to_ms),
                ..WindBlock::default()
            });
            record.sun = non_empty(SunBlock {
                sunrise: at(&daily.sunrise, i).and_then(convert::from_unix_time),
                sunset: at(&daily.sunset, i).and_then(convert::from_unix_time),
            });
            Some(record)
        })
        .collect()
}

fn translate_forecasts(resp: &OpenMeteoResponse) -> Vec<WeatherRecord> {
    let mut records = resp.hourly.as_ref().map(translate_hourly).unwrap_or_default();
    records.extend(resp.daily.as_ref().map(translate_daily).unwrap_or_default());
    records
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenMeteoClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    forecast_hours: u32,
    forecast_days: u32,
}

impl OpenMeteoClient {
    pub fn new(settings: OpenMeteoSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build Open-Meteo HTTP client")?;

        let base_url = match (&settings.base_url, &settings.api_key) {
            (Some(url), _) => url.clone(),
            (None, Some(_)) => CUSTOMER_API_URL.to_string(),
            (None, None) => FREE_API_URL.to_string(),
        };

        Ok(Self {
            http,
            base_url,
            api_key: settings.api_key,
            forecast_hours: settings.forecast_hours.max(1),
            forecast_days: settings.forecast_days.clamp(1, MAX_FORECAST_DAYS),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request URL without the API key (safe to log).
    fn build_url(&self, position: Position, query: Query) -> String {
        let mut url = format!(
            "{}?latitude={}&longitude={}&timeformat=unixtime&cell_selection=sea",
            self.base_url, position.latitude, position.longitude
        );

        let (hours, days) = match query {
            Query::Current => {
                url.push_str(&format!("&current={}", CURRENT_FIELDS.join(",")));
                (None, None)
            }
            Query::Hourly { hours } => {
                url.push_str(&format!("&hourly={}", HOURLY_FIELDS.join(",")));
                (Some(hours), None)
            }
            Query::Daily { days } => {
                url.push_str(&format!("&daily={}", DAILY_FIELDS.join(",")));
                (None, Some(days))
            }
            Query::All { hours, days } => {
                url.push_str(&format!(
                    "&current={}&hourly={}&daily={}",
                    CURRENT_FIELDS.join(","),
                    HOURLY_FIELDS.join(","),
                    DAILY_FIELDS.join(",")
                ));
                (Some(hours), Some(days))
            }
        };

        if let Some(hours) = hours {
            url.push_str(&format!("&forecast_hours={}", hours.clamp(1, MAX_FORECAST_HOURS)));
        }
        if let Some(days) = days {
            url.push_str(&format!("&forecast_days={}", days.clamp(1, MAX_FORECAST_DAYS)));
        }
        url
    }

    /// Issue one GET and decode the body.
    async fn request(&self, position: Position, query: Query) -> Result<OpenMeteoResponse, FetchError> {
        let url = self.build_url(position, query);
        debug!(%url, "Open-Meteo request");

        let full_url = match &self.api_key {
            Some(key) => format!("{url}&apikey={}", urlencoding::encode(key.expose_secret())),
            None => url,
        };

        let resp = self
            .http
            .get(&full_url)
            .send()
            .await
            .map_err(|e| FetchError::new(position, e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| FetchError::new(position, e))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), %position, "Open-Meteo API error");
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(FetchError::new(
                position,
                FetchFailure::Status {
                    status: status.as_u16(),
                    body,
                },
            ));
        }

        serde_json::from_str(&body)
            .map_err(|e| FetchError::parse(position, format!("Open-Meteo response: {e}")))
    }
}

#[async_trait]
impl WeatherSource for OpenMeteoClient {
    async fn fetch_observations(
        &self,
        position: Position,
        params: &WeatherReqParams,
    ) -> Result<Vec<WeatherRecord>, FetchError> {
        let resp = self.request(position, Query::Current).await?;
        let records = resp.current.as_ref().map(translate_current).unwrap_or_default();
        Ok(params.apply(records))
    }

    async fn fetch_forecasts(
        &self,
        position: Position,
        kind: ForecastKind,
        params: &WeatherReqParams,
    ) -> Result<Vec<WeatherRecord>, FetchError> {
        let count = params.max_count.map(|n| u32::try_from(n).unwrap_or(u32::MAX));
        let records = match kind {
            ForecastKind::Point => {
                let hours = count.unwrap_or(self.forecast_hours).clamp(1, MAX_FORECAST_HOURS);
                let resp = self.request(position, Query::Hourly { hours }).await?;
                resp.hourly.as_ref().map(translate_hourly).unwrap_or_default()
            }
            ForecastKind::Daily => {
                let days = count.unwrap_or(self.forecast_days).clamp(1, MAX_FORECAST_DAYS);
                let resp = self.request(position, Query::Daily { days }).await?;
                resp.daily.as_ref().map(translate_daily).unwrap_or_default()
            }
        };
        Ok(params.apply(records))
    }

    async fn fetch_payload(
        &self,
        cell: CellId,
        position: Position,
    ) -> Result<WeatherPayload, FetchError> {
        let query = Query::All {
            hours: self.forecast_hours,
            days: self.forecast_days,
        };
        let resp = self.request(position, query).await?;

        let observations = resp.current.as_ref().map(translate_current).unwrap_or_default();
        let forecasts = translate_forecasts(&resp);
        debug!(
            %cell,
            observations = observations.len(),
            forecasts = forecasts.len(),
            "Open-Meteo payload translated"
        );

        Ok(WeatherPayload {
            id: cell,
            position,
            observations,
            forecasts,
            warnings: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
