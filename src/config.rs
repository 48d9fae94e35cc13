//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! field has a default, so a partial file (or none at all) is usable.
//! Secrets (the Open-Meteo API key) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::data::openmeteo::OpenMeteoSettings;
use crate::engine::cache::DEFAULT_MAX_ENTRIES;
use crate::engine::scheduler::SchedulerSettings;
use crate::engine::service::ForecastHorizon;
use crate::geohash::MAX_PRECISION;
use crate::types::Position;

/// Poll intervals offered to the user, in minutes.
pub const POLL_INTERVALS_MINS: [u64; 5] = [5, 10, 15, 30, 60];

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub weather: WeatherConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub position: PositionConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WeatherConfig {
    pub enabled: bool,
    pub poll_interval_mins: u64,
    pub forecast_hours: u32,
    pub forecast_days: u32,
    pub api_key_env: String,
    /// Override the Open-Meteo endpoint.
    pub base_url: Option<String>,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_mins: 5,
            forecast_hours: 8,
            forecast_days: 5,
            api_key_env: "OPEN_METEO_API_KEY".to_string(),
            base_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// Data directory; cache files live in `<path>/cache`.
    pub path: PathBuf,
    pub max_age_mins: i64,
    pub precision: usize,
    /// Cells kept before the oldest are evicted.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data"),
            max_age_mins: 60,
            precision: 5,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    pub fn dir(&self) -> PathBuf {
        self.path.join("cache")
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub wake_interval_secs: u64,
    pub watchdog_tolerance_secs: u64,
    pub retry_interval_secs: u64,
    pub max_fetch_retries: u32,
    pub position_retry_secs: u64,
    pub max_position_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            wake_interval_secs: 60,
            watchdog_tolerance_secs: 10,
            retry_interval_secs: 10,
            max_fetch_retries: 3,
            position_retry_secs: 10,
            max_position_retries: 12,
        }
    }
}

/// Optional fixed position seeding the position feed.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PositionConfig {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3030,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse and validate a TOML document.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let w = &self.weather;
        if !POLL_INTERVALS_MINS.contains(&w.poll_interval_mins) {
            bail!(
                "weather.poll_interval_mins must be one of {:?}, got {}",
                POLL_INTERVALS_MINS,
                w.poll_interval_mins
            );
        }
        if w.forecast_hours == 0 || w.forecast_days == 0 {
            bail!("weather.forecast_hours and weather.forecast_days must be positive");
        }

        if !(1..=MAX_PRECISION).contains(&self.cache.precision) {
            bail!(
                "cache.precision must be between 1 and {MAX_PRECISION}, got {}",
                self.cache.precision
            );
        }

        if self.cache.max_entries == 0 {
            bail!("cache.max_entries must be positive");
        }

        let s = &self.scheduler;
        if s.wake_interval_secs == 0 {
            bail!("scheduler.wake_interval_secs must be positive");
        }
        if s.watchdog_tolerance_secs >= s.wake_interval_secs {
            bail!(
                "scheduler.watchdog_tolerance_secs ({}) must be below wake_interval_secs ({})",
                s.watchdog_tolerance_secs,
                s.wake_interval_secs
            );
        }

        match (self.position.latitude, self.position.longitude) {
            (None, None) => {}
            (Some(lat), Some(lon)) => {
                let position = Position::new(lat, lon);
                if !position.is_valid() {
                    bail!("position {position} is out of range");
                }
            }
            _ => bail!("position.latitude and position.longitude must be set together"),
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The configured static position, if any.
    pub fn static_position(&self) -> Option<Position> {
        match (self.position.latitude, self.position.longitude) {
            (Some(lat), Some(lon)) => Some(Position::new(lat, lon)),
            _ => None,
        }
    }

    /// Open-Meteo client settings. A missing or empty key means the free API.
    pub fn open_meteo(&self) -> OpenMeteoSettings {
        let api_key = Self::resolve_env(&self.weather.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::new);

        OpenMeteoSettings {
            base_url: self.weather.base_url.clone(),
            api_key,
            forecast_hours: self.weather.forecast_hours,
            forecast_days: self.weather.forecast_days,
        }
    }

    /// What one cached payload holds, in records per forecast kind.
    pub fn forecast_horizon(&self) -> ForecastHorizon {
        ForecastHorizon {
            hours: self.weather.forecast_hours,
            days: self.weather.forecast_days,
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        let s = &self.scheduler;
        SchedulerSettings {
            enabled: self.weather.enabled,
            fetch_interval: Duration::from_secs(self.weather.poll_interval_mins * 60),
            wake_interval: Duration::from_secs(s.wake_interval_secs),
            watchdog_tolerance: Duration::from_secs(s.watchdog_tolerance_secs),
            retry_interval: Duration::from_secs(s.retry_interval_secs),
            max_fetch_retries: s.max_fetch_retries,
            position_retry: Duration::from_secs(s.position_retry_secs),
            max_position_retries: s.max_position_retries,
        }
    }
}
