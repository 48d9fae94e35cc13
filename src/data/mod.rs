//! Upstream weather sources.
//!
//! Defines the `WeatherSource` trait and the Open-Meteo implementation
//! that translates the upstream schema into the domain model.

pub mod openmeteo;

use async_trait::async_trait;

use crate::types::{
    CellId, FetchError, ForecastKind, Position, WeatherPayload, WeatherRecord, WeatherReqParams,
};

/// Abstraction over upstream weather providers.
///
/// Implementations issue one request per call and never retry; retry
/// policy belongs to the scheduler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Current conditions at `position`.
    async fn fetch_observations(
        &self,
        position: Position,
        params: &WeatherReqParams,
    ) -> Result<Vec<WeatherRecord>, FetchError>;

    /// Hourly or daily forecasts at `position`.
    async fn fetch_forecasts(
        &self,
        position: Position,
        kind: ForecastKind,
        params: &WeatherReqParams,
    ) -> Result<Vec<WeatherRecord>, FetchError>;

    /// Observations plus both forecast kinds in a single request, ready
    /// to be cached under `cell`.
    async fn fetch_payload(
        &self,
        cell: CellId,
        position: Position,
    ) -> Result<WeatherPayload, FetchError>;
}
