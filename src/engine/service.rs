//! Cache-first weather acquisition.
//!
//! Shared by the scheduler and the HTTP API. Every upstream call, payload
//! or filtered, goes through one gate so at most one is in flight; a
//! caller that waited on the gate re-checks the cache before fetching,
//! since the previous holder may have filled it. Record counts asked of
//! the API are capped at the configured horizon, so the cache answers
//! them whenever it holds a full payload.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::cache::SpatialCache;
use crate::data::WeatherSource;
use crate::types::{
    AcquireError, ForecastKind, Position, WeatherPayload, WeatherRecord, WeatherReqParams,
};

/// A payload and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquired {
    pub payload: WeatherPayload,
    pub cached: bool,
}

/// Records per forecast kind held by one cached payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastHorizon {
    pub hours: u32,
    pub days: u32,
}

impl Default for ForecastHorizon {
    fn default() -> Self {
        Self { hours: 8, days: 5 }
    }
}

impl ForecastHorizon {
    fn limit(&self, kind: ForecastKind) -> usize {
        let n = match kind {
            ForecastKind::Point => self.hours,
            ForecastKind::Daily => self.days,
        };
        usize::try_from(n).unwrap_or(usize::MAX)
    }
}

pub struct WeatherService {
    cache: Arc<SpatialCache>,
    source: Arc<dyn WeatherSource>,
    horizon: ForecastHorizon,
    fetch_gate: Mutex<()>,
}

impl WeatherService {
    pub fn new(cache: Arc<SpatialCache>, source: Arc<dyn WeatherSource>) -> Self {
        Self {
            cache,
            source,
            horizon: ForecastHorizon::default(),
            fetch_gate: Mutex::new(()),
        }
    }

    pub fn with_horizon(mut self, horizon: ForecastHorizon) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn cache(&self) -> &Arc<SpatialCache> {
        &self.cache
    }

    /// Fresh cached payload covering `position`, if any.
    ///
    /// A cell that is indexed but unreadable is logged and treated as a miss.
    pub async fn cached(&self, position: &Position) -> Option<WeatherPayload> {
        let cell = self.cache.lookup(position).await?;
        match self.cache.get(&cell).await {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(%cell, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Cached payload for `position`, or a new one fetched and stored.
    ///
    /// A failed cache write fails the whole call: the data is not handed
    /// out unless the cache agrees it has it.
    pub async fn acquire(&self, position: Position) -> Result<Acquired, AcquireError> {
        if let Some(payload) = self.cached(&position).await {
            debug!(%position, cell = %payload.id, "Cache hit");
            return Ok(Acquired {
                payload,
                cached: true,
            });
        }

        let _gate = self.fetch_gate.lock().await;
        if let Some(payload) = self.cached(&position).await {
            debug!(%position, cell = %payload.id, "Cache filled while waiting");
            return Ok(Acquired {
                payload,
                cached: true,
            });
        }

        let cell = self.cache.cell_for(&position);
        info!(%position, %cell, "Cache miss, fetching upstream");
        let payload = self.source.fetch_payload(cell.clone(), position).await?;
        self.cache.put(&cell, &payload).await?;

        Ok(Acquired {
            payload,
            cached: false,
        })
    }

    /// Observations at `position` with `params` applied.
    ///
    /// Served from the cached payload unless filtering leaves nothing, in
    /// which case the source is asked directly.
    pub async fn observations(
        &self,
        position: Position,
        params: &WeatherReqParams,
    ) -> Result<Vec<WeatherRecord>, AcquireError> {
        if params.max_count == Some(0) {
            return Ok(Vec::new());
        }
        let acquired = self.acquire(position).await?;
        let records = params.apply(acquired.payload.observations);
        if !records.is_empty() {
            return Ok(records);
        }

        let _gate = self.fetch_gate.lock().await;
        debug!(%position, "Cached observations filtered out, asking upstream");
        Ok(self.source.fetch_observations(position, params).await?)
    }

    /// Forecasts of one kind at `position` with `params` applied.
    ///
    /// `maxCount` is capped at the configured horizon. The source is only
    /// asked directly when the cached payload cannot fill even that.
    pub async fn forecasts(
        &self,
        position: Position,
        kind: ForecastKind,
        params: &WeatherReqParams,
    ) -> Result<Vec<WeatherRecord>, AcquireError> {
        let params = WeatherReqParams {
            max_count: params.max_count.map(|n| n.min(self.horizon.limit(kind))),
            start_date: params.start_date,
        };
        if params.max_count == Some(0) {
            return Ok(Vec::new());
        }

        let acquired = self.acquire(position).await?;
        let records = params.apply(acquired.payload.forecasts_of(kind));
        let short = records.is_empty() || params.max_count.is_some_and(|n| records.len() < n);
        if !short {
            return Ok(records);
        }

        let _gate = self.fetch_gate.lock().await;
        debug!(%position, ?kind, cached = records.len(), "Cached horizon too short, asking upstream");
        Ok(self.source.fetch_forecasts(position, kind, &params).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
