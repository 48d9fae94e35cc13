//! API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

use crate::engine::scheduler::SchedulerStatus;
use crate::engine::service::WeatherService;
use crate::host::{LatestDelta, PositionSource, SharedPosition};
use crate::types::{
    AcquireError, CellId, ForecastKind, Position, Warning, WeatherDelta, WeatherRecord,
    WeatherReqParams,
};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub service: Arc<WeatherService>,
    pub position: Arc<SharedPosition>,
    pub deltas: Arc<LatestDelta>,
    pub scheduler: watch::Receiver<SchedulerStatus>,
    pub started_at: DateTime<Utc>,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Query string for the weather endpoints. Without `lat`/`lon` the
/// current vessel position is used.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub max_count: Option<usize>,
    pub start_date: Option<DateTime<Utc>>,
}

impl WeatherQuery {
    fn params(&self) -> WeatherReqParams {
        WeatherReqParams {
            max_count: self.max_count,
            start_date: self.start_date,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedCell {
    pub cell: CellId,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub scheduler: SchedulerStatus,
    pub position: Option<Position>,
    pub cache_max_age_mins: i64,
    pub cached_cells: Vec<CachedCell>,
    pub updates_published: u64,
    pub uptime_secs: i64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Upstream(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Upstream(m) => (StatusCode::BAD_GATEWAY, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<AcquireError> for ApiError {
    fn from(err: AcquireError) -> Self {
        warn!(error = %err, "Weather request failed");
        match err {
            AcquireError::Fetch(e) => ApiError::Upstream(e.to_string()),
            AcquireError::Cache(e) => ApiError::Internal(e.to_string()),
        }
    }
}

fn resolve_position(state: &ApiState, lat: Option<f64>, lon: Option<f64>) -> Result<Position, ApiError> {
    let position = match (lat, lon) {
        (Some(lat), Some(lon)) => Position::new(lat, lon),
        (None, None) => state
            .position
            .current_position()
            .ok_or_else(|| ApiError::BadRequest("No position supplied or known".into()))?,
        _ => return Err(ApiError::BadRequest("lat and lon must be given together".into())),
    };
    if !position.is_valid() {
        return Err(ApiError::BadRequest(format!("Position out of range: {position}")));
    }
    Ok(position)
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let cache = state.service.cache();
    let cached_cells = cache
        .entries()
        .await
        .into_iter()
        .map(|(cell, entry)| CachedCell {
            cell,
            updated_at: entry.updated_at,
            last_accessed_at: entry.last_accessed_at,
        })
        .collect();

    Json(StatusResponse {
        scheduler: state.scheduler.borrow().clone(),
        position: state.position.current_position(),
        cache_max_age_mins: cache.max_age(),
        cached_cells,
        updates_published: state.deltas.published(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// PUT /api/position
pub async fn put_position(
    State(state): State<AppState>,
    Json(position): Json<Position>,
) -> Result<StatusCode, ApiError> {
    if !position.is_valid() {
        return Err(ApiError::BadRequest(format!("Position out of range: {position}")));
    }
    state.position.set(position);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/delta
pub async fn get_delta(State(state): State<AppState>) -> Result<Json<WeatherDelta>, ApiError> {
    state
        .deltas
        .latest()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No update published yet".into()))
}

/// GET /api/weather/observations
pub async fn get_observations(
    State(state): State<AppState>,
    Query(query): Query<WeatherQuery>,
) -> Result<Json<Vec<WeatherRecord>>, ApiError> {
    let position = resolve_position(&state, query.lat, query.lon)?;
    let records = state.service.observations(position, &query.params()).await?;
    Ok(Json(records))
}

/// GET /api/weather/forecasts/:kind
pub async fn get_forecasts(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<WeatherQuery>,
) -> Result<Json<Vec<WeatherRecord>>, ApiError> {
    let kind: ForecastKind = kind.parse().map_err(ApiError::BadRequest)?;
    let position = resolve_position(&state, query.lat, query.lon)?;
    let records = state.service.forecasts(position, kind, &query.params()).await?;
    Ok(Json(records))
}

/// GET /api/weather/warnings
///
/// Open-Meteo publishes no warnings; the cached payload's list is returned
/// as-is, which is always empty for this source.
pub async fn get_warnings(
    State(state): State<AppState>,
    Query(query): Query<WeatherQuery>,
) -> Result<Json<Vec<Warning>>, ApiError> {
    let position = resolve_position(&state, query.lat, query.lon)?;
    let warnings = state
        .service
        .cached(&position)
        .await
        .map(|p| p.warnings)
        .unwrap_or_default();
    Ok(Json(warnings))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
