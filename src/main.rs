//! meteo-relay: geospatial weather relay
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the spatial cache, then runs the acquisition scheduler and the
//! HTTP API until Ctrl+C or until polling halts.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use meteo_relay::api;
use meteo_relay::api::routes::ApiState;
use meteo_relay::config::AppConfig;
use meteo_relay::data::openmeteo::OpenMeteoClient;
use meteo_relay::engine::cache::SpatialCache;
use meteo_relay::engine::runner;
use meteo_relay::engine::scheduler::Scheduler;
use meteo_relay::engine::service::WeatherService;
use meteo_relay::engine::timers::TokioTimers;
use meteo_relay::host::{Clock, LatestDelta, SharedPosition, SystemClock};
use meteo_relay::storage::FileStore;

const DEFAULT_CONFIG: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = AppConfig::load_or_default(&config_path)?;

    init_logging();

    info!(
        config = %config_path,
        poll_interval_mins = cfg.weather.poll_interval_mins,
        forecast_hours = cfg.weather.forecast_hours,
        forecast_days = cfg.weather.forecast_days,
        "meteo-relay starting up"
    );

    // -- Initialise components -------------------------------------------

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = Arc::new(FileStore::new(cfg.cache.dir()));
    let cache = SpatialCache::open(store, clock.clone(), cfg.cache.precision, cfg.cache.max_age_mins)
        .await
        .context("Cache storage unavailable")?;
    cache.set_max_entries(cfg.cache.max_entries);

    let source = OpenMeteoClient::new(cfg.open_meteo())?;
    info!(endpoint = source.base_url(), "Using Open-Meteo");

    let service = Arc::new(
        WeatherService::new(Arc::new(cache), Arc::new(source)).with_horizon(cfg.forecast_horizon()),
    );
    let position = Arc::new(SharedPosition::new(cfg.static_position()));
    let deltas = Arc::new(LatestDelta::new());

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let timers = TokioTimers::new(tx.clone(), clock.clone());
    let scheduler = Scheduler::new(
        cfg.scheduler_settings(),
        service.clone(),
        position.clone(),
        deltas.clone(),
        clock,
        Box::new(timers),
    );
    let mut handle = runner::spawn(scheduler, tx, rx);

    if cfg.api.enabled {
        let state = Arc::new(ApiState {
            service,
            position,
            deltas,
            scheduler: handle.status(),
            started_at: chrono::Utc::now(),
        });
        api::spawn_api(state, cfg.api.port).await?;
    } else {
        warn!("HTTP API disabled");
    }

    // -- Run until shutdown ----------------------------------------------

    info!("Running. Press Ctrl+C to stop.");

    let finished = tokio::select! {
        result = handle.wait() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match finished {
        Some(Err(e)) => {
            error!(error = %e, "Weather polling halted, restart required");
            return Err(e.into());
        }
        Some(Ok(())) => info!("Scheduler loop finished"),
        None => {
            info!("Shutdown signal received.");
            handle.stop().await?;
        }
    }

    info!("meteo-relay shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("meteo_relay=info"));

    let json_logging = std::env::var("METEO_RELAY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
