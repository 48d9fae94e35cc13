//! Acquisition scheduler.
//!
//! A state machine advanced by two triggers: the recurring wake tick and
//! the one-shot retry. Each poll asks the host for a position, decides
//! whether a fetch is due, acquires a payload cache-first and publishes
//! the flattened update.
//!
//! ```text
//!   Idle ──start──▶ AwaitingPosition ──position, due──▶ Fetching ──ok──▶ Sleeping
//!                     │   ▲      │                         │               │
//!             no pos  │   │      └──position, not due──────┼──────────────▶│
//!           (retry) ◀─┘   │                                │ err           │ wake
//!                         └──────── retry ◀── Retrying ◀───┘               │
//!                         ◀───────────────────────────────────────────────┘
//! ```
//!
//! Exceeding either retry bound, or a watchdog trip, halts polling
//! (`Idle`, all timers cancelled) until `start` is called again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::service::WeatherService;
use super::timers::{Timers, Trigger};
use crate::host::{build_delta, Clock, PositionSource, Publisher};
use crate::types::{CellId, SchedulerError};

// ---------------------------------------------------------------------------
// State and settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SchedulerState {
    Idle,
    AwaitingPosition,
    Fetching,
    Sleeping,
    Retrying,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    /// Minimum time between successful fetches.
    pub fetch_interval: Duration,
    /// Period of the "is a fetch due yet" heartbeat.
    pub wake_interval: Duration,
    /// Wake ticks closer together than `wake_interval - watchdog_tolerance`
    /// trip the watchdog.
    pub watchdog_tolerance: Duration,
    pub retry_interval: Duration,
    pub max_fetch_retries: u32,
    pub position_retry: Duration,
    pub max_position_retries: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            fetch_interval: Duration::from_secs(5 * 60),
            wake_interval: Duration::from_secs(60),
            watchdog_tolerance: Duration::from_secs(10),
            retry_interval: Duration::from_secs(10),
            max_fetch_retries: 3,
            position_retry: Duration::from_secs(10),
            max_position_retries: 12,
        }
    }
}

/// Point-in-time view of the scheduler, for the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub fetch_failures: u32,
    pub position_misses: u32,
    pub last_fetch: Option<DateTime<Utc>>,
    pub last_wake: Option<DateTime<Utc>>,
    pub last_cell: Option<CellId>,
    pub last_error: Option<String>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            fetch_failures: 0,
            position_misses: 0,
            last_fetch: None,
            last_wake: None,
            last_cell: None,
            last_error: None,
        }
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    settings: SchedulerSettings,
    service: Arc<WeatherService>,
    positions: Arc<dyn PositionSource>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    timers: Box<dyn Timers>,

    state: SchedulerState,
    fetch_failures: u32,
    position_misses: u32,
    last_fetch: Option<DateTime<Utc>>,
    last_wake: Option<DateTime<Utc>>,
    last_cell: Option<CellId>,
    last_error: Option<String>,
    status_tx: watch::Sender<SchedulerStatus>,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        service: Arc<WeatherService>,
        positions: Arc<dyn PositionSource>,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
        timers: Box<dyn Timers>,
    ) -> Self {
        let (status_tx, _rx) = watch::channel(SchedulerStatus::default());
        Self {
            settings,
            service,
            positions,
            publisher,
            clock,
            timers,
            state: SchedulerState::Idle,
            fetch_failures: 0,
            position_misses: 0,
            last_fetch: None,
            last_wake: None,
            last_cell: None,
            last_error: None,
            status_tx,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state,
            fetch_failures: self.fetch_failures,
            position_misses: self.position_misses,
            last_fetch: self.last_fetch,
            last_wake: self.last_wake,
            last_cell: self.last_cell.clone(),
            last_error: self.last_error.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status_tx.subscribe()
    }

    /// Begin polling. No-op when disabled or already running.
    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        if !self.settings.enabled {
            info!("Weather polling disabled");
            return Ok(());
        }
        if self.state != SchedulerState::Idle {
            debug!(state = ?self.state, "Start ignored, already running");
            return Ok(());
        }

        info!(
            fetch_interval_secs = self.settings.fetch_interval.as_secs(),
            wake_interval_secs = self.settings.wake_interval.as_secs(),
            "Starting weather polling"
        );
        self.fetch_failures = 0;
        self.position_misses = 0;
        self.set_state(SchedulerState::AwaitingPosition);
        self.poll().await
    }

    /// Cancel every timer and forget the last fetch, so the next `start`
    /// fetches immediately.
    pub fn stop(&mut self) {
        self.timers.cancel_all();
        self.last_fetch = None;
        self.last_wake = None;
        self.fetch_failures = 0;
        self.position_misses = 0;
        self.set_state(SchedulerState::Idle);
        info!("Weather polling stopped");
    }

    /// React to one trigger. An `Err` means polling has halted.
    pub async fn handle(&mut self, trigger: Trigger) -> Result<(), SchedulerError> {
        if trigger == Trigger::Stop {
            self.stop();
            return Ok(());
        }
        if self.state == SchedulerState::Idle {
            debug!(?trigger, "Trigger ignored while idle");
            return Ok(());
        }

        match trigger {
            Trigger::Wake { fired_at } => {
                self.check_watchdog(fired_at)?;
                if self.state != SchedulerState::Sleeping {
                    debug!(state = ?self.state, "Wake tick ignored");
                    return Ok(());
                }
                self.set_state(SchedulerState::AwaitingPosition);
                self.poll().await
            }
            Trigger::Retry => match self.state {
                SchedulerState::Retrying | SchedulerState::AwaitingPosition => {
                    self.set_state(SchedulerState::AwaitingPosition);
                    self.poll().await
                }
                state => {
                    debug!(?state, "Retry ignored");
                    Ok(())
                }
            },
            Trigger::Stop => Ok(()),
        }
    }

    fn check_watchdog(&mut self, fired_at: DateTime<Utc>) -> Result<(), SchedulerError> {
        let Some(previous) = self.last_wake.replace(fired_at) else {
            return Ok(());
        };

        let elapsed_ms = (fired_at - previous).num_milliseconds();
        let min_ms = millis(
            self.settings
                .wake_interval
                .saturating_sub(self.settings.watchdog_tolerance),
        );

        if elapsed_ms < min_ms {
            let err = SchedulerError::Watchdog { elapsed_ms, min_ms };
            error!(elapsed_ms, min_ms, "Wake timer firing too fast, halting polling");
            self.last_error = Some(err.to_string());
            self.halt();
            return Err(err);
        }
        Ok(())
    }

    async fn poll(&mut self) -> Result<(), SchedulerError> {
        let Some(position) = self.positions.current_position() else {
            return self.position_missing();
        };
        self.position_misses = 0;

        let now = self.clock.now();
        if let Some(last) = self.last_fetch {
            let since_ms = (now - last).num_milliseconds();
            if since_ms < millis(self.settings.fetch_interval) {
                debug!(since_secs = since_ms / 1000, "Fetch not due yet");
                self.sleep();
                return Ok(());
            }
        }

        self.set_state(SchedulerState::Fetching);
        match self.service.acquire(position).await {
            Ok(acquired) => {
                let now = self.clock.now();
                self.fetch_failures = 0;
                self.last_fetch = Some(now);
                self.last_cell = Some(acquired.payload.id.clone());
                self.last_error = None;

                let delta = build_delta(&acquired.payload, now);
                self.publisher.publish(&delta);
                info!(
                    %position,
                    cell = %acquired.payload.id,
                    cached = acquired.cached,
                    "Weather update published"
                );

                self.sleep();
                Ok(())
            }
            Err(e) => self.fetch_failed(e.to_string()),
        }
    }

    fn position_missing(&mut self) -> Result<(), SchedulerError> {
        self.position_misses += 1;
        let attempts = self.position_misses;
        let max = self.settings.max_position_retries;

        if attempts > max {
            let err = SchedulerError::PositionUnavailable { attempts };
            error!(attempts, "No position available, halting polling");
            self.last_error = Some(err.to_string());
            self.halt();
            return Err(err);
        }

        warn!(attempt = attempts, max, "No position available, will retry");
        self.timers.arm_retry(self.settings.position_retry);
        self.publish_status();
        Ok(())
    }

    fn fetch_failed(&mut self, reason: String) -> Result<(), SchedulerError> {
        self.fetch_failures += 1;
        let attempts = self.fetch_failures;
        let max = self.settings.max_fetch_retries;
        self.last_error = Some(reason.clone());

        if attempts > max {
            error!(attempts, error = %reason, "Weather fetch retries exhausted, halting polling");
            self.fetch_failures = 0;
            self.halt();
            return Err(SchedulerError::RetriesExhausted {
                attempts,
                last_error: reason,
            });
        }

        warn!(attempt = attempts, max, error = %reason, "Weather fetch failed, will retry");
        self.set_state(SchedulerState::Retrying);
        self.timers.arm_retry(self.settings.retry_interval);
        Ok(())
    }

    fn sleep(&mut self) {
        if !self.timers.wake_armed() {
            self.timers.arm_wake(self.settings.wake_interval);
            self.last_wake = Some(self.clock.now());
        }
        self.set_state(SchedulerState::Sleeping);
    }

    fn halt(&mut self) {
        self.timers.cancel_all();
        self.set_state(SchedulerState::Idle);
    }

    fn set_state(&mut self, state: SchedulerState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Scheduler transition");
        }
        self.state = state;
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.status());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
