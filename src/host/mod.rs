//! Host collaborators.
//!
//! The engine reads the vessel position from, and publishes updates to,
//! whatever hosts it. These traits are the seam; the concrete types here
//! back them with `watch` channels so the HTTP API and the scheduler can
//! share one position feed and one "latest update" slot.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::types::{PathValue, Position, WeatherDelta, WeatherPayload, WeatherRecord};

/// Source label attached to published updates.
pub const DELTA_SOURCE: &str = "open-meteo";

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Where the current position comes from.
#[cfg_attr(test, mockall::automock)]
pub trait PositionSource: Send + Sync {
    /// Latest known position, if any.
    fn current_position(&self) -> Option<Position>;
}

/// Where normalised updates go.
#[cfg_attr(test, mockall::automock)]
pub trait Publisher: Send + Sync {
    fn publish(&self, delta: &WeatherDelta);
}

/// Wall clock, injectable for tests.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used for replays and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = time;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// ---------------------------------------------------------------------------
// Position feed
// ---------------------------------------------------------------------------

/// Position slot fed by the host (or the HTTP API).
#[derive(Debug)]
pub struct SharedPosition {
    tx: watch::Sender<Option<Position>>,
}

impl SharedPosition {
    pub fn new(initial: Option<Position>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, position: Position) {
        debug!(%position, "Position updated");
        self.tx.send_replace(Some(position));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Position>> {
        self.tx.subscribe()
    }
}

impl PositionSource for SharedPosition {
    fn current_position(&self) -> Option<Position> {
        *self.tx.borrow()
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Keeps the most recent update and a running count.
#[derive(Debug)]
pub struct LatestDelta {
    tx: watch::Sender<Option<WeatherDelta>>,
    published: AtomicU64,
}

impl Default for LatestDelta {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx,
            published: AtomicU64::new(0),
        }
    }
}

impl LatestDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<WeatherDelta> {
        self.tx.borrow().clone()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<WeatherDelta>> {
        self.tx.subscribe()
    }
}

impl Publisher for LatestDelta {
    fn publish(&self, delta: &WeatherDelta) {
        let n = self.published.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            position = %delta.position,
            values = delta.values.len(),
            count = n,
            "Publishing weather update"
        );
        self.tx.send_replace(Some(delta.clone()));
    }
}

// ---------------------------------------------------------------------------
// Delta flattening
// ---------------------------------------------------------------------------

/// Build the update event for a payload from its first observation.
///
/// Only fields that are present produce a path; absent fields are left
/// out entirely rather than sent as null.
pub fn build_delta(payload: &WeatherPayload, timestamp: DateTime<Utc>) -> WeatherDelta {
    let values = payload
        .observations
        .first()
        .map(flatten_record)
        .unwrap_or_default();

    WeatherDelta {
        source: DELTA_SOURCE.to_string(),
        timestamp,
        position: payload.position,
        values,
    }
}

/// Flatten one record into (path, value) pairs.
pub fn flatten_record(record: &WeatherRecord) -> Vec<PathValue> {
    let mut values = Vec::new();

    if let Some(description) = &record.description {
        values.push(PathValue {
            path: "environment.outside.description".to_string(),
            value: Value::String(description.clone()),
        });
    }

    push_block(&mut values, "environment.outside", record.outside.as_ref());
    push_block(&mut values, "environment.water", record.water.as_ref());
    push_block(&mut values, "environment.wind", record.wind.as_ref());
    push_block(&mut values, "environment.sunlight.times", record.sun.as_ref());

    values
}

fn push_block<T: serde::Serialize>(out: &mut Vec<PathValue>, prefix: &str, block: Option<&T>) {
    let Some(block) = block else { return };
    // Blocks skip `None` fields when serialised, so every entry is present.
    if let Ok(Value::Object(fields)) = serde_json::to_value(block) {
        for (key, value) in fields {
            if value.is_null() {
                continue;
            }
            out.push(PathValue {
                path: format!("{prefix}.{key}"),
                value,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
