//! Mock host for integration testing.
//!
//! Deterministic stand-ins for everything the scheduler talks to: a
//! scripted weather source, a position feed that counts queries, a
//! recording publisher, an in-memory blob store, recording timers and a
//! clock that follows tokio's (pausable) time.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meteo_relay::data::WeatherSource;
use meteo_relay::engine::timers::Timers;
use meteo_relay::host::{Clock, PositionSource, Publisher};
use meteo_relay::storage::BlobStore;
use meteo_relay::types::*;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// A payload whose single observation carries a few fields.
pub fn sample_payload(cell: CellId, position: Position) -> WeatherPayload {
    let mut obs = WeatherRecord::new(RecordKind::Observation, t0());
    obs.description = Some("Partly cloudy".to_string());
    obs.outside = Some(OutsideBlock {
        temperature: Some(293.15),
        pressure: Some(101_300.0),
        ..OutsideBlock::default()
    });
    obs.wind = Some(WindBlock {
        speed_true: Some(7.5),
        direction_true: Some(1.5),
        ..WindBlock::default()
    });

    WeatherPayload {
        id: cell,
        position,
        observations: vec![obs],
        forecasts: vec![WeatherRecord::new(RecordKind::Point, t0())],
        warnings: vec![],
    }
}

// ---------------------------------------------------------------------------
// Weather source
// ---------------------------------------------------------------------------

/// Answers `fetch_payload` with `sample_payload`, unless an error is forced.
#[derive(Default)]
pub struct ScriptedSource {
    calls: AtomicUsize,
    /// Failures to return before succeeding again.
    failures: Mutex<VecDeque<String>>,
    force_error: Mutex<Option<String>>,
    cells: Mutex<Vec<CellId>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` fetches.
    pub fn fail_next(&self, n: usize, msg: &str) {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..n {
            failures.push_back(msg.to_string());
        }
    }

    /// Fail every fetch until cleared.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Cells fetched, in order.
    pub fn cells(&self) -> Vec<CellId> {
        self.cells.lock().unwrap().clone()
    }

    fn next_error(&self) -> Option<String> {
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Some(msg);
        }
        self.failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl WeatherSource for ScriptedSource {
    async fn fetch_observations(
        &self,
        position: Position,
        params: &WeatherReqParams,
    ) -> Result<Vec<WeatherRecord>, FetchError> {
        let payload = sample_payload(CellId::new("-"), position);
        Ok(params.apply(payload.observations))
    }

    async fn fetch_forecasts(
        &self,
        position: Position,
        kind: ForecastKind,
        params: &WeatherReqParams,
    ) -> Result<Vec<WeatherRecord>, FetchError> {
        let payload = sample_payload(CellId::new("-"), position);
        Ok(params.apply(payload.forecasts_of(kind)))
    }

    async fn fetch_payload(
        &self,
        cell: CellId,
        position: Position,
    ) -> Result<WeatherPayload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.next_error() {
            return Err(FetchError::parse(position, msg));
        }
        self.cells.lock().unwrap().push(cell.clone());
        Ok(sample_payload(cell, position))
    }
}

// ---------------------------------------------------------------------------
// Position feed
// ---------------------------------------------------------------------------

/// Position slot that counts how often it was asked.
#[derive(Default)]
pub struct ScriptedPositions {
    position: Mutex<Option<Position>>,
    queries: AtomicUsize,
}

impl ScriptedPositions {
    pub fn at(position: Position) -> Self {
        Self {
            position: Mutex::new(Some(position)),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }

    pub fn move_to(&self, position: Position) {
        *self.position.lock().unwrap() = Some(position);
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl PositionSource for ScriptedPositions {
    fn current_position(&self) -> Option<Position> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        *self.position.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingPublisher {
    deltas: Mutex<Vec<WeatherDelta>>,
}

impl RecordingPublisher {
    pub fn deltas(&self) -> Vec<WeatherDelta> {
        self.deltas.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.deltas.lock().unwrap().len()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, delta: &WeatherDelta) {
        self.deltas.lock().unwrap().push(delta.clone());
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// In-memory blob store with switchable write failures.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn with_blobs(keys: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut blobs = store.blobs.lock().unwrap();
            for key in keys {
                blobs.insert(key.to_string(), b"{}".to_vec());
            }
        }
        store
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.blobs.lock().unwrap().keys().cloned().collect())
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io {
                context: format!("write {key}"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.blobs.lock().unwrap().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Clocks and timers
// ---------------------------------------------------------------------------

/// Wall clock driven by tokio time, so paused-time tests see consistent
/// timestamps in wake ticks and cache ages.
pub struct TokioClock {
    base: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base: t0(),
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now() - self.start;
        self.base + chrono::Duration::from_std(elapsed).unwrap()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerEvent {
    ArmWake(Duration),
    ArmRetry(Duration),
    CancelWake,
    CancelAll,
}

/// Timers that only record what they were asked to do.
#[derive(Clone, Default)]
pub struct RecordingTimers {
    events: Arc<Mutex<Vec<TimerEvent>>>,
    wake: Arc<AtomicBool>,
}

impl RecordingTimers {
    pub fn events(&self) -> Vec<TimerEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: TimerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl Timers for RecordingTimers {
    fn arm_wake(&mut self, period: Duration) {
        self.wake.store(true, Ordering::SeqCst);
        self.record(TimerEvent::ArmWake(period));
    }

    fn arm_retry(&mut self, delay: Duration) {
        self.record(TimerEvent::ArmRetry(delay));
    }

    fn cancel_wake(&mut self) {
        self.wake.store(false, Ordering::SeqCst);
        self.record(TimerEvent::CancelWake);
    }

    fn cancel_all(&mut self) {
        self.wake.store(false, Ordering::SeqCst);
        self.record(TimerEvent::CancelAll);
    }

    fn wake_armed(&self) -> bool {
        self.wake.load(Ordering::SeqCst)
    }
}
