//! End-to-end scheduler scenarios.
//!
//! Drive the scheduler through the runner with real tokio timers under
//! paused time, or step it by hand with recording timers and a manual
//! clock when exact trigger timing matters.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use meteo_relay::engine::cache::SpatialCache;
use meteo_relay::engine::runner;
use meteo_relay::engine::scheduler::{Scheduler, SchedulerSettings, SchedulerState};
use meteo_relay::engine::service::WeatherService;
use meteo_relay::engine::timers::{TokioTimers, Trigger};
use meteo_relay::host::{Clock, ManualClock};
use meteo_relay::types::*;

use crate::mock_host::*;

struct Rig {
    source: Arc<ScriptedSource>,
    positions: Arc<ScriptedPositions>,
    publisher: Arc<RecordingPublisher>,
    store: Arc<MemoryStore>,
    cache: Arc<SpatialCache>,
    service: Arc<WeatherService>,
}

async fn rig(positions: ScriptedPositions, clock: Arc<dyn Clock>) -> Rig {
    let store = Arc::new(MemoryStore::default());
    let cache = Arc::new(SpatialCache::open(store.clone(), clock, 5, 60).await.unwrap());
    let source = Arc::new(ScriptedSource::new());
    let service = Arc::new(WeatherService::new(cache.clone(), source.clone()));

    Rig {
        source,
        positions: Arc::new(positions),
        publisher: Arc::new(RecordingPublisher::default()),
        store,
        cache,
        service,
    }
}

fn scheduler(
    rig: &Rig,
    settings: SchedulerSettings,
    clock: Arc<dyn Clock>,
    timers: Box<dyn meteo_relay::engine::timers::Timers>,
) -> Scheduler {
    Scheduler::new(
        settings,
        rig.service.clone(),
        rig.positions.clone(),
        rig.publisher.clone(),
        clock,
        timers,
    )
}

fn home() -> Position {
    Position::new(10.0, 20.0)
}

// ---------------------------------------------------------------------------
// Runner with real timers (paused time)
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_runner_polls_on_wake_schedule() {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let rig = rig(ScriptedPositions::at(home()), clock.clone()).await;

    let (tx, rx) = mpsc::unbounded_channel();
    let timers = TokioTimers::new(tx.clone(), clock.clone());
    let s = scheduler(&rig, SchedulerSettings::default(), clock, Box::new(timers));
    let handle = runner::spawn(s, tx, rx);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(rig.publisher.count(), 1);
    assert_eq!(rig.source.calls(), 1);
    assert_eq!(handle.status().borrow().state, SchedulerState::Sleeping);

    // Four wake ticks, none of them due.
    tokio::time::sleep(Duration::from_secs(240)).await;
    assert_eq!(rig.publisher.count(), 1);
    assert_eq!(rig.positions.queries(), 5);

    // Fifth tick lands on the fetch interval; the cell is still fresh.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(rig.publisher.count(), 2);
    assert_eq!(rig.source.calls(), 1);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_runner_halts_without_position() {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let rig = rig(ScriptedPositions::absent(), clock.clone()).await;
    let settings = SchedulerSettings {
        max_position_retries: 2,
        ..SchedulerSettings::default()
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let timers = TokioTimers::new(tx.clone(), clock.clone());
    let mut handle = runner::spawn(scheduler(&rig, settings, clock, Box::new(timers)), tx, rx);

    let err = handle.wait().await.unwrap_err();
    assert_eq!(err, SchedulerError::PositionUnavailable { attempts: 3 });
    assert_eq!(rig.positions.queries(), 3);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(rig.positions.queries(), 3, "no queries after halting");
    assert_eq!(handle.status().borrow().state, SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_runner_gives_up_after_fetch_retries() {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let rig = rig(ScriptedPositions::at(home()), clock.clone()).await;
    rig.source.set_error("HTTP 503");

    let started = tokio::time::Instant::now();
    let (tx, rx) = mpsc::unbounded_channel();
    let timers = TokioTimers::new(tx.clone(), clock.clone());
    let s = scheduler(&rig, SchedulerSettings::default(), clock, Box::new(timers));
    let mut handle = runner::spawn(s, tx, rx);

    let err = handle.wait().await.unwrap_err();
    match err {
        SchedulerError::RetriesExhausted { attempts, last_error } => {
            assert_eq!(attempts, 4);
            assert!(last_error.contains("HTTP 503"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(rig.source.calls(), 4);
    assert_eq!(rig.publisher.count(), 0);
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(rig.cache.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_runner_recovers_from_transient_failures() {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let rig = rig(ScriptedPositions::at(home()), clock.clone()).await;
    rig.source.fail_next(2, "connection reset");

    let (tx, rx) = mpsc::unbounded_channel();
    let timers = TokioTimers::new(tx.clone(), clock.clone());
    let s = scheduler(&rig, SchedulerSettings::default(), clock, Box::new(timers));
    let handle = runner::spawn(s, tx, rx);

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(rig.source.calls(), 3);
    assert_eq!(rig.publisher.count(), 1);

    let status = handle.status().borrow().clone();
    assert_eq!(status.state, SchedulerState::Sleeping);
    assert_eq!(status.fetch_failures, 0);

    handle.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Hand-stepped scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_watchdog_halts_runner() {
    let clock = Arc::new(ManualClock::new(t0()));
    let rig = rig(ScriptedPositions::at(home()), clock.clone()).await;
    let timers = RecordingTimers::default();

    let (tx, rx) = mpsc::unbounded_channel();
    let s = scheduler(&rig, SchedulerSettings::default(), clock, Box::new(timers.clone()));
    let mut handle = runner::spawn(s, tx.clone(), rx);

    tx.send(Trigger::Wake {
        fired_at: t0() + chrono::Duration::seconds(60),
    })
    .unwrap();
    tx.send(Trigger::Wake {
        fired_at: t0() + chrono::Duration::seconds(65),
    })
    .unwrap();

    let err = handle.wait().await.unwrap_err();
    assert_eq!(
        err,
        SchedulerError::Watchdog {
            elapsed_ms: 5_000,
            min_ms: 50_000
        }
    );
    assert_eq!(timers.events().last(), Some(&TimerEvent::CancelAll));
    assert_eq!(rig.publisher.count(), 1);
}

#[tokio::test]
async fn test_cache_write_failure_is_a_failed_cycle() {
    let clock = Arc::new(ManualClock::new(t0()));
    let rig = rig(ScriptedPositions::at(home()), clock.clone()).await;
    let timers = RecordingTimers::default();
    let mut s = scheduler(&rig, SchedulerSettings::default(), clock, Box::new(timers.clone()));

    rig.store.set_fail_writes(true);
    s.start().await.unwrap();

    assert_eq!(s.state(), SchedulerState::Retrying);
    assert_eq!(rig.publisher.count(), 0);
    assert!(rig.cache.is_empty().await);
    assert!(s.status().last_error.unwrap().contains("disk full"));
    assert_eq!(
        timers.events(),
        vec![TimerEvent::ArmRetry(Duration::from_secs(10))]
    );

    rig.store.set_fail_writes(false);
    s.handle(Trigger::Retry).await.unwrap();

    assert_eq!(s.state(), SchedulerState::Sleeping);
    assert_eq!(rig.publisher.count(), 1);
    assert_eq!(rig.source.calls(), 2);
    assert_eq!(rig.store.len(), 1);
}

#[tokio::test]
async fn test_moving_between_cells() {
    let clock = Arc::new(ManualClock::new(t0()));
    let rig = rig(ScriptedPositions::at(home()), clock.clone()).await;
    let mut s = scheduler(
        &rig,
        SchedulerSettings::default(),
        clock.clone(),
        Box::new(RecordingTimers::default()),
    );

    s.start().await.unwrap();

    // Far enough to be a different cell.
    clock.advance(chrono::Duration::minutes(5));
    rig.positions.move_to(Position::new(10.5, 20.5));
    s.handle(Trigger::Wake { fired_at: clock.now() }).await.unwrap();
    assert_eq!(rig.source.calls(), 2);

    // Back home: that cell is ten minutes old, well within max age.
    clock.advance(chrono::Duration::minutes(5));
    rig.positions.move_to(Position::new(10.001, 20.001));
    s.handle(Trigger::Wake { fired_at: clock.now() }).await.unwrap();

    assert_eq!(rig.source.calls(), 2);
    assert_eq!(rig.publisher.count(), 3);
    let cells = rig.source.cells();
    assert_eq!(cells[0], CellId::new("s3y0z"));
    assert_ne!(cells[0], cells[1]);
    assert_eq!(rig.cache.len().await, 2);

    let last = rig.publisher.deltas().pop().unwrap();
    assert_eq!(last.position, home());
}

#[tokio::test]
async fn test_published_delta_is_flattened() {
    let clock = Arc::new(ManualClock::new(t0()));
    let rig = rig(ScriptedPositions::at(home()), clock.clone()).await;
    let mut s = scheduler(
        &rig,
        SchedulerSettings::default(),
        clock,
        Box::new(RecordingTimers::default()),
    );

    s.start().await.unwrap();

    let delta = rig.publisher.deltas().remove(0);
    assert_eq!(delta.source, "open-meteo");
    assert_eq!(delta.timestamp, t0());
    assert_eq!(delta.position, home());

    let mut paths: Vec<&str> = delta.values.iter().map(|v| v.path.as_str()).collect();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            "environment.outside.description",
            "environment.outside.pressure",
            "environment.outside.temperature",
            "environment.wind.directionTrue",
            "environment.wind.speedTrue",
        ]
    );
    assert!(delta.values.iter().all(|v| !v.value.is_null()));
}

#[tokio::test]
async fn test_cache_open_purges_leftovers() {
    let store = Arc::new(MemoryStore::with_blobs(&["u4pru", "s3y0z", "ezs42"]));
    let clock = Arc::new(ManualClock::new(t0()));

    let cache = SpatialCache::open(store.clone(), clock, 5, 60).await.unwrap();

    assert_eq!(store.len(), 0);
    assert!(cache.is_empty().await);
    assert!(matches!(
        cache.get(&CellId::new("s3y0z")).await,
        Err(CacheError::NotFound(_))
    ));
}
