//! Cancellable scheduled tasks feeding the scheduler's trigger queue.
//!
//! The wake interval and the retry/backoff delay are plain tokio tasks that
//! push a `Trigger` into one channel. Whoever owns the receiving end runs
//! the triggers one at a time.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::host::Clock;

/// Something the scheduler must react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Recurring heartbeat. `fired_at` is when the timer went off, which
    /// may be earlier than when the trigger is handled.
    Wake { fired_at: DateTime<Utc> },
    /// One-shot retry after a backoff delay.
    Retry,
    /// Shut the loop down.
    Stop,
}

/// Timer control as seen by the scheduler.
pub trait Timers: Send {
    /// (Re)start the recurring wake timer. The first tick is one `period` away.
    fn arm_wake(&mut self, period: Duration);

    /// Schedule a single retry, replacing any pending one.
    fn arm_retry(&mut self, delay: Duration);

    fn cancel_wake(&mut self);

    /// Cancel the wake timer and any pending retry.
    fn cancel_all(&mut self);

    fn wake_armed(&self) -> bool;
}

pub struct TokioTimers {
    tx: UnboundedSender<Trigger>,
    clock: Arc<dyn Clock>,
    wake: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

impl TokioTimers {
    pub fn new(tx: UnboundedSender<Trigger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tx,
            clock,
            wake: None,
            retry: None,
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(handle) = self.retry.take() {
            handle.abort();
        }
    }
}

impl Timers for TokioTimers {
    fn arm_wake(&mut self, period: Duration) {
        self.cancel_wake();

        let tx = self.tx.clone();
        let clock = self.clock.clone();
        self.wake = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let fired_at = clock.now();
                if tx.send(Trigger::Wake { fired_at }).is_err() {
                    break;
                }
            }
        }));
        debug!(period_secs = period.as_secs(), "Wake timer armed");
    }

    fn arm_retry(&mut self, delay: Duration) {
        self.cancel_retry();

        let tx = self.tx.clone();
        self.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Trigger::Retry);
        }));
        debug!(delay_secs = delay.as_secs(), "Retry armed");
    }

    fn cancel_wake(&mut self) {
        if let Some(handle) = self.wake.take() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.cancel_wake();
        self.cancel_retry();
    }

    fn wake_armed(&self) -> bool {
        self.wake.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
