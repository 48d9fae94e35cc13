//! Scheduler event loop.
//!
//! The scheduler is moved into one task that drains the trigger queue,
//! so two triggers are never handled at the same time. A trigger that
//! arrives during a fetch waits in the queue until the fetch is done.

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::scheduler::{Scheduler, SchedulerStatus};
use super::timers::Trigger;
use crate::types::SchedulerError;

/// Control side of a spawned scheduler.
pub struct SchedulerHandle {
    tx: UnboundedSender<Trigger>,
    status: watch::Receiver<SchedulerStatus>,
    task: JoinHandle<Result<(), SchedulerError>>,
}

impl SchedulerHandle {
    pub fn status(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }

    /// Resolves when the loop ends on its own, i.e. polling halted.
    pub async fn wait(&mut self) -> Result<(), SchedulerError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Scheduler task aborted");
                Ok(())
            }
        }
    }

    /// Cancel all timers and end the loop.
    pub async fn stop(self) -> Result<(), SchedulerError> {
        if self.tx.send(Trigger::Stop).is_err() {
            warn!("Scheduler loop already finished");
        }
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Scheduler task aborted");
                Ok(())
            }
        }
    }
}

/// Start `scheduler` on its own task, fed by `rx`.
///
/// `tx` must be the sender the scheduler's timers push into.
pub fn spawn(
    mut scheduler: Scheduler,
    tx: UnboundedSender<Trigger>,
    mut rx: UnboundedReceiver<Trigger>,
) -> SchedulerHandle {
    let status = scheduler.subscribe();

    let task = tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            error!(error = %e, "Weather polling halted");
            return Err(e);
        }

        while let Some(trigger) = rx.recv().await {
            let stopping = trigger == Trigger::Stop;
            if let Err(e) = scheduler.handle(trigger).await {
                error!(error = %e, "Weather polling halted");
                return Err(e);
            }
            if stopping {
                break;
            }
        }

        info!("Scheduler loop finished");
        Ok(())
    });

    SchedulerHandle { tx, status, task }
}
