//! Poll-driven service request notification.
//!
//! GPIB controllers without callback support cannot deliver SRQ as an
//! interrupt, so each driver owns a task that serial-polls its unit at a
//! fixed interval and runs the status handler when the request-service bit
//! is set. Polling pauses while the rearm flag of the driver is clear.

use crate::hardware::keithley236::DriverCore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Running notifier task of one driver.
pub(crate) struct NotifierHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl NotifierHandle {
    /// Start polling every `interval`.
    pub(crate) fn spawn(core: Arc<DriverCore>, interval: Duration) -> Self {
        core.rearm.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(core, interval, cancel.clone()));
        Self { cancel, task }
    }

    /// Request the task to stop without waiting for it.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the task and wait until an in-flight handler has finished.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            debug!(error = %err, "notifier task ended abnormally");
        }
    }
}

async fn poll_loop(core: Arc<DriverCore>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !core.rearm.load(Ordering::SeqCst) {
            continue;
        }
        core.check_notify().await;
    }
}
