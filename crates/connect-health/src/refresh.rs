//! Background refresh task
//!
//! Ticks the coordinator every `RefreshConfig::interval`. The tick itself only
//! classifies and starts refreshes; a small bookkeeping task per tick waits for
//! them and logs a summary, so a slow provider never delays the next tick.
//!
//! Shutdown stops ticking and aborts refreshes still in flight. Aborted
//! refreshes release their in-flight marker and change no record.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::coordinator::{RefreshOutcome, TokenRefreshCoordinator};

/// Handle to the background refresh task.
pub struct RefreshTaskHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RefreshTaskHandle {
    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await
            && !e.is_cancelled()
        {
            warn!(error = %e, "refresh task exited abnormally");
        }
    }
}

/// Spawn the periodic refresh loop for `coordinator`.
pub fn spawn_refresh_task(coordinator: Arc<TokenRefreshCoordinator>) -> RefreshTaskHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let interval = coordinator.config().interval;

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick; records were just tracked
        ticker.tick().await;
        let mut in_flight: Vec<AbortHandle> = Vec::new();

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    in_flight.retain(|h| !h.is_finished());
                    let report = coordinator.tick().await;
                    debug!(
                        platforms = report.health.len(),
                        started = report.refreshes.len(),
                        "refresh tick"
                    );
                    if report.refreshes.is_empty() {
                        continue;
                    }
                    in_flight.extend(report.refreshes.iter().map(|h| h.abort_handle()));
                    tokio::spawn(summarize(report.refreshes));
                }
            }
        }

        let aborted = in_flight.iter().filter(|h| !h.is_finished()).count();
        for handle in &in_flight {
            handle.abort();
        }
        info!(aborted, "refresh task stopped");
    });

    RefreshTaskHandle { shutdown_tx, task }
}

async fn summarize(refreshes: Vec<JoinHandle<RefreshOutcome>>) {
    let mut refreshed = 0usize;
    let mut failed = 0usize;
    for result in join_all(refreshes).await {
        match result {
            Ok(RefreshOutcome::Refreshed(_)) => refreshed += 1,
            Ok(RefreshOutcome::Failed { .. }) => failed += 1,
            Ok(RefreshOutcome::Discarded(_)) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!(error = %e, "refresh task panicked"),
        }
    }
    info!(refreshed, failed, "refresh cycle finished");
}
