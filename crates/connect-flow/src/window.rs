//! Authorization window and its closure monitor
//!
//! The provider's consent page opens in a separate browsing context that the
//! controller does not own. `PopupMonitor` polls the handle and reports a
//! `WindowClosed` for the attempt it was started for. Dropping the monitor
//! aborts its task, so a disposed monitor never touches its handle again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::FlowError;

/// An opened authorization window.
pub trait WindowHandle: Send + Sync {
    fn is_closed(&self) -> bool;
    fn close(&self);
}

/// Opens authorization windows.
pub trait AuthorizationWindow: Send + Sync {
    /// Open `url`. A blocked or failed open is `FlowError::WindowBlocked`.
    fn open(&self, url: &str) -> Result<Arc<dyn WindowHandle>, FlowError>;
}

/// The window for attempt `state` closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClosed {
    pub state: String,
}

/// Polls one window until it closes or the monitor is dropped.
pub struct PopupMonitor {
    state: String,
    task: JoinHandle<()>,
}

impl PopupMonitor {
    pub fn spawn(
        window: Arc<dyn WindowHandle>,
        state: String,
        poll_interval: Duration,
        events: mpsc::UnboundedSender<WindowClosed>,
    ) -> Self {
        let watched = state.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                if window.is_closed() {
                    debug!("authorization window closed");
                    let _ = events.send(WindowClosed { state: watched });
                    return;
                }
            }
        });
        Self { state, task }
    }

    /// State of the attempt being watched.
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PopupMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
