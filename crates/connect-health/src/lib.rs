//! Token health classification and background refresh
//!
//! `classify` derives a `TokenHealth` from a `TokenRecord` at a point in
//! time. `TokenRefreshCoordinator` tracks the records issued by completed
//! flows, refreshes the ones entering the critical window, and notifies when a
//! token expires. `spawn_refresh_task` drives the coordinator on an interval.

pub mod coordinator;
pub mod error;
pub mod health;
pub mod refresh;

pub use coordinator::{
    ExpiryCallback, PlatformHealth, RefreshConfig, RefreshOutcome, TickReport,
    TokenRefreshCoordinator,
};
pub use error::{RefreshError, Result};
pub use health::{CRITICAL_WINDOW_SECS, HealthStatus, TokenHealth, WARNING_WINDOW_SECS, classify};
pub use refresh::{RefreshTaskHandle, spawn_refresh_task};
