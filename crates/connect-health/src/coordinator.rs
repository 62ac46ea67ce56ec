//! Refresh coordination across connected platforms
//!
//! The coordinator owns the tracked `TokenRecord`s. Each tick classifies every
//! record and starts a refresh for those that are critical (or expired) and
//! hold a refresh token. Refreshes for different platforms run concurrently;
//! a per-platform in-flight marker guarantees the same platform is never
//! refreshed twice at once. The marker is released by a drop guard, so it
//! clears whether the refresh succeeds, fails, or its task is aborted.
//!
//! Entering `expired` fires the expiry callback once per transition, not once
//! per tick.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::Platform;
use connect_auth::{RefreshExecutor, TokenRecord, unix_now, with_timeout};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RefreshError, Result};
use crate::health::{HealthStatus, TokenHealth, classify};

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Time between ticks of the background task.
    pub interval: Duration,
    /// Deadline for a single refresh call; expiry counts as a failed refresh.
    pub call_timeout: Duration,
    /// Stop automatic refresh after this many consecutive failures. `None`
    /// keeps retrying every tick.
    pub max_refresh_attempts: Option<u32>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
            max_refresh_attempts: None,
        }
    }
}

/// Called with the platform each time its token transitions into `expired`.
pub type ExpiryCallback = Arc<dyn Fn(Platform) + Send + Sync>;

/// Health of one tracked platform, as reported to the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformHealth {
    pub platform: Platform,
    #[serde(flatten)]
    pub health: TokenHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Result of one refresh attempt.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Refreshed(Platform),
    Failed {
        platform: Platform,
        error: RefreshError,
    },
    /// The platform was untracked while the refresh was running.
    Discarded(Platform),
}

/// What a tick observed and started.
#[derive(Debug)]
pub struct TickReport {
    pub health: Vec<PlatformHealth>,
    /// Refreshes started by this tick. Awaiting them is optional.
    pub refreshes: Vec<JoinHandle<RefreshOutcome>>,
}

struct Tracked {
    record: TokenRecord,
    /// Bumped on every `track`, so a refresh started against an earlier
    /// connection can tell it has been replaced.
    generation: u64,
    refresh_attempts: u32,
    last_status: Option<HealthStatus>,
    last_error: Option<String>,
}

/// Clears the platform's in-flight marker when dropped.
struct InFlightGuard {
    platform: Platform,
    in_flight: Arc<Mutex<HashSet<Platform>>>,
}

impl InFlightGuard {
    /// Mark `platform` in flight, or `None` if it already is.
    fn acquire(in_flight: &Arc<Mutex<HashSet<Platform>>>, platform: Platform) -> Option<Self> {
        let mut set = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(platform) {
            return None;
        }
        Some(Self {
            platform,
            in_flight: in_flight.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.platform);
    }
}

/// Tracks issued tokens and keeps them refreshed.
pub struct TokenRefreshCoordinator {
    tracked: RwLock<HashMap<Platform, Tracked>>,
    in_flight: Arc<Mutex<HashSet<Platform>>>,
    generations: AtomicU64,
    executor: Arc<dyn RefreshExecutor>,
    on_expired: Option<ExpiryCallback>,
    config: RefreshConfig,
}

impl TokenRefreshCoordinator {
    pub fn new(executor: Arc<dyn RefreshExecutor>, config: RefreshConfig) -> Self {
        Self {
            tracked: RwLock::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            generations: AtomicU64::new(0),
            executor,
            on_expired: None,
            config,
        }
    }

    /// Register the expiry notification callback.
    pub fn with_expiry_callback(mut self, callback: ExpiryCallback) -> Self {
        self.on_expired = Some(callback);
        self
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Start tracking `record`, replacing any record for the same platform.
    pub async fn track(&self, record: TokenRecord) {
        let platform = record.platform;
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        self.tracked.write().await.insert(
            platform,
            Tracked {
                record,
                generation,
                refresh_attempts: 0,
                last_status: None,
                last_error: None,
            },
        );
        info!(%platform, "token tracked for refresh");
    }

    /// Stop tracking `platform`, returning its record.
    pub async fn untrack(&self, platform: Platform) -> Option<TokenRecord> {
        let removed = self.tracked.write().await.remove(&platform);
        if removed.is_some() {
            info!(%platform, "token no longer tracked");
        }
        removed.map(|t| t.record)
    }

    /// Current record for `platform`.
    pub async fn record(&self, platform: Platform) -> Option<TokenRecord> {
        self.tracked
            .read()
            .await
            .get(&platform)
            .map(|t| t.record.clone())
    }

    /// Tracked platforms.
    pub async fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.tracked.read().await.keys().copied().collect();
        platforms.sort();
        platforms
    }

    fn is_in_flight(&self, platform: Platform) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&platform)
    }

    /// Fresh health for every tracked platform.
    ///
    /// Reports `refreshing` while a refresh is in flight.
    pub async fn health(&self) -> Vec<PlatformHealth> {
        let now = unix_now();
        let tracked = self.tracked.read().await;
        let mut report: Vec<PlatformHealth> = tracked
            .iter()
            .map(|(platform, entry)| {
                let mut health = classify(&entry.record, now);
                health.refresh_attempts = entry.refresh_attempts;
                if self.is_in_flight(*platform) {
                    health.status = HealthStatus::Refreshing;
                    health.message = "Refreshing token".to_string();
                }
                PlatformHealth {
                    platform: *platform,
                    health,
                    last_error: entry.last_error.clone(),
                }
            })
            .collect();
        report.sort_by_key(|h| h.platform);
        report
    }

    /// Classify every record, fire expiry notifications and start refreshes.
    ///
    /// Returns without waiting for the refreshes it starts.
    pub async fn tick(self: &Arc<Self>) -> TickReport {
        let now = unix_now();
        let mut newly_expired = Vec::new();
        let mut due = Vec::new();
        let mut health = Vec::new();

        {
            let mut tracked = self.tracked.write().await;
            for (platform, entry) in tracked.iter_mut() {
                let mut current = classify(&entry.record, now);
                current.refresh_attempts = entry.refresh_attempts;

                if current.status == HealthStatus::Expired
                    && entry.last_status != Some(HealthStatus::Expired)
                {
                    newly_expired.push(*platform);
                }
                entry.last_status = Some(current.status);

                let needs_refresh = matches!(
                    current.status,
                    HealthStatus::Critical | HealthStatus::Expired
                ) && entry.record.has_refresh_token();
                let capped = self
                    .config
                    .max_refresh_attempts
                    .is_some_and(|max| entry.refresh_attempts >= max);

                if needs_refresh && capped {
                    debug!(
                        %platform,
                        attempts = entry.refresh_attempts,
                        "refresh attempts exhausted, waiting for re-authorization"
                    );
                } else if needs_refresh {
                    due.push(*platform);
                }

                health.push(PlatformHealth {
                    platform: *platform,
                    health: current,
                    last_error: entry.last_error.clone(),
                });
            }
        }

        for platform in newly_expired {
            warn!(%platform, "token expired");
            metrics::counter!("token_expired_total", "platform" => platform.as_str()).increment(1);
            if let Some(callback) = &self.on_expired {
                callback(platform);
            }
        }

        let refreshes: Vec<JoinHandle<RefreshOutcome>> = due
            .into_iter()
            .filter_map(|platform| self.spawn_refresh(platform))
            .collect();

        for entry in health.iter_mut() {
            if self.is_in_flight(entry.platform) {
                entry.health.status = HealthStatus::Refreshing;
                entry.health.message = "Refreshing token".to_string();
            }
        }
        health.sort_by_key(|h| h.platform);

        TickReport { health, refreshes }
    }

    /// Refresh `platform` now, ignoring the attempt cap, and wait for the result.
    pub async fn refresh_now(self: &Arc<Self>, platform: Platform) -> Result<RefreshOutcome> {
        {
            let tracked = self.tracked.read().await;
            let entry = tracked
                .get(&platform)
                .ok_or(RefreshError::NotTracked(platform))?;
            if !entry.record.has_refresh_token() {
                return Err(RefreshError::NoRefreshToken(platform));
            }
        }

        let guard = InFlightGuard::acquire(&self.in_flight, platform)
            .ok_or(RefreshError::AlreadyInFlight(platform))?;
        let outcome = self.run_refresh(platform).await;
        drop(guard);
        Ok(outcome)
    }

    /// Spawn a refresh for `platform` unless one is already in flight.
    fn spawn_refresh(self: &Arc<Self>, platform: Platform) -> Option<JoinHandle<RefreshOutcome>> {
        let Some(guard) = InFlightGuard::acquire(&self.in_flight, platform) else {
            debug!(%platform, "refresh already in flight, skipping");
            return None;
        };
        let coordinator = self.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            coordinator.run_refresh(platform).await
        }))
    }

    async fn run_refresh(&self, platform: Platform) -> RefreshOutcome {
        let snapshot = self
            .tracked
            .read()
            .await
            .get(&platform)
            .map(|t| (t.record.clone(), t.generation));
        let Some((record, generation)) = snapshot else {
            return RefreshOutcome::Discarded(platform);
        };

        debug!(%platform, "refreshing token");
        let result = with_timeout(
            self.config.call_timeout,
            self.executor.refresh(&record),
            connect_auth::Error::RefreshFailed,
        )
        .await;

        let mut tracked = self.tracked.write().await;
        let Some(entry) = tracked
            .get_mut(&platform)
            .filter(|entry| entry.generation == generation)
        else {
            debug!(%platform, "connection replaced or untracked during refresh, discarding result");
            return RefreshOutcome::Discarded(platform);
        };

        match result {
            Ok(refreshed) => {
                entry.record.apply_refresh(refreshed);
                entry.refresh_attempts = 0;
                entry.last_status = Some(HealthStatus::Healthy);
                entry.last_error = None;
                info!(%platform, "token refresh succeeded");
                metrics::counter!("token_refresh_total", "platform" => platform.as_str(), "outcome" => "success")
                    .increment(1);
                RefreshOutcome::Refreshed(platform)
            }
            Err(e) => {
                let error = RefreshError::from(e);
                entry.refresh_attempts += 1;
                if entry.last_status != Some(HealthStatus::Expired) {
                    entry.last_status = Some(HealthStatus::Critical);
                }
                entry.last_error = Some(error.to_string());
                warn!(
                    %platform,
                    attempts = entry.refresh_attempts,
                    error = %error,
                    "token refresh failed, will retry next tick"
                );
                metrics::counter!("token_refresh_total", "platform" => platform.as_str(), "outcome" => "failure")
                    .increment(1);
                RefreshOutcome::Failed { platform, error }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use common::Secret;
    use connect_auth::{CallFuture, parse_scopes};
    use tokio::sync::Notify;

    /// Refresh stub that counts calls, optionally blocks until released, and
    /// fails while `failures_left` is non-zero.
    struct StubRefresher {
        calls: AtomicUsize,
        release: Option<Notify>,
        failures_left: AtomicUsize,
        expires_in: u64,
    }

    impl StubRefresher {
        fn succeeding() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                release: None,
                failures_left: AtomicUsize::new(0),
                expires_in: 7200,
            }
        }

        fn blocking() -> Self {
            Self {
                release: Some(Notify::new()),
                ..Self::succeeding()
            }
        }

        fn failing(times: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(times),
                ..Self::succeeding()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RefreshExecutor for StubRefresher {
        fn refresh<'a>(&'a self, record: &'a TokenRecord) -> CallFuture<'a, TokenRecord> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(release) = &self.release {
                    release.notified().await;
                }
                let failing = self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failing {
                    return Err(connect_auth::Error::Http("connection reset".into()));
                }
                let mut refreshed = TokenRecord::new(record.platform, "at_fresh");
                refreshed.expires_at = Some(unix_now() + self.expires_in);
                Ok(refreshed)
            })
        }
    }

    fn record(platform: Platform, expires_in: i64, with_refresh: bool) -> TokenRecord {
        let mut record = TokenRecord::new(platform, "at_old");
        record.expires_at = Some((unix_now() as i64 + expires_in) as u64);
        record.scopes = parse_scopes("accounting");
        if with_refresh {
            record.refresh_token = Some(Secret::from("rt"));
        }
        record
    }

    fn coordinator(stub: Arc<StubRefresher>, config: RefreshConfig) -> Arc<TokenRefreshCoordinator> {
        Arc::new(TokenRefreshCoordinator::new(stub, config))
    }

    async fn outcomes(report: TickReport) -> Vec<RefreshOutcome> {
        let mut out = Vec::new();
        for handle in report.refreshes {
            out.push(handle.await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn healthy_tokens_are_not_refreshed() {
        let stub = Arc::new(StubRefresher::succeeding());
        let coordinator = coordinator(stub.clone(), RefreshConfig::default());
        coordinator.track(record(Platform::Xero, 7200, true)).await;

        let report = coordinator.tick().await;
        assert!(report.refreshes.is_empty());
        assert_eq!(report.health[0].health.status, HealthStatus::Healthy);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn critical_token_is_refreshed_and_reset() {
        let stub = Arc::new(StubRefresher::succeeding());
        let coordinator = coordinator(stub.clone(), RefreshConfig::default());
        coordinator.track(record(Platform::Xero, 120, true)).await;

        let results = outcomes(coordinator.tick().await).await;
        assert!(matches!(results[..], [RefreshOutcome::Refreshed(Platform::Xero)]));

        let refreshed = coordinator.record(Platform::Xero).await.unwrap();
        assert_eq!(refreshed.access_token.as_ref().unwrap().expose(), "at_fresh");
        // Refresh token survives a response that did not rotate it
        assert_eq!(refreshed.refresh_token.as_ref().unwrap().expose(), "rt");

        let health = coordinator.health().await;
        assert_eq!(health[0].health.status, HealthStatus::Healthy);
        assert_eq!(health[0].health.refresh_attempts, 0);
    }

    #[tokio::test]
    async fn critical_token_without_refresh_token_is_left_alone() {
        let stub = Arc::new(StubRefresher::succeeding());
        let coordinator = coordinator(stub.clone(), RefreshConfig::default());
        coordinator.track(record(Platform::HubSpot, 120, false)).await;

        let report = coordinator.tick().await;
        assert!(report.refreshes.is_empty());
        assert_eq!(report.health[0].health.status, HealthStatus::Critical);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn simultaneous_ticks_refresh_once() {
        let stub = Arc::new(StubRefresher::blocking());
        let coordinator = coordinator(stub.clone(), RefreshConfig::default());
        coordinator.track(record(Platform::QuickBooks, 60, true)).await;

        let (a, b) = tokio::join!(coordinator.tick(), coordinator.tick());
        assert_eq!(a.refreshes.len() + b.refreshes.len(), 1);

        // Still blocked: a later tick must not start a second refresh either
        let c = coordinator.tick().await;
        assert!(c.refreshes.is_empty());
        assert_eq!(c.health[0].health.status, HealthStatus::Refreshing);

        if let Some(release) = &stub.release {
            release.notify_one();
        }
        let mut all = outcomes(a).await;
        all.extend(outcomes(b).await);
        assert!(matches!(all[..], [RefreshOutcome::Refreshed(Platform::QuickBooks)]));
        assert_eq!(stub.calls(), 1);
        assert!(!coordinator.is_in_flight(Platform::QuickBooks));
    }

    #[tokio::test]
    async fn different_platforms_refresh_concurrently() {
        let stub = Arc::new(StubRefresher::blocking());
        let coordinator = coordinator(stub.clone(), RefreshConfig::default());
        coordinator.track(record(Platform::QuickBooks, 60, true)).await;
        coordinator.track(record(Platform::Xero, 60, true)).await;

        let report = coordinator.tick().await;
        assert_eq!(report.refreshes.len(), 2);

        // Wait until both refreshes are parked in the stub
        while stub.calls() < 2 {
            tokio::task::yield_now().await;
        }
        if let Some(release) = &stub.release {
            release.notify_waiters();
        }
        let results = outcomes(report).await;
        assert!(results.iter().all(|o| matches!(o, RefreshOutcome::Refreshed(_))));
    }

    #[tokio::test]
    async fn failure_increments_attempts_and_retries_next_tick() {
        let stub = Arc::new(StubRefresher::failing(2));
        let coordinator = coordinator(stub.clone(), RefreshConfig::default());
        coordinator.track(record(Platform::Xero, 100, true)).await;

        let first = outcomes(coordinator.tick().await).await;
        assert!(matches!(
            first[..],
            [RefreshOutcome::Failed { error: RefreshError::Failed(_), .. }]
        ));
        let health = coordinator.health().await;
        assert_eq!(health[0].health.status, HealthStatus::Critical);
        assert_eq!(health[0].health.refresh_attempts, 1);
        assert!(health[0].last_error.as_deref().unwrap().contains("connection reset"));

        outcomes(coordinator.tick().await).await;
        assert_eq!(coordinator.health().await[0].health.refresh_attempts, 2);

        let third = outcomes(coordinator.tick().await).await;
        assert!(matches!(third[..], [RefreshOutcome::Refreshed(_)]));
        let health = coordinator.health().await;
        assert_eq!(health[0].health.refresh_attempts, 0);
        assert!(health[0].last_error.is_none());
        assert_eq!(stub.calls(), 3);
    }

    #[tokio::test]
    async fn attempt_cap_stops_automatic_refresh() {
        let stub = Arc::new(StubRefresher::failing(10));
        let config = RefreshConfig {
            max_refresh_attempts: Some(2),
            ..RefreshConfig::default()
        };
        let coordinator = coordinator(stub.clone(), config);
        coordinator.track(record(Platform::Xero, 100, true)).await;

        outcomes(coordinator.tick().await).await;
        outcomes(coordinator.tick().await).await;
        let report = coordinator.tick().await;
        assert!(report.refreshes.is_empty());
        assert_eq!(stub.calls(), 2);

        // A manual refresh bypasses the cap
        let outcome = coordinator.refresh_now(Platform::Xero).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Failed { .. }));
        assert_eq!(stub.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_refresh_times_out_as_failure() {
        let stub = Arc::new(StubRefresher::blocking());
        let config = RefreshConfig {
            call_timeout: Duration::from_secs(5),
            ..RefreshConfig::default()
        };
        let coordinator = coordinator(stub.clone(), config);
        coordinator.track(record(Platform::HubSpot, 100, true)).await;

        let results = outcomes(coordinator.tick().await).await;
        match &results[..] {
            [RefreshOutcome::Failed { error: RefreshError::Failed(msg), .. }] => {
                assert!(msg.contains("timed out"), "got: {msg}")
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }
        assert_eq!(coordinator.health().await[0].health.refresh_attempts, 1);
    }

    #[tokio::test]
    async fn expiry_notification_is_edge_triggered() {
        let stub = Arc::new(StubRefresher::succeeding());
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        let coordinator = Arc::new(
            TokenRefreshCoordinator::new(stub, RefreshConfig::default()).with_expiry_callback(
                Arc::new(move |platform| {
                    assert_eq!(platform, Platform::Stripe);
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            ),
        );
        coordinator.track(record(Platform::Stripe, -5, false)).await;

        for _ in 0..3 {
            let report = coordinator.tick().await;
            assert_eq!(report.health[0].health.status, HealthStatus::Expired);
        }
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        // Reconnected, then expired again: a new transition
        coordinator.track(record(Platform::Stripe, 7200, false)).await;
        coordinator.tick().await;
        coordinator.track(record(Platform::Stripe, -1, false)).await;
        coordinator.tick().await;
        assert_eq!(notified.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refresh_of_expired_token_does_not_renotify() {
        let stub = Arc::new(StubRefresher::failing(5));
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        let coordinator = Arc::new(
            TokenRefreshCoordinator::new(stub.clone(), RefreshConfig::default())
                .with_expiry_callback(Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
        );
        coordinator.track(record(Platform::Xero, -10, true)).await;

        outcomes(coordinator.tick().await).await;
        outcomes(coordinator.tick().await).await;
        assert_eq!(stub.calls(), 2);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn untrack_during_refresh_discards_result() {
        let stub = Arc::new(StubRefresher::blocking());
        let coordinator = coordinator(stub.clone(), RefreshConfig::default());
        coordinator.track(record(Platform::Xero, 100, true)).await;

        let report = coordinator.tick().await;
        while stub.calls() < 1 {
            tokio::task::yield_now().await;
        }
        assert!(coordinator.untrack(Platform::Xero).await.is_some());
        if let Some(release) = &stub.release {
            release.notify_one();
        }
        let results = outcomes(report).await;
        assert!(matches!(results[..], [RefreshOutcome::Discarded(Platform::Xero)]));
        assert!(coordinator.record(Platform::Xero).await.is_none());
    }

    #[tokio::test]
    async fn refresh_for_replaced_connection_is_discarded() {
        let stub = Arc::new(StubRefresher::blocking());
        let coordinator = coordinator(stub.clone(), RefreshConfig::default());
        coordinator.track(record(Platform::Xero, 100, true)).await;

        let report = coordinator.tick().await;
        while stub.calls() < 1 {
            tokio::task::yield_now().await;
        }
        // Disconnect and reconnect while the old refresh is blocked
        coordinator.untrack(Platform::Xero).await;
        let mut reconnected = TokenRecord::new(Platform::Xero, "at_reconnected");
        reconnected.expires_at = Some(unix_now() + 7200);
        reconnected.refresh_token = Some(Secret::from("rt_reconnected"));
        coordinator.track(reconnected.clone()).await;

        if let Some(release) = &stub.release {
            release.notify_one();
        }
        let results = outcomes(report).await;
        assert!(matches!(results[..], [RefreshOutcome::Discarded(Platform::Xero)]));
        assert_eq!(coordinator.record(Platform::Xero).await, Some(reconnected));
    }

    #[tokio::test]
    async fn refresh_now_requires_tracking_and_refresh_token() {
        let stub = Arc::new(StubRefresher::succeeding());
        let coordinator = coordinator(stub, RefreshConfig::default());
        assert!(matches!(
            coordinator.refresh_now(Platform::Xero).await,
            Err(RefreshError::NotTracked(Platform::Xero))
        ));

        coordinator.track(record(Platform::Xero, 100, false)).await;
        assert!(matches!(
            coordinator.refresh_now(Platform::Xero).await,
            Err(RefreshError::NoRefreshToken(Platform::Xero))
        ));
    }

    #[tokio::test]
    async fn health_snapshot_never_contains_tokens() {
        let stub = Arc::new(StubRefresher::succeeding());
        let coordinator = coordinator(stub, RefreshConfig::default());
        coordinator.track(record(Platform::QuickBooks, 7200, true)).await;

        let json = serde_json::to_string(&coordinator.health().await).unwrap();
        assert!(json.contains("\"platform\":\"QUICKBOOKS\""), "got: {json}");
        assert!(json.contains("\"status\":\"healthy\""), "got: {json}");
        assert!(!json.contains("at_old"));
        assert!(!json.contains("\"rt\""));
    }
}
