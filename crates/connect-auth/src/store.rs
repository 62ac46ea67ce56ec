//! Transient keyed storage with TTL and one-time reads
//!
//! `StateStore` is the seam for the backing store: the in-memory
//! implementation here is enough for a single instance, and a shared backend
//! (needed once several gateway instances sit behind a load balancer) only
//! has to honour the same contract:
//!
//! - `take_once` removes and returns the entry in one step, so two concurrent
//!   readers of the same key can never both see it
//! - an entry older than its TTL is invisible to `take_once` even if no sweep
//!   has run yet
//! - a missing or expired key is a normal outcome (`Take::Missing`), not an
//!   error; errors are reserved for an unreachable backend

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Default lifetime of a pending authorization attempt.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);

/// Boxed future returned by `StateStore` methods (keeps the trait dyn-compatible).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Predicate used by `StateStore::delete_where`.
pub type Predicate<'a, V> = Box<dyn Fn(&V) -> bool + Send + Sync + 'a>;

/// Outcome of a one-time read.
#[derive(Debug, PartialEq, Eq)]
pub enum Take<V> {
    Found(V),
    /// Never stored, already consumed, or expired.
    Missing,
}

/// Keyed TTL storage with atomic retrieve-and-delete.
pub trait StateStore<V: Send + 'static>: Send + Sync {
    /// Insert or replace `key`, visible for at most `ttl`.
    fn put(&self, key: String, value: V, ttl: Duration) -> StoreFuture<'_, ()>;

    /// Remove and return the live entry for `key`.
    fn take_once<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Take<V>>;

    /// Remove every entry (live or expired) whose value matches. Returns the count removed.
    fn delete_where<'a>(&'a self, predicate: Predicate<'a, V>) -> StoreFuture<'a, usize>;

    /// Drop expired entries. Returns the count removed.
    fn sweep(&self) -> StoreFuture<'_, usize>;

    /// Number of stored entries, including expired ones not yet swept.
    fn len(&self) -> StoreFuture<'_, usize>;
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }
}

/// Process-local `StateStore` backed by a mutex-guarded map.
///
/// Loss on restart is acceptable: a user whose attempt vanished simply starts
/// the flow again.
pub struct MemoryStateStore<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V> MemoryStateStore<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> Default for MemoryStateStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + Sync + 'static> StateStore<V> for MemoryStateStore<V> {
    fn put(&self, key: String, value: V, ttl: Duration) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let entry = Entry {
                value,
                stored_at: Instant::now(),
                ttl,
            };
            self.entries.lock().await.insert(key, entry);
            Ok(())
        })
    }

    fn take_once<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Take<V>> {
        Box::pin(async move {
            let removed = self.entries.lock().await.remove(key);
            Ok(match removed {
                Some(entry) if !entry.is_expired(Instant::now()) => Take::Found(entry.value),
                Some(_) => {
                    debug!("state entry found but expired");
                    Take::Missing
                }
                None => Take::Missing,
            })
        })
    }

    fn delete_where<'a>(&'a self, predicate: Predicate<'a, V>) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let before = entries.len();
            entries.retain(|_, entry| !predicate(&entry.value));
            Ok(before - entries.len())
        })
    }

    fn sweep(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self.entries.lock().await;
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            Ok(before - entries.len())
        })
    }

    fn len(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move { Ok(self.entries.lock().await.len()) })
    }
}

/// Handle to a running background sweeper.
pub struct SweeperHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "state sweeper task ended abnormally");
        }
    }
}

/// Spawn a task that sweeps `store` every `interval` until shut down.
///
/// Complements the per-operation sweep so an idle store still releases
/// abandoned attempts.
pub fn spawn_sweeper<V: Send + 'static>(
    store: Arc<dyn StateStore<V>>,
    interval: Duration,
) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; the store is empty at startup
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    match store.sweep().await {
                        Ok(0) => {}
                        Ok(removed) => {
                            debug!(removed, "swept expired authorization attempts");
                            metrics::counter!("oauth_state_swept_total").increment(removed as u64);
                        }
                        Err(e) => warn!(error = %e, "state sweep failed"),
                    }
                }
            }
        }
        info!("state sweeper stopped");
    });

    SweeperHandle { shutdown_tx, task }
}
