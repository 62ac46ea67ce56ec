//! Issuing and validating authorization attempts
//!
//! `AuthorizationStateService` is the server-side half of the handshake. An
//! attempt is created when a client begins connecting a platform and consumed
//! exactly once when the provider redirects back. Every operation sweeps
//! expired attempts first, which keeps the store bounded without relying on
//! the background sweeper.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{Platform, Secret};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pkce;
use crate::store::{DEFAULT_STATE_TTL, MemoryStateStore, StateStore, Take};
use crate::token::unix_now;

/// One pending OAuth handshake, keyed in the store by `state`.
#[derive(Debug, Clone)]
pub struct AuthorizationAttempt {
    pub state: String,
    pub platform: Platform,
    /// Unix seconds.
    pub created_at: u64,
    pub code_verifier: Option<Secret<String>>,
    pub redirect_uri: Option<String>,
}

/// Options for `begin_authorization`.
#[derive(Debug, Clone, Default)]
pub struct BeginOptions {
    pub use_pkce: bool,
    pub redirect_uri: Option<String>,
}

/// What the client needs to build the provider's authorization URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginResponse {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
}

/// Why a callback's `state` was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Never issued, already consumed, or older than the TTL.
    #[serde(rename = "invalid_or_expired")]
    NotFoundOrExpired,
    /// The state was live but issued for a different platform.
    #[serde(rename = "platform_mismatch")]
    PlatformMismatch,
}

impl RejectReason {
    /// Error code used on the HTTP surface.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::NotFoundOrExpired => "invalid_or_expired",
            RejectReason::PlatformMismatch => "platform_mismatch",
        }
    }

    /// Parse an HTTP error code back into a reason.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "invalid_or_expired" | "not_found_or_expired" => Some(RejectReason::NotFoundOrExpired),
            "platform_mismatch" => Some(RejectReason::PlatformMismatch),
            _ => None,
        }
    }
}

/// Data released by a successful validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedAttempt {
    pub code_verifier: Option<Secret<String>>,
    pub redirect_uri: Option<String>,
}

/// Result of validating a callback's `state`.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid(ValidatedAttempt),
    Rejected(RejectReason),
}

/// Issues, validates and clears authorization attempts.
pub struct AuthorizationStateService {
    store: Arc<dyn StateStore<AuthorizationAttempt>>,
    platforms: BTreeSet<Platform>,
    ttl: Duration,
}

impl AuthorizationStateService {
    /// Create a service over `store` accepting only `platforms`.
    pub fn new(
        store: Arc<dyn StateStore<AuthorizationAttempt>>,
        platforms: impl IntoIterator<Item = Platform>,
        ttl: Duration,
    ) -> Self {
        let platforms: BTreeSet<Platform> = platforms.into_iter().collect();
        info!(
            platforms = platforms.len(),
            ttl_secs = ttl.as_secs(),
            "authorization state service initialized"
        );
        Self {
            store,
            platforms,
            ttl,
        }
    }

    /// In-memory store, every platform, 10 minute TTL.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStateStore::<AuthorizationAttempt>::new()),
            Platform::ALL,
            DEFAULT_STATE_TTL,
        )
    }

    /// The backing store (shared with the background sweeper).
    pub fn store(&self) -> Arc<dyn StateStore<AuthorizationAttempt>> {
        self.store.clone()
    }

    /// Platforms this service issues attempts for.
    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.platforms.iter().copied()
    }

    /// Resolve a platform identifier, rejecting anything not enabled here.
    pub fn resolve_platform(&self, raw: &str) -> Result<Platform> {
        let platform: Platform = raw.parse()?;
        if !self.platforms.contains(&platform) {
            return Err(Error::UnknownPlatform(platform.to_string()));
        }
        Ok(platform)
    }

    /// Issue a new attempt for `platform`.
    ///
    /// Fails only if the platform is unknown (or the store is unreachable).
    pub async fn begin_authorization(
        &self,
        platform: &str,
        options: BeginOptions,
    ) -> Result<BeginResponse> {
        self.sweep().await?;
        let platform = match self.resolve_platform(platform) {
            Ok(p) => p,
            Err(e) => {
                record_request("begin", "unknown_platform");
                return Err(e);
            }
        };

        let state = pkce::generate_state();
        let (code_verifier, code_challenge) = if options.use_pkce {
            let verifier = pkce::generate_verifier();
            let challenge = pkce::compute_challenge(&verifier);
            (Some(Secret::new(verifier)), Some(challenge))
        } else {
            (None, None)
        };

        let attempt = AuthorizationAttempt {
            state: state.clone(),
            platform,
            created_at: unix_now(),
            code_verifier,
            redirect_uri: options.redirect_uri,
        };
        self.store.put(state.clone(), attempt, self.ttl).await?;

        info!(
            %platform,
            state = state_prefix(&state),
            pkce = options.use_pkce,
            "authorization attempt issued"
        );
        record_request("begin", "issued");

        Ok(BeginResponse {
            state,
            code_challenge_method: code_challenge.as_ref().map(|_| pkce::CHALLENGE_METHOD.to_string()),
            code_challenge,
        })
    }

    /// Consume the attempt for `state` and check it was issued for `platform`.
    ///
    /// The attempt is consumed even when the platform does not match, so a
    /// mismatched state cannot be retried against the right flow afterwards.
    pub async fn validate_authorization(&self, state: &str, platform: &str) -> Result<Validation> {
        self.sweep().await?;

        let attempt = match self.store.take_once(state).await? {
            Take::Found(attempt) => attempt,
            Take::Missing => {
                debug!(state = state_prefix(state), "state not found or expired");
                record_request("validate", RejectReason::NotFoundOrExpired.code());
                return Ok(Validation::Rejected(RejectReason::NotFoundOrExpired));
            }
        };

        if !attempt.platform.as_str().eq_ignore_ascii_case(platform.trim()) {
            warn!(
                issued_for = %attempt.platform,
                presented_for = platform,
                state = state_prefix(state),
                "state presented for the wrong platform"
            );
            record_request("validate", RejectReason::PlatformMismatch.code());
            return Ok(Validation::Rejected(RejectReason::PlatformMismatch));
        }

        info!(
            platform = %attempt.platform,
            state = state_prefix(state),
            "authorization attempt validated"
        );
        record_request("validate", "valid");

        Ok(Validation::Valid(ValidatedAttempt {
            code_verifier: attempt.code_verifier.clone(),
            redirect_uri: attempt.redirect_uri.clone(),
        }))
    }

    /// Drop every pending attempt for `platform`. Returns how many were removed.
    pub async fn clear_authorization(&self, platform: &str) -> Result<usize> {
        self.sweep().await?;
        let platform = self.resolve_platform(platform)?;
        let removed = self
            .store
            .delete_where(Box::new(move |attempt: &AuthorizationAttempt| {
                attempt.platform == platform
            }))
            .await?;
        info!(%platform, removed, "pending authorization attempts cleared");
        record_request("clear", "cleared");
        Ok(removed)
    }

    /// Pending attempts, including expired ones not yet swept.
    pub async fn pending(&self) -> Result<usize> {
        self.store.len().await
    }

    async fn sweep(&self) -> Result<()> {
        let removed = self.store.sweep().await?;
        if removed > 0 {
            debug!(removed, "swept expired authorization attempts");
            metrics::counter!("oauth_state_swept_total").increment(removed as u64);
        }
        let pending = self.store.len().await?;
        metrics::gauge!("oauth_state_pending").set(pending as f64);
        Ok(())
    }
}

fn record_request(operation: &'static str, outcome: &'static str) {
    metrics::counter!("oauth_state_requests_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
}

/// First characters of a state token, enough to correlate log lines.
pub(crate) fn state_prefix(state: &str) -> &str {
    let end = state
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(state.len());
    &state[..end]
}
