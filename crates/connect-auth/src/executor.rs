//! Collaborator interfaces for the provider's token endpoint
//!
//! The flow controller and the refresh coordinator never talk HTTP
//! themselves; they go through these traits so tests can substitute stubs and
//! deployments can swap the transport. Methods return boxed futures so the
//! traits stay dyn-compatible (`Arc<dyn TokenExchanger>`).
//!
//! Every call site wraps these in `with_timeout`: a timed-out call is reported
//! exactly like a network failure of the same operation.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Platform;

use crate::error::{Error, Result};
use crate::token::TokenRecord;

/// Boxed future returned by collaborator calls.
pub type CallFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Inputs for exchanging an authorization code.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeRequest<'a> {
    pub platform: Platform,
    pub code: &'a str,
    pub code_verifier: Option<&'a str>,
    /// Must match the redirect URI used in the authorization request.
    pub redirect_uri: Option<&'a str>,
    /// Platform realm context (QuickBooks `realmId`).
    pub realm_id: Option<&'a str>,
}

/// Exchanges an authorization code for a token record.
pub trait TokenExchanger: Send + Sync {
    fn exchange<'a>(&'a self, request: ExchangeRequest<'a>) -> CallFuture<'a, TokenRecord>;
}

/// Obtains a fresh access token using the record's refresh token.
pub trait RefreshExecutor: Send + Sync {
    fn refresh<'a>(&'a self, record: &'a TokenRecord) -> CallFuture<'a, TokenRecord>;
}

/// Revokes a refresh token at the provider.
pub trait RevocationExecutor: Send + Sync {
    fn revoke<'a>(&'a self, platform: Platform, refresh_token: &'a str) -> CallFuture<'a, ()>;
}

/// Run `call` with a deadline; on expiry produce `on_timeout(message)`.
pub async fn with_timeout<T, F>(
    limit: Duration,
    call: F,
    on_timeout: fn(String) -> Error,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(format!(
            "timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
