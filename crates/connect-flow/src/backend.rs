//! Where the controller obtains and validates authorization attempts
//!
//! `AuthorizationBackend` is the client's view of `AuthorizationStateService`.
//! In a single process the service implements it directly; a remote client
//! uses `HttpAuthorizationBackend`, which speaks the gateway's `/oauth/state`
//! routes. Rejections are values on both paths, never errors.

use std::future::Future;
use std::pin::Pin;

use common::{Platform, Secret};
use connect_auth::{
    AuthorizationStateService, BeginOptions, BeginResponse, Error, RejectReason, Result,
    ValidatedAttempt, Validation,
};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Issue, validate and clear authorization attempts.
pub trait AuthorizationBackend: Send + Sync {
    fn begin<'a>(&'a self, platform: Platform, options: BeginOptions) -> BackendFuture<'a, BeginResponse>;

    /// Consume `state`; a rejection is `Ok(Validation::Rejected(..))`.
    fn validate<'a>(&'a self, state: &'a str, platform: Platform) -> BackendFuture<'a, Validation>;

    /// Remove every pending attempt for `platform`, returning how many.
    fn clear<'a>(&'a self, platform: Platform) -> BackendFuture<'a, usize>;
}

impl AuthorizationBackend for AuthorizationStateService {
    fn begin<'a>(&'a self, platform: Platform, options: BeginOptions) -> BackendFuture<'a, BeginResponse> {
        Box::pin(async move { self.begin_authorization(platform.as_str(), options).await })
    }

    fn validate<'a>(&'a self, state: &'a str, platform: Platform) -> BackendFuture<'a, Validation> {
        Box::pin(async move { self.validate_authorization(state, platform.as_str()).await })
    }

    fn clear<'a>(&'a self, platform: Platform) -> BackendFuture<'a, usize> {
        Box::pin(async move { self.clear_authorization(platform.as_str()).await })
    }
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    state: &'a str,
    platform: Platform,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    valid: bool,
    #[serde(default)]
    code_verifier: Option<String>,
    #[serde(default)]
    redirect_uri: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct ClearRequest {
    platform: Platform,
}

#[derive(Deserialize)]
struct ClearResponse {
    #[serde(default)]
    cleared: usize,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Remote authorization backend over the gateway's HTTP surface.
#[derive(Debug, Clone)]
pub struct HttpAuthorizationBackend {
    http: reqwest::Client,
    state_url: Url,
    validate_url: Url,
}

impl HttpAuthorizationBackend {
    /// `base_url` is the gateway root, e.g. `https://dash.example.com/api`.
    pub fn new(http: reqwest::Client, base_url: &str) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        let parse = |path: &str| {
            Url::parse(&format!("{base}{path}"))
                .map_err(|e| Error::Config(format!("invalid authorization backend URL {base_url}: {e}")))
        };
        Ok(Self {
            http,
            state_url: parse("/oauth/state")?,
            validate_url: parse("/oauth/state/validate")?,
        })
    }

    async fn begin_remote(&self, platform: Platform, options: BeginOptions) -> Result<BeginResponse> {
        let mut url = self.state_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("platform", platform.as_str())
                .append_pair("pkce", if options.use_pkce { "true" } else { "false" });
            if let Some(redirect_uri) = &options.redirect_uri {
                query.append_pair("redirect_uri", redirect_uri);
            }
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("begin authorization request failed: {e}")))?;

        match response.status() {
            status if status.is_success() => response
                .json::<BeginResponse>()
                .await
                .map_err(|e| Error::Http(format!("invalid begin authorization response: {e}"))),
            StatusCode::BAD_REQUEST => Err(Error::UnknownPlatform(platform.to_string())),
            status => Err(Error::StoreUnavailable(error_body(status, response).await)),
        }
    }

    async fn validate_remote(&self, state: &str, platform: Platform) -> Result<Validation> {
        let response = self
            .http
            .post(self.validate_url.clone())
            .json(&ValidateRequest { state, platform })
            .send()
            .await
            .map_err(|e| Error::Http(format!("validate authorization request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::UNAUTHORIZED {
            return Err(Error::StoreUnavailable(error_body(status, response).await));
        }

        let body: ValidateResponse = response
            .json()
            .await
            .map_err(|e| Error::Http(format!("invalid validate response: {e}")))?;

        if body.valid {
            return Ok(Validation::Valid(ValidatedAttempt {
                code_verifier: body.code_verifier.map(Secret::new),
                redirect_uri: body.redirect_uri,
            }));
        }

        let code = body.error.unwrap_or_default();
        debug!(%platform, code = %code, "authorization state rejected");
        RejectReason::from_code(&code)
            .map(Validation::Rejected)
            .ok_or_else(|| Error::Http(format!("unrecognized rejection code: {code:?}")))
    }

    async fn clear_remote(&self, platform: Platform) -> Result<usize> {
        let response = self
            .http
            .delete(self.state_url.clone())
            .json(&ClearRequest { platform })
            .send()
            .await
            .map_err(|e| Error::Http(format!("clear authorization request failed: {e}")))?;

        match response.status() {
            status if status.is_success() => Ok(response
                .json::<ClearResponse>()
                .await
                .map(|body| body.cleared)
                .unwrap_or(0)),
            StatusCode::BAD_REQUEST => Err(Error::UnknownPlatform(platform.to_string())),
            status => Err(Error::StoreUnavailable(error_body(status, response).await)),
        }
    }
}

async fn error_body(status: StatusCode, response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorResponse>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    format!("authorization service returned {status}: {detail}")
}

impl AuthorizationBackend for HttpAuthorizationBackend {
    fn begin<'a>(&'a self, platform: Platform, options: BeginOptions) -> BackendFuture<'a, BeginResponse> {
        Box::pin(self.begin_remote(platform, options))
    }

    fn validate<'a>(&'a self, state: &'a str, platform: Platform) -> BackendFuture<'a, Validation> {
        Box::pin(self.validate_remote(state, platform))
    }

    fn clear<'a>(&'a self, platform: Platform) -> BackendFuture<'a, usize> {
        Box::pin(self.clear_remote(platform))
    }
}
