//! Token endpoint client
//!
//! `TokenClient` is the reqwest-backed implementation of the collaborator
//! traits. It holds one `ClientRegistration` per platform and performs:
//! 1. Authorization code exchange (`grant_type=authorization_code`)
//! 2. Token refresh (`grant_type=refresh_token`)
//! 3. Refresh token revocation (RFC 7009), where the platform supports it

use std::collections::HashMap;

use common::Platform;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::executor::{CallFuture, ExchangeRequest, RefreshExecutor, RevocationExecutor, TokenExchanger};
use crate::registration::{ClientAuth, ClientRegistration};
use crate::token::{TokenRecord, TokenResponse, unix_now};

/// HTTP client for the providers' token endpoints.
#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    registrations: HashMap<Platform, ClientRegistration>,
}

impl TokenClient {
    pub fn new(
        http: reqwest::Client,
        registrations: impl IntoIterator<Item = ClientRegistration>,
    ) -> Self {
        let registrations: HashMap<Platform, ClientRegistration> = registrations
            .into_iter()
            .map(|r| (r.platform, r))
            .collect();
        info!(platforms = registrations.len(), "token client initialized");
        Self {
            http,
            registrations,
        }
    }

    /// Registration for `platform`, or a config error if none was supplied.
    pub fn registration(&self, platform: Platform) -> Result<&ClientRegistration> {
        self.registrations
            .get(&platform)
            .ok_or_else(|| Error::Config(format!("no client registration for {platform}")))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, request: ExchangeRequest<'_>) -> Result<TokenRecord> {
        let registration = self.registration(request.platform)?;
        let redirect_uri = request
            .redirect_uri
            .unwrap_or(registration.redirect_uri.as_str())
            .to_string();

        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", request.code.to_string()),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = request.code_verifier {
            form.push(("code_verifier", verifier.to_string()));
        }

        let response = self
            .post_form(registration, &registration.token_url, form)
            .await
            .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::ExchangeFailed(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::ExchangeFailed(format!("invalid token response: {e}")))?;

        debug!(platform = %request.platform, "authorization code exchanged");
        Ok(token.into_record(request.platform, unix_now(), request.realm_id))
    }

    /// Refresh the access token of `record`.
    ///
    /// A 401/403, or a 400 carrying `invalid_grant`, means the refresh token
    /// itself is no longer accepted and is reported as `InvalidGrant`.
    pub async fn refresh_token(&self, record: &TokenRecord) -> Result<TokenRecord> {
        let registration = self.registration(record.platform)?;
        let refresh = record
            .refresh_token
            .as_ref()
            .ok_or_else(|| Error::RefreshFailed("record has no refresh token".into()))?;

        let form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh.expose().clone()),
        ];

        let response = self
            .post_form(registration, &registration.token_url, form)
            .await
            .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));

            if status.as_u16() == 401
                || status.as_u16() == 403
                || (status.as_u16() == 400 && body.contains("invalid_grant"))
            {
                return Err(Error::InvalidGrant(format!(
                    "refresh token rejected ({status}): {body}"
                )));
            }

            return Err(Error::RefreshFailed(format!(
                "token refresh returned {status}: {body}"
            )));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::RefreshFailed(format!("invalid refresh response: {e}")))?;

        debug!(platform = %record.platform, "access token refreshed");
        Ok(token.into_record(record.platform, unix_now(), record.realm_id()))
    }

    /// Revoke `refresh_token`. Platforms without a revocation endpoint only
    /// drop the token locally.
    pub async fn revoke_token(&self, platform: Platform, refresh_token: &str) -> Result<()> {
        let registration = self.registration(platform)?;
        let Some(url) = registration.revocation_url.as_deref() else {
            debug!(%platform, "platform has no revocation endpoint, nothing to revoke remotely");
            return Ok(());
        };

        let form = vec![
            ("token", refresh_token.to_string()),
            ("token_type_hint", "refresh_token".to_string()),
        ];
        let response = self
            .post_form(registration, url, form)
            .await
            .map_err(|e| Error::RevocationFailed(format!("revocation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            warn!(%platform, %status, "revocation endpoint refused request");
            return Err(Error::RevocationFailed(format!(
                "revocation endpoint returned {status}: {body}"
            )));
        }

        info!(%platform, "refresh token revoked");
        Ok(())
    }

    async fn post_form(
        &self,
        registration: &ClientRegistration,
        url: &str,
        mut form: Vec<(&'static str, String)>,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let secret = registration
            .client_secret
            .as_ref()
            .map(|s| s.expose().clone());

        let builder = match registration.client_auth {
            ClientAuth::Basic => self
                .http
                .post(url)
                .basic_auth(&registration.client_id, secret),
            ClientAuth::Body => {
                form.push(("client_id", registration.client_id.clone()));
                if let Some(secret) = secret {
                    form.push(("client_secret", secret));
                }
                self.http.post(url)
            }
        };

        builder
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
    }
}

impl TokenExchanger for TokenClient {
    fn exchange<'a>(&'a self, request: ExchangeRequest<'a>) -> CallFuture<'a, TokenRecord> {
        Box::pin(self.exchange_code(request))
    }
}

impl RefreshExecutor for TokenClient {
    fn refresh<'a>(&'a self, record: &'a TokenRecord) -> CallFuture<'a, TokenRecord> {
        Box::pin(self.refresh_token(record))
    }
}

impl RevocationExecutor for TokenClient {
    fn revoke<'a>(&'a self, platform: Platform, refresh_token: &'a str) -> CallFuture<'a, ()> {
        Box::pin(self.revoke_token(platform, refresh_token))
    }
}
