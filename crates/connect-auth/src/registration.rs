//! Per-platform OAuth client registrations and provider endpoints
//!
//! The endpoint URLs are public provider configuration. Client IDs and
//! secrets belong to the deployment and are read from the environment.

use common::{Platform, Secret};
use reqwest::Url;

use crate::error::{Error, Result};

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// `Authorization: Basic base64(client_id:client_secret)`
    Basic,
    /// `client_id` / `client_secret` in the form body
    Body,
}

/// Public provider configuration for a platform.
#[derive(Debug, Clone, Copy)]
pub struct PlatformEndpoints {
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub revocation_url: Option<&'static str>,
    pub default_scopes: &'static [&'static str],
    pub client_auth: ClientAuth,
}

/// Default endpoints for `platform`.
pub fn endpoints(platform: Platform) -> PlatformEndpoints {
    match platform {
        Platform::QuickBooks => PlatformEndpoints {
            authorize_url: "https://appcenter.intuit.com/connect/oauth2",
            token_url: "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer",
            revocation_url: Some("https://developer.api.intuit.com/v2/oauth2/tokens/revoke"),
            default_scopes: &["com.intuit.quickbooks.accounting"],
            client_auth: ClientAuth::Basic,
        },
        Platform::Xero => PlatformEndpoints {
            authorize_url: "https://login.xero.com/identity/connect/authorize",
            token_url: "https://identity.xero.com/connect/token",
            revocation_url: Some("https://identity.xero.com/connect/revocation"),
            default_scopes: &[
                "openid",
                "profile",
                "email",
                "accounting.transactions",
                "offline_access",
            ],
            client_auth: ClientAuth::Basic,
        },
        Platform::HubSpot => PlatformEndpoints {
            authorize_url: "https://app.hubspot.com/oauth/authorize",
            token_url: "https://api.hubapi.com/oauth/v1/token",
            revocation_url: None,
            default_scopes: &["oauth", "crm.objects.contacts.read"],
            client_auth: ClientAuth::Body,
        },
        Platform::Stripe => PlatformEndpoints {
            authorize_url: "https://connect.stripe.com/oauth/authorize",
            token_url: "https://connect.stripe.com/oauth/token",
            revocation_url: None,
            default_scopes: &["read_write"],
            client_auth: ClientAuth::Body,
        },
    }
}

/// A deployment's OAuth client for one platform.
#[derive(Debug, Clone)]
pub struct ClientRegistration {
    pub platform: Platform,
    pub client_id: String,
    pub client_secret: Option<Secret<String>>,
    pub authorize_url: String,
    pub token_url: String,
    pub revocation_url: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub client_auth: ClientAuth,
}

impl ClientRegistration {
    /// Registration with the platform's default endpoints and scopes.
    pub fn new(platform: Platform, client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        let defaults = endpoints(platform);
        Self {
            platform,
            client_id: client_id.into(),
            client_secret: None,
            authorize_url: defaults.authorize_url.to_string(),
            token_url: defaults.token_url.to_string(),
            revocation_url: defaults.revocation_url.map(str::to_string),
            redirect_uri: redirect_uri.into(),
            scopes: defaults.default_scopes.iter().map(|s| s.to_string()).collect(),
            client_auth: defaults.client_auth,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(Secret::new(secret.into()));
        self
    }

    /// Load from `<PLATFORM>_CLIENT_ID`, `<PLATFORM>_REDIRECT_URI` and the
    /// optional secret.
    ///
    /// Secret resolution order:
    /// 1. `<PLATFORM>_CLIENT_SECRET` env var
    /// 2. file named by `<PLATFORM>_CLIENT_SECRET_FILE`
    pub fn from_env(platform: Platform) -> Result<Self> {
        let prefix = platform.env_prefix();
        let required = |suffix: &str| {
            let key = format!("{prefix}_{suffix}");
            std::env::var(&key).map_err(|_| Error::Config(format!("{key} is not set")))
        };

        let mut registration = Self::new(platform, required("CLIENT_ID")?, required("REDIRECT_URI")?);

        if let Ok(secret) = std::env::var(format!("{prefix}_CLIENT_SECRET")) {
            registration.client_secret = Some(Secret::new(secret));
        } else if let Ok(path) = std::env::var(format!("{prefix}_CLIENT_SECRET_FILE")) {
            let secret = std::fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("failed to read {path}: {e}")))?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                registration.client_secret = Some(Secret::new(secret));
            }
        }

        Ok(registration)
    }

    /// Build the provider authorization URL for one attempt.
    ///
    /// `redirect_override` replaces the registered redirect URI; it must be
    /// the same value later sent to the token endpoint.
    pub fn authorization_url(
        &self,
        state: &str,
        code_challenge: Option<&str>,
        redirect_override: Option<&str>,
    ) -> Result<String> {
        let mut url = Url::parse(&self.authorize_url)
            .map_err(|e| Error::Config(format!("invalid authorize_url {}: {e}", self.authorize_url)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", redirect_override.unwrap_or(&self.redirect_uri))
                .append_pair("scope", &self.scopes.join(" "))
                .append_pair("state", state);
            if let Some(challenge) = code_challenge {
                query
                    .append_pair("code_challenge", challenge)
                    .append_pair("code_challenge_method", crate::pkce::CHALLENGE_METHOD);
            }
        }
        Ok(url.into())
    }
}
