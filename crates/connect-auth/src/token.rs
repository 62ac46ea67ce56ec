//! Issued credential sets
//!
//! A `TokenRecord` is created when a code exchange succeeds, updated in place
//! when a refresh succeeds, and dropped when the connection is revoked. Token
//! values are wrapped in `Secret` so records can be logged with `{:?}`.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use common::{Platform, Secret};
use serde::{Deserialize, Serialize};

/// Metadata key for the QuickBooks company (`realmId` callback parameter).
pub const META_REALM_ID: &str = "realm_id";

/// Metadata key for a human-readable connected account name.
pub const META_ACCOUNT_NAME: &str = "account_name";

/// Credentials for one platform connection.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub platform: Platform,
    pub access_token: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
    /// Unix seconds. `None` means the token does not expire.
    pub expires_at: Option<u64>,
    /// Unix seconds.
    pub issued_at: Option<u64>,
    pub scopes: BTreeSet<String>,
    pub token_type: String,
    /// Platform-specific values such as the external company identifier.
    pub metadata: BTreeMap<String, String>,
}

impl TokenRecord {
    /// A bearer token with no expiry, refresh token or scopes.
    pub fn new(platform: Platform, access_token: impl Into<String>) -> Self {
        Self {
            platform,
            access_token: Some(Secret::new(access_token.into())),
            refresh_token: None,
            expires_at: None,
            issued_at: None,
            scopes: BTreeSet::new(),
            token_type: "Bearer".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    /// A record without an access token is never usable.
    pub fn has_access_token(&self) -> bool {
        self.access_token
            .as_ref()
            .is_some_and(|t| !t.expose().is_empty())
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_ref()
            .is_some_and(|t| !t.expose().is_empty())
    }

    /// Signed seconds until expiry, `None` for non-expiring tokens.
    pub fn seconds_until_expiry(&self, now: u64) -> Option<i64> {
        let clamp = |secs: u64| i64::try_from(secs).unwrap_or(i64::MAX);
        self.expires_at
            .map(|expires_at| clamp(expires_at).saturating_sub(clamp(now)))
    }

    pub fn realm_id(&self) -> Option<&str> {
        self.metadata.get(META_REALM_ID).map(String::as_str)
    }

    pub fn account_name(&self) -> Option<&str> {
        self.metadata.get(META_ACCOUNT_NAME).map(String::as_str)
    }

    /// Fold a refreshed record into this one.
    ///
    /// The access token and expiry are always replaced. The refresh token,
    /// scopes and metadata are only replaced when the refresh returned them,
    /// since providers commonly omit unchanged values.
    pub fn apply_refresh(&mut self, refreshed: TokenRecord) {
        self.access_token = refreshed.access_token;
        self.expires_at = refreshed.expires_at;
        if refreshed.issued_at.is_some() {
            self.issued_at = refreshed.issued_at;
        }
        if refreshed.refresh_token.is_some() {
            self.refresh_token = refreshed.refresh_token;
        }
        if !refreshed.scopes.is_empty() {
            self.scopes = refreshed.scopes;
        }
        self.token_type = refreshed.token_type;
        self.metadata.extend(refreshed.metadata);
    }
}

/// Token endpoint response for both code exchange and refresh.
///
/// `expires_in` is a delta in seconds; `into_record` converts it to an
/// absolute timestamp.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Provider-specific fields (`stripe_user_id`, `x_refresh_token_expires_in`, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TokenResponse {
    /// Convert into a record issued at `now` (unix seconds).
    pub fn into_record(self, platform: Platform, now: u64, realm_id: Option<&str>) -> TokenRecord {
        let mut metadata: BTreeMap<String, String> = self
            .extra
            .into_iter()
            .filter_map(|(key, value)| match value {
                serde_json::Value::String(s) => Some((key, s)),
                serde_json::Value::Number(n) => Some((key, n.to_string())),
                serde_json::Value::Bool(b) => Some((key, b.to_string())),
                _ => None,
            })
            .collect();
        if let Some(realm) = realm_id {
            metadata.insert(META_REALM_ID.to_string(), realm.to_string());
        }

        TokenRecord {
            platform,
            access_token: Some(Secret::new(self.access_token)),
            refresh_token: self
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(Secret::new),
            expires_at: self.expires_in.map(|delta| now.saturating_add(delta)),
            issued_at: Some(now),
            scopes: self.scope.as_deref().map(parse_scopes).unwrap_or_default(),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            metadata,
        }
    }
}

/// Current time as unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Split a scope string on whitespace or commas (providers use both).
pub fn parse_scopes(raw: &str) -> BTreeSet<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_deserializes_minimal_body() {
        let json = r#"{"access_token":"at_abc"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert!(token.refresh_token.is_none());
        assert!(token.expires_in.is_none());
    }

    #[test]
    fn into_record_computes_absolute_expiry_and_scopes() {
        let json = r#"{
            "access_token": "at_abc",
            "refresh_token": "rt_def",
            "expires_in": 3600,
            "token_type": "bearer",
            "scope": "accounting.transactions offline_access",
            "x_refresh_token_expires_in": 8726400
        }"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        let record = token.into_record(Platform::QuickBooks, 1_000, Some("9130"));

        assert_eq!(record.expires_at, Some(4_600));
        assert_eq!(record.issued_at, Some(1_000));
        assert_eq!(record.token_type, "bearer");
        assert_eq!(record.refresh_token.as_ref().unwrap().expose(), "rt_def");
        assert!(record.scopes.contains("offline_access"));
        assert_eq!(record.scopes.len(), 2);
        assert_eq!(record.realm_id(), Some("9130"));
        assert_eq!(
            record.metadata.get("x_refresh_token_expires_in").map(String::as_str),
            Some("8726400")
        );
    }

    #[test]
    fn missing_expires_in_means_non_expiring() {
        let json = r#"{"access_token":"sk_x","stripe_user_id":"acct_1","scope":"read_write"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        let record = token.into_record(Platform::Stripe, 50, None);
        assert!(record.expires_at.is_none());
        assert_eq!(record.seconds_until_expiry(50), None);
        assert_eq!(record.metadata.get("stripe_user_id").map(String::as_str), Some("acct_1"));
    }

    #[test]
    fn huge_expires_in_saturates() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":18446744073709551615}"#).unwrap();
        let record = response.into_record(Platform::HubSpot, 1_700_000_000, None);
        assert_eq!(record.expires_at, Some(u64::MAX));
        assert_eq!(record.seconds_until_expiry(1_700_000_000), Some(i64::MAX - 1_700_000_000));
    }

    #[test]
    fn parse_scopes_accepts_commas_and_spaces() {
        let scopes = parse_scopes("crm.objects.contacts.read, oauth  content");
        let expected: BTreeSet<String> = ["content", "crm.objects.contacts.read", "oauth"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(scopes, expected);
        assert!(parse_scopes("  ").is_empty());
    }

    #[test]
    fn empty_access_token_is_not_usable() {
        let mut record = TokenRecord::new(Platform::Xero, "");
        assert!(!record.has_access_token());
        record.access_token = None;
        assert!(!record.has_access_token());
        assert!(TokenRecord::new(Platform::Xero, "at").has_access_token());
    }

    #[test]
    fn apply_refresh_keeps_old_refresh_token_when_not_rotated() {
        let mut record = TokenRecord::new(Platform::Xero, "at_old");
        record.refresh_token = Some(Secret::from("rt_old"));
        record.expires_at = Some(10);
        record.scopes = parse_scopes("accounting.transactions");

        let mut refreshed = TokenRecord::new(Platform::Xero, "at_new");
        refreshed.expires_at = Some(5_000);
        record.apply_refresh(refreshed);

        assert_eq!(record.access_token.as_ref().unwrap().expose(), "at_new");
        assert_eq!(record.expires_at, Some(5_000));
        assert_eq!(record.refresh_token.as_ref().unwrap().expose(), "rt_old");
        assert!(record.scopes.contains("accounting.transactions"));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let mut record = TokenRecord::new(Platform::HubSpot, "at_secret");
        record.refresh_token = Some(Secret::from("rt_secret"));
        let debug = format!("{record:?}");
        assert!(!debug.contains("at_secret"));
        assert!(!debug.contains("rt_secret"));
    }
}
