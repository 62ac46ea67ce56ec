//! Token health classification
//!
//! `classify` is pure: it derives a `TokenHealth` from a record and the
//! current time and is recomputed on every check, so health never goes stale
//! relative to the record it describes.
//!
//! Evaluation order:
//! 1. no access token -> critical (overrides everything)
//! 2. expired -> expired
//! 3. remaining time banding (< 5 min critical, < 1 h warning, else healthy)
//! 4. missing required scopes downgrades healthy to warning, never touches
//!    critical or expired

use connect_auth::TokenRecord;
use serde::Serialize;

/// Remaining lifetime below which a token is critical.
pub const CRITICAL_WINDOW_SECS: i64 = 300;

/// Remaining lifetime below which a token is a warning.
pub const WARNING_WINDOW_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Expired,
    Refreshing,
}

impl HealthStatus {
    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Expired => "expired",
            HealthStatus::Refreshing => "refreshing",
        }
    }
}

/// Derived health of one token. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenHealth {
    pub status: HealthStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<i64>,
    pub refresh_attempts: u32,
}

/// Classify `record` at `now` (unix seconds).
pub fn classify(record: &TokenRecord, now: u64) -> TokenHealth {
    let remaining = record.seconds_until_expiry(now);
    let health = |status, message: String| TokenHealth {
        status,
        message,
        expires_in_seconds: remaining,
        refresh_attempts: 0,
    };

    if !record.has_access_token() {
        return health(HealthStatus::Critical, "Missing access token".to_string());
    }

    let mut result = match remaining {
        Some(secs) if secs <= 0 => {
            return health(HealthStatus::Expired, "Token has expired".to_string());
        }
        Some(secs) if secs < CRITICAL_WINDOW_SECS => {
            health(HealthStatus::Critical, expires_in_message(secs))
        }
        Some(secs) if secs < WARNING_WINDOW_SECS => {
            health(HealthStatus::Warning, expires_in_message(secs))
        }
        Some(secs) => health(HealthStatus::Healthy, valid_for_message(secs)),
        None => health(HealthStatus::Healthy, "Token does not expire".to_string()),
    };

    if record.platform.requires_scopes() && record.scopes.is_empty() {
        match result.status {
            HealthStatus::Healthy => {
                result.status = HealthStatus::Warning;
                result.message = "Invalid or missing scopes".to_string();
            }
            HealthStatus::Warning => {
                result.message.push_str("; invalid or missing scopes");
            }
            _ => {}
        }
    }

    result
}

/// "Token expires in N minutes", rounding partial minutes up.
fn expires_in_message(secs: i64) -> String {
    let minutes = (secs + 59) / 60;
    if minutes == 1 {
        "Token expires in 1 minute".to_string()
    } else {
        format!("Token expires in {minutes} minutes")
    }
}

/// "Token valid for N hours", whole hours only.
fn valid_for_message(secs: i64) -> String {
    match secs / 3600 {
        1 => "Token valid for 1 hour".to_string(),
        hours => format!("Token valid for {hours} hours"),
    }
}
