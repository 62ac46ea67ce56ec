//! Supported external platforms
//!
//! The set is closed: every authorization attempt, token record and health
//! entry is keyed by one of these. The wire form is the upper-case identifier
//! (`"QUICKBOOKS"`); parsing accepts any casing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// An external system a dashboard user can connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Platform {
    QuickBooks,
    Xero,
    HubSpot,
    Stripe,
}

impl Platform {
    /// Every supported platform, in display order.
    pub const ALL: [Platform; 4] = [
        Platform::QuickBooks,
        Platform::Xero,
        Platform::HubSpot,
        Platform::Stripe,
    ];

    /// Wire identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::QuickBooks => "QUICKBOOKS",
            Platform::Xero => "XERO",
            Platform::HubSpot => "HUBSPOT",
            Platform::Stripe => "STRIPE",
        }
    }

    /// Whether a token for this platform is only usable with granted scopes.
    ///
    /// Stripe Connect tokens carry a single implicit scope and frequently
    /// come back without a `scope` field.
    pub fn requires_scopes(&self) -> bool {
        !matches!(self, Platform::Stripe)
    }

    /// Prefix for environment variables holding this platform's client config.
    pub fn env_prefix(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| Error::UnknownPlatform(trimmed.to_string()))
    }
}

impl TryFrom<String> for Platform {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Platform> for String {
    fn from(platform: Platform) -> Self {
        platform.as_str().to_string()
    }
}
