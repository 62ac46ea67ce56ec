//! Error types for authorization state and token endpoint operations
//!
//! Expected authorization rejections (unknown/expired state, platform
//! mismatch) are not errors: they come back as `state::RejectReason` values.
//! Only infrastructure and collaborator faults land here.

/// Errors from authorization and token operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("refresh token rejected: {0}")]
    InvalidGrant(String),

    #[error("token revocation failed: {0}")]
    RevocationFailed(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<common::Error> for Error {
    fn from(err: common::Error) -> Self {
        match err {
            common::Error::UnknownPlatform(p) => Error::UnknownPlatform(p),
            other => Error::Config(other.to_string()),
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
