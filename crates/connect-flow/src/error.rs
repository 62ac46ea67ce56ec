//! Client-side flow errors
//!
//! Every variant ends up in `FlowState`'s `error` field, so the type is
//! `Clone + PartialEq` and each message is fit to show a user as-is.

use connect_auth::RejectReason;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("authorization state is invalid or expired, please start again")]
    ValidationExpired,

    #[error("authorization state was issued for a different platform")]
    PlatformMismatch,

    #[error("callback is missing the code or state parameter")]
    MissingParameters,

    /// The provider's `error` parameter, verbatim.
    #[error("{0}")]
    ProviderDenied(String),

    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("token revocation failed: {0}")]
    RevocationFailed(String),

    /// The authorization window closed before the provider redirected back.
    #[error("window closed")]
    WindowClosed,

    #[error("could not start authorization: {0}")]
    InitiateFailed(String),

    #[error("authorization window could not be opened: {0}")]
    WindowBlocked(String),

    /// The authorization service failed while validating the callback.
    #[error("authorization service unavailable: {0}")]
    Backend(String),
}

impl From<RejectReason> for FlowError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::NotFoundOrExpired => FlowError::ValidationExpired,
            RejectReason::PlatformMismatch => FlowError::PlatformMismatch,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
