//! Error types for refresh coordination

/// Errors from refreshing a tracked token.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("token refresh failed: {0}")]
    Failed(String),

    #[error("refresh token rejected: {0}")]
    InvalidGrant(String),

    #[error("no refresh token for {0}")]
    NoRefreshToken(common::Platform),

    #[error("platform not tracked: {0}")]
    NotTracked(common::Platform),

    #[error("refresh already in flight for {0}")]
    AlreadyInFlight(common::Platform),
}

impl From<connect_auth::Error> for RefreshError {
    fn from(err: connect_auth::Error) -> Self {
        match err {
            connect_auth::Error::InvalidGrant(msg) => RefreshError::InvalidGrant(msg),
            other => RefreshError::Failed(other.to_string()),
        }
    }
}

/// Result alias for refresh operations.
pub type Result<T> = std::result::Result<T, RefreshError>;
