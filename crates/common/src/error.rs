//! Errors shared by config loading and platform parsing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Free-form configuration problem (missing env var, unreadable secret).
    #[error("config error: {0}")]
    Config(String),

    /// A setting that parsed but failed validation.
    #[error("invalid setting `{field}`: {reason}")]
    InvalidSetting {
        field: &'static str,
        reason: &'static str,
    },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
}

pub type Result<T> = std::result::Result<T, Error>;
