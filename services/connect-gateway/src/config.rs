//! Configuration types and loading
//!
//! Path precedence: `--config` CLI arg > `CONFIG_PATH` env var >
//! `connect-gateway.toml`. Every field has a default, so an empty file is a
//! valid configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Platform;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Authorization state settings
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Platforms attempts may be issued for.
    #[serde(default = "default_platforms")]
    pub platforms: Vec<Platform>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_secs: default_state_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            platforms: default_platforms(),
        }
    }
}

impl OAuthConfig {
    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8787))
}

fn default_max_connections() -> usize {
    1000
}

fn default_state_ttl() -> u64 {
    600
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_platforms() -> Vec<Platform> {
    Platform::ALL.to_vec()
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let invalid = |field| common::Error::InvalidSetting {
            field,
            reason: "must be greater than 0",
        };
        if self.server.max_connections == 0 {
            return Err(invalid("max_connections"));
        }
        if self.oauth.state_ttl_secs == 0 {
            return Err(invalid("state_ttl_secs"));
        }
        if self.oauth.sweep_interval_secs == 0 {
            return Err(invalid("sweep_interval_secs"));
        }
        if self.oauth.platforms.is_empty() {
            return Err(common::Error::InvalidSetting {
                field: "platforms",
                reason: "at least one platform must be enabled",
            });
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("connect-gateway.toml")
    }
}
