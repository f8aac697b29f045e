//! Server profiles.
//!
//! Loaded from `~/.config/remotefs/servers.ron`:
//!
//! ```ron
//! (
//!     default_server: Some("lab"),
//!     servers: {
//!         "lab": (url: "http://localhost:8888/", token_env: Some("LAB_TOKEN")),
//!         "hub": (url: "https://hub.example/user/amy/", read_timeout_ms: Some(30000)),
//!     },
//! )
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{CONNECT_TIMEOUT, DEFAULT_TOKEN_ENV};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("no server profile named {0:?}")]
    UnknownServer(String),
    #[error("no server selected and no default_server configured")]
    NoServer,
}

/// Connection settings for one Jupyter server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server root URL, including any JupyterHub user prefix.
    pub url: String,
    /// Inline token. Prefer `token_env` for anything shared.
    #[serde(default)]
    pub token: Option<String>,
    /// Environment variable holding the token.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

impl ServerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            token_env: None,
            read_timeout_ms: None,
            connect_timeout_ms: None,
        }
    }

    /// Inline token, then `token_env`, then `JUPYTER_TOKEN`.
    pub fn resolve_token(&self) -> Option<String> {
        if let Some(token) = &self.token {
            return Some(token.clone());
        }
        let var = self.token_env.as_deref().unwrap_or(DEFAULT_TOKEN_ENV);
        std::env::var(var).ok().filter(|t| !t.is_empty())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout_ms
            .map_or(CONNECT_TIMEOUT, Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub default_server: Option<String>,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl ClientConfig {
    /// `~/.config/remotefs/servers.ron`, when a config directory exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("remotefs").join("servers.ron"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Load the default file; a missing file is an empty configuration.
    pub fn load_default() -> Result<Self, ConfigError> {
        let Some(path) = Self::default_path() else {
            tracing::debug!("no config directory available");
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let config = Self::load(&path)?;
        tracing::debug!(path = %path.display(), servers = config.servers.len(), "loaded config");
        Ok(config)
    }

    /// The named profile, or `default_server` when `name` is `None`.
    pub fn server(&self, name: Option<&str>) -> Result<&ServerConfig, ConfigError> {
        let name = name
            .or(self.default_server.as_deref())
            .ok_or(ConfigError::NoServer)?;
        self.servers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownServer(name.to_string()))
    }
}
