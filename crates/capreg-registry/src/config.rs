//! Registry configuration.
//!
//! Every field has a serde default, so an empty file (or no file) yields
//! [`RegistryConfig::default`]. Files ending in `.toml` are parsed as
//! TOML, everything else as JSON. `CAPREG_PLUGIN_DIR` overrides the plugin
//! directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RegistryError, Result};

/// Environment variable overriding [`RegistryConfig::plugin_dir`].
pub const PLUGIN_DIR_ENV: &str = "CAPREG_PLUGIN_DIR";

/// Configuration for a [`PluginRegistry`](crate::PluginRegistry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Upper bound on the handshake wait when the caller's context has no
    /// earlier deadline (seconds).
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// Timeout for a single RPC round trip to a plugin (seconds).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Grace period after the termination request before a plugin is
    /// killed. `None` leaves plugins to exit on their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_secs: Option<u64>,

    /// Relaunch a cached plugin whose process has exited.
    #[serde(default = "default_relaunch_exited")]
    pub relaunch_exited: bool,

    /// Directory scanned for plugin descriptors.
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: PathBuf,
}

fn default_handshake_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_relaunch_exited() -> bool {
    true
}

fn default_plugin_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".capreg")
        .join("plugins")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            termination_grace_secs: None,
            relaunch_exited: default_relaunch_exited(),
            plugin_dir: default_plugin_dir(),
        }
    }
}

impl RegistryConfig {
    /// Handshake timeout as a [`Duration`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Termination grace period as a [`Duration`].
    pub fn termination_grace(&self) -> Option<Duration> {
        self.termination_grace_secs.map(Duration::from_secs)
    }

    /// Parse a configuration document. `toml` selects TOML, otherwise
    /// JSON is expected.
    pub fn parse(contents: &str, toml: bool) -> Result<Self> {
        if toml {
            toml::from_str(contents).map_err(|e| RegistryError::Config(e.to_string()))
        } else {
            serde_json::from_str(contents).map_err(|e| RegistryError::Config(e.to_string()))
        }
    }

    /// Load configuration from `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading registry config");
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let mut config = Self::parse(&contents, is_toml)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides read through `get`.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = get(PLUGIN_DIR_ENV).filter(|d| !d.is_empty()) {
            self.plugin_dir = PathBuf::from(dir);
        }
    }
}
