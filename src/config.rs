//! Configuration handed to the gpg bridge.
//!
//! The host application passes its gpg settings as JSON, either inline via
//! the `GPG_BRIDGE_CONFIG` environment variable or as a file. Every field is
//! optional; an absent configuration means "find gpg on PATH and use its
//! default home directory".

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Environment variable holding inline JSON configuration.
pub const CONFIG_ENV: &str = "GPG_BRIDGE_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the gpg executable. Searched on `PATH` when absent.
    #[serde(default)]
    pub gpg_path: Option<PathBuf>,

    /// Overrides gpg's home directory (`--homedir`).
    #[serde(default)]
    pub gnupg_home: Option<PathBuf>,

    /// Deadline for a single gpg invocation, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// gpg-agent handling.
    #[serde(default)]
    pub agent: AgentConfig,
}

/// gpg-agent settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Restart the agent when it does not answer a probe.
    #[serde(default = "default_restart_unresponsive")]
    pub restart_unresponsive: bool,

    /// How long the liveness probe may take, in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_seconds: u64,

    /// Options written into gpg-agent.conf at setup.
    #[serde(default)]
    pub config: Option<HashMap<String, String>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            restart_unresponsive: default_restart_unresponsive(),
            probe_timeout_seconds: default_probe_timeout(),
            config: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gpg_path: None,
            gnupg_home: None,
            timeout_seconds: default_timeout(),
            agent: AgentConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from [`CONFIG_ENV`], falling back to defaults when
    /// the variable is not set.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(json) => Self::from_json(&json).with_context(|| format!("Failed to parse {CONFIG_ENV}")),
            Err(_) => {
                debug!("{CONFIG_ENV} not set, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl AgentConfig {
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}

const fn default_timeout() -> u64 {
    30
}

const fn default_probe_timeout() -> u64 {
    3
}

const fn default_restart_unresponsive() -> bool {
    true
}
