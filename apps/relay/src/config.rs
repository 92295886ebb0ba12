//! Relay configuration.
//!
//! Defaults can be overridden by a TOML file whose path is given in
//! `HACKCHAT_CONFIG`; the `PORT` environment variable overrides the port
//! from either source.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use hackchat_protocol::constants::{DEFAULT_PORT, MAX_FILE_SIZE, WS_MAX_MESSAGE_SIZE};
use serde::{Deserialize, Serialize};

/// Environment variable naming the TOML config file.
pub const CONFIG_ENV: &str = "HACKCHAT_CONFIG";
/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "PORT";

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket listen port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted file, checked on start and while buffering.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Largest accepted WebSocket message.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Idle seconds before an open transfer is evicted.
    #[serde(default = "default_transfer_ttl")]
    pub transfer_ttl_secs: u64,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Drop a connection's open transfers when it disconnects.
    #[serde(default = "default_true")]
    pub purge_on_disconnect: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_file_size() -> u64 {
    MAX_FILE_SIZE
}

fn default_max_message_size() -> usize {
    WS_MAX_MESSAGE_SIZE
}

fn default_transfer_ttl() -> u64 {
    600
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_file_size: default_max_file_size(),
            max_message_size: default_max_message_size(),
            transfer_ttl_secs: default_transfer_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            purge_on_disconnect: default_true(),
        }
    }
}

impl Config {
    /// Builds the configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let port = std::env::var(PORT_ENV).ok();
        Self::resolve(path.as_deref(), port.as_deref())
    }

    /// Applies the file (if any) and then the port override.
    pub fn resolve(path: Option<&Path>, port: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(port) = port.map(str::trim).filter(|p| !p.is_empty()) {
            config.port = port
                .parse()
                .with_context(|| format!("invalid {PORT_ENV} value: {port:?}"))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration file loaded");
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.sweep_interval_secs > 0, "sweep_interval_secs must be positive");
        anyhow::ensure!(self.max_message_size > 0, "max_message_size must be positive");
        Ok(())
    }

    pub fn transfer_ttl(&self) -> Duration {
        Duration::from_secs(self.transfer_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
