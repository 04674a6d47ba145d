//! Configuration for the command-line client.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stam_core::ConnectionConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub network: NetworkConfig,
    pub timing: TimingConfig,
    pub account: AccountConfig,
    pub logging: LoggingConfig,
}

/// Where the server lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub server_host: String,
    pub discovery_port: u16,
}

/// Timeouts and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub discovery_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub timeouts_before_reconnect: u32,
    pub max_reconnects: u32,
    pub reconnect_delay_ms: u64,
}

/// Login credentials. Command-line flags override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub user_name: String,
    pub password: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        let core = ConnectionConfig::default();
        Self {
            server_host: core.server_host,
            discovery_port: core.discovery_port,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        let core = ConnectionConfig::default();
        Self {
            discovery_timeout_ms: core.discovery_timeout.as_millis() as u64,
            request_timeout_ms: core.request_timeout.as_millis() as u64,
            timeouts_before_reconnect: core.timeouts_before_reconnect,
            max_reconnects: core.max_reconnects,
            reconnect_delay_ms: core.reconnect_delay.as_millis() as u64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Convert into the library's connection settings.
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            server_host: self.network.server_host.clone(),
            discovery_port: self.network.discovery_port,
            discovery_timeout: Duration::from_millis(self.timing.discovery_timeout_ms.max(1)),
            request_timeout: Duration::from_millis(self.timing.request_timeout_ms.max(1)),
            timeouts_before_reconnect: self.timing.timeouts_before_reconnect.max(1),
            max_reconnects: self.timing.max_reconnects,
            reconnect_delay: Duration::from_millis(self.timing.reconnect_delay_ms),
            ..ConnectionConfig::default()
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
