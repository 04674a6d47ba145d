//! Configuration for the server, loaded from a TOML file.
//!
//! Besides the network and logging settings the file carries the seed data
//! for the in-memory store: the user accounts and the initial games.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    /// Accounts allowed to connect.
    pub users: Vec<UserConfig>,
    /// Games present at startup.
    pub games: Vec<GameConfig>,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the discovery and session sockets bind to.
    pub bind_address: String,
    /// Well-known UDP port answering `CONNECT_USER`.
    pub discovery_port: u16,
}

/// Per-session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds without traffic before a session socket is closed.
    pub idle_timeout_secs: u64,
    /// Sessions open at once; further `CONNECT_USER` requests are refused.
    pub max_sessions: usize,
    /// Packed program version reported by `GET_VERSION` (`0xMMmmpppp`).
    pub version: u32,
    pub version_text: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub name: String,
    pub password: String,
    pub readable_name: String,
    /// `UserProperties` bits.
    pub properties: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub home: String,
    pub away: String,
    /// Kick-off, unix milliseconds.
    pub timestamp: i64,
    pub season_index: u8,
    pub competition: u8,
    pub score: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
            users: vec![UserConfig {
                name: "admin".into(),
                password: "admin".into(),
                readable_name: "Administrator".into(),
                properties: 0x0000_0087,
            }],
            games: Vec::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            discovery_port: 55000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 180,
            max_sessions: 64,
            version: 0x0001_0200,
            version_text: "V1.2.0".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
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

    /// `address:port` of the discovery socket.
    pub fn discovery_address(&self) -> String {
        format!(
            "{}:{}",
            self.network.bind_address, self.network.discovery_port
        )
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session.idle_timeout_secs.max(1))
    }
}

// ── Tests ────────────────────────────────────────────────────────
