//! Plain connection settings.
//!
//! Front ends load their own TOML files and convert into this struct.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub server_host: String,
    /// UDP port answering `CONNECT_USER`.
    pub discovery_port: u16,

    /// How long to wait for the session port.
    pub discovery_timeout: Duration,
    /// Per-attempt timeout for login and requests.
    pub request_timeout: Duration,
    /// Consecutive timeouts of one request before a reconnect cycle.
    pub timeouts_before_reconnect: u32,
    /// Reconnect cycles one request may go through before it is abandoned.
    pub max_reconnects: u32,
    /// Delay between tearing down and rediscovering.
    pub reconnect_delay: Duration,

    /// Since the last success, requests are sent without logging in again.
    pub login_window: Duration,
    /// Since the last success, the session port is reused with a fresh login.
    /// Beyond it a full rediscovery runs.
    pub reset_window: Duration,

    /// Resubmissions of one request after stale-list answers.
    pub stale_retry_limit: u32,

    /// Fetch the server version and the user properties after a login
    /// started by a caller.
    pub fetch_after_login: bool,

    /// Packed local program version (`0xMMmmpppp`).
    pub local_version: u32,
    pub local_version_text: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".into(),
            discovery_port: 55000,
            discovery_timeout: Duration::from_millis(3000),
            request_timeout: Duration::from_secs(5),
            timeouts_before_reconnect: 2,
            max_reconnects: 1,
            reconnect_delay: Duration::from_millis(100),
            login_window: Duration::from_secs(50),
            reset_window: Duration::from_secs(110),
            stale_retry_limit: 3,
            fetch_after_login: true,
            local_version: 0x0001_0200,
            local_version_text: "V1.2.0".into(),
        }
    }
}

impl ConnectionConfig {
    /// `host:port` of the discovery service.
    pub fn discovery_address(&self) -> String {
        format!("{}:{}", self.server_host, self.discovery_port)
    }

    /// `host:port` of a session port on the same server.
    pub fn session_address(&self, port: u16) -> String {
        format!("{}:{}", self.server_host, port)
    }
}
