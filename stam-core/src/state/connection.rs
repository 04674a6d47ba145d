//! The single authoritative connection state.

use std::time::Instant;

use crate::message::ResultCode;

// ── ConnectionState ──────────────────────────────────────────────

/// Lifecycle of one logical connection.
///
/// ```text
///            start / submit
///  Idle ──────────────────► Discovering ──► AwaitingPort ──► LoggingIn ──► Ready
///   ▲ ▲                         │  ▲             │               │  ▲        │
///   │ │   login failure         │  │             ▼               ▼  │ relogin│
///   │ └─────────────────────────┼──┼─────────── Failed ◄──────────┘  └────────┤
///   │                           │  └───────── ReconnectBackoff ◄──────────────┘
///   └──────── stop (from anywhere)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session and nothing in progress.
    #[default]
    Idle,

    /// `CONNECT_USER` sent to the discovery port.
    Discovering,

    /// Session port received; waiting for the data link to come up.
    AwaitingPort { port: u16 },

    /// Login sent on the data link.
    LoggingIn,

    /// Logged in; requests flow.
    Ready {
        /// When the login succeeded.
        since: Instant,
    },

    /// Links torn down; rediscovery starts at `until`.
    ReconnectBackoff { until: Instant },

    /// Connection attempt failed. A new start or request retries.
    Failed { code: ResultCode },
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Discovering => write!(f, "Discovering"),
            Self::AwaitingPort { port } => write!(f, "AwaitingPort({port})"),
            Self::LoggingIn => write!(f, "LoggingIn"),
            Self::Ready { .. } => write!(f, "Ready"),
            Self::ReconnectBackoff { .. } => write!(f, "ReconnectBackoff"),
            Self::Failed { code } => write!(f, "Failed({code})"),
        }
    }
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Somewhere between discovery and a finished login.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            Self::Discovering
                | Self::AwaitingPort { .. }
                | Self::LoggingIn
                | Self::ReconnectBackoff { .. }
        )
    }

    /// Whether moving from `self` to `next` is a legal edge.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            // stop and login failure
            (_, Idle) => true,
            // transport errors
            (_, Failed { .. }) => true,
            (Idle | Failed { .. } | ReconnectBackoff { .. } | Ready { .. }, Discovering) => true,
            (Discovering, AwaitingPort { .. }) => true,
            (AwaitingPort { .. } | Ready { .. }, LoggingIn) => true,
            (LoggingIn, Ready { .. }) => true,
            (AwaitingPort { .. } | LoggingIn | Ready { .. }, ReconnectBackoff { .. }) => true,
            _ => false,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_edges() {
        let now = Instant::now();
        let path = [
            ConnectionState::Idle,
            ConnectionState::Discovering,
            ConnectionState::AwaitingPort { port: 4000 },
            ConnectionState::LoggingIn,
            ConnectionState::Ready { since: now },
            ConnectionState::LoggingIn,
            ConnectionState::Ready { since: now },
            ConnectionState::ReconnectBackoff { until: now },
            ConnectionState::Discovering,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn illegal_edges() {
        let now = Instant::now();
        assert!(!ConnectionState::Idle.can_transition_to(&ConnectionState::Ready { since: now }));
        assert!(!ConnectionState::Idle.can_transition_to(&ConnectionState::LoggingIn));
        assert!(!ConnectionState::Discovering.can_transition_to(&ConnectionState::LoggingIn));
        assert!(
            !ConnectionState::Discovering
                .can_transition_to(&ConnectionState::ReconnectBackoff { until: now })
        );
    }

    #[test]
    fn stop_and_failure_from_anywhere() {
        let now = Instant::now();
        for s in [
            ConnectionState::Discovering,
            ConnectionState::LoggingIn,
            ConnectionState::Ready { since: now },
            ConnectionState::ReconnectBackoff { until: now },
        ] {
            assert!(s.can_transition_to(&ConnectionState::Idle));
            assert!(s.can_transition_to(&ConnectionState::Failed {
                code: ResultCode::TransportError
            }));
        }
    }

    #[test]
    fn predicates() {
        let now = Instant::now();
        assert!(ConnectionState::default().is_idle());
        assert!(ConnectionState::LoggingIn.is_connecting());
        let ready = ConnectionState::Ready { since: now };
        assert!(ready.is_ready());
        assert!(!ready.is_connecting());
        assert!(ConnectionState::ReconnectBackoff { until: now }.is_connecting());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionState::Idle.to_string(), "Idle");
        assert_eq!(
            ConnectionState::AwaitingPort { port: 7 }.to_string(),
            "AwaitingPort(7)"
        );
        assert_eq!(
            ConnectionState::Failed {
                code: ResultCode::Timeout
            }
            .to_string(),
            "Failed(timeout)"
        );
    }
}
