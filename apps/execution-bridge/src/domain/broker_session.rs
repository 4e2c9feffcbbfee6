//! Broker Session
//!
//! The live brokerage connection as a value. Only the session manager writes
//! it; everyone else receives clones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection status of the brokerage session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Not connected and not trying.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Authenticated and streaming.
    Connected,
    /// Lost unexpectedly; outbound calls are refused while reconnecting.
    Degraded,
}

impl SessionStatus {
    /// Whether outbound brokerage calls are allowed.
    #[must_use]
    pub const fn accepts_calls(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Numeric value exported as a gauge.
    #[must_use]
    pub const fn gauge_value(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Degraded => 3.0,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Degraded => write!(f, "DEGRADED"),
        }
    }
}

/// Snapshot of the brokerage session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerSession {
    /// Connection status.
    pub status: SessionStatus,
    /// Last successful heartbeat.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Consecutive failed reconnect attempts.
    pub reconnect_attempts: u32,
    /// When the current connection was established.
    pub connected_since: Option<DateTime<Utc>>,
    /// Why the session last left CONNECTED.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_accepts_calls() {
        assert!(SessionStatus::Connected.accepts_calls());
        assert!(!SessionStatus::Degraded.accepts_calls());
        assert!(!SessionStatus::Connecting.accepts_calls());
        assert!(!SessionStatus::Disconnected.accepts_calls());
    }

    #[test]
    fn default_session_is_disconnected() {
        let session = BrokerSession::default();
        assert_eq!(session.status, SessionStatus::Disconnected);
        assert_eq!(session.reconnect_attempts, 0);
    }
}
