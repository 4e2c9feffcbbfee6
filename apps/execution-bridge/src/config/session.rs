//! Broker session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::services::{Backoff, SessionConfig};

/// Reconnect, heartbeat and update buffering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// First reconnect delay ceiling.
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    /// Largest reconnect delay.
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,
    /// Liveness check period while connected.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Capacity of the order update channel.
    #[serde(default = "default_update_buffer")]
    pub update_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            update_buffer: default_update_buffer(),
        }
    }
}

impl SessionSettings {
    /// Session manager configuration.
    #[must_use]
    pub fn to_session_config(&self, call_timeout: Duration) -> SessionConfig {
        SessionConfig {
            call_timeout,
            reconnect: Backoff::new(
                Duration::from_millis(self.reconnect_base_ms),
                Duration::from_millis(self.reconnect_cap_ms),
            ),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            update_buffer: self.update_buffer,
        }
    }
}

const fn default_reconnect_base_ms() -> u64 {
    1_000
}

const fn default_reconnect_cap_ms() -> u64 {
    60_000
}

const fn default_heartbeat_interval_secs() -> u64 {
    15
}

const fn default_update_buffer() -> usize {
    1024
}
