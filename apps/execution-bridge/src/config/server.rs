//! HTTP server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the webhook and API listen on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Shared secret alerts must echo in `passphrase`. Unset or empty disables
    /// the check.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            webhook_secret: None,
        }
    }
}

impl ServerConfig {
    /// Secret in effect; blank values count as unset.
    #[must_use]
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

const fn default_bind_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5001)
}
