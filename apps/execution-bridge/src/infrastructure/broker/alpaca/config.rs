//! Alpaca adapter configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment for the Alpaca API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlpacaEnvironment {
    /// Paper trading (simulated).
    #[default]
    Paper,
    /// Live trading (real money).
    Live,
}

impl AlpacaEnvironment {
    /// Base URL for the trading API.
    #[must_use]
    pub const fn trading_base_url(&self) -> &'static str {
        match self {
            Self::Paper => "https://paper-api.alpaca.markets",
            Self::Live => "https://api.alpaca.markets",
        }
    }

    /// URL of the trade updates websocket.
    #[must_use]
    pub const fn stream_url(&self) -> &'static str {
        match self {
            Self::Paper => "wss://paper-api.alpaca.markets/stream",
            Self::Live => "wss://api.alpaca.markets/stream",
        }
    }

    /// Check if this is live trading.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

impl std::fmt::Display for AlpacaEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "PAPER"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

/// Configuration for the Alpaca broker adapter.
#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    /// API key.
    pub api_key: String,
    /// API secret.
    pub api_secret: String,
    /// Trading environment.
    pub environment: AlpacaEnvironment,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Overrides the environment's REST base URL.
    pub base_url: Option<String>,
    /// Overrides the environment's stream URL.
    pub stream_url: Option<String>,
    /// Attempts for idempotent reads.
    pub read_attempts: u32,
}

impl AlpacaConfig {
    /// Create a new configuration.
    #[must_use]
    pub fn new(api_key: String, api_secret: String, environment: AlpacaEnvironment) -> Self {
        Self {
            api_key,
            api_secret,
            environment,
            timeout: Duration::from_secs(10),
            base_url: None,
            stream_url: None,
            read_attempts: 2,
        }
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Point the REST client somewhere else (a mock server, a proxy).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Point the stream client somewhere else.
    #[must_use]
    pub fn with_stream_url(mut self, stream_url: impl Into<String>) -> Self {
        self.stream_url = Some(stream_url.into());
        self
    }

    /// REST base URL in effect.
    #[must_use]
    pub fn trading_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.trading_base_url())
            .trim_end_matches('/')
    }

    /// Stream URL in effect.
    #[must_use]
    pub fn stream_url(&self) -> &str {
        self.stream_url
            .as_deref()
            .unwrap_or_else(|| self.environment.stream_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_environment_urls() {
        let env = AlpacaEnvironment::Paper;
        assert!(env.trading_base_url().contains("paper"));
        assert!(env.stream_url().starts_with("wss://paper"));
        assert!(!env.is_live());
    }

    #[test]
    fn live_environment_urls() {
        let env = AlpacaEnvironment::Live;
        assert!(!env.trading_base_url().contains("paper"));
        assert!(env.is_live());
    }

    #[test]
    fn overrides_take_precedence() {
        let config = AlpacaConfig::new("k".into(), "s".into(), AlpacaEnvironment::Live)
            .with_base_url("http://127.0.0.1:9000/")
            .with_stream_url("ws://127.0.0.1:9001/stream");
        assert_eq!(config.trading_base_url(), "http://127.0.0.1:9000");
        assert_eq!(config.stream_url(), "ws://127.0.0.1:9001/stream");
    }

    #[test]
    fn environment_parses_lowercase() {
        let env: AlpacaEnvironment = serde_json::from_str("\"live\"").unwrap();
        assert_eq!(env, AlpacaEnvironment::Live);
        assert_eq!(format!("{}", AlpacaEnvironment::Paper), "PAPER");
    }
}
