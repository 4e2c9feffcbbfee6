//! Brokerage configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::infrastructure::broker::{AlpacaConfig, AlpacaEnvironment};

/// Which brokerage adapter backs the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// Alpaca trading API.
    Alpaca,
    /// In-process simulated broker.
    #[default]
    Simulated,
}

/// Brokerage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Adapter.
    #[serde(default)]
    pub kind: BrokerKind,
    /// Upper bound on any single broker call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Alpaca settings, used when `kind` is `alpaca`.
    #[serde(default)]
    pub alpaca: AlpacaSettings,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::default(),
            call_timeout_ms: default_call_timeout_ms(),
            alpaca: AlpacaSettings::default(),
        }
    }
}

impl BrokerConfig {
    /// Call timeout as a duration.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Adapter configuration for Alpaca.
    #[must_use]
    pub fn to_alpaca_config(&self) -> AlpacaConfig {
        let alpaca = &self.alpaca;
        let mut config = AlpacaConfig::new(
            alpaca.api_key.clone(),
            alpaca.api_secret.clone(),
            alpaca.environment,
        )
        .with_timeout(self.call_timeout());
        config.read_attempts = alpaca.read_attempts;
        if let Some(url) = non_empty(alpaca.base_url.as_deref()) {
            config = config.with_base_url(url);
        }
        if let Some(url) = non_empty(alpaca.stream_url.as_deref()) {
            config = config.with_stream_url(url);
        }
        config
    }
}

/// Alpaca credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlpacaSettings {
    /// API key id.
    #[serde(default)]
    pub api_key: String,
    /// API secret.
    #[serde(default)]
    pub api_secret: String,
    /// `paper` or `live`.
    #[serde(default)]
    pub environment: AlpacaEnvironment,
    /// REST base URL override.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Trade updates stream URL override.
    #[serde(default)]
    pub stream_url: Option<String>,
    /// Attempts for idempotent reads.
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,
}

impl Default for AlpacaSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            environment: AlpacaEnvironment::default(),
            base_url: None,
            stream_url: None,
            read_attempts: default_read_attempts(),
        }
    }
}

impl AlpacaSettings {
    /// Whether both key and secret are present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.api_secret.trim().is_empty()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

const fn default_call_timeout_ms() -> u64 {
    10_000
}

const fn default_read_attempts() -> u32 {
    2
}
