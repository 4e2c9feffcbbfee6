//! Configuration for the execution bridge.
//!
//! One YAML file with `${VAR}` / `${VAR:-default}` environment interpolation,
//! validated before anything starts. Every section is optional; a missing
//! file yields the defaults plus the credential variables below.
//!
//! # Usage
//!
//! ```rust,ignore
//! use execution_bridge::config::load_config;
//!
//! let config = load_config(Some("config.yaml"))?;
//! println!("listening on {}", config.server.bind_addr);
//! ```

mod broker;
mod execution;
mod ingestion;
mod observability;
mod persistence;
mod reconciliation;
mod server;
mod session;

use std::io::ErrorKind;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::use_cases::IngestionConfig;

pub use broker::{AlpacaSettings, BrokerConfig, BrokerKind};
pub use execution::ExecutionSettings;
pub use ingestion::IngestionSettings;
pub use observability::{LoggingConfig, MetricsSettings};
pub use persistence::PersistenceConfig;
pub use reconciliation::ReconciliationSettings;
pub use server::ServerConfig;
pub use session::SessionSettings;

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Alpaca key id read when the config leaves it empty.
pub const ALPACA_API_KEY_VAR: &str = "ALPACA_API_KEY";
/// Alpaca secret read when the config leaves it empty.
pub const ALPACA_API_SECRET_VAR: &str = "ALPACA_API_SECRET";
/// Webhook secret read when the config leaves it unset.
pub const WEBHOOK_SECRET_VAR: &str = "BRIDGE_WEBHOOK_SECRET";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),

    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server.
    #[serde(default)]
    pub server: ServerConfig,
    /// Brokerage adapter.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Broker session.
    #[serde(default)]
    pub session: SessionSettings,
    /// Execution engine.
    #[serde(default)]
    pub execution: ExecutionSettings,
    /// Reconciliation engine.
    #[serde(default)]
    pub reconciliation: ReconciliationSettings,
    /// Alert ingestion.
    #[serde(default)]
    pub ingestion: IngestionSettings,
    /// Intent store.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Prometheus exporter.
    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl Config {
    /// Ingestion use case configuration.
    #[must_use]
    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            webhook_secret: self.server.webhook_secret().map(ToString::to_string),
            replay_window: self.ingestion.replay_window(),
        }
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// A missing file is not an error: defaults are used.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(path, "Config file not found, using defaults and environment");
            String::new()
        }
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.to_string(),
                source: e,
            });
        }
    };

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let mut config: Config = if interpolated.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml_bw::from_str(&interpolated)?
    };
    apply_env_fallbacks(&mut config, |name| std::env::var(name).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. Unset variables
/// without a default become empty.
#[allow(clippy::expect_used)] // Regex is a constant; it always compiles
fn interpolate_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match cap.get(1).map(|m| std::env::var(m.as_str())) {
            Some(Ok(v)) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Fill credentials the file leaves blank from well-known variables.
fn apply_env_fallbacks(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    let lookup = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    if config.broker.alpaca.api_key.trim().is_empty() {
        if let Some(key) = lookup(ALPACA_API_KEY_VAR) {
            config.broker.alpaca.api_key = key;
        }
    }
    if config.broker.alpaca.api_secret.trim().is_empty() {
        if let Some(secret) = lookup(ALPACA_API_SECRET_VAR) {
            config.broker.alpaca.api_secret = secret;
        }
    }
    if config.server.webhook_secret().is_none() {
        config.server.webhook_secret = lookup(WEBHOOK_SECRET_VAR);
    }
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |message: &str| Err(ConfigError::ValidationError(message.to_string()));

    if config.broker.call_timeout_ms == 0 {
        return invalid("broker.call_timeout_ms must be positive");
    }
    if config.broker.alpaca.read_attempts == 0 {
        return invalid("broker.alpaca.read_attempts must be at least 1");
    }

    let session = &config.session;
    if session.reconnect_base_ms == 0 {
        return invalid("session.reconnect_base_ms must be positive");
    }
    if session.reconnect_cap_ms < session.reconnect_base_ms {
        return invalid("session.reconnect_cap_ms must not be below reconnect_base_ms");
    }
    if session.heartbeat_interval_secs == 0 {
        return invalid("session.heartbeat_interval_secs must be positive");
    }
    if session.update_buffer == 0 {
        return invalid("session.update_buffer must be positive");
    }

    let execution = &config.execution;
    if execution.max_submit_attempts == 0 {
        return invalid("execution.max_submit_attempts must be at least 1");
    }
    if execution.max_cancel_attempts == 0 {
        return invalid("execution.max_cancel_attempts must be at least 1");
    }
    if execution.retry_cap_ms < execution.retry_base_ms {
        return invalid("execution.retry_cap_ms must not be below retry_base_ms");
    }
    if execution.drive_interval_ms == 0 {
        return invalid("execution.drive_interval_ms must be positive");
    }

    if config.reconciliation.interval_secs == 0 {
        return invalid("reconciliation.interval_secs must be positive");
    }
    // A submission younger than one call timeout may still be in flight
    if config.reconciliation.stale_submission_secs.saturating_mul(1000)
        <= config.broker.call_timeout_ms
    {
        return Err(ConfigError::ValidationError(format!(
            "reconciliation.stale_submission_secs ({}s) must exceed broker.call_timeout_ms ({}ms)",
            config.reconciliation.stale_submission_secs, config.broker.call_timeout_ms
        )));
    }

    if !config.persistence.in_memory && config.persistence.database_url.trim().is_empty() {
        return invalid("persistence.database_url is required unless in_memory is set");
    }

    if config.broker.kind == BrokerKind::Alpaca && !config.broker.alpaca.has_credentials() {
        let variable = if config.broker.alpaca.api_key.trim().is_empty() {
            ALPACA_API_KEY_VAR
        } else {
            ALPACA_API_SECRET_VAR
        };
        if config.broker.alpaca.environment.is_live() {
            return Err(ConfigError::MissingEnvVar(format!(
                "{variable} (required for LIVE trading)"
            )));
        }
        return Err(ConfigError::MissingEnvVar(variable.to_string()));
    }

    Ok(())
}
