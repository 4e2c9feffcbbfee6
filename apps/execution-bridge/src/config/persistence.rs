//! Intent store configuration.

use serde::{Deserialize, Serialize};

/// Intent store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite connection URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Keep intents in process memory only. Nothing survives a restart.
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            in_memory: false,
        }
    }
}

fn default_database_url() -> String {
    "sqlite://bridge.db".to_string()
}
