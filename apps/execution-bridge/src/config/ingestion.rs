//! Alert ingestion configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::services::RuleSet;

/// Translation rules and replay protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSettings {
    /// `direct` or `position_aware`.
    #[serde(default)]
    pub rules: RuleSet,
    /// A finished alert redelivered within this window is refused. Zero
    /// disables the check.
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            rules: RuleSet::default(),
            replay_window_secs: default_replay_window_secs(),
        }
    }
}

impl IngestionSettings {
    /// Replay window as a duration.
    #[must_use]
    pub const fn replay_window(&self) -> Duration {
        Duration::from_secs(self.replay_window_secs)
    }
}

const fn default_replay_window_secs() -> u64 {
    86_400
}
