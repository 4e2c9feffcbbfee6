//! Reconciliation configuration for periodic broker sync.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::services::ReconciliationConfig;

/// Reconciliation schedule and matching windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSettings {
    /// Reconciliation interval in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Run a pass when the session first connects.
    #[serde(default = "default_on_startup")]
    pub on_startup: bool,
    /// How far before an intent's creation a matching broker order may lie.
    #[serde(default = "default_match_window_secs")]
    pub match_window_secs: u64,
    /// Age after which an unacknowledged submission is resolved.
    #[serde(default = "default_stale_submission_secs")]
    pub stale_submission_secs: u64,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            on_startup: default_on_startup(),
            match_window_secs: default_match_window_secs(),
            stale_submission_secs: default_stale_submission_secs(),
        }
    }
}

impl ReconciliationSettings {
    /// Convert to the reconciliation engine's configuration.
    #[must_use]
    pub const fn to_reconciliation_config(&self, max_submit_attempts: u32) -> ReconciliationConfig {
        ReconciliationConfig {
            interval: Duration::from_secs(self.interval_secs),
            on_startup: self.on_startup,
            match_window: Duration::from_secs(self.match_window_secs),
            stale_submission: Duration::from_secs(self.stale_submission_secs),
            max_submit_attempts,
        }
    }
}

const fn default_interval_secs() -> u64 {
    30
}

const fn default_on_startup() -> bool {
    true
}

const fn default_match_window_secs() -> u64 {
    300
}

const fn default_stale_submission_secs() -> u64 {
    30
}
