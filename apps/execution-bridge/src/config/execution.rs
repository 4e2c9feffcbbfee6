//! Execution engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::services::{Backoff, ExecutionConfig};

/// Submission and cancel retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Submission attempts before an intent fails.
    #[serde(default = "default_max_attempts")]
    pub max_submit_attempts: u32,
    /// First retry delay ceiling.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Largest retry delay.
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
    /// Cancel attempts before the cancel is abandoned.
    #[serde(default = "default_max_attempts")]
    pub max_cancel_attempts: u32,
    /// Wait for a cancel confirmation before sending it again.
    #[serde(default = "default_cancel_confirm_timeout_secs")]
    pub cancel_confirm_timeout_secs: u64,
    /// Period of the drive loop.
    #[serde(default = "default_drive_interval_ms")]
    pub drive_interval_ms: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_submit_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
            max_cancel_attempts: default_max_attempts(),
            cancel_confirm_timeout_secs: default_cancel_confirm_timeout_secs(),
            drive_interval_ms: default_drive_interval_ms(),
        }
    }
}

impl ExecutionSettings {
    /// Execution engine configuration.
    #[must_use]
    pub fn to_execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            max_submit_attempts: self.max_submit_attempts,
            submit_backoff: Backoff::new(
                Duration::from_millis(self.retry_base_ms),
                Duration::from_millis(self.retry_cap_ms),
            ),
            max_cancel_attempts: self.max_cancel_attempts,
            cancel_confirm_timeout: Duration::from_secs(self.cancel_confirm_timeout_secs),
            drive_interval: Duration::from_millis(self.drive_interval_ms),
        }
    }
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_retry_base_ms() -> u64 {
    500
}

const fn default_retry_cap_ms() -> u64 {
    30_000
}

const fn default_cancel_confirm_timeout_secs() -> u64 {
    30
}

const fn default_drive_interval_ms() -> u64 {
    250
}
