//! Intent Domain Events
//!
//! One event per persisted state transition. Events are collected on the
//! aggregate and handed to the transition publisher after the store accepted
//! the write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::IntentState;
use crate::domain::shared::IntentId;

/// Structured record of a state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentEvent {
    /// Intent that moved.
    pub intent_id: IntentId,
    /// Prior state; `None` when the intent was created.
    pub from_state: Option<IntentState>,
    /// New state.
    pub to_state: IntentState,
    /// Transition name (`submit`, `ack`, ...) or `created`.
    pub transition: String,
    /// Why the transition happened.
    pub reason: String,
    /// When it happened.
    pub ts: DateTime<Utc>,
}

impl IntentEvent {
    /// Event recorded when an intent is first persisted.
    #[must_use]
    pub fn created(intent_id: IntentId, reason: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self {
            intent_id,
            from_state: None,
            to_state: IntentState::New,
            transition: "created".to_string(),
            reason: reason.into(),
            ts,
        }
    }

    /// Whether this event moved the intent into a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.to_state.is_terminal()
    }
}
