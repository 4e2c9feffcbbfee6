//! Transitions of the intent state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::IntentState;

/// A named edge of the intent state machine.
///
/// `CancelRejected` and `Resolved` carry their destination because it depends
/// on the intent's fill state and on brokerage truth respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Transition {
    /// NEW -> SUBMITTING.
    Submit,
    /// SUBMITTING -> ACKED once a broker order id is known.
    Ack,
    /// SUBMITTING -> NEW, another attempt is scheduled.
    SubmitFailedRetryable,
    /// SUBMITTING -> FAILED.
    SubmitFailedFatal,
    /// SUBMITTING -> REJECTED, the broker refused the order.
    BrokerRejected,
    /// Fill that leaves quantity outstanding.
    PartialFill,
    /// Fill completing the quantity.
    FullFill,
    /// ACKED|PARTIALLY_FILLED -> CANCEL_REQUESTED.
    CancelRequest,
    /// CANCEL_REQUESTED -> CANCELLED.
    CancelAck,
    /// CANCEL_REQUESTED -> the working state it came from.
    CancelRejected {
        /// ACKED or PARTIALLY_FILLED.
        resume: IntentState,
    },
    /// Any non-terminal state -> RECONCILE_MISMATCH.
    ReconcileMismatch,
    /// RECONCILE_MISMATCH -> the state matching brokerage truth.
    Resolved {
        /// Adopted state.
        to: IntentState,
    },
}

impl Transition {
    /// Stable snake_case name used in events and logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Ack => "ack",
            Self::SubmitFailedRetryable => "submit_failed_retryable",
            Self::SubmitFailedFatal => "submit_failed_fatal",
            Self::BrokerRejected => "broker_rejected",
            Self::PartialFill => "partial_fill",
            Self::FullFill => "full_fill",
            Self::CancelRequest => "cancel_request",
            Self::CancelAck => "cancel_ack",
            Self::CancelRejected { .. } => "cancel_rejected",
            Self::ReconcileMismatch => "reconcile_mismatch",
            Self::Resolved { .. } => "resolved",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
