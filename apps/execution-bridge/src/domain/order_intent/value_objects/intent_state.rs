//! Intent lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseValueError;

/// Lifecycle state of an order intent.
///
/// `Filled`, `Cancelled`, `Rejected` and `Failed` are terminal. `ReconcileMismatch`
/// is never terminal: it always resolves to the state matching brokerage truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentState {
    /// Durably recorded, not yet sent to the broker.
    New,
    /// A submission is in flight (or its outcome is unknown).
    Submitting,
    /// Broker acknowledged the order and assigned an identifier.
    Acked,
    /// Some quantity filled.
    PartiallyFilled,
    /// Entire quantity filled.
    Filled,
    /// Cancel requested, awaiting broker confirmation.
    CancelRequested,
    /// Broker confirmed cancellation.
    Cancelled,
    /// Broker refused the order.
    Rejected,
    /// Gave up: fatal error or retry budget exhausted.
    Failed,
    /// Local state disagrees with the broker; resolution pending.
    ReconcileMismatch,
}

impl IntentState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 10] = [
        Self::New,
        Self::Submitting,
        Self::Acked,
        Self::PartiallyFilled,
        Self::Filled,
        Self::CancelRequested,
        Self::Cancelled,
        Self::Rejected,
        Self::Failed,
        Self::ReconcileMismatch,
    ];

    /// Returns true if no further transition can occur.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Failed
        )
    }

    /// Returns true if the broker holds a live order for this intent.
    #[must_use]
    pub const fn is_working(&self) -> bool {
        matches!(
            self,
            Self::Acked | Self::PartiallyFilled | Self::CancelRequested
        )
    }

    /// Returns true if an operator cancel may be requested.
    #[must_use]
    pub const fn is_cancelable(&self) -> bool {
        matches!(self, Self::Acked | Self::PartiallyFilled)
    }

    /// Wire and storage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Submitting => "SUBMITTING",
            Self::Acked => "ACKED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::CancelRequested => "CANCEL_REQUESTED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
            Self::ReconcileMismatch => "RECONCILE_MISMATCH",
        }
    }
}

impl fmt::Display for IntentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentState {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseValueError::new("intent state", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        let terminal: Vec<_> = IntentState::ALL
            .into_iter()
            .filter(IntentState::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![
                IntentState::Filled,
                IntentState::Cancelled,
                IntentState::Rejected,
                IntentState::Failed
            ]
        );
        assert!(!IntentState::ReconcileMismatch.is_terminal());
    }

    #[test]
    fn parses_storage_names() {
        for state in IntentState::ALL {
            assert_eq!(state.as_str().parse::<IntentState>().unwrap(), state);
        }
        assert_eq!(
            "partially_filled".parse::<IntentState>().unwrap(),
            IntentState::PartiallyFilled
        );
        assert!("DONE".parse::<IntentState>().is_err());
    }

    #[test]
    fn serde_uses_screaming_case() {
        let json = serde_json::to_string(&IntentState::CancelRequested).unwrap();
        assert_eq!(json, "\"CANCEL_REQUESTED\"");
    }
}
