//! Order intent errors.

use std::fmt;

use rust_decimal::Decimal;

use super::value_objects::IntentState;

/// Errors raised by the intent aggregate and its state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentError {
    /// The transition does not exist from the current state.
    InvalidTransition {
        /// Current state.
        from: IntentState,
        /// Attempted transition name.
        transition: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// Quantity must be strictly positive.
    InvalidQuantity {
        /// Offending quantity.
        quantity: Decimal,
    },

    /// A price required by the order type is missing or not positive.
    MissingPrice {
        /// Which price (`limit_price`, `stop_price`).
        field: &'static str,
    },

    /// Any other malformed field.
    InvalidParameters {
        /// Field with invalid value.
        field: &'static str,
        /// Error message.
        message: String,
    },

    /// Reported cumulative fill exceeds the intent quantity.
    FillExceedsQuantity {
        /// Reported cumulative fill.
        filled: Decimal,
        /// Intent quantity.
        quantity: Decimal,
    },

    /// Reported cumulative fill is below what was already recorded.
    FillRegression {
        /// Already recorded fill.
        recorded: Decimal,
        /// Reported fill.
        reported: Decimal,
    },

    /// A different broker order id is already bound to the intent.
    BrokerOrderIdAlreadySet {
        /// Bound identifier.
        existing: String,
        /// Identifier that was offered.
        offered: String,
    },
}

impl fmt::Display for IntentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition {
                from,
                transition,
                reason,
            } => write!(f, "invalid transition {transition} from {from}: {reason}"),
            Self::InvalidQuantity { quantity } => {
                write!(f, "quantity must be positive, got {quantity}")
            }
            Self::MissingPrice { field } => write!(f, "{field} is required and must be positive"),
            Self::InvalidParameters { field, message } => {
                write!(f, "invalid {field}: {message}")
            }
            Self::FillExceedsQuantity { filled, quantity } => {
                write!(f, "filled quantity {filled} exceeds intent quantity {quantity}")
            }
            Self::FillRegression { recorded, reported } => {
                write!(f, "filled quantity would decrease from {recorded} to {reported}")
            }
            Self::BrokerOrderIdAlreadySet { existing, offered } => write!(
                f,
                "broker order id already set to {existing}, refusing {offered}"
            ),
        }
    }
}

impl std::error::Error for IntentError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_transition() {
        let err = IntentError::InvalidTransition {
            from: IntentState::Filled,
            transition: "cancel_request",
            reason: "intent is already filled".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid transition cancel_request from FILLED: intent is already filled"
        );
    }

    #[test]
    fn display_fill_errors() {
        let err = IntentError::FillExceedsQuantity {
            filled: Decimal::new(150, 0),
            quantity: Decimal::new(100, 0),
        };
        assert!(err.to_string().contains("exceeds"));

        let err = IntentError::FillRegression {
            recorded: Decimal::new(50, 0),
            reported: Decimal::new(40, 0),
        };
        assert!(err.to_string().contains("decrease"));
    }
}
