//! Value objects for the order intent context.

mod intent_role;
mod intent_state;
mod order_side;
mod order_type;
mod transition;

pub use intent_role::IntentRole;
pub use intent_state::IntentState;
pub use order_side::OrderSide;
pub use order_type::OrderType;
pub use transition::Transition;

/// Error returned when parsing a value object from its wire name fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseValueError {
    /// Value object kind being parsed.
    pub kind: &'static str,
    /// Offending input.
    pub value: String,
}

impl ParseValueError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
