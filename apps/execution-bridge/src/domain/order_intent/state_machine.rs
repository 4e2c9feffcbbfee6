//! Intent State Machine
//!
//! The transition table every intent follows. Validation is pure; the
//! aggregate calls it before mutating and the store persists the result
//! conditionally on the prior state.

use super::errors::IntentError;
use super::value_objects::{IntentState, Transition};

/// Intent state machine for validating transitions.
pub struct IntentStateMachine;

impl IntentStateMachine {
    /// Destination of `transition` from `from`, if the edge exists.
    #[must_use]
    pub fn next_state(from: IntentState, transition: Transition) -> Option<IntentState> {
        use crate::domain::order_intent::value_objects::{IntentState as S, Transition as T};

        match (from, transition) {
            (S::New, T::Submit) => Some(S::Submitting),
            (S::Submitting, T::Ack) => Some(S::Acked),
            (S::Submitting, T::SubmitFailedRetryable) => Some(S::New),
            (S::Submitting, T::SubmitFailedFatal) => Some(S::Failed),
            (S::Submitting, T::BrokerRejected) => Some(S::Rejected),
            (S::Acked | S::PartiallyFilled, T::PartialFill) => Some(S::PartiallyFilled),
            // A fill racing a pending cancel is recorded without leaving CANCEL_REQUESTED
            (S::CancelRequested, T::PartialFill) => Some(S::CancelRequested),
            (S::Acked | S::PartiallyFilled, T::FullFill) => Some(S::Filled),
            (S::Acked | S::PartiallyFilled, T::CancelRequest) => Some(S::CancelRequested),
            (S::CancelRequested, T::CancelAck) => Some(S::Cancelled),
            (
                S::CancelRequested,
                T::CancelRejected {
                    resume: resume @ (S::Acked | S::PartiallyFilled),
                },
            ) => Some(resume),
            (from, T::ReconcileMismatch)
                if !from.is_terminal() && from != S::ReconcileMismatch =>
            {
                Some(S::ReconcileMismatch)
            }
            (S::ReconcileMismatch, T::Resolved { to }) if Self::is_resolution_target(to) => {
                Some(to)
            }
            _ => None,
        }
    }

    /// Check if a transition is valid.
    #[must_use]
    pub fn is_valid_transition(from: IntentState, transition: Transition) -> bool {
        Self::next_state(from, transition).is_some()
    }

    /// Validate a transition and return its destination.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::InvalidTransition`] if the edge does not exist.
    pub fn validate_transition(
        from: IntentState,
        transition: Transition,
    ) -> Result<IntentState, IntentError> {
        Self::next_state(from, transition).ok_or_else(|| IntentError::InvalidTransition {
            from,
            transition: transition.name(),
            reason: Self::transition_error_reason(from, transition),
        })
    }

    /// Get a human-readable reason for an invalid transition.
    #[must_use]
    pub fn transition_error_reason(from: IntentState, transition: Transition) -> String {
        match from {
            IntentState::Filled => format!("intent is already filled, cannot apply {transition}"),
            IntentState::Cancelled => format!("intent is cancelled, cannot apply {transition}"),
            IntentState::Rejected => format!("intent was rejected, cannot apply {transition}"),
            IntentState::Failed => format!("intent has failed, cannot apply {transition}"),
            _ => format!("no {transition} transition from {from}"),
        }
    }

    /// States a mismatch may resolve to: anything the broker can report.
    #[must_use]
    pub const fn is_resolution_target(to: IntentState) -> bool {
        matches!(
            to,
            IntentState::Acked
                | IntentState::PartiallyFilled
                | IntentState::Filled
                | IntentState::CancelRequested
                | IntentState::Cancelled
                | IntentState::Rejected
                | IntentState::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_intent::value_objects::{IntentState as S, Transition as T};
    use test_case::test_case;

    #[test_case(S::New, T::Submit, S::Submitting ; "new submit")]
    #[test_case(S::Submitting, T::Ack, S::Acked ; "submitting ack")]
    #[test_case(S::Submitting, T::SubmitFailedRetryable, S::New ; "retryable failure returns to new")]
    #[test_case(S::Submitting, T::SubmitFailedFatal, S::Failed ; "fatal failure")]
    #[test_case(S::Submitting, T::BrokerRejected, S::Rejected ; "broker rejection")]
    #[test_case(S::Acked, T::PartialFill, S::PartiallyFilled ; "acked partial fill")]
    #[test_case(S::PartiallyFilled, T::PartialFill, S::PartiallyFilled ; "additional partial fill")]
    #[test_case(S::Acked, T::FullFill, S::Filled ; "acked full fill")]
    #[test_case(S::PartiallyFilled, T::FullFill, S::Filled ; "partial full fill")]
    #[test_case(S::Acked, T::CancelRequest, S::CancelRequested ; "acked cancel")]
    #[test_case(S::PartiallyFilled, T::CancelRequest, S::CancelRequested ; "partial cancel")]
    #[test_case(S::CancelRequested, T::CancelAck, S::Cancelled ; "cancel ack")]
    #[test_case(S::CancelRequested, T::CancelRejected { resume: S::Acked }, S::Acked ; "cancel rejected to acked")]
    #[test_case(S::CancelRequested, T::CancelRejected { resume: S::PartiallyFilled }, S::PartiallyFilled ; "cancel rejected to partial")]
    #[test_case(S::CancelRequested, T::PartialFill, S::CancelRequested ; "fill during cancel")]
    #[test_case(S::Submitting, T::ReconcileMismatch, S::ReconcileMismatch ; "submitting mismatch")]
    #[test_case(S::Acked, T::ReconcileMismatch, S::ReconcileMismatch ; "acked mismatch")]
    #[test_case(S::ReconcileMismatch, T::Resolved { to: S::Filled }, S::Filled ; "resolved filled")]
    #[test_case(S::ReconcileMismatch, T::Resolved { to: S::Cancelled }, S::Cancelled ; "resolved cancelled")]
    fn valid_edges(from: IntentState, transition: Transition, to: IntentState) {
        assert_eq!(IntentStateMachine::next_state(from, transition), Some(to));
        assert_eq!(
            IntentStateMachine::validate_transition(from, transition).unwrap(),
            to
        );
    }

    #[test_case(S::New, T::Ack ; "ack without submission")]
    #[test_case(S::New, T::FullFill ; "fill before submission")]
    #[test_case(S::New, T::CancelRequest ; "cancel before submission")]
    #[test_case(S::Submitting, T::PartialFill ; "fill skips ack")]
    #[test_case(S::Acked, T::Ack ; "double ack")]
    #[test_case(S::CancelRequested, T::FullFill ; "full fill during cancel goes through reconciliation")]
    #[test_case(S::CancelRequested, T::CancelRejected { resume: S::New } ; "cancel rejected to new")]
    #[test_case(S::ReconcileMismatch, T::ReconcileMismatch ; "mismatch twice")]
    #[test_case(S::ReconcileMismatch, T::Resolved { to: S::New } ; "resolve to new")]
    #[test_case(S::ReconcileMismatch, T::Resolved { to: S::Submitting } ; "resolve to submitting")]
    #[test_case(S::Acked, T::Resolved { to: S::Filled } ; "resolve without mismatch")]
    fn invalid_edges(from: IntentState, transition: Transition) {
        assert!(!IntentStateMachine::is_valid_transition(from, transition));
        assert!(matches!(
            IntentStateMachine::validate_transition(from, transition),
            Err(IntentError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let transitions = [
            T::Submit,
            T::Ack,
            T::SubmitFailedRetryable,
            T::SubmitFailedFatal,
            T::BrokerRejected,
            T::PartialFill,
            T::FullFill,
            T::CancelRequest,
            T::CancelAck,
            T::CancelRejected { resume: S::Acked },
            T::ReconcileMismatch,
            T::Resolved { to: S::Filled },
        ];
        for from in IntentState::ALL.into_iter().filter(IntentState::is_terminal) {
            for transition in transitions {
                assert!(
                    !IntentStateMachine::is_valid_transition(from, transition),
                    "{from} accepted {transition}"
                );
            }
        }
    }

    #[test]
    fn every_non_terminal_state_can_be_flagged() {
        for from in IntentState::ALL
            .into_iter()
            .filter(|s| !s.is_terminal() && *s != S::ReconcileMismatch)
        {
            assert!(IntentStateMachine::is_valid_transition(
                from,
                T::ReconcileMismatch
            ));
        }
    }

    #[test]
    fn terminal_error_reason_names_state() {
        let reason = IntentStateMachine::transition_error_reason(S::Filled, T::CancelRequest);
        assert!(reason.contains("already filled"));
    }
}
