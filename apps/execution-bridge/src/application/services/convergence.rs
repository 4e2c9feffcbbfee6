//! Convergence of an intent onto observed brokerage state.
//!
//! [`converge`] serves the stream path (execution engine) and
//! [`reconcile_against`] the polling path (reconciliation). Stale
//! observations are ignored; anything the transition table cannot express
//! directly goes through RECONCILE_MISMATCH and is resolved to the
//! brokerage's view in the same write.

use rust_decimal::Decimal;

use crate::application::ports::{BrokerOrderStatus, OrderUpdate};
use crate::domain::order_intent::{IntentError, IntentState, OrderIntent};

/// What a convergence step did to the intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// Nothing new in the observation.
    Unchanged,
    /// Ordinary transitions were applied.
    Applied,
    /// The intent disagreed with the broker and was resolved to it.
    Resolved,
}

impl Convergence {
    /// Whether the intent must be persisted.
    #[must_use]
    pub const fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    const fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Resolved, _) | (_, Self::Resolved) => Self::Resolved,
            (Self::Applied, _) | (_, Self::Applied) => Self::Applied,
            _ => Self::Unchanged,
        }
    }
}

/// Local state the brokerage view corresponds to.
#[must_use]
pub fn broker_target(status: BrokerOrderStatus, filled: Decimal) -> IntentState {
    match status {
        BrokerOrderStatus::Pending | BrokerOrderStatus::Accepted if filled > Decimal::ZERO => {
            IntentState::PartiallyFilled
        }
        BrokerOrderStatus::Pending | BrokerOrderStatus::Accepted => IntentState::Acked,
        BrokerOrderStatus::PartiallyFilled => IntentState::PartiallyFilled,
        BrokerOrderStatus::Filled => IntentState::Filled,
        BrokerOrderStatus::PendingCancel => IntentState::CancelRequested,
        BrokerOrderStatus::Cancelled | BrokerOrderStatus::Expired => IntentState::Cancelled,
        BrokerOrderStatus::Rejected => IntentState::Rejected,
    }
}

/// Bring `intent` in line with `observed`.
///
/// # Errors
///
/// Returns an error when the observation is inconsistent with the intent
/// (different broker order id, fill above the intent quantity).
pub fn converge(
    intent: &mut OrderIntent,
    observed: &OrderUpdate,
    source: &str,
) -> Result<Convergence, IntentError> {
    let mut outcome = match intent.state() {
        s if s.is_terminal() => return Ok(Convergence::Unchanged),
        IntentState::New => return Ok(Convergence::Unchanged),
        IntentState::ReconcileMismatch => {
            resolve_to_broker(intent, observed, source)?;
            return Ok(Convergence::Resolved);
        }
        IntentState::Submitting => {
            if observed.status == BrokerOrderStatus::Rejected {
                intent.reject(format!("{source}: broker rejected order"))?;
                return Ok(Convergence::Applied);
            }
            intent.acknowledge(
                observed.broker_order_id.clone(),
                format!("{source}: broker accepted order {}", observed.broker_order_id),
            )?;
            Convergence::Applied
        }
        _ => {
            check_bound(intent, observed)?;
            Convergence::Unchanged
        }
    };

    outcome = outcome.merge(converge_fill(intent, observed, source)?);
    if intent.is_terminal() {
        return Ok(outcome);
    }
    outcome = outcome.merge(converge_status(intent, observed, source)?);
    Ok(outcome)
}

/// Polling counterpart of [`converge`].
///
/// A working intent that disagrees with the broker on fill or status is
/// flagged RECONCILE_MISMATCH and resolved to the broker's view, so the
/// journal records that the stream missed something. Other states converge
/// as they do on the stream.
///
/// # Errors
///
/// Same as [`converge`].
pub fn reconcile_against(
    intent: &mut OrderIntent,
    observed: &OrderUpdate,
    source: &str,
) -> Result<Convergence, IntentError> {
    let state = intent.state();
    if !matches!(state, IntentState::Acked | IntentState::PartiallyFilled) {
        return converge(intent, observed, source);
    }
    check_bound(intent, observed)?;

    let local_filled = intent.filled_quantity();
    let target = broker_target(observed.status, observed.filled_quantity.max(local_filled));
    if observed.filled_quantity <= local_filled && target == state {
        return Ok(Convergence::Unchanged);
    }

    intent.flag_mismatch(format!(
        "{source}: broker reports {:?} with {} filled while {state} with {local_filled} filled",
        observed.status, observed.filled_quantity
    ))?;
    resolve_to_broker(intent, observed, source)?;
    Ok(Convergence::Resolved)
}

fn check_bound(intent: &OrderIntent, observed: &OrderUpdate) -> Result<(), IntentError> {
    if let Some(bound) = intent.broker_order_id() {
        if bound != &observed.broker_order_id {
            return Err(IntentError::BrokerOrderIdAlreadySet {
                existing: bound.to_string(),
                offered: observed.broker_order_id.to_string(),
            });
        }
    }
    Ok(())
}

fn converge_fill(
    intent: &mut OrderIntent,
    observed: &OrderUpdate,
    source: &str,
) -> Result<Convergence, IntentError> {
    if observed.filled_quantity <= intent.filled_quantity() {
        return Ok(Convergence::Unchanged);
    }

    match intent.apply_fill(observed.filled_quantity, observed.avg_fill_price) {
        Ok(true) => Ok(Convergence::Applied),
        Ok(false) => Ok(Convergence::Unchanged),
        Err(IntentError::InvalidTransition { .. }) => {
            intent.flag_mismatch(format!(
                "{source}: broker filled {} while {}",
                observed.filled_quantity,
                intent.state()
            ))?;
            resolve_to_broker(intent, observed, source)?;
            Ok(Convergence::Resolved)
        }
        Err(e) => Err(e),
    }
}

fn converge_status(
    intent: &mut OrderIntent,
    observed: &OrderUpdate,
    source: &str,
) -> Result<Convergence, IntentError> {
    let state = intent.state();
    match observed.status {
        BrokerOrderStatus::Cancelled | BrokerOrderStatus::Expired
            if state == IntentState::CancelRequested =>
        {
            intent.confirm_cancel(format!("{source}: cancel confirmed"))?;
            Ok(Convergence::Applied)
        }
        BrokerOrderStatus::Cancelled | BrokerOrderStatus::Expired | BrokerOrderStatus::Rejected => {
            intent.flag_mismatch(format!(
                "{source}: broker reports {:?} while {state}",
                observed.status
            ))?;
            resolve_to_broker(intent, observed, source)?;
            Ok(Convergence::Resolved)
        }
        _ => Ok(Convergence::Unchanged),
    }
}

fn resolve_to_broker(
    intent: &mut OrderIntent,
    observed: &OrderUpdate,
    source: &str,
) -> Result<(), IntentError> {
    let filled = observed.filled_quantity.max(intent.filled_quantity());
    let target = broker_target(observed.status, filled);
    intent.bind_broker_order_id(observed.broker_order_id.clone())?;
    intent.resolve(
        target,
        observed.filled_quantity,
        observed.avg_fill_price,
        format!("{source}: adopted broker state {:?}", observed.status),
    )
}
