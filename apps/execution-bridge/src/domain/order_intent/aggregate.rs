//! Order Intent Aggregate
//!
//! The durable record of one trading decision. All state changes go through
//! the methods below, which validate against [`IntentStateMachine`], bump the
//! optimistic-concurrency `version` and queue an [`IntentEvent`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::IntentError;
use super::events::IntentEvent;
use super::idempotency::derive_idempotency_key;
use super::repository::StateGuard;
use super::state_machine::IntentStateMachine;
use super::value_objects::{IntentRole, IntentState, OrderSide, OrderType, Transition};
use crate::domain::shared::{BrokerOrderId, IdempotencyKey, Instrument, IntentId};

/// Everything needed to create an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentDraft {
    /// Opaque reference to the originating alert.
    pub source_signal: String,
    /// Instrument to trade.
    pub instrument: Instrument,
    /// Buy or sell.
    pub side: OrderSide,
    /// Quantity to trade.
    pub quantity: Decimal,
    /// Market, limit or stop.
    pub order_type: OrderType,
    /// Limit price (limit orders).
    pub limit_price: Option<Decimal>,
    /// Stop trigger price (stop orders).
    pub stop_price: Option<Decimal>,
    /// Strategy that produced the alert.
    pub strategy_tag: String,
    /// Role in the position's life.
    pub role: IntentRole,
    /// Entry intent this bracket child belongs to.
    pub parent_intent_id: Option<IntentId>,
    /// Profit target for a bracket exit once this entry fills.
    pub take_profit: Option<Decimal>,
    /// Protective stop for a bracket exit once this entry fills.
    pub stop_loss: Option<Decimal>,
}

/// Order intent aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    intent_id: IntentId,
    source_signal: String,
    instrument: Instrument,
    side: OrderSide,
    quantity: Decimal,
    order_type: OrderType,
    limit_price: Option<Decimal>,
    stop_price: Option<Decimal>,
    strategy_tag: String,
    role: IntentRole,
    parent_intent_id: Option<IntentId>,
    take_profit: Option<Decimal>,
    stop_loss: Option<Decimal>,
    idempotency_key: IdempotencyKey,
    state: IntentState,
    broker_order_id: Option<BrokerOrderId>,
    filled_quantity: Decimal,
    avg_fill_price: Option<Decimal>,
    submit_attempts: u32,
    cancel_attempts: u32,
    next_attempt_at: Option<DateTime<Utc>>,
    last_reason: Option<String>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<IntentEvent>,
}

impl OrderIntent {
    /// Create a new intent in state NEW.
    ///
    /// # Errors
    ///
    /// Returns an error if the draft is malformed (non-positive quantity,
    /// missing price for the order type, empty instrument or signal).
    pub fn new(draft: IntentDraft) -> Result<Self, IntentError> {
        Self::validate_draft(&draft)?;

        let now = Utc::now();
        let intent_id = IntentId::generate();
        let idempotency_key = derive_idempotency_key(&draft);
        let created = IntentEvent::created(
            intent_id.clone(),
            format!("{} {} {}", draft.side, draft.quantity, draft.instrument),
            now,
        );

        Ok(Self {
            intent_id,
            source_signal: draft.source_signal,
            instrument: draft.instrument,
            side: draft.side,
            quantity: draft.quantity,
            order_type: draft.order_type,
            limit_price: draft.limit_price,
            stop_price: draft.stop_price,
            strategy_tag: draft.strategy_tag,
            role: draft.role,
            parent_intent_id: draft.parent_intent_id,
            take_profit: draft.take_profit,
            stop_loss: draft.stop_loss,
            idempotency_key,
            state: IntentState::New,
            broker_order_id: None,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            submit_attempts: 0,
            cancel_attempts: 0,
            next_attempt_at: None,
            last_reason: Some("accepted from alert".to_string()),
            version: 0,
            created_at: now,
            updated_at: now,
            events: vec![created],
        })
    }

    fn validate_draft(draft: &IntentDraft) -> Result<(), IntentError> {
        if draft.quantity <= Decimal::ZERO {
            return Err(IntentError::InvalidQuantity {
                quantity: draft.quantity,
            });
        }
        if draft.instrument.is_empty() {
            return Err(IntentError::InvalidParameters {
                field: "instrument",
                message: "must not be empty".to_string(),
            });
        }
        if draft.source_signal.trim().is_empty() {
            return Err(IntentError::InvalidParameters {
                field: "source_signal",
                message: "must not be empty".to_string(),
            });
        }

        let positive = |price: Option<Decimal>| price.is_some_and(|p| p > Decimal::ZERO);
        match draft.order_type {
            OrderType::Limit if !positive(draft.limit_price) => {
                return Err(IntentError::MissingPrice {
                    field: "limit_price",
                });
            }
            OrderType::Stop if !positive(draft.stop_price) => {
                return Err(IntentError::MissingPrice {
                    field: "stop_price",
                });
            }
            _ => {}
        }

        for (field, price) in [
            ("limit_price", draft.limit_price),
            ("stop_price", draft.stop_price),
            ("take_profit", draft.take_profit),
            ("stop_loss", draft.stop_loss),
        ] {
            if price.is_some_and(|p| p <= Decimal::ZERO) {
                return Err(IntentError::InvalidParameters {
                    field,
                    message: "must be positive".to_string(),
                });
            }
        }

        Ok(())
    }

    // ========================================================================
    // Getters
    // ========================================================================

    /// Intent identifier (also the broker client order id).
    #[must_use]
    pub const fn intent_id(&self) -> &IntentId {
        &self.intent_id
    }

    /// Originating alert reference.
    #[must_use]
    pub fn source_signal(&self) -> &str {
        &self.source_signal
    }

    /// Instrument.
    #[must_use]
    pub const fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Side.
    #[must_use]
    pub const fn side(&self) -> OrderSide {
        self.side
    }

    /// Intent quantity.
    #[must_use]
    pub const fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// Order type.
    #[must_use]
    pub const fn order_type(&self) -> OrderType {
        self.order_type
    }

    /// Limit price.
    #[must_use]
    pub const fn limit_price(&self) -> Option<Decimal> {
        self.limit_price
    }

    /// Stop price.
    #[must_use]
    pub const fn stop_price(&self) -> Option<Decimal> {
        self.stop_price
    }

    /// Strategy tag.
    #[must_use]
    pub fn strategy_tag(&self) -> &str {
        &self.strategy_tag
    }

    /// Role.
    #[must_use]
    pub const fn role(&self) -> IntentRole {
        self.role
    }

    /// Parent entry of a bracket child.
    #[must_use]
    pub const fn parent_intent_id(&self) -> Option<&IntentId> {
        self.parent_intent_id.as_ref()
    }

    /// Bracket profit target.
    #[must_use]
    pub const fn take_profit(&self) -> Option<Decimal> {
        self.take_profit
    }

    /// Bracket protective stop.
    #[must_use]
    pub const fn stop_loss(&self) -> Option<Decimal> {
        self.stop_loss
    }

    /// Idempotency key.
    #[must_use]
    pub const fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> IntentState {
        self.state
    }

    /// Broker order id, once acknowledged.
    #[must_use]
    pub const fn broker_order_id(&self) -> Option<&BrokerOrderId> {
        self.broker_order_id.as_ref()
    }

    /// Cumulative filled quantity.
    #[must_use]
    pub const fn filled_quantity(&self) -> Decimal {
        self.filled_quantity
    }

    /// Average fill price.
    #[must_use]
    pub const fn avg_fill_price(&self) -> Option<Decimal> {
        self.avg_fill_price
    }

    /// Submission attempts so far.
    #[must_use]
    pub const fn submit_attempts(&self) -> u32 {
        self.submit_attempts
    }

    /// Cancel attempts that failed transiently.
    #[must_use]
    pub const fn cancel_attempts(&self) -> u32 {
        self.cancel_attempts
    }

    /// Earliest time the driver may act on this intent again.
    #[must_use]
    pub const fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.next_attempt_at
    }

    /// Reason attached to the latest change.
    #[must_use]
    pub fn last_reason(&self) -> Option<&str> {
        self.last_reason.as_deref()
    }

    /// Optimistic-concurrency version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last change time.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Quantity not yet filled.
    #[must_use]
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Whether the intent reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether a scheduled retry (if any) is due.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now)
    }

    /// Precondition the store must see for an update of this intent to apply.
    #[must_use]
    pub const fn guard(&self) -> StateGuard {
        StateGuard {
            state: self.state,
            version: self.version,
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// NEW -> SUBMITTING. Counts the attempt.
    ///
    /// # Errors
    ///
    /// Returns an error unless the intent is NEW.
    pub fn begin_submission(&mut self) -> Result<(), IntentError> {
        let attempt = self.submit_attempts + 1;
        self.transition(Transition::Submit, format!("submission attempt {attempt}"))?;
        self.submit_attempts = attempt;
        self.next_attempt_at = None;
        Ok(())
    }

    /// SUBMITTING -> ACKED, binding the broker order id.
    ///
    /// # Errors
    ///
    /// Returns an error unless the intent is SUBMITTING, or if a different
    /// broker order id is already bound.
    pub fn acknowledge(
        &mut self,
        broker_order_id: BrokerOrderId,
        reason: impl Into<String>,
    ) -> Result<(), IntentError> {
        self.check_broker_order_id(&broker_order_id)?;
        self.transition(Transition::Ack, reason)?;
        self.broker_order_id = Some(broker_order_id);
        Ok(())
    }

    /// Bind the broker order id outside of an acknowledgment, for an intent
    /// whose acknowledgment was lost and later recovered.
    ///
    /// # Errors
    ///
    /// Returns an error if the intent is terminal or bound to another id.
    pub fn bind_broker_order_id(&mut self, broker_order_id: BrokerOrderId) -> Result<(), IntentError> {
        self.check_broker_order_id(&broker_order_id)?;
        if self.state.is_terminal() {
            return Err(IntentError::InvalidTransition {
                from: self.state,
                transition: "bind_broker_order_id",
                reason: IntentStateMachine::transition_error_reason(self.state, Transition::Ack),
            });
        }
        if self.broker_order_id.is_none() {
            self.broker_order_id = Some(broker_order_id);
            self.touch();
        }
        Ok(())
    }

    /// Record a failed submission.
    ///
    /// Retryable failures go back to NEW with `next_attempt_at = retry_at`
    /// while attempts remain; everything else ends in FAILED.
    ///
    /// # Errors
    ///
    /// Returns an error unless the intent is SUBMITTING.
    pub fn fail_submission(
        &mut self,
        reason: impl Into<String>,
        retryable: bool,
        max_attempts: u32,
        retry_at: DateTime<Utc>,
    ) -> Result<IntentState, IntentError> {
        let reason = reason.into();
        if retryable && self.submit_attempts < max_attempts {
            self.transition(
                Transition::SubmitFailedRetryable,
                format!(
                    "{reason}; retry {}/{max_attempts} at {}",
                    self.submit_attempts + 1,
                    retry_at.to_rfc3339()
                ),
            )?;
            self.next_attempt_at = Some(retry_at);
        } else if retryable {
            self.transition(
                Transition::SubmitFailedFatal,
                format!("attempt limit {max_attempts} reached: {reason}"),
            )?;
        } else {
            self.transition(Transition::SubmitFailedFatal, reason)?;
        }
        Ok(self.state)
    }

    /// SUBMITTING -> REJECTED.
    ///
    /// # Errors
    ///
    /// Returns an error unless the intent is SUBMITTING.
    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), IntentError> {
        self.transition(Transition::BrokerRejected, reason)
    }

    /// Apply a cumulative fill report.
    ///
    /// Returns `Ok(false)` when the report carries nothing new.
    ///
    /// # Errors
    ///
    /// Returns an error if the report would decrease or overfill, or if no
    /// fill transition exists from the current state (for example a full fill
    /// while a cancel is pending, which reconciliation handles).
    pub fn apply_fill(
        &mut self,
        cumulative: Decimal,
        avg_price: Option<Decimal>,
    ) -> Result<bool, IntentError> {
        self.check_fill(cumulative)?;
        if cumulative == self.filled_quantity {
            return Ok(false);
        }

        let transition = if cumulative == self.quantity {
            Transition::FullFill
        } else {
            Transition::PartialFill
        };
        self.transition(
            transition,
            format!("filled {cumulative}/{}", self.quantity),
        )?;
        self.filled_quantity = cumulative;
        if avg_price.is_some() {
            self.avg_fill_price = avg_price;
        }
        Ok(true)
    }

    /// ACKED|PARTIALLY_FILLED -> CANCEL_REQUESTED.
    ///
    /// # Errors
    ///
    /// Returns an error unless the intent is ACKED or PARTIALLY_FILLED.
    pub fn request_cancel(&mut self, reason: impl Into<String>) -> Result<(), IntentError> {
        self.transition(Transition::CancelRequest, reason)?;
        self.cancel_attempts = 0;
        self.next_attempt_at = None;
        Ok(())
    }

    /// Record a transiently failed cancel call and when to try again.
    ///
    /// Not a state transition, but it still bumps the version.
    ///
    /// # Errors
    ///
    /// Returns an error unless the intent is CANCEL_REQUESTED.
    pub fn record_cancel_attempt(
        &mut self,
        retry_at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<(), IntentError> {
        if self.state != IntentState::CancelRequested {
            return Err(IntentError::InvalidTransition {
                from: self.state,
                transition: "cancel_retry",
                reason: "no cancel is pending".to_string(),
            });
        }
        self.cancel_attempts += 1;
        self.next_attempt_at = Some(retry_at);
        self.last_reason = Some(reason.into());
        self.touch();
        Ok(())
    }

    /// CANCEL_REQUESTED -> CANCELLED.
    ///
    /// # Errors
    ///
    /// Returns an error unless the intent is CANCEL_REQUESTED.
    pub fn confirm_cancel(&mut self, reason: impl Into<String>) -> Result<(), IntentError> {
        self.transition(Transition::CancelAck, reason)?;
        self.next_attempt_at = None;
        Ok(())
    }

    /// CANCEL_REQUESTED -> back to the working state, which depends on fills.
    ///
    /// # Errors
    ///
    /// Returns an error unless the intent is CANCEL_REQUESTED.
    pub fn reject_cancel(&mut self, reason: impl Into<String>) -> Result<(), IntentError> {
        let resume = if self.filled_quantity > Decimal::ZERO {
            IntentState::PartiallyFilled
        } else {
            IntentState::Acked
        };
        self.transition(Transition::CancelRejected { resume }, reason)?;
        self.next_attempt_at = None;
        Ok(())
    }

    /// Any non-terminal state -> RECONCILE_MISMATCH.
    ///
    /// # Errors
    ///
    /// Returns an error if the intent is terminal or already flagged.
    pub fn flag_mismatch(&mut self, reason: impl Into<String>) -> Result<(), IntentError> {
        self.transition(Transition::ReconcileMismatch, reason)
    }

    /// RECONCILE_MISMATCH -> `to`, adopting brokerage fill state.
    ///
    /// The filled quantity never decreases: a broker report below what is
    /// already recorded keeps the local figure.
    ///
    /// # Errors
    ///
    /// Returns an error if the intent is not flagged, `to` is not a valid
    /// resolution, or the broker reports more than the intent quantity.
    pub fn resolve(
        &mut self,
        to: IntentState,
        broker_filled: Decimal,
        broker_avg_price: Option<Decimal>,
        reason: impl Into<String>,
    ) -> Result<(), IntentError> {
        if broker_filled > self.quantity {
            return Err(IntentError::FillExceedsQuantity {
                filled: broker_filled,
                quantity: self.quantity,
            });
        }
        self.transition(Transition::Resolved { to }, reason)?;
        if broker_filled >= self.filled_quantity {
            self.filled_quantity = broker_filled;
            if broker_avg_price.is_some() {
                self.avg_fill_price = broker_avg_price;
            }
        }
        self.next_attempt_at = None;
        Ok(())
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Take the events queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<IntentEvent> {
        std::mem::take(&mut self.events)
    }

    /// Events queued since the last drain.
    #[must_use]
    pub fn pending_events(&self) -> &[IntentEvent] {
        &self.events
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn transition(
        &mut self,
        transition: Transition,
        reason: impl Into<String>,
    ) -> Result<(), IntentError> {
        let from = self.state;
        let to = IntentStateMachine::validate_transition(from, transition)?;
        let reason = reason.into();

        self.state = to;
        self.touch();
        self.events.push(IntentEvent {
            intent_id: self.intent_id.clone(),
            from_state: Some(from),
            to_state: to,
            transition: transition.name().to_string(),
            reason: reason.clone(),
            ts: self.updated_at,
        });
        self.last_reason = Some(reason);
        Ok(())
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    fn check_broker_order_id(&self, offered: &BrokerOrderId) -> Result<(), IntentError> {
        match &self.broker_order_id {
            Some(existing) if existing != offered => Err(IntentError::BrokerOrderIdAlreadySet {
                existing: existing.to_string(),
                offered: offered.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn check_fill(&self, cumulative: Decimal) -> Result<(), IntentError> {
        if cumulative > self.quantity {
            return Err(IntentError::FillExceedsQuantity {
                filled: cumulative,
                quantity: self.quantity,
            });
        }
        if cumulative < self.filled_quantity {
            return Err(IntentError::FillRegression {
                recorded: self.filled_quantity,
                reported: cumulative,
            });
        }
        Ok(())
    }
}
