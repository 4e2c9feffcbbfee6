//! Execution Engine
//!
//! Drives persisted intents through the state machine against the broker
//! session. Every transition is persisted (write-ahead for submissions)
//! before or after the broker call it depends on, always conditionally on
//! the prior state, and at most one task touches a given intent at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, OwnedMutexGuard};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::brackets::bracket_children;
use super::convergence::{Convergence, converge};
use super::session_manager::{SessionError, SessionManager};
use crate::application::ports::{
    BrokerError, BrokerOrder, BrokerPort, EventPublisherPort, OrderUpdate, SubmitOrderRequest,
};
use crate::domain::order_intent::{
    IntentError, IntentEvent, IntentState, IntentStore, OrderIntent, StateGuard, StoreError,
    derive_idempotency_key,
};
use crate::domain::shared::IntentId;
use crate::observability;

/// Engine settings.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionConfig {
    /// Submission attempts before an intent fails.
    pub max_submit_attempts: u32,
    /// Delay between submission attempts.
    pub submit_backoff: Backoff,
    /// Cancel attempts before the cancel is abandoned.
    pub max_cancel_attempts: u32,
    /// How long an unconfirmed cancel waits before it is sent again.
    pub cancel_confirm_timeout: Duration,
    /// Period of the drive loop.
    pub drive_interval: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_submit_attempts: 5,
            submit_backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(30)),
            max_cancel_attempts: 5,
            cancel_confirm_timeout: Duration::from_secs(30),
            drive_interval: Duration::from_millis(250),
        }
    }
}

/// Execution errors.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Intent does not exist.
    #[error("intent not found: {0}")]
    NotFound(IntentId),
    /// Store failure or lost compare-and-swap.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Transition not allowed.
    #[error(transparent)]
    Intent(#[from] IntentError),
    /// Broker session failure.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Work done by one drive pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveSummary {
    /// Submission attempts made.
    pub submitted: usize,
    /// Cancel calls retried.
    pub cancels_retried: usize,
}

/// Per-intent mutual exclusion.
#[derive(Default)]
struct IntentLocks {
    locks: Mutex<HashMap<IntentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl IntentLocks {
    async fn acquire(&self, intent_id: &IntentId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(intent_id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    fn prune(&self) {
        self.locks.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Drives intents to the broker and applies what comes back.
pub struct ExecutionEngine<S, B, P>
where
    S: IntentStore,
    B: BrokerPort,
    P: EventPublisherPort,
{
    store: Arc<S>,
    session: Arc<SessionManager<B>>,
    publisher: Arc<P>,
    config: ExecutionConfig,
    locks: IntentLocks,
    wake: Notify,
}

impl<S, B, P> ExecutionEngine<S, B, P>
where
    S: IntentStore,
    B: BrokerPort + 'static,
    P: EventPublisherPort,
{
    /// Create a new engine.
    pub fn new(
        store: Arc<S>,
        session: Arc<SessionManager<B>>,
        publisher: Arc<P>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            store,
            session,
            publisher,
            config,
            locks: IntentLocks::default(),
            wake: Notify::new(),
        }
    }

    /// Ask the drive loop to run a pass now.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit a NEW intent.
    ///
    /// Returns the state after the attempt. Intents that are not NEW, or not
    /// due, or any intent while the session is down, are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the intent is missing or a write loses its
    /// compare-and-swap.
    pub async fn submit(&self, intent_id: &IntentId) -> Result<IntentState, ExecutionError> {
        let _lock = self.locks.acquire(intent_id).await;
        let mut intent = self.load(intent_id).await?;

        if intent.state() != IntentState::New || !intent.is_due(Utc::now()) {
            return Ok(intent.state());
        }
        if !self.session.status().accepts_calls() {
            tracing::debug!(intent_id = %intent_id, "Session down; submission deferred");
            return Ok(intent.state());
        }

        let resubmission = intent.submit_attempts() > 0;
        let guard = intent.guard();
        intent.begin_submission()?;
        self.persist(&mut intent, guard).await?;

        // A previous attempt may have reached the broker with its answer lost
        if resubmission {
            match self
                .session
                .query_order_by_client_id(intent_id.as_str())
                .await
            {
                Ok(Some(order)) => return self.adopt(intent, &order).await,
                Ok(None) => {}
                Err(e) => return self.fail_submission(intent, &e).await,
            }
        }

        let request = SubmitOrderRequest::from_intent(&intent);
        tracing::info!(
            intent_id = %intent_id,
            instrument = %request.instrument,
            side = %request.side,
            quantity = %request.quantity,
            attempt = intent.submit_attempts(),
            "Submitting order"
        );

        match self.session.submit_order(request).await {
            Ok(ack) => {
                let guard = intent.guard();
                intent.acknowledge(
                    ack.broker_order_id.clone(),
                    format!("acknowledged by {}", self.session.broker_name()),
                )?;
                if let Err(e) = self.persist(&mut intent, guard).await {
                    tracing::error!(
                        intent_id = %intent_id,
                        broker_order_id = %ack.broker_order_id,
                        error = %e,
                        "Acknowledgment not persisted; reconciliation will bind it"
                    );
                    return Err(e);
                }
                Ok(intent.state())
            }
            Err(SessionError::Broker(BrokerError::Rejected { code, reason })) => {
                let guard = intent.guard();
                let reason = match code {
                    Some(code) => format!("broker rejected ({code}): {reason}"),
                    None => format!("broker rejected: {reason}"),
                };
                tracing::warn!(intent_id = %intent_id, reason = %reason, "Order rejected");
                intent.reject(reason)?;
                self.persist(&mut intent, guard).await?;
                Ok(intent.state())
            }
            Err(e) => self.fail_submission(intent, &e).await,
        }
    }

    async fn fail_submission(
        &self,
        mut intent: OrderIntent,
        error: &SessionError,
    ) -> Result<IntentState, ExecutionError> {
        let attempt = intent.submit_attempts().saturating_sub(1);
        let mut delay = self.config.submit_backoff.delay(attempt);
        if let SessionError::Broker(BrokerError::RateLimited {
            retry_after: Some(after),
        }) = error
        {
            delay = delay.max(*after);
        }
        let retry_at = Utc::now() + TimeDelta::from_std(delay).unwrap_or(TimeDelta::zero());

        let guard = intent.guard();
        let state = intent.fail_submission(
            error.to_string(),
            error.is_retryable(),
            self.config.max_submit_attempts,
            retry_at,
        )?;
        tracing::warn!(
            intent_id = %intent.intent_id(),
            attempt = intent.submit_attempts(),
            state = %state,
            error = %error,
            "Submission failed"
        );
        self.persist(&mut intent, guard).await?;
        Ok(state)
    }

    async fn adopt(
        &self,
        mut intent: OrderIntent,
        order: &BrokerOrder,
    ) -> Result<IntentState, ExecutionError> {
        tracing::info!(
            intent_id = %intent.intent_id(),
            broker_order_id = %order.broker_order_id,
            "Adopting order placed by an earlier attempt"
        );
        let guard = intent.guard();
        let observed = OrderUpdate::from_order(order, Utc::now());
        converge(&mut intent, &observed, "client id lookup")?;
        self.persist(&mut intent, guard).await?;
        self.after_change(&intent).await;
        Ok(intent.state())
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Request cancellation of a working intent and send the cancel.
    ///
    /// Terminal intents are returned as they are.
    ///
    /// # Errors
    ///
    /// Returns an error if the intent is missing, has not reached the broker
    /// yet, or a write loses its compare-and-swap.
    pub async fn request_cancel(
        &self,
        intent_id: &IntentId,
        reason: &str,
    ) -> Result<IntentState, ExecutionError> {
        let state = self.cancel_working(intent_id, reason).await?;
        if state == IntentState::Filled {
            self.on_filled(intent_id).await;
        }
        Ok(state)
    }

    /// Cancel without the follow-up of a fill found on the way.
    async fn cancel_working(
        &self,
        intent_id: &IntentId,
        reason: &str,
    ) -> Result<IntentState, ExecutionError> {
        let _lock = self.locks.acquire(intent_id).await;
        let mut intent = self.load(intent_id).await?;

        match intent.state() {
            s if s.is_terminal() || s == IntentState::CancelRequested => {
                return Ok(s);
            }
            IntentState::Acked | IntentState::PartiallyFilled => {
                let guard = intent.guard();
                intent.request_cancel(reason)?;
                self.persist(&mut intent, guard).await?;
            }
            _ => {
                // NEW, SUBMITTING and RECONCILE_MISMATCH have no cancel edge
                intent.request_cancel(reason)?;
            }
        }

        self.send_cancel(intent).await
    }

    async fn retry_cancel(&self, intent_id: &IntentId) -> Result<IntentState, ExecutionError> {
        let _lock = self.locks.acquire(intent_id).await;
        let intent = self.load(intent_id).await?;
        if intent.state() != IntentState::CancelRequested || !self.cancel_due(&intent, Utc::now()) {
            return Ok(intent.state());
        }
        self.send_cancel(intent).await
    }

    fn cancel_due(&self, intent: &OrderIntent, now: DateTime<Utc>) -> bool {
        match intent.next_attempt_at() {
            Some(at) => at <= now,
            None => {
                let wait =
                    TimeDelta::from_std(self.config.cancel_confirm_timeout).unwrap_or(TimeDelta::zero());
                intent.updated_at() + wait <= now
            }
        }
    }

    async fn send_cancel(&self, mut intent: OrderIntent) -> Result<IntentState, ExecutionError> {
        let Some(broker_order_id) = intent.broker_order_id().cloned() else {
            return Err(ExecutionError::Intent(IntentError::InvalidParameters {
                field: "broker_order_id",
                message: "cancel requested before the broker acknowledged".to_string(),
            }));
        };
        let intent_id = intent.intent_id().clone();

        match self.session.cancel_order(&broker_order_id).await {
            Ok(ack) if ack.confirmed => {
                let guard = intent.guard();
                intent.confirm_cancel("broker confirmed cancel")?;
                self.persist(&mut intent, guard).await?;
            }
            Ok(_) => {
                tracing::debug!(intent_id = %intent_id, "Cancel accepted; awaiting confirmation");
                let guard = intent.guard();
                let retry_at = Utc::now()
                    + TimeDelta::from_std(self.config.cancel_confirm_timeout)
                        .unwrap_or(TimeDelta::zero());
                intent.record_cancel_attempt(retry_at, "cancel sent; awaiting confirmation")?;
                self.persist(&mut intent, guard).await?;
            }
            Err(e) if e.is_retryable() => {
                let guard = intent.guard();
                if intent.cancel_attempts() + 1 >= self.config.max_cancel_attempts {
                    tracing::error!(
                        intent_id = %intent_id,
                        attempts = intent.cancel_attempts() + 1,
                        error = %e,
                        "Cancel abandoned"
                    );
                    intent.reject_cancel(format!(
                        "cancel abandoned after {} attempts: {e}",
                        self.config.max_cancel_attempts
                    ))?;
                } else {
                    let delay = self.config.submit_backoff.delay(intent.cancel_attempts());
                    let retry_at =
                        Utc::now() + TimeDelta::from_std(delay).unwrap_or(TimeDelta::zero());
                    tracing::warn!(intent_id = %intent_id, error = %e, "Cancel failed; will retry");
                    intent.record_cancel_attempt(retry_at, format!("cancel failed: {e}"))?;
                }
                self.persist(&mut intent, guard).await?;
            }
            Err(e) => {
                // The order is probably no longer cancelable; let the broker say why
                tracing::warn!(intent_id = %intent_id, error = %e, "Cancel refused");
                let guard = intent.guard();
                match self.session.query_order(&broker_order_id).await {
                    Ok(order) => {
                        let observed = OrderUpdate::from_order(&order, Utc::now());
                        let outcome = converge(&mut intent, &observed, "cancel refused")?;
                        if intent.state() == IntentState::CancelRequested {
                            intent.reject_cancel(format!("cancel refused: {e}"))?;
                        } else if !outcome.changed() {
                            return Ok(intent.state());
                        }
                    }
                    Err(query_error) => {
                        tracing::warn!(
                            intent_id = %intent_id,
                            error = %query_error,
                            "Order query after refused cancel failed"
                        );
                        intent.reject_cancel(format!("cancel refused: {e}"))?;
                    }
                }
                self.persist(&mut intent, guard).await?;
            }
        }
        Ok(intent.state())
    }

    // ========================================================================
    // Broker updates
    // ========================================================================

    /// Apply one streamed order update.
    ///
    /// Returns the intent state afterwards, or `None` when the update
    /// belongs to no known intent.
    ///
    /// # Errors
    ///
    /// Returns an error if the update contradicts the intent or the write
    /// loses its compare-and-swap.
    pub async fn apply_update(
        &self,
        update: &OrderUpdate,
    ) -> Result<Option<IntentState>, ExecutionError> {
        let Some(intent_id) = self.resolve_intent_id(update).await? else {
            tracing::debug!(
                broker_order_id = %update.broker_order_id,
                "Update for an order this bridge does not own"
            );
            return Ok(None);
        };

        let lock = self.locks.acquire(&intent_id).await;
        let mut intent = self.load(&intent_id).await?;

        if intent.state() == IntentState::New {
            // A lost acknowledgment; the next attempt adopts the order
            tracing::info!(
                intent_id = %intent_id,
                broker_order_id = %update.broker_order_id,
                "Update for an intent awaiting resubmission"
            );
            self.wake();
            return Ok(Some(intent.state()));
        }

        let guard = intent.guard();
        let outcome = converge(&mut intent, update, "stream")?;
        if !outcome.changed() {
            return Ok(Some(intent.state()));
        }
        if outcome == Convergence::Resolved {
            observability::record_reconciliation_mismatch(1);
        }
        self.persist(&mut intent, guard).await?;
        drop(lock);

        self.after_change(&intent).await;
        Ok(Some(intent.state()))
    }

    async fn resolve_intent_id(
        &self,
        update: &OrderUpdate,
    ) -> Result<Option<IntentId>, ExecutionError> {
        if let Some(intent) = self
            .store
            .find_by_broker_order_id(&update.broker_order_id)
            .await?
        {
            return Ok(Some(intent.intent_id().clone()));
        }
        let Some(client_order_id) = &update.client_order_id else {
            return Ok(None);
        };
        let intent_id = IntentId::new(client_order_id.as_str());
        Ok(self
            .store
            .get(&intent_id)
            .await?
            .map(|intent| intent.intent_id().clone()))
    }

    async fn after_change(&self, intent: &OrderIntent) {
        if intent.state() == IntentState::Filled {
            self.on_filled(intent.intent_id()).await;
        }
    }

    pub(crate) async fn on_filled(&self, intent_id: &IntentId) {
        let intent = match self.load(intent_id).await {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(intent_id = %intent_id, error = %e, "Filled intent reload failed");
                return;
            }
        };

        if intent.role().is_bracket_child() {
            self.cancel_siblings(&intent).await;
        } else if let Err(e) = self.ensure_bracket_children(&intent).await {
            tracing::error!(intent_id = %intent_id, error = %e, "Bracket children not created");
        }
    }

    /// Create the bracket children of a filled entry if they do not exist.
    ///
    /// Returns how many were created.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn ensure_bracket_children(
        &self,
        parent: &OrderIntent,
    ) -> Result<usize, ExecutionError> {
        let mut created = 0;
        for draft in bracket_children(parent) {
            let key = derive_idempotency_key(&draft);
            if self.store.get_by_idempotency_key(&key).await?.is_some() {
                continue;
            }
            let mut child = OrderIntent::new(draft)?;
            match self.store.create(&child).await {
                Ok(()) => {
                    tracing::info!(
                        parent = %parent.intent_id(),
                        child = %child.intent_id(),
                        role = %child.role(),
                        "Bracket child created"
                    );
                    self.publish(child.drain_events()).await;
                    created += 1;
                }
                Err(StoreError::DuplicateIdempotencyKey { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if created > 0 {
            self.wake();
        }
        Ok(created)
    }

    async fn cancel_siblings(&self, child: &OrderIntent) {
        let Some(parent_id) = child.parent_intent_id() else {
            return;
        };
        let siblings = match self.store.list_by_instrument(child.instrument()).await {
            Ok(intents) => intents,
            Err(e) => {
                tracing::warn!(error = %e, "Sibling lookup failed");
                return;
            }
        };

        for sibling in siblings.iter().filter(|s| {
            s.parent_intent_id() == Some(parent_id)
                && s.intent_id() != child.intent_id()
                && !s.is_terminal()
        }) {
            let reason = format!("bracket sibling {} filled", child.intent_id());
            match self.cancel_working(sibling.intent_id(), &reason).await {
                Ok(IntentState::Filled) => tracing::error!(
                    intent_id = %sibling.intent_id(),
                    sibling_of = %child.intent_id(),
                    "Both bracket exits filled"
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    intent_id = %sibling.intent_id(),
                    error = %e,
                    "Sibling cancel failed; reconciliation will retry"
                ),
            }
        }
    }

    // ========================================================================
    // Drive loop
    // ========================================================================

    /// Submit due NEW intents and resend due cancels.
    ///
    /// # Errors
    ///
    /// Returns an error if listing intents fails. Per-intent failures are
    /// logged and skipped.
    pub async fn drive_once(&self) -> Result<DriveSummary, ExecutionError> {
        let mut summary = DriveSummary::default();
        if !self.session.status().accepts_calls() {
            return Ok(summary);
        }
        let now = Utc::now();

        for intent in self.store.list_by_state(IntentState::New).await? {
            if !intent.is_due(now) {
                continue;
            }
            summary.submitted += 1;
            if let Err(e) = self.submit(intent.intent_id()).await {
                tracing::warn!(intent_id = %intent.intent_id(), error = %e, "Submit pass failed");
            }
        }

        for intent in self.store.list_by_state(IntentState::CancelRequested).await? {
            if !self.cancel_due(&intent, now) {
                continue;
            }
            summary.cancels_retried += 1;
            if let Err(e) = self.retry_cancel(intent.intent_id()).await {
                tracing::warn!(intent_id = %intent.intent_id(), error = %e, "Cancel retry failed");
            }
        }

        self.locks.prune();
        Ok(summary)
    }

    /// Run the drive loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.drive_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                () = self.wake.notified() => {}
            }
            if let Err(e) = self.drive_once().await {
                tracing::error!(error = %e, "Drive pass failed");
            }
        }
        tracing::info!("Execution engine stopped");
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    async fn load(&self, intent_id: &IntentId) -> Result<OrderIntent, ExecutionError> {
        self.store
            .get(intent_id)
            .await?
            .ok_or_else(|| ExecutionError::NotFound(intent_id.clone()))
    }

    pub(crate) async fn persist(
        &self,
        intent: &mut OrderIntent,
        guard: StateGuard,
    ) -> Result<(), ExecutionError> {
        self.store.update_state(intent, guard).await?;
        self.publish(intent.drain_events()).await;
        Ok(())
    }

    pub(crate) async fn publish(&self, events: Vec<IntentEvent>) {
        if events.is_empty() {
            return;
        }
        let count = events.len();
        if let Err(e) = self.publisher.publish(events).await {
            tracing::error!(error = %e, count, "Failed to publish intent events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{BrokerOrderStatus, InMemoryEventPublisher};
    use crate::application::services::session_manager::SessionConfig;
    use crate::domain::order_intent::{IntentDraft, IntentRole, OrderSide, OrderType};
    use crate::domain::shared::{BrokerOrderId, Instrument};
    use crate::infrastructure::broker::SimulatedBroker;
    use crate::infrastructure::persistence::InMemoryIntentStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    type Engine = ExecutionEngine<InMemoryIntentStore, SimulatedBroker, InMemoryEventPublisher>;

    struct Harness {
        broker: Arc<SimulatedBroker>,
        store: Arc<InMemoryIntentStore>,
        session: Arc<SessionManager<SimulatedBroker>>,
        publisher: Arc<InMemoryEventPublisher>,
        engine: Engine,
    }

    async fn harness(broker: SimulatedBroker) -> Harness {
        let broker = Arc::new(broker);
        let store = Arc::new(InMemoryIntentStore::new());
        let session = Arc::new(SessionManager::new(
            Arc::clone(&broker),
            SessionConfig {
                call_timeout: Duration::from_millis(500),
                ..SessionConfig::default()
            },
        ));
        session.connect().await.unwrap();
        let publisher = Arc::new(InMemoryEventPublisher::new());
        let engine = ExecutionEngine::new(
            Arc::clone(&store),
            Arc::clone(&session),
            Arc::clone(&publisher),
            ExecutionConfig {
                max_submit_attempts: 3,
                submit_backoff: Backoff::new(Duration::ZERO, Duration::ZERO),
                max_cancel_attempts: 2,
                cancel_confirm_timeout: Duration::from_secs(30),
                drive_interval: Duration::from_millis(10),
            },
        );
        Harness {
            broker,
            store,
            session,
            publisher,
            engine,
        }
    }

    fn draft(quantity: Decimal) -> IntentDraft {
        IntentDraft {
            source_signal: "alert-1".into(),
            instrument: Instrument::new("XYZ"),
            side: OrderSide::Buy,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            strategy_tag: "test".into(),
            role: IntentRole::Entry,
            parent_intent_id: None,
            take_profit: None,
            stop_loss: None,
        }
    }

    async fn create(h: &Harness, draft: IntentDraft) -> IntentId {
        let intent = OrderIntent::new(draft).unwrap();
        h.store.create(&intent).await.unwrap();
        intent.intent_id().clone()
    }

    async fn state(h: &Harness, id: &IntentId) -> OrderIntent {
        h.store.get(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_submit_acknowledges_and_binds_broker_id() {
        let h = harness(SimulatedBroker::new()).await;
        let id = create(&h, draft(dec!(100))).await;

        assert_eq!(h.engine.submit(&id).await.unwrap(), IntentState::Acked);
        let intent = state(&h, &id).await;
        assert_eq!(intent.broker_order_id().unwrap().as_str(), "sim-1");
        assert_eq!(
            h.broker.orders()[0].client_order_id.as_deref(),
            Some(id.as_str())
        );

        let transitions: Vec<_> = h
            .publisher
            .events()
            .iter()
            .map(|e| e.to_state)
            .collect();
        assert_eq!(transitions, vec![IntentState::Submitting, IntentState::Acked]);
    }

    #[tokio::test]
    async fn test_retry_bound_ends_in_failed() {
        let h = harness(SimulatedBroker::new()).await;
        let id = create(&h, draft(dec!(10))).await;
        h.broker.fail_next_submits((0..3).map(|_| BrokerError::RateLimited { retry_after: None }));

        assert_eq!(h.engine.submit(&id).await.unwrap(), IntentState::New);
        assert_eq!(h.engine.submit(&id).await.unwrap(), IntentState::New);
        assert_eq!(h.engine.submit(&id).await.unwrap(), IntentState::Failed);

        let intent = state(&h, &id).await;
        assert_eq!(intent.submit_attempts(), 3);
        assert!(h.broker.orders().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        let h = harness(SimulatedBroker::new()).await;
        let id = create(&h, draft(dec!(10))).await;
        h.broker.fail_next_submits([BrokerError::Rejected {
            code: Some("40310000".into()),
            reason: "insufficient buying power".into(),
        }]);

        assert_eq!(h.engine.submit(&id).await.unwrap(), IntentState::Rejected);
        let intent = state(&h, &id).await;
        assert!(intent.last_reason().unwrap().contains("insufficient buying power"));
    }

    #[tokio::test]
    async fn test_lost_ack_is_adopted_not_resubmitted() {
        let h = harness(SimulatedBroker::new()).await;
        let id = create(&h, draft(dec!(10))).await;
        h.broker.lose_next_ack();

        assert_eq!(h.engine.submit(&id).await.unwrap(), IntentState::New);
        assert_eq!(h.engine.submit(&id).await.unwrap(), IntentState::Acked);

        assert_eq!(h.broker.submit_calls(), 1);
        assert_eq!(h.broker.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_session_down_defers_without_burning_attempts() {
        let h = harness(SimulatedBroker::new()).await;
        let id = create(&h, draft(dec!(10))).await;
        h.session.mark_degraded("test");

        assert_eq!(h.engine.submit(&id).await.unwrap(), IntentState::New);
        assert_eq!(state(&h, &id).await.submit_attempts(), 0);
        assert_eq!(h.broker.submit_calls(), 0);
    }

    #[tokio::test]
    async fn test_stream_fills_drive_to_filled() {
        let h = harness(SimulatedBroker::new()).await;
        let id = create(&h, draft(dec!(100))).await;
        h.engine.submit(&id).await.unwrap();
        let broker_id = BrokerOrderId::new("sim-1");

        let partial = OrderUpdate {
            broker_order_id: broker_id.clone(),
            client_order_id: Some(id.to_string()),
            status: BrokerOrderStatus::PartiallyFilled,
            filled_quantity: dec!(40),
            avg_fill_price: Some(dec!(10)),
            ts: Utc::now(),
        };
        assert_eq!(
            h.engine.apply_update(&partial).await.unwrap(),
            Some(IntentState::PartiallyFilled)
        );

        // Replayed update is a no-op
        let version = state(&h, &id).await.version();
        h.engine.apply_update(&partial).await.unwrap();
        assert_eq!(state(&h, &id).await.version(), version);

        let full = OrderUpdate {
            status: BrokerOrderStatus::Filled,
            filled_quantity: dec!(100),
            avg_fill_price: Some(dec!(10.5)),
            ..partial
        };
        assert_eq!(
            h.engine.apply_update(&full).await.unwrap(),
            Some(IntentState::Filled)
        );
    }

    #[tokio::test]
    async fn test_unknown_update_is_ignored() {
        let h = harness(SimulatedBroker::new()).await;
        let update = OrderUpdate {
            broker_order_id: BrokerOrderId::new("foreign"),
            client_order_id: None,
            status: BrokerOrderStatus::Filled,
            filled_quantity: dec!(1),
            avg_fill_price: None,
            ts: Utc::now(),
        };
        assert_eq!(h.engine.apply_update(&update).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancel_confirmed() {
        let h = harness(SimulatedBroker::new()).await;
        let id = create(&h, draft(dec!(10))).await;
        h.engine.submit(&id).await.unwrap();

        assert_eq!(
            h.engine.request_cancel(&id, "operator").await.unwrap(),
            IntentState::Cancelled
        );
        assert_eq!(h.broker.orders()[0].status, BrokerOrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_of_filled_order_converges_to_filled() {
        let h = harness(SimulatedBroker::new()).await;
        let id = create(&h, draft(dec!(10))).await;
        h.engine.submit(&id).await.unwrap();
        h.broker
            .set_order_silently(
                &BrokerOrderId::new("sim-1"),
                BrokerOrderStatus::Filled,
                dec!(10),
                Some(dec!(3)),
            )
            .unwrap();

        assert_eq!(
            h.engine.request_cancel(&id, "operator").await.unwrap(),
            IntentState::Filled
        );
        assert_eq!(state(&h, &id).await.filled_quantity(), dec!(10));
    }

    #[tokio::test]
    async fn test_cancel_retries_then_gives_up() {
        let h = harness(SimulatedBroker::new()).await;
        let id = create(&h, draft(dec!(10))).await;
        h.engine.submit(&id).await.unwrap();
        h.broker.fail_next_cancels((0..2).map(|_| BrokerError::Timeout {
            message: "slow".into(),
        }));

        assert_eq!(
            h.engine.request_cancel(&id, "operator").await.unwrap(),
            IntentState::CancelRequested
        );
        assert_eq!(state(&h, &id).await.cancel_attempts(), 1);

        assert_eq!(h.engine.retry_cancel(&id).await.unwrap(), IntentState::Acked);
        assert_eq!(h.broker.cancel_calls(), 2);
    }

    #[tokio::test]
    async fn test_cancel_before_ack_is_refused() {
        let h = harness(SimulatedBroker::new()).await;
        let id = create(&h, draft(dec!(10))).await;
        let err = h.engine.request_cancel(&id, "operator").await.unwrap_err();
        assert!(matches!(err, ExecutionError::Intent(IntentError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_bracket_children_and_sibling_cancel() {
        let h = harness(SimulatedBroker::new().with_fill_on_submit(dec!(100))).await;
        let mut d = draft(dec!(5));
        d.take_profit = Some(dec!(110));
        d.stop_loss = Some(dec!(95));
        let entry = create(&h, d).await;

        h.engine.submit(&entry).await.unwrap();
        let ack_then_fill = OrderUpdate::from_order(&h.broker.orders()[0], Utc::now());
        assert_eq!(
            h.engine.apply_update(&ack_then_fill).await.unwrap(),
            Some(IntentState::Filled)
        );

        let children = h.store.list_by_state(IntentState::New).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.side() == OrderSide::Sell));

        // Re-deriving the children is a no-op
        let parent = state(&h, &entry).await;
        assert_eq!(h.engine.ensure_bracket_children(&parent).await.unwrap(), 0);

        // Take profit fills; stop loss gets cancelled
        for child in &children {
            h.engine.submit(child.intent_id()).await.unwrap();
        }
        let tp = children
            .iter()
            .find(|c| c.role() == IntentRole::TakeProfit)
            .unwrap();
        let sl = children
            .iter()
            .find(|c| c.role() == IntentRole::StopLoss)
            .unwrap();

        let tp_order = h.broker.order_for_client_id(tp.intent_id().as_str()).unwrap();
        h.engine
            .apply_update(&OrderUpdate::from_order(&tp_order, Utc::now()))
            .await
            .unwrap();

        assert_eq!(state(&h, tp.intent_id()).await.state(), IntentState::Filled);
        let sl_state = state(&h, sl.intent_id()).await.state();
        assert!(
            sl_state == IntentState::Cancelled || sl_state == IntentState::Filled,
            "stop loss ended in {sl_state}"
        );
    }
}
