//! Reconciliation Engine
//!
//! Periodically compares local intents with brokerage truth and converges
//! them. Runs on startup, on a fixed interval, after the session resyncs and
//! after stream updates were dropped, plus on demand.
//!
//! A pass never takes the engine's per-intent locks. Every write is
//! conditional on the state it read; a write lost to a concurrent writer is
//! counted as a conflict and picked up by the next pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::convergence::{Convergence, converge, reconcile_against};
use super::execution_engine::{ExecutionEngine, ExecutionError};
use super::session_manager::{SessionError, SessionEvent, SessionManager};
use crate::application::ports::{
    BrokerOrder, BrokerPort, EventPublisherPort, OrderUpdate, PositionViewPort,
};
use crate::domain::broker_session::SessionStatus;
use crate::domain::order_intent::{
    IntentRole, IntentState, IntentStore, OrderIntent, StoreError,
};
use crate::domain::reconciliation::{
    OrphanOrder, PositionSnapshot, ReconcileTrigger, ReconciliationReport, ResolvedMismatch,
};
use crate::domain::shared::{BrokerOrderId, Instrument, IntentId};
use crate::observability;

/// Reconciliation settings.
#[derive(Debug, Clone, Copy)]
pub struct ReconciliationConfig {
    /// Time between scheduled passes.
    pub interval: Duration,
    /// Run a pass as soon as the session first connects.
    pub on_startup: bool,
    /// How far back to look for a broker order matching a lost submission.
    pub match_window: Duration,
    /// Age after which a SUBMITTING intent is considered indeterminate.
    pub stale_submission: Duration,
    /// Submission attempts before an indeterminate intent fails.
    pub max_submit_attempts: u32,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            on_startup: true,
            match_window: Duration::from_secs(300),
            stale_submission: Duration::from_secs(30),
            max_submit_attempts: 5,
        }
    }
}

/// Reconciliation errors that abort a pass.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// Session is not connected.
    #[error("reconciliation skipped: broker session {0}")]
    SessionUnavailable(SessionStatus),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Broker call failure.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Compares intents with the broker and converges them.
pub struct ReconciliationEngine<S, B, P>
where
    S: IntentStore,
    B: BrokerPort,
    P: EventPublisherPort,
{
    store: Arc<S>,
    session: Arc<SessionManager<B>>,
    engine: Arc<ExecutionEngine<S, B, P>>,
    config: ReconciliationConfig,
    pass: tokio::sync::Mutex<()>,
    orphans: RwLock<HashMap<BrokerOrderId, OrphanOrder>>,
    positions: RwLock<HashMap<Instrument, PositionSnapshot>>,
    last_report: RwLock<Option<ReconciliationReport>>,
}

impl<S, B, P> ReconciliationEngine<S, B, P>
where
    S: IntentStore,
    B: BrokerPort + 'static,
    P: EventPublisherPort,
{
    /// Create a new reconciliation engine.
    pub fn new(
        store: Arc<S>,
        session: Arc<SessionManager<B>>,
        engine: Arc<ExecutionEngine<S, B, P>>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            session,
            engine,
            config,
            pass: tokio::sync::Mutex::new(()),
            orphans: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            last_report: RwLock::new(None),
        }
    }

    /// Orphan broker orders currently flagged for review.
    pub fn orphans(&self) -> Vec<OrphanOrder> {
        let mut orphans: Vec<_> = self.orphans.read().values().cloned().collect();
        orphans.sort_by_key(|o| o.detected_at);
        orphans
    }

    /// Latest brokerage position for an instrument.
    pub fn position(&self, instrument: &Instrument) -> Option<PositionSnapshot> {
        self.positions.read().get(instrument).cloned()
    }

    /// All brokerage positions from the last pass.
    pub fn positions(&self) -> Vec<PositionSnapshot> {
        self.positions.read().values().cloned().collect()
    }

    /// Report of the last completed pass.
    pub fn last_report(&self) -> Option<ReconciliationReport> {
        self.last_report.read().clone()
    }

    /// Run one pass now.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is down, or listing intents or open
    /// orders fails. Per-intent problems are recorded in the report.
    pub async fn reconcile(
        &self,
        trigger: ReconcileTrigger,
    ) -> Result<ReconciliationReport, ReconciliationError> {
        let _pass = self.pass.lock().await;
        let status = self.session.status();
        if !status.accepts_calls() {
            return Err(ReconciliationError::SessionUnavailable(status));
        }

        let mut report = ReconciliationReport::begin(trigger);
        let now = Utc::now();
        let intents = self.store.list_non_terminal().await?;
        report.checked = intents.len();

        let mut claimed: HashSet<BrokerOrderId> = intents
            .iter()
            .filter_map(|i| i.broker_order_id().cloned())
            .collect();
        let mut window_orders: Option<Vec<BrokerOrder>> = None;

        for intent in intents {
            let result = if intent.broker_order_id().is_some() {
                self.compare(intent, &mut report).await
            } else if matches!(
                intent.state(),
                IntentState::Submitting | IntentState::ReconcileMismatch
            ) && self.is_stale(&intent, now)
            {
                self.resolve_indeterminate(intent, &mut claimed, &mut window_orders, &mut report)
                    .await
            } else {
                Ok(())
            };

            match result {
                Ok(()) => {}
                Err(ExecutionError::Store(e)) if e.is_conflict() => report.conflicts += 1,
                Err(e) => report.errors.push(e.to_string()),
            }
        }

        self.ensure_recent_brackets(now, &mut report).await;
        self.refresh_orphans(&mut report).await?;
        self.refresh_positions(&mut report).await;

        report.finished_at = Utc::now();
        observability::record_reconciliation_pass(trigger);
        if !report.resolved.is_empty() {
            observability::record_reconciliation_mismatch(report.resolved.len());
        }
        if report.is_clean() {
            tracing::debug!(trigger = %trigger, checked = report.checked, "Reconciliation clean");
        } else {
            tracing::info!(
                trigger = %trigger,
                checked = report.checked,
                resolved = report.resolved.len(),
                adopted = report.adopted.len(),
                resubmitted = report.resubmitted.len(),
                orphans = report.orphans.len(),
                conflicts = report.conflicts,
                errors = report.errors.len(),
                "Reconciliation pass finished"
            );
        }
        *self.last_report.write() = Some(report.clone());
        Ok(report)
    }

    fn is_stale(&self, intent: &OrderIntent, now: DateTime<Utc>) -> bool {
        let age = TimeDelta::from_std(self.config.stale_submission).unwrap_or(TimeDelta::zero());
        intent.updated_at() + age <= now
    }

    /// Converge an intent bound to a broker order.
    async fn compare(
        &self,
        mut intent: OrderIntent,
        report: &mut ReconciliationReport,
    ) -> Result<(), ExecutionError> {
        let Some(broker_order_id) = intent.broker_order_id().cloned() else {
            return Ok(());
        };
        let order = self.session.query_order(&broker_order_id).await?;
        let before = intent.state();
        let guard = intent.guard();
        let observed = OrderUpdate::from_order(&order, Utc::now());
        let outcome = reconcile_against(&mut intent, &observed, "reconciliation")?;
        if !outcome.changed() {
            return Ok(());
        }

        self.engine.persist(&mut intent, guard).await?;
        report.resolved.push(ResolvedMismatch {
            intent_id: intent.intent_id().clone(),
            description: format!(
                "{before} -> {} (broker {:?}, filled {})",
                intent.state(),
                order.status,
                order.filled_quantity
            ),
        });
        if outcome == Convergence::Resolved || before != intent.state() {
            tracing::warn!(
                intent_id = %intent.intent_id(),
                from = %before,
                to = %intent.state(),
                "Intent converged to broker state"
            );
        }
        if intent.state() == IntentState::Filled {
            self.engine.on_filled(intent.intent_id()).await;
        }
        Ok(())
    }

    /// Settle a submission whose outcome is unknown.
    async fn resolve_indeterminate(
        &self,
        mut intent: OrderIntent,
        claimed: &mut HashSet<BrokerOrderId>,
        window_orders: &mut Option<Vec<BrokerOrder>>,
        report: &mut ReconciliationReport,
    ) -> Result<(), ExecutionError> {
        let intent_id = intent.intent_id().clone();

        let mut found = self
            .session
            .query_order_by_client_id(intent_id.as_str())
            .await?;
        if found.is_none() {
            found = self.match_in_window(&intent, claimed, window_orders).await?;
        }

        let guard = intent.guard();
        if let Some(order) = found {
            claimed.insert(order.broker_order_id.clone());
            let observed = OrderUpdate::from_order(&order, Utc::now());
            converge(&mut intent, &observed, "reconciliation")?;
            self.engine.persist(&mut intent, guard).await?;
            tracing::info!(
                intent_id = %intent_id,
                broker_order_id = %order.broker_order_id,
                state = %intent.state(),
                "Indeterminate submission adopted broker order"
            );
            report.adopted.push(intent_id.clone());
            if intent.state() == IntentState::Filled {
                self.engine.on_filled(&intent_id).await;
            }
            return Ok(());
        }

        // The broker never saw it: submit again
        let reason = "no broker order found for indeterminate submission";
        if intent.state() == IntentState::Submitting {
            intent.fail_submission(reason, true, self.config.max_submit_attempts, Utc::now())?;
        } else {
            intent.resolve(IntentState::Failed, intent.filled_quantity(), None, reason)?;
        }
        self.engine.persist(&mut intent, guard).await?;
        tracing::warn!(intent_id = %intent_id, state = %intent.state(), "{reason}");
        if intent.state() == IntentState::New {
            report.resubmitted.push(intent_id);
            self.engine.wake();
        } else {
            report.resolved.push(ResolvedMismatch {
                intent_id,
                description: format!("{reason}; failed"),
            });
        }
        Ok(())
    }

    async fn match_in_window(
        &self,
        intent: &OrderIntent,
        claimed: &HashSet<BrokerOrderId>,
        window_orders: &mut Option<Vec<BrokerOrder>>,
    ) -> Result<Option<BrokerOrder>, ExecutionError> {
        if window_orders.is_none() {
            let now = Utc::now();
            let window = TimeDelta::from_std(self.config.match_window).unwrap_or(TimeDelta::zero());
            *window_orders = Some(self.session.query_orders_between(now - window, now).await?);
        }
        let Some(orders) = window_orders.as_ref() else {
            return Ok(None);
        };

        let submitted_around = intent.updated_at();
        let mut best: Option<&BrokerOrder> = None;
        for order in orders.iter().filter(|o| {
            o.instrument == *intent.instrument()
                && o.side == intent.side()
                && o.quantity == intent.quantity()
                && !claimed.contains(&o.broker_order_id)
        }) {
            // An order carrying another intent's client id belongs to that intent
            if let Some(client_id) = &order.client_order_id {
                if client_id != intent.intent_id().as_str()
                    && self.store.get(&IntentId::new(client_id.as_str())).await?.is_some()
                {
                    continue;
                }
            }
            if self
                .store
                .find_by_broker_order_id(&order.broker_order_id)
                .await?
                .is_some()
            {
                continue;
            }
            let distance = |o: &BrokerOrder| {
                o.submitted_at
                    .map_or(i64::MAX, |at| (at - submitted_around).num_milliseconds().abs())
            };
            if best.is_none_or(|b| distance(order) < distance(b)) {
                best = Some(order);
            }
        }
        Ok(best.cloned())
    }

    async fn ensure_recent_brackets(&self, now: DateTime<Utc>, report: &mut ReconciliationReport) {
        let window = TimeDelta::from_std(self.config.match_window).unwrap_or(TimeDelta::zero());
        let recent = match self.store.list_created_between(now - window, now).await {
            Ok(intents) => intents,
            Err(e) => {
                report.errors.push(format!("bracket scan failed: {e}"));
                return;
            }
        };
        for parent in recent.iter().filter(|i| {
            i.state() == IntentState::Filled
                && i.role() == IntentRole::Entry
                && (i.take_profit().is_some() || i.stop_loss().is_some())
        }) {
            if let Err(e) = self.engine.ensure_bracket_children(parent).await {
                report.errors.push(format!("bracket children for {}: {e}", parent.intent_id()));
            }
        }
    }

    async fn refresh_orphans(
        &self,
        report: &mut ReconciliationReport,
    ) -> Result<(), ReconciliationError> {
        let open = self.session.query_open_orders().await?;
        let now = Utc::now();
        let mut current = HashMap::new();

        for order in open {
            if self
                .store
                .find_by_broker_order_id(&order.broker_order_id)
                .await?
                .is_some()
            {
                continue;
            }
            if let Some(client_id) = &order.client_order_id {
                if self.store.get(&IntentId::new(client_id.as_str())).await?.is_some() {
                    continue;
                }
            }

            let detected_at = self
                .orphans
                .read()
                .get(&order.broker_order_id)
                .map_or(now, |o| o.detected_at);
            if detected_at == now {
                tracing::warn!(
                    broker_order_id = %order.broker_order_id,
                    instrument = %order.instrument,
                    side = %order.side,
                    quantity = %order.quantity,
                    "Orphan broker order flagged for review"
                );
            }
            current.insert(
                order.broker_order_id.clone(),
                OrphanOrder {
                    broker_order_id: order.broker_order_id,
                    client_order_id: order.client_order_id,
                    instrument: order.instrument,
                    side: order.side,
                    quantity: order.quantity,
                    submitted_at: order.submitted_at,
                    detected_at,
                },
            );
        }

        report.orphans = current.values().cloned().collect();
        report.orphans.sort_by_key(|o| o.detected_at);
        observability::record_orphan_orders(current.len());
        *self.orphans.write() = current;
        Ok(())
    }

    async fn refresh_positions(&self, report: &mut ReconciliationReport) {
        match self.session.query_positions().await {
            Ok(positions) => {
                let as_of = Utc::now();
                let snapshot = positions
                    .into_iter()
                    .map(|p| {
                        (
                            p.instrument.clone(),
                            PositionSnapshot {
                                instrument: p.instrument,
                                quantity: p.quantity,
                                avg_entry_price: p.avg_entry_price,
                                as_of,
                            },
                        )
                    })
                    .collect();
                *self.positions.write() = snapshot;
            }
            Err(e) => report.errors.push(format!("position refresh failed: {e}")),
        }
    }

    /// Run scheduled and event-driven passes until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut events = self.session.subscribe_events();
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.interval,
            self.config.interval,
        );
        let mut startup_pending = self.config.on_startup;

        if startup_pending && self.session.status().accepts_calls() {
            startup_pending = false;
            self.run_pass(ReconcileTrigger::Startup).await;
        }

        loop {
            let trigger = tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => ReconcileTrigger::Interval,
                event = events.recv() => match event {
                    Ok(SessionEvent::Connected) if startup_pending => {
                        startup_pending = false;
                        ReconcileTrigger::Startup
                    }
                    Ok(SessionEvent::Resynced) => ReconcileTrigger::Resynced,
                    Ok(SessionEvent::UpdatesDropped { .. }) | Err(RecvError::Lagged(_)) => {
                        ReconcileTrigger::UpdatesDropped
                    }
                    Ok(_) => continue,
                    Err(RecvError::Closed) => break,
                },
            };

            // Coalesce a burst of drop notifications into one pass
            if trigger == ReconcileTrigger::UpdatesDropped {
                while let Ok(SessionEvent::UpdatesDropped { .. }) = events.try_recv() {}
            }
            self.run_pass(trigger).await;
        }
        tracing::info!("Reconciliation engine stopped");
    }

    async fn run_pass(&self, trigger: ReconcileTrigger) {
        match self.reconcile(trigger).await {
            Ok(_) => {}
            Err(ReconciliationError::SessionUnavailable(status)) => {
                tracing::debug!(trigger = %trigger, status = %status, "Reconciliation skipped");
            }
            Err(e) => tracing::warn!(trigger = %trigger, error = %e, "Reconciliation pass failed"),
        }
    }
}

impl<S, B, P> PositionViewPort for ReconciliationEngine<S, B, P>
where
    S: IntentStore,
    B: BrokerPort + 'static,
    P: EventPublisherPort,
{
    fn position(&self, instrument: &Instrument) -> Option<PositionSnapshot> {
        Self::position(self, instrument)
    }
}
