//! Pipeline Integration Tests
//!
//! Drive alerts through ingestion, execution and reconciliation against the
//! simulated broker:
//! - Duplicate alerts never reach the broker twice
//! - A lost acknowledgment is adopted instead of resubmitted
//! - Submission retries stop at the attempt limit
//! - Lost fill updates are recovered by reconciliation
//! - Intents survive a restart mid-submission (SQLite)
//! - Submissions wait out a degraded session and resume on reconnect
//! - Filled bracket entries spawn their exit orders

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use execution_bridge::application::ports::{
    BrokerError, BrokerOrder, BrokerOrderStatus, InMemoryEventPublisher, SubmitOrderRequest,
};
use execution_bridge::application::services::{
    Backoff, DirectTranslator, ExecutionConfig, ExecutionEngine, ReconciliationConfig,
    ReconciliationEngine, SessionConfig, SessionEvent, SessionManager, UpdateDispatcher,
};
use execution_bridge::application::use_cases::{
    IngestAlertUseCase, IngestionConfig, IngestionError,
};
use execution_bridge::domain::alert::{AlertAction, AlertSignal};
use execution_bridge::domain::broker_session::SessionStatus;
use execution_bridge::domain::order_intent::{
    IntentRole, IntentState, IntentStore, OrderIntent, OrderSide, OrderType,
};
use execution_bridge::domain::reconciliation::ReconcileTrigger;
use execution_bridge::domain::shared::{BrokerOrderId, Instrument, IntentId};
use execution_bridge::infrastructure::broker::SimulatedBroker;
use execution_bridge::infrastructure::persistence::{InMemoryIntentStore, SqliteIntentStore};
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

type Engine<S> = ExecutionEngine<S, SimulatedBroker, InMemoryEventPublisher>;

/// Every service of a running bridge, wired over one store and broker.
struct Bridge<S: IntentStore + 'static> {
    store: Arc<S>,
    broker: Arc<SimulatedBroker>,
    session: Arc<SessionManager<SimulatedBroker>>,
    engine: Arc<Engine<S>>,
    reconciliation: Arc<ReconciliationEngine<S, SimulatedBroker, InMemoryEventPublisher>>,
    ingest: IngestAlertUseCase<S, SimulatedBroker, InMemoryEventPublisher>,
    publisher: Arc<InMemoryEventPublisher>,
}

fn session_config() -> SessionConfig {
    SessionConfig {
        call_timeout: Duration::from_millis(500),
        reconnect: Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
        heartbeat_interval: Duration::from_millis(20),
        update_buffer: 64,
    }
}

fn execution_config() -> ExecutionConfig {
    ExecutionConfig {
        max_submit_attempts: 3,
        submit_backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(2)),
        max_cancel_attempts: 3,
        cancel_confirm_timeout: Duration::from_millis(50),
        drive_interval: Duration::from_millis(10),
    }
}

/// Wire a bridge without connecting the session.
fn wire<S: IntentStore + 'static>(store: Arc<S>, broker: Arc<SimulatedBroker>) -> Bridge<S> {
    let session = Arc::new(SessionManager::new(Arc::clone(&broker), session_config()));
    let publisher = Arc::new(InMemoryEventPublisher::new());
    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&store),
        Arc::clone(&session),
        Arc::clone(&publisher),
        execution_config(),
    ));
    let reconciliation = Arc::new(ReconciliationEngine::new(
        Arc::clone(&store),
        Arc::clone(&session),
        Arc::clone(&engine),
        ReconciliationConfig {
            stale_submission: Duration::ZERO,
            max_submit_attempts: 3,
            ..ReconciliationConfig::default()
        },
    ));
    let ingest = IngestAlertUseCase::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        Arc::new(DirectTranslator),
        IngestionConfig {
            webhook_secret: None,
            replay_window: Duration::from_secs(3600),
        },
    );

    Bridge {
        store,
        broker,
        session,
        engine,
        reconciliation,
        ingest,
        publisher,
    }
}

/// Wire a bridge over an in-memory store and connect it.
async fn connected_bridge() -> Bridge<InMemoryIntentStore> {
    let bridge = wire(
        Arc::new(InMemoryIntentStore::new()),
        Arc::new(SimulatedBroker::new()),
    );
    bridge.session.connect().await.unwrap();
    bridge
}

fn limit_buy(signal_id: &str, quantity: rust_decimal::Decimal) -> AlertSignal {
    AlertSignal {
        source_signal_id: signal_id.to_string(),
        action: AlertAction::Open,
        instrument: Instrument::new("AAPL"),
        side: Some(OrderSide::Buy),
        quantity: Some(quantity),
        order_type: OrderType::Limit,
        limit_price: Some(dec!(101.5)),
        stop_price: None,
        take_profit: None,
        stop_loss: None,
        strategy_tag: "breakout".to_string(),
        received_at: Utc::now(),
    }
}

async fn intent<S: IntentStore>(store: &S, id: &IntentId) -> OrderIntent {
    store.get(id).await.unwrap().expect("intent should exist")
}

/// Poll until the intent reaches `state`.
async fn wait_for_state<S: IntentStore>(store: &S, id: &IntentId, state: IntentState) {
    let mut last = None;
    for _ in 0..400 {
        let current = intent(store, id).await.state();
        if current == state {
            return;
        }
        last = Some(current);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("intent {id} never reached {state}, stuck at {last:?}");
}

async fn wait_for_session<S: IntentStore>(bridge: &Bridge<S>, status: SessionStatus) {
    for _ in 0..400 {
        if bridge.session.status() == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "session never reached {status}, stuck at {}",
        bridge.session.status()
    );
}

async fn ingest_one<S: IntentStore>(bridge: &Bridge<S>, alert: AlertSignal) -> IntentId {
    bridge
        .ingest
        .execute(alert, None)
        .await
        .unwrap()
        .intent_id()
        .cloned()
        .unwrap()
}

// ============================================
// Idempotency
// ============================================

#[tokio::test]
async fn test_duplicate_alert_reaches_broker_once() {
    let bridge = connected_bridge().await;

    let id = ingest_one(&bridge, limit_buy("sig-dup", dec!(100))).await;
    assert_eq!(
        bridge.engine.submit(&id).await.unwrap(),
        IntentState::Acked
    );

    let err = bridge
        .ingest
        .execute(limit_buy("sig-dup", dec!(100)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestionError::DuplicateAlert { ref existing } if *existing == id));

    bridge.engine.drive_once().await.unwrap();
    assert_eq!(bridge.broker.submit_calls(), 1);
    assert_eq!(bridge.broker.orders().len(), 1);
    assert_eq!(
        bridge.broker.orders()[0].client_order_id.as_deref(),
        Some(id.as_str())
    );
}

#[tokio::test]
async fn test_lost_acknowledgment_is_adopted_not_resubmitted() {
    let bridge = connected_bridge().await;
    let id = ingest_one(&bridge, limit_buy("sig-lost-ack", dec!(100))).await;

    bridge.broker.lose_next_ack();
    assert_eq!(bridge.engine.submit(&id).await.unwrap(), IntentState::New);
    assert_eq!(bridge.broker.orders().len(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        bridge.engine.submit(&id).await.unwrap(),
        IntentState::Acked
    );

    let stored = intent(bridge.store.as_ref(), &id).await;
    assert_eq!(bridge.broker.submit_calls(), 1);
    assert_eq!(
        stored.broker_order_id(),
        Some(&bridge.broker.orders()[0].broker_order_id)
    );
}

// ============================================
// Retry Bound
// ============================================

#[tokio::test]
async fn test_retryable_failures_stop_at_attempt_limit() {
    let bridge = connected_bridge().await;
    let id = ingest_one(&bridge, limit_buy("sig-retry", dec!(10))).await;

    bridge.broker.fail_next_submits(
        (0..5).map(|_| BrokerError::RateLimited { retry_after: None }),
    );

    let mut state = IntentState::New;
    for _ in 0..10 {
        state = bridge.engine.submit(&id).await.unwrap();
        if state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(state, IntentState::Failed);
    assert_eq!(bridge.broker.submit_calls(), 3);
    assert!(bridge.broker.orders().is_empty());

    let stored = intent(bridge.store.as_ref(), &id).await;
    assert_eq!(stored.submit_attempts(), 3);
    assert!(stored.last_reason().unwrap().contains("attempt limit 3"));

    // A failed intent is never picked up again
    bridge.engine.drive_once().await.unwrap();
    assert_eq!(bridge.broker.submit_calls(), 3);
}

#[tokio::test]
async fn test_broker_rejection_is_terminal_without_retry() {
    let bridge = connected_bridge().await;
    let id = ingest_one(&bridge, limit_buy("sig-reject", dec!(10))).await;

    bridge.broker.fail_next_submits([BrokerError::Rejected {
        code: Some("40310000".to_string()),
        reason: "insufficient buying power".to_string(),
    }]);

    assert_eq!(
        bridge.engine.submit(&id).await.unwrap(),
        IntentState::Rejected
    );
    bridge.engine.drive_once().await.unwrap();
    assert_eq!(bridge.broker.submit_calls(), 1);
    assert!(
        intent(bridge.store.as_ref(), &id)
            .await
            .last_reason()
            .unwrap()
            .contains("insufficient buying power")
    );
}

// ============================================
// Reconciliation Convergence
// ============================================

#[tokio::test]
async fn test_reconciliation_recovers_lost_fill() {
    let bridge = connected_bridge().await;
    let id = ingest_one(&bridge, limit_buy("sig-lost-fill", dec!(100))).await;
    bridge.engine.submit(&id).await.unwrap();

    let broker_order_id = intent(bridge.store.as_ref(), &id)
        .await
        .broker_order_id()
        .cloned()
        .unwrap();
    bridge
        .broker
        .set_order_silently(
            &broker_order_id,
            BrokerOrderStatus::Filled,
            dec!(100),
            Some(dec!(101.5)),
        )
        .unwrap();
    assert_eq!(
        intent(bridge.store.as_ref(), &id).await.state(),
        IntentState::Acked
    );

    let report = bridge
        .reconciliation
        .reconcile(ReconcileTrigger::Manual)
        .await
        .unwrap();

    assert!(report.resolved.iter().any(|m| m.intent_id == id));
    let stored = intent(bridge.store.as_ref(), &id).await;
    assert_eq!(stored.state(), IntentState::Filled);
    assert_eq!(stored.filled_quantity(), dec!(100));
    assert_eq!(stored.avg_fill_price(), Some(dec!(101.5)));

    // The missed fill is journaled as a mismatch resolved to the broker's view
    let trail: Vec<(String, IntentState)> = bridge
        .publisher
        .events()
        .iter()
        .filter(|e| e.intent_id == id)
        .map(|e| (e.transition.clone(), e.to_state))
        .collect();
    assert_eq!(
        trail,
        vec![
            ("created".to_string(), IntentState::New),
            ("submit".to_string(), IntentState::Submitting),
            ("ack".to_string(), IntentState::Acked),
            ("reconcile_mismatch".to_string(), IntentState::ReconcileMismatch),
            ("resolved".to_string(), IntentState::Filled),
        ]
    );

    let position = bridge
        .reconciliation
        .position(&Instrument::new("AAPL"))
        .unwrap();
    assert_eq!(position.quantity, dec!(100));

    // Converged; a second pass finds nothing to do
    let again = bridge
        .reconciliation
        .reconcile(ReconcileTrigger::Manual)
        .await
        .unwrap();
    assert!(again.resolved.is_empty());
}

#[tokio::test]
async fn test_reconciliation_flags_orphan_broker_orders() {
    let bridge = connected_bridge().await;
    bridge.broker.insert_order(BrokerOrder {
        broker_order_id: BrokerOrderId::new("manual-1"),
        client_order_id: Some("placed-by-hand".to_string()),
        instrument: Instrument::new("MSFT"),
        side: OrderSide::Sell,
        quantity: dec!(5),
        filled_quantity: dec!(0),
        avg_fill_price: None,
        status: BrokerOrderStatus::Accepted,
        submitted_at: Some(Utc::now()),
    });

    let report = bridge
        .reconciliation
        .reconcile(ReconcileTrigger::Manual)
        .await
        .unwrap();

    assert_eq!(report.orphans.len(), 1);
    assert_eq!(bridge.reconciliation.orphans().len(), 1);
    assert_eq!(
        bridge.reconciliation.orphans()[0].broker_order_id,
        BrokerOrderId::new("manual-1")
    );
    // Orphans are reported, never cancelled
    assert_eq!(bridge.broker.cancel_calls(), 0);
}

// ============================================
// Streamed Updates
// ============================================

#[tokio::test]
async fn test_streamed_fills_drive_intent_to_filled() {
    let bridge = connected_bridge().await;
    let cancel = CancellationToken::new();
    let updates = bridge.session.take_update_stream().unwrap();
    let dispatcher = UpdateDispatcher::new(Arc::clone(&bridge.engine), updates);
    let dispatched = tokio::spawn(dispatcher.run(cancel.clone()));

    let id = ingest_one(&bridge, limit_buy("sig-stream", dec!(100))).await;
    bridge.engine.submit(&id).await.unwrap();
    let broker_order_id = intent(bridge.store.as_ref(), &id)
        .await
        .broker_order_id()
        .cloned()
        .unwrap();

    bridge
        .broker
        .fill(&broker_order_id, dec!(40), dec!(101))
        .unwrap();
    wait_for_state(bridge.store.as_ref(), &id, IntentState::PartiallyFilled).await;

    bridge
        .broker
        .fill(&broker_order_id, dec!(100), dec!(102))
        .unwrap();
    wait_for_state(bridge.store.as_ref(), &id, IntentState::Filled).await;

    let stored = intent(bridge.store.as_ref(), &id).await;
    assert_eq!(stored.filled_quantity(), dec!(100));
    assert_eq!(stored.avg_fill_price(), Some(dec!(101.6)));

    let path: Vec<IntentState> = bridge
        .publisher
        .events()
        .iter()
        .filter(|e| e.intent_id == id)
        .map(|e| e.to_state)
        .collect();
    assert_eq!(
        path,
        vec![
            IntentState::New,
            IntentState::Submitting,
            IntentState::Acked,
            IntentState::PartiallyFilled,
            IntentState::Filled,
        ]
    );

    cancel.cancel();
    assert_eq!(dispatched.await.unwrap(), 2);
}

#[tokio::test]
async fn test_filled_bracket_entry_spawns_exit_orders() {
    let bridge = connected_bridge().await;
    let mut alert = limit_buy("sig-bracket", dec!(50));
    alert.take_profit = Some(dec!(110));
    alert.stop_loss = Some(dec!(95));

    let id = ingest_one(&bridge, alert).await;
    bridge.engine.submit(&id).await.unwrap();
    let broker_order_id = intent(bridge.store.as_ref(), &id)
        .await
        .broker_order_id()
        .cloned()
        .unwrap();
    bridge
        .broker
        .set_order_silently(
            &broker_order_id,
            BrokerOrderStatus::Filled,
            dec!(50),
            Some(dec!(101.5)),
        )
        .unwrap();
    bridge
        .reconciliation
        .reconcile(ReconcileTrigger::Manual)
        .await
        .unwrap();

    let children: Vec<OrderIntent> = bridge
        .store
        .list_by_instrument(&Instrument::new("AAPL"))
        .await
        .unwrap()
        .into_iter()
        .filter(|i| i.parent_intent_id() == Some(&id))
        .collect();
    assert_eq!(children.len(), 2);
    for child in &children {
        assert_eq!(child.side(), OrderSide::Sell);
        assert_eq!(child.quantity(), dec!(50));
        assert_eq!(child.state(), IntentState::New);
    }
    assert!(children.iter().any(|c| c.role() == IntentRole::TakeProfit));
    assert!(children.iter().any(|c| c.role() == IntentRole::StopLoss));

    // A second pass does not duplicate them
    bridge
        .reconciliation
        .reconcile(ReconcileTrigger::Manual)
        .await
        .unwrap();
    let count = bridge
        .store
        .list_by_instrument(&Instrument::new("AAPL"))
        .await
        .unwrap()
        .len();
    assert_eq!(count, 3);
}

// ============================================
// Restart Safety
// ============================================

#[tokio::test]
async fn test_restart_mid_submission_adopts_order_broker_received() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("bridge.db").display());
    let broker = Arc::new(SimulatedBroker::new());

    // First run: the order reaches the broker, then the process dies
    let id = {
        let store = Arc::new(SqliteIntentStore::connect(&url).await.unwrap());
        let bridge = wire(Arc::clone(&store), Arc::clone(&broker));
        bridge.session.connect().await.unwrap();
        let id = ingest_one(&bridge, limit_buy("sig-crash", dec!(100))).await;

        let mut stored = intent(store.as_ref(), &id).await;
        let guard = stored.guard();
        stored.begin_submission().unwrap();
        store.update_state(&stored, guard).await.unwrap();
        bridge
            .session
            .submit_order(SubmitOrderRequest::from_intent(&stored))
            .await
            .unwrap();

        store.close().await;
        id
    };

    // Second run over the same database
    let store = Arc::new(SqliteIntentStore::connect(&url).await.unwrap());
    assert_eq!(
        intent(store.as_ref(), &id).await.state(),
        IntentState::Submitting
    );
    let bridge = wire(Arc::clone(&store), Arc::clone(&broker));
    bridge.session.connect().await.unwrap();

    let report = bridge
        .reconciliation
        .reconcile(ReconcileTrigger::Startup)
        .await
        .unwrap();

    assert_eq!(report.adopted, vec![id.clone()]);
    let stored = intent(store.as_ref(), &id).await;
    assert_eq!(stored.state(), IntentState::Acked);
    assert_eq!(
        stored.broker_order_id(),
        Some(&broker.orders()[0].broker_order_id)
    );

    // Still exactly one order, and the alert is still a duplicate
    bridge.engine.drive_once().await.unwrap();
    assert_eq!(broker.orders().len(), 1);
    let err = bridge
        .ingest
        .execute(limit_buy("sig-crash", dec!(100)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestionError::DuplicateAlert { .. }));
    store.close().await;
}

#[tokio::test]
async fn test_restart_mid_submission_resubmits_order_broker_never_saw() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("bridge.db").display());
    let broker = Arc::new(SimulatedBroker::new());

    let id = {
        let store = Arc::new(SqliteIntentStore::connect(&url).await.unwrap());
        let bridge = wire(Arc::clone(&store), Arc::clone(&broker));
        let id = ingest_one(&bridge, limit_buy("sig-crash-early", dec!(100))).await;

        let mut stored = intent(store.as_ref(), &id).await;
        let guard = stored.guard();
        stored.begin_submission().unwrap();
        store.update_state(&stored, guard).await.unwrap();

        store.close().await;
        id
    };

    let store = Arc::new(SqliteIntentStore::connect(&url).await.unwrap());
    let bridge = wire(Arc::clone(&store), Arc::clone(&broker));
    bridge.session.connect().await.unwrap();

    let report = bridge
        .reconciliation
        .reconcile(ReconcileTrigger::Startup)
        .await
        .unwrap();
    assert_eq!(report.resubmitted, vec![id.clone()]);
    assert_eq!(intent(store.as_ref(), &id).await.state(), IntentState::New);

    assert_eq!(
        bridge.engine.submit(&id).await.unwrap(),
        IntentState::Acked
    );
    assert_eq!(broker.submit_calls(), 1);
    assert_eq!(intent(store.as_ref(), &id).await.submit_attempts(), 2);
    store.close().await;
}

// ============================================
// Session Degradation
// ============================================

#[tokio::test]
async fn test_submissions_wait_for_session_recovery() {
    let bridge = wire(
        Arc::new(InMemoryIntentStore::new()),
        Arc::new(SimulatedBroker::new()),
    );
    let mut events = bridge.session.subscribe_events();
    let cancel = CancellationToken::new();
    let supervisor = tokio::spawn(Arc::clone(&bridge.session).run(cancel.clone()));
    wait_for_session(&bridge, SessionStatus::Connected).await;

    bridge.broker.set_reachable(false);
    wait_for_session(&bridge, SessionStatus::Degraded).await;

    // Alerts are still accepted, but nothing is sent
    let id = ingest_one(&bridge, limit_buy("sig-degraded", dec!(10))).await;
    assert_eq!(bridge.engine.submit(&id).await.unwrap(), IntentState::New);
    assert_eq!(bridge.engine.drive_once().await.unwrap().submitted, 0);
    assert_eq!(bridge.broker.submit_calls(), 0);
    assert!(
        bridge
            .reconciliation
            .reconcile(ReconcileTrigger::Manual)
            .await
            .is_err()
    );

    bridge.broker.set_reachable(true);
    wait_for_session(&bridge, SessionStatus::Connected).await;

    assert_eq!(
        bridge.engine.submit(&id).await.unwrap(),
        IntentState::Acked
    );
    assert_eq!(bridge.broker.submit_calls(), 1);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.first(), Some(&SessionEvent::Connected));
    assert!(seen.contains(&SessionEvent::Resynced));

    cancel.cancel();
    supervisor.await.unwrap();
    assert_eq!(bridge.session.status(), SessionStatus::Disconnected);
}
