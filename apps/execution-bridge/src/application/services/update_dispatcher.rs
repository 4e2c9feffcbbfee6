//! Update Dispatcher
//!
//! Drains the session's update stream into the execution engine.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::execution_engine::{ExecutionEngine, ExecutionError};
use crate::application::ports::{BrokerPort, EventPublisherPort, OrderUpdate};
use crate::domain::order_intent::IntentStore;

/// Forwards streamed order updates to the engine in arrival order.
pub struct UpdateDispatcher<S, B, P>
where
    S: IntentStore,
    B: BrokerPort,
    P: EventPublisherPort,
{
    engine: Arc<ExecutionEngine<S, B, P>>,
    updates: mpsc::Receiver<OrderUpdate>,
}

impl<S, B, P> UpdateDispatcher<S, B, P>
where
    S: IntentStore,
    B: BrokerPort + 'static,
    P: EventPublisherPort,
{
    /// Create a dispatcher over a session update stream.
    pub const fn new(
        engine: Arc<ExecutionEngine<S, B, P>>,
        updates: mpsc::Receiver<OrderUpdate>,
    ) -> Self {
        Self { engine, updates }
    }

    /// Apply updates until `cancel` fires or the stream closes.
    ///
    /// Returns how many updates were applied.
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        let mut applied = 0;
        loop {
            let update = tokio::select! {
                () = cancel.cancelled() => break,
                update = self.updates.recv() => match update {
                    Some(update) => update,
                    None => break,
                },
            };

            match self.engine.apply_update(&update).await {
                Ok(Some(_)) => applied += 1,
                Ok(None) => {}
                Err(ExecutionError::Store(e)) if e.is_conflict() => {
                    // Lost to reconciliation; the stored state already moved on
                    tracing::debug!(
                        broker_order_id = %update.broker_order_id,
                        error = %e,
                        "Update lost compare-and-swap"
                    );
                }
                Err(e) => tracing::warn!(
                    broker_order_id = %update.broker_order_id,
                    status = ?update.status,
                    error = %e,
                    "Order update not applied"
                ),
            }
        }
        tracing::info!(applied, "Update dispatcher stopped");
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{BrokerOrderStatus, InMemoryEventPublisher};
    use crate::application::services::execution_engine::ExecutionConfig;
    use crate::application::services::session_manager::{SessionConfig, SessionManager};
    use crate::domain::order_intent::{
        IntentDraft, IntentRole, IntentState, OrderIntent, OrderSide, OrderType,
    };
    use crate::domain::shared::{BrokerOrderId, Instrument};
    use crate::infrastructure::broker::SimulatedBroker;
    use crate::infrastructure::persistence::InMemoryIntentStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_stream_updates_reach_the_store() {
        let broker = Arc::new(SimulatedBroker::new());
        let store = Arc::new(InMemoryIntentStore::new());
        let session = Arc::new(SessionManager::new(
            Arc::clone(&broker),
            SessionConfig::default(),
        ));
        session.connect().await.unwrap();
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&store),
            Arc::clone(&session),
            Arc::new(InMemoryEventPublisher::new()),
            ExecutionConfig::default(),
        ));

        let intent = OrderIntent::new(IntentDraft {
            source_signal: "s".into(),
            instrument: Instrument::new("XYZ"),
            side: OrderSide::Buy,
            quantity: dec!(10),
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            strategy_tag: "t".into(),
            role: IntentRole::Entry,
            parent_intent_id: None,
            take_profit: None,
            stop_loss: None,
        })
        .unwrap();
        store.create(&intent).await.unwrap();
        engine.submit(intent.intent_id()).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(UpdateDispatcher::new(Arc::clone(&engine), rx).run(cancel.clone()));

        let fill = OrderUpdate {
            broker_order_id: BrokerOrderId::new("sim-1"),
            client_order_id: Some(intent.intent_id().to_string()),
            status: BrokerOrderStatus::Filled,
            filled_quantity: dec!(10),
            avg_fill_price: Some(dec!(5)),
            ts: Utc::now(),
        };
        tx.send(fill.clone()).await.unwrap();
        tx.send(fill).await.unwrap();
        drop(tx);

        let applied = task.await.unwrap();
        assert_eq!(applied, 2);
        let stored = store.get(intent.intent_id()).await.unwrap().unwrap();
        assert_eq!(stored.state(), IntentState::Filled);
        assert_eq!(stored.filled_quantity(), dec!(10));
    }
}
