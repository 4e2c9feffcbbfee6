//! Cancel Intent Use Case

use std::sync::Arc;

use serde::Serialize;

use crate::application::ports::{BrokerPort, EventPublisherPort};
use crate::application::services::ExecutionEngine;
use crate::domain::order_intent::{IntentState, IntentStore};
use crate::domain::shared::IntentId;

/// Result of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelResult {
    /// Intent.
    pub intent_id: IntentId,
    /// Whether the cancel was sent (or the intent was already done).
    pub success: bool,
    /// State after the request.
    pub state: Option<IntentState>,
    /// Error message if failed.
    pub error: Option<String>,
}

/// Use case for operator cancels.
pub struct CancelIntentUseCase<S, B, P>
where
    S: IntentStore,
    B: BrokerPort,
    P: EventPublisherPort,
{
    engine: Arc<ExecutionEngine<S, B, P>>,
}

impl<S, B, P> CancelIntentUseCase<S, B, P>
where
    S: IntentStore,
    B: BrokerPort + 'static,
    P: EventPublisherPort,
{
    /// Create a new `CancelIntentUseCase`.
    pub const fn new(engine: Arc<ExecutionEngine<S, B, P>>) -> Self {
        Self { engine }
    }

    /// Cancel one intent.
    pub async fn execute(&self, intent_id: &IntentId, reason: &str) -> CancelResult {
        match self.engine.request_cancel(intent_id, reason).await {
            Ok(state) => {
                tracing::info!(intent_id = %intent_id, state = %state, reason, "Cancel requested");
                CancelResult {
                    intent_id: intent_id.clone(),
                    success: true,
                    state: Some(state),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(intent_id = %intent_id, error = %e, "Cancel request failed");
                CancelResult {
                    intent_id: intent_id.clone(),
                    success: false,
                    state: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::InMemoryEventPublisher;
    use crate::application::services::{ExecutionConfig, SessionConfig, SessionManager};
    use crate::domain::order_intent::{
        IntentDraft, IntentRole, OrderIntent, OrderSide, OrderType,
    };
    use crate::domain::shared::Instrument;
    use crate::infrastructure::broker::SimulatedBroker;
    use crate::infrastructure::persistence::InMemoryIntentStore;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_cancel_working_and_missing_intent() {
        let broker = Arc::new(SimulatedBroker::new());
        let session = Arc::new(SessionManager::new(broker, SessionConfig::default()));
        session.connect().await.unwrap();
        let store = Arc::new(InMemoryIntentStore::new());
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&store),
            session,
            Arc::new(InMemoryEventPublisher::new()),
            ExecutionConfig::default(),
        ));
        let use_case = CancelIntentUseCase::new(Arc::clone(&engine));

        let intent = OrderIntent::new(IntentDraft {
            source_signal: "s".into(),
            instrument: Instrument::new("XYZ"),
            side: OrderSide::Buy,
            quantity: dec!(5),
            order_type: OrderType::Limit,
            limit_price: Some(dec!(10)),
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

        let result = use_case.execute(intent.intent_id(), "operator").await;
        assert!(result.success);
        assert_eq!(result.state, Some(IntentState::Cancelled));

        let missing = use_case.execute(&IntentId::new("nope"), "operator").await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("not found"));
    }
}
