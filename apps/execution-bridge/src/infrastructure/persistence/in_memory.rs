//! In-memory intent store for testing and the simulated setup.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::order_intent::{IntentState, IntentStore, OrderIntent, StateGuard, StoreError};
use crate::domain::shared::{BrokerOrderId, IdempotencyKey, Instrument, IntentId};

/// In-memory implementation of [`IntentStore`].
///
/// Enforces the same compare-and-swap and idempotency-key rules as the SQLite
/// store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryIntentStore {
    intents: RwLock<HashMap<IntentId, OrderIntent>>,
}

impl InMemoryIntentStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored intents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intents.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intents.read().is_empty()
    }

    fn sorted(&self, filter: impl Fn(&OrderIntent) -> bool) -> Vec<OrderIntent> {
        let mut intents: Vec<_> = self
            .intents
            .read()
            .values()
            .filter(|i| filter(i))
            .cloned()
            .collect();
        intents.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.intent_id().cmp(b.intent_id()))
        });
        intents
    }
}

/// Stored copy without the caller's pending events; those are published
/// once, by whoever made the transition.
fn snapshot(intent: &OrderIntent) -> OrderIntent {
    let mut stored = intent.clone();
    stored.drain_events();
    stored
}

#[async_trait]
impl IntentStore for InMemoryIntentStore {
    async fn create(&self, intent: &OrderIntent) -> Result<(), StoreError> {
        let mut intents = self.intents.write();
        if let Some(holder) = intents
            .values()
            .find(|i| i.idempotency_key() == intent.idempotency_key() && !i.is_terminal())
        {
            return Err(StoreError::DuplicateIdempotencyKey {
                key: intent.idempotency_key().clone(),
                existing: holder.intent_id().clone(),
            });
        }
        if intents.contains_key(intent.intent_id()) {
            return Err(StoreError::Backend(format!(
                "intent {} already exists",
                intent.intent_id()
            )));
        }
        intents.insert(intent.intent_id().clone(), snapshot(intent));
        Ok(())
    }

    async fn get(&self, intent_id: &IntentId) -> Result<Option<OrderIntent>, StoreError> {
        Ok(self.intents.read().get(intent_id).cloned())
    }

    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrderIntent>, StoreError> {
        let intents = self.intents.read();
        let mut holders: Vec<_> = intents
            .values()
            .filter(|i| i.idempotency_key() == key)
            .collect();
        holders.sort_by_key(|i| (!i.is_terminal(), i.updated_at()));
        Ok(holders.last().map(|i| (*i).clone()))
    }

    async fn update_state(
        &self,
        intent: &OrderIntent,
        expected: StateGuard,
    ) -> Result<(), StoreError> {
        let mut intents = self.intents.write();
        let stored = intents
            .get_mut(intent.intent_id())
            .ok_or_else(|| StoreError::NotFound(intent.intent_id().clone()))?;
        if stored.state() != expected.state || stored.version() != expected.version {
            return Err(StoreError::StaleTransition {
                intent_id: intent.intent_id().clone(),
                expected_state: expected.state,
                expected_version: expected.version,
            });
        }
        *stored = snapshot(intent);
        Ok(())
    }

    async fn list_non_terminal(&self) -> Result<Vec<OrderIntent>, StoreError> {
        Ok(self.sorted(|i| !i.is_terminal()))
    }

    async fn list_by_state(&self, state: IntentState) -> Result<Vec<OrderIntent>, StoreError> {
        Ok(self.sorted(|i| i.state() == state))
    }

    async fn list_by_instrument(
        &self,
        instrument: &Instrument,
    ) -> Result<Vec<OrderIntent>, StoreError> {
        Ok(self.sorted(|i| i.instrument() == instrument))
    }

    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OrderIntent>, StoreError> {
        Ok(self.sorted(|i| i.created_at() >= from && i.created_at() <= to))
    }

    async fn find_by_broker_order_id(
        &self,
        broker_order_id: &BrokerOrderId,
    ) -> Result<Option<OrderIntent>, StoreError> {
        Ok(self
            .intents
            .read()
            .values()
            .find(|i| i.broker_order_id() == Some(broker_order_id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_intent::{IntentDraft, IntentRole, OrderSide, OrderType};
    use rust_decimal_macros::dec;

    fn draft(signal: &str) -> IntentDraft {
        IntentDraft {
            source_signal: signal.into(),
            instrument: Instrument::new("XYZ"),
            side: OrderSide::Buy,
            quantity: dec!(1),
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            strategy_tag: "t".into(),
            role: IntentRole::Entry,
            parent_intent_id: None,
            take_profit: None,
            stop_loss: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_key_refused_while_live() {
        let store = InMemoryIntentStore::new();
        let first = OrderIntent::new(draft("a")).unwrap();
        store.create(&first).await.unwrap();

        let second = OrderIntent::new(draft("a")).unwrap();
        let Err(StoreError::DuplicateIdempotencyKey { existing, .. }) = store.create(&second).await
        else {
            panic!("expected duplicate key");
        };
        assert_eq!(&existing, first.intent_id());

        // Once terminal, the key is free again
        let mut first = first;
        let guard = first.guard();
        first.begin_submission().unwrap();
        first.reject("no").unwrap();
        store.update_state(&first, guard).await.unwrap();
        store.create(&second).await.unwrap();

        let holder = store
            .get_by_idempotency_key(second.idempotency_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(holder.intent_id(), second.intent_id());
    }

    #[tokio::test]
    async fn test_stale_update_is_refused() {
        let store = InMemoryIntentStore::new();
        let mut intent = OrderIntent::new(draft("a")).unwrap();
        store.create(&intent).await.unwrap();

        let stale_guard = intent.guard();
        intent.begin_submission().unwrap();
        store.update_state(&intent, stale_guard).await.unwrap();

        let mut other = intent.clone();
        other.reject("late").unwrap();
        assert!(matches!(
            store.update_state(&other, stale_guard).await,
            Err(StoreError::StaleTransition { .. })
        ));
        assert_eq!(
            store.get(intent.intent_id()).await.unwrap().unwrap().state(),
            IntentState::Submitting
        );
    }

    #[tokio::test]
    async fn test_lookup_by_broker_order_id() {
        let store = InMemoryIntentStore::new();
        let mut intent = OrderIntent::new(draft("a")).unwrap();
        store.create(&intent).await.unwrap();
        let guard = intent.guard();
        intent.begin_submission().unwrap();
        intent.acknowledge(BrokerOrderId::new("b-9"), "ack").unwrap();
        store.update_state(&intent, guard).await.unwrap();

        let found = store
            .find_by_broker_order_id(&BrokerOrderId::new("b-9"))
            .await
            .unwrap();
        assert_eq!(found.unwrap().intent_id(), intent.intent_id());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_reads_carry_no_pending_events() {
        let store = InMemoryIntentStore::new();
        let mut intent = OrderIntent::new(draft("a")).unwrap();
        assert!(!intent.pending_events().is_empty());
        store.create(&intent).await.unwrap();

        let loaded = store.get(intent.intent_id()).await.unwrap().unwrap();
        assert!(loaded.pending_events().is_empty());

        let guard = intent.guard();
        intent.begin_submission().unwrap();
        store.update_state(&intent, guard).await.unwrap();
        let loaded = store.get(intent.intent_id()).await.unwrap().unwrap();
        assert_eq!(loaded.state(), IntentState::Submitting);
        assert!(loaded.pending_events().is_empty());
    }
}
