//! Query Intents Use Case

use std::sync::Arc;

use crate::domain::order_intent::{IntentState, IntentStore, OrderIntent, StoreError};
use crate::domain::shared::{Instrument, IntentId};

/// Intent listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentFilter {
    /// Only intents in this state.
    pub state: Option<IntentState>,
    /// Only intents for this instrument.
    pub instrument: Option<Instrument>,
}

/// Read-only access to intents and their current state.
pub struct QueryIntentsUseCase<S: IntentStore> {
    store: Arc<S>,
}

impl<S: IntentStore> QueryIntentsUseCase<S> {
    /// Create a new `QueryIntentsUseCase`.
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// One intent by id.
    pub async fn get(&self, intent_id: &IntentId) -> Result<Option<OrderIntent>, StoreError> {
        self.store.get(intent_id).await
    }

    /// Intents matching `filter`; without a filter, every non-terminal intent.
    pub async fn list(&self, filter: &IntentFilter) -> Result<Vec<OrderIntent>, StoreError> {
        let intents = match (&filter.instrument, filter.state) {
            (Some(instrument), state) => {
                let mut intents = self.store.list_by_instrument(instrument).await?;
                if let Some(state) = state {
                    intents.retain(|i| i.state() == state);
                }
                intents
            }
            (None, Some(state)) => self.store.list_by_state(state).await?,
            (None, None) => self.store.list_non_terminal().await?,
        };
        Ok(intents)
    }
}
