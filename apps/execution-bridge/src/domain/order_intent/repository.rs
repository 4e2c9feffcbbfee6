//! Intent Store Trait
//!
//! Durable keyed store for order intents with conditional (compare-and-swap)
//! updates. Implementations live in the infrastructure layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::aggregate::OrderIntent;
use super::value_objects::IntentState;
use crate::domain::shared::{BrokerOrderId, IdempotencyKey, Instrument, IntentId};

/// State and version an update expects to find in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateGuard {
    /// Expected prior state.
    pub state: IntentState,
    /// Expected prior version.
    pub version: u64,
}

/// Errors from the intent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No intent with this id.
    #[error("intent not found: {0}")]
    NotFound(IntentId),

    /// The stored intent moved on since it was read.
    #[error(
        "stale transition for {intent_id}: expected {expected_state} v{expected_version}"
    )]
    StaleTransition {
        /// Intent being updated.
        intent_id: IntentId,
        /// State the writer expected.
        expected_state: IntentState,
        /// Version the writer expected.
        expected_version: u64,
    },

    /// A non-terminal intent already holds this idempotency key.
    #[error("idempotency key {key} is held by non-terminal intent {existing}")]
    DuplicateIdempotencyKey {
        /// Contested key.
        key: IdempotencyKey,
        /// Intent holding it.
        existing: IntentId,
    },

    /// The backing store failed.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A stored record could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether this is an optimistic-concurrency conflict rather than a failure.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::StaleTransition { .. } | Self::DuplicateIdempotencyKey { .. }
        )
    }
}

/// Durable intent store.
///
/// Every write of an existing intent is conditional on a [`StateGuard`]; a
/// mismatch yields [`StoreError::StaleTransition`] and nothing is written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Persist a new intent.
    ///
    /// Fails with [`StoreError::DuplicateIdempotencyKey`] if a non-terminal
    /// intent already holds the same key.
    async fn create(&self, intent: &OrderIntent) -> Result<(), StoreError>;

    /// Fetch an intent by id.
    async fn get(&self, intent_id: &IntentId) -> Result<Option<OrderIntent>, StoreError>;

    /// Fetch the intent holding a key: the non-terminal one if any, otherwise
    /// the most recently updated.
    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrderIntent>, StoreError>;

    /// Write `intent` if the stored copy still matches `expected`.
    async fn update_state(
        &self,
        intent: &OrderIntent,
        expected: StateGuard,
    ) -> Result<(), StoreError>;

    /// All intents not in a terminal state, oldest first.
    async fn list_non_terminal(&self) -> Result<Vec<OrderIntent>, StoreError>;

    /// All intents in `state`, oldest first.
    async fn list_by_state(&self, state: IntentState) -> Result<Vec<OrderIntent>, StoreError>;

    /// All intents for an instrument, oldest first.
    async fn list_by_instrument(
        &self,
        instrument: &Instrument,
    ) -> Result<Vec<OrderIntent>, StoreError>;

    /// Intents created within `[from, to]`, oldest first.
    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OrderIntent>, StoreError>;

    /// Intent bound to a broker order id.
    async fn find_by_broker_order_id(
        &self,
        broker_order_id: &BrokerOrderId,
    ) -> Result<Option<OrderIntent>, StoreError>;
}
