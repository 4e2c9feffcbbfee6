//! Shared Domain Types
//!
//! Identifiers shared across bounded contexts.

pub mod identifiers;

pub use identifiers::{BrokerOrderId, IdempotencyKey, Instrument, IntentId};
