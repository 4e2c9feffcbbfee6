//! Order Intent Bounded Context
//!
//! The bridge's durable record of a trading decision, from the alert that
//! produced it to the terminal brokerage outcome.
//!
//! # Key Concepts
//!
//! - **Order Intent**: aggregate root holding lifecycle state, fills and the
//!   mapping to the broker's order id
//! - **Idempotency Key**: deterministic fingerprint used to refuse duplicate
//!   alert deliveries
//! - **Transition Table**: [`IntentStateMachine`], the only way state changes
//! - **Intent Store**: durable store with compare-and-swap updates

pub mod aggregate;
pub mod errors;
pub mod events;
pub mod idempotency;
pub mod repository;
pub mod state_machine;
pub mod value_objects;

pub use aggregate::{IntentDraft, OrderIntent};
pub use errors::IntentError;
pub use events::IntentEvent;
pub use idempotency::{derive_idempotency_key, fingerprint_payload};
pub use repository::{IntentStore, StateGuard, StoreError};
pub use state_machine::IntentStateMachine;
pub use value_objects::{IntentRole, IntentState, OrderSide, OrderType, ParseValueError, Transition};
