//! Domain Layer
//!
//! The innermost layer containing business logic with zero infrastructure dependencies.
//! This layer defines:
//!
//! - **Aggregates**: the [`order_intent::OrderIntent`] and its invariants
//! - **Value Objects**: states, sides, order types, identifiers
//! - **Domain Events**: records of persisted state transitions
//! - **Repository Traits**: the durable intent store abstraction
//!
//! # Bounded Contexts
//!
//! - [`alert`]: the normalized inbound alert
//! - [`order_intent`]: intent lifecycle, idempotency and the transition table
//! - [`broker_session`]: the brokerage connection as seen by the rest of the system
//! - [`reconciliation`]: brokerage truth (positions, orphans) and pass reports

pub mod alert;
pub mod broker_session;
pub mod order_intent;
pub mod reconciliation;
pub mod shared;
