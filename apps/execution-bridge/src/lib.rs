// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::default_trait_access
    )
)]

//! Execution Bridge - Rust Core Library
//!
//! Turns trading alerts into brokerage orders without losing or duplicating
//! any of them.
//!
//! # Architecture (Clean Architecture + DDD + Hexagonal)
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: identifiers, the `OrderIntent` aggregate and its state
//!   machine, the `IntentStore` repository trait, broker session and
//!   reconciliation value types.
//!
//! - **Application**: ports (`BrokerPort`, `EventPublisherPort`,
//!   `PositionViewPort`), long-running services (`SessionManager`,
//!   `ExecutionEngine`, `ReconciliationEngine`, `UpdateDispatcher`) and the
//!   ingest, cancel and query use cases.
//!
//! - **Infrastructure**: SQLite and in-memory intent stores, the Alpaca and
//!   simulated brokers, the axum HTTP adapter, the tracing event publisher.
//!
//! `config` loads the YAML configuration; `observability` installs logging
//! and the Prometheus exporter.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Clean Architecture Layers
// =============================================================================

/// Domain layer - Core business logic with no external dependencies.
pub mod domain;

/// Application layer - Services, use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Configuration loading and validation.
pub mod config;

/// Logging and metrics.
pub mod observability;

// =============================================================================
// Re-exports
// =============================================================================

pub use domain::order_intent::{
    IntentEvent, IntentRole, IntentState, IntentStore, OrderIntent, OrderSide, OrderType,
    StoreError,
};
pub use domain::shared::{BrokerOrderId, IdempotencyKey, Instrument, IntentId};

pub use application::ports::{
    BrokerError, BrokerPort, EventPublisherPort, InMemoryEventPublisher, NoOpEventPublisher,
};
pub use application::services::{
    ExecutionEngine, ReconciliationEngine, SessionManager, UpdateDispatcher,
};
pub use application::use_cases::{CancelIntentUseCase, IngestAlertUseCase, QueryIntentsUseCase};

pub use infrastructure::broker::{AlpacaBroker, SimulatedBroker};
pub use infrastructure::http::{AppState, create_router};
pub use infrastructure::messaging::TracingEventPublisher;
pub use infrastructure::persistence::{InMemoryIntentStore, SqliteIntentStore};
