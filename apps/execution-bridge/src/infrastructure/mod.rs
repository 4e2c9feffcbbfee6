//! Infrastructure Layer
//!
//! Adapters for the ports defined in the application layer.
//!
//! - **Driven Adapters (Outbound)**
//!   - `persistence/`: intent stores (SQLite, in-memory)
//!   - `broker/`: brokerage adapters (Alpaca, simulated)
//!   - `messaging/`: transition event publishing
//!
//! - **Driver Adapters (Inbound)**
//!   - `http/`: alert webhook and operations API

pub mod broker;
pub mod http;
pub mod messaging;
pub mod persistence;
