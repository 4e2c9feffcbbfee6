//! Application Layer
//!
//! The application layer orchestrates domain logic through services and use
//! cases. It defines:
//!
//! - **Ports**: Interfaces for interacting with external systems
//! - **Services**: Long-running session, execution and reconciliation loops
//! - **Use Cases**: Alert ingestion, cancels and queries

pub mod ports;
pub mod services;
pub mod use_cases;
