//! Broker Adapters
//!
//! Implementations of `BrokerPort`.

pub mod alpaca;
pub mod simulated;

pub use alpaca::{AlpacaBroker, AlpacaConfig, AlpacaEnvironment, AlpacaError};
pub use simulated::SimulatedBroker;
