//! Alpaca Markets Broker Adapter
//!
//! Implementation of `BrokerPort` for the Alpaca trading API:
//! - REST order management over reqwest, with retried reads and single-shot writes
//! - `trade_updates` websocket stream over tokio-tungstenite
//! - Environment-aware safety logging (PAPER vs LIVE)

mod adapter;
mod api_types;
pub(crate) mod config;
mod error;
mod http_client;
mod stream;

pub use adapter::AlpacaBroker;
pub use config::{AlpacaConfig, AlpacaEnvironment};
pub use error::AlpacaError;
