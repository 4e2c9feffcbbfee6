//! HTTP/REST API adapter.
//!
//! Inbound adapter: the alert webhook and the operations endpoints, all
//! delegating to application use cases.

mod controller;
mod request;
mod response;

pub use controller::{AppState, create_router};
pub use request::*;
pub use response::*;
