//! Application Ports (Driven)
//!
//! Ports define interfaces for interacting with external systems.
//! The intent store port lives in the domain as a repository trait.

mod broker_port;
mod event_publisher_port;
mod position_view_port;

pub use broker_port::{
    BrokerError, BrokerOrder, BrokerOrderStatus, BrokerPort, BrokerPosition, BrokerStreamEvent,
    CancelAck, OrderAck, OrderUpdate, SubmitOrderRequest,
};
pub use event_publisher_port::{
    EventPublishError, EventPublisherPort, InMemoryEventPublisher, NoOpEventPublisher,
};
pub use position_view_port::PositionViewPort;
