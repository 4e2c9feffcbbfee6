//! Messaging Adapters
//!
//! Implementations of `EventPublisherPort`.

mod tracing_publisher;

pub use tracing_publisher::{TRANSITION_TARGET, TracingEventPublisher};
