//! Event Publisher Port (Driven Port)
//!
//! Observability boundary: every persisted transition is published here.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::order_intent::IntentEvent;

/// Event publishing error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventPublishError {
    /// Publishing failed.
    #[error("event publish failed: {message}")]
    PublishFailed {
        /// Error details.
        message: String,
    },
}

/// Port for publishing intent transition events.
#[async_trait]
pub trait EventPublisherPort: Send + Sync {
    /// Publish transition events in order.
    async fn publish(&self, events: Vec<IntentEvent>) -> Result<(), EventPublishError>;
}

/// No-op event publisher.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisherPort for NoOpEventPublisher {
    async fn publish(&self, _events: Vec<IntentEvent>) -> Result<(), EventPublishError> {
        Ok(())
    }
}

/// Publisher that keeps every event in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    events: Mutex<Vec<IntentEvent>>,
}

impl InMemoryEventPublisher {
    /// Create an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far.
    #[must_use]
    pub fn events(&self) -> Vec<IntentEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventPublisherPort for InMemoryEventPublisher {
    async fn publish(&self, events: Vec<IntentEvent>) -> Result<(), EventPublishError> {
        self.events.lock().extend(events);
        Ok(())
    }
}
