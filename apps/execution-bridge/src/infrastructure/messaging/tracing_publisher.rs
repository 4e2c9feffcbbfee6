//! Transition publisher backed by `tracing` and Prometheus counters.

use async_trait::async_trait;

use crate::application::ports::{EventPublishError, EventPublisherPort};
use crate::domain::order_intent::IntentEvent;
use crate::observability;

/// Log target of transition records, for filtering (`RUST_LOG=intent_transition=info`).
pub const TRANSITION_TARGET: &str = "intent_transition";

/// Emits one structured log record per transition and counts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

impl TracingEventPublisher {
    /// Create a new publisher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisherPort for TracingEventPublisher {
    async fn publish(&self, events: Vec<IntentEvent>) -> Result<(), EventPublishError> {
        for event in &events {
            observability::record_intent_transition(event.to_state);
            let from = event.from_state.map_or("-", |s| s.as_str());
            tracing::info!(
                target: TRANSITION_TARGET,
                intent_id = %event.intent_id,
                from,
                to = %event.to_state,
                transition = %event.transition,
                reason = %event.reason,
                ts = %event.ts.to_rfc3339(),
                terminal = event.is_terminal(),
                "Intent transition"
            );
        }
        Ok(())
    }
}
