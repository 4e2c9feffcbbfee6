//! HTTP response DTOs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::use_cases::IngestOutcome;
use crate::domain::broker_session::BrokerSession;
use crate::domain::order_intent::{IntentRole, IntentState, OrderIntent, OrderSide, OrderType};
use crate::domain::reconciliation::{OrphanOrder, PositionSnapshot, ReconciliationReport};

/// Answer to an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// Primary intent created.
    pub intent_id: Option<String>,
    /// Every intent created.
    pub intent_ids: Vec<String>,
    /// Intents a cancel was requested for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cancelled: Vec<String>,
    /// Whether the alert was accepted.
    pub accepted: bool,
    /// Why not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WebhookResponse {
    /// Accepted alert.
    #[must_use]
    pub fn accepted(outcome: &IngestOutcome) -> Self {
        Self {
            intent_id: outcome.intent_id().map(ToString::to_string),
            intent_ids: outcome.intent_ids.iter().map(ToString::to_string).collect(),
            cancelled: outcome.cancelled.iter().map(ToString::to_string).collect(),
            accepted: true,
            reason: None,
        }
    }

    /// Refused alert. `intent_id` names the intent already holding it, if any.
    #[must_use]
    pub fn refused(reason: impl Into<String>, intent_id: Option<String>) -> Self {
        Self {
            intent_ids: intent_id.iter().cloned().collect(),
            intent_id,
            cancelled: Vec::new(),
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// An intent as exposed over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentResponse {
    /// Intent id (also the broker client order id).
    pub intent_id: String,
    /// Originating alert.
    pub source_signal: String,
    /// Symbol.
    pub instrument: String,
    /// Side.
    pub side: OrderSide,
    /// Quantity.
    pub quantity: Decimal,
    /// Order type.
    pub order_type: OrderType,
    /// Limit price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    /// Stop price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    /// Strategy tag.
    pub strategy_tag: String,
    /// Role.
    pub role: IntentRole,
    /// Parent entry of a bracket child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_intent_id: Option<String>,
    /// Lifecycle state.
    pub state: IntentState,
    /// Broker order id once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_order_id: Option<String>,
    /// Filled so far.
    pub filled_quantity: Decimal,
    /// Average fill price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_fill_price: Option<Decimal>,
    /// Submission attempts.
    pub submit_attempts: u32,
    /// Next scheduled retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Reason of the last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reason: Option<String>,
    /// Persisted version.
    pub version: u64,
    /// Created.
    pub created_at: DateTime<Utc>,
    /// Last transition.
    pub updated_at: DateTime<Utc>,
}

impl From<&OrderIntent> for IntentResponse {
    fn from(intent: &OrderIntent) -> Self {
        Self {
            intent_id: intent.intent_id().to_string(),
            source_signal: intent.source_signal().to_string(),
            instrument: intent.instrument().to_string(),
            side: intent.side(),
            quantity: intent.quantity(),
            order_type: intent.order_type(),
            limit_price: intent.limit_price(),
            stop_price: intent.stop_price(),
            strategy_tag: intent.strategy_tag().to_string(),
            role: intent.role(),
            parent_intent_id: intent.parent_intent_id().map(ToString::to_string),
            state: intent.state(),
            broker_order_id: intent.broker_order_id().map(ToString::to_string),
            filled_quantity: intent.filled_quantity(),
            avg_fill_price: intent.avg_fill_price(),
            submit_attempts: intent.submit_attempts(),
            next_attempt_at: intent.next_attempt_at(),
            last_reason: intent.last_reason().map(ToString::to_string),
            version: intent.version(),
            created_at: intent.created_at(),
            updated_at: intent.updated_at(),
        }
    }
}

/// Intent listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentListResponse {
    /// Matching intents, oldest first.
    pub intents: Vec<IntentResponse>,
    /// Number of intents.
    pub count: usize,
}

/// Broker session view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    /// Broker adapter name.
    pub broker: String,
    /// Session state.
    #[serde(flatten)]
    pub session: BrokerSession,
    /// Stream updates dropped on overflow since start.
    pub dropped_updates: u64,
}

/// Brokerage positions from the last reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionsResponse {
    /// Positions.
    pub positions: Vec<PositionSnapshot>,
}

/// Orphan broker orders awaiting review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphansResponse {
    /// Orphans, oldest detection first.
    pub orphans: Vec<OrphanOrder>,
    /// Last pass, if any ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<ReconciliationReport>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` while the broker session accepts calls, else `degraded`.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Broker session status.
    pub session: String,
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

impl ErrorResponse {
    /// Build from anything displayable.
    #[must_use]
    pub fn new(error: impl ToString) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}
