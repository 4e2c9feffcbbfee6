//! Broker Port (Driven Port)
//!
//! Interface to a brokerage's order-management API. The session manager is
//! the only caller; it adds serialization, timeouts and fail-fast behavior.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::order_intent::{OrderIntent, OrderSide, OrderType};
use crate::domain::shared::{BrokerOrderId, Instrument, IntentId};

/// Request to submit an order to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOrderRequest {
    /// Client order id; always the intent id.
    pub client_order_id: IntentId,
    /// Instrument to trade.
    pub instrument: Instrument,
    /// Order side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Quantity.
    pub quantity: Decimal,
    /// Limit price (for limit orders).
    pub limit_price: Option<Decimal>,
    /// Stop price (for stop orders).
    pub stop_price: Option<Decimal>,
}

impl SubmitOrderRequest {
    /// Build the broker request for an intent.
    #[must_use]
    pub fn from_intent(intent: &OrderIntent) -> Self {
        Self {
            client_order_id: intent.intent_id().clone(),
            instrument: intent.instrument().clone(),
            side: intent.side(),
            order_type: intent.order_type(),
            quantity: intent.quantity(),
            limit_price: intent.limit_price(),
            stop_price: intent.stop_price(),
        }
    }
}

/// Order status as the broker reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerOrderStatus {
    /// Received, not yet working.
    Pending,
    /// Working at the venue.
    Accepted,
    /// Some quantity filled, still working.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancel requested at the broker.
    PendingCancel,
    /// Cancelled.
    Cancelled,
    /// Expired (day order, done for day).
    Expired,
    /// Rejected.
    Rejected,
}

impl BrokerOrderStatus {
    /// Whether the order can still trade.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Accepted | Self::PartiallyFilled | Self::PendingCancel
        )
    }
}

/// Acknowledgment from broker after order submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    /// Broker-assigned order id.
    pub broker_order_id: BrokerOrderId,
    /// Client order id echoed back.
    pub client_order_id: String,
    /// Status at acknowledgment time.
    pub status: BrokerOrderStatus,
}

/// Result of a cancel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    /// True when the broker confirmed the order is cancelled; false when the
    /// request was only accepted and confirmation will arrive on the stream.
    pub confirmed: bool,
}

/// Broker-side snapshot of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerOrder {
    /// Broker order id.
    pub broker_order_id: BrokerOrderId,
    /// Client order id, when the broker keeps one.
    pub client_order_id: Option<String>,
    /// Instrument.
    pub instrument: Instrument,
    /// Side.
    pub side: OrderSide,
    /// Order quantity.
    pub quantity: Decimal,
    /// Cumulative filled quantity.
    pub filled_quantity: Decimal,
    /// Average fill price.
    pub avg_fill_price: Option<Decimal>,
    /// Status.
    pub status: BrokerOrderStatus,
    /// When the broker accepted it.
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Streaming order update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Broker order id.
    pub broker_order_id: BrokerOrderId,
    /// Client order id, when present.
    pub client_order_id: Option<String>,
    /// Status after the event.
    pub status: BrokerOrderStatus,
    /// Cumulative filled quantity.
    pub filled_quantity: Decimal,
    /// Average fill price.
    pub avg_fill_price: Option<Decimal>,
    /// Event time.
    pub ts: DateTime<Utc>,
}

impl OrderUpdate {
    /// Update describing a broker order snapshot.
    #[must_use]
    pub fn from_order(order: &BrokerOrder, ts: DateTime<Utc>) -> Self {
        Self {
            broker_order_id: order.broker_order_id.clone(),
            client_order_id: order.client_order_id.clone(),
            status: order.status,
            filled_quantity: order.filled_quantity,
            avg_fill_price: order.avg_fill_price,
            ts,
        }
    }
}

/// Item of a broker update subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerStreamEvent {
    /// Order status or fill.
    Update(OrderUpdate),
    /// The subscription ended; a new one is needed after reconnecting.
    Disconnected {
        /// Why.
        reason: String,
    },
}

/// Open position at the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerPosition {
    /// Instrument.
    pub instrument: Instrument,
    /// Signed quantity: positive long, negative short.
    pub quantity: Decimal,
    /// Average entry price.
    pub avg_entry_price: Option<Decimal>,
}

/// Broker port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Transport-level failure; the session is probably gone.
    #[error("broker connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// The call did not complete in time; its outcome is unknown.
    #[error("broker call timed out: {message}")]
    Timeout {
        /// Error details.
        message: String,
    },

    /// Rate limited.
    #[error("rate limited by broker")]
    RateLimited {
        /// Server-suggested wait.
        retry_after: Option<Duration>,
    },

    /// Order refused (invalid order, margin, instrument restrictions).
    #[error("order rejected: {reason}")]
    Rejected {
        /// Broker error code.
        code: Option<String>,
        /// Rejection reason.
        reason: String,
    },

    /// Order not found.
    #[error("order not found: {order_id}")]
    OrderNotFound {
        /// The missing order id.
        order_id: String,
    },

    /// Credentials refused.
    #[error("broker authentication failed: {message}")]
    AuthenticationFailed {
        /// Error details.
        message: String,
    },

    /// Unknown error.
    #[error("broker error: {message}")]
    Unknown {
        /// Error details.
        message: String,
    },
}

impl BrokerError {
    /// Transient errors worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }

    /// Errors that mean the session itself is unhealthy.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Rejected { .. } => "rejected",
            Self::OrderNotFound { .. } => "not_found",
            Self::AuthenticationFailed { .. } => "authentication",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// Port for broker interactions.
#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// Short broker name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Establish (or verify) an authenticated session.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Tear the session down.
    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// Cheap liveness check.
    async fn heartbeat(&self) -> Result<(), BrokerError>;

    /// Open a new update subscription.
    ///
    /// The returned stream is infinite until the connection drops and cannot be
    /// restarted; it ends with [`BrokerStreamEvent::Disconnected`] or by closing.
    async fn subscribe_updates(&self) -> Result<mpsc::Receiver<BrokerStreamEvent>, BrokerError>;

    /// Submit an order.
    async fn submit(&self, request: SubmitOrderRequest) -> Result<OrderAck, BrokerError>;

    /// Cancel an order.
    async fn cancel(&self, broker_order_id: &BrokerOrderId) -> Result<CancelAck, BrokerError>;

    /// Status snapshot of one order.
    async fn query_order(&self, broker_order_id: &BrokerOrderId)
    -> Result<BrokerOrder, BrokerError>;

    /// Look an order up by the client order id it was submitted with.
    async fn query_order_by_client_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrder>, BrokerError>;

    /// All open orders.
    async fn query_open_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError>;

    /// Orders (any status) submitted within `[from, to]`.
    async fn query_orders_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BrokerOrder>, BrokerError>;

    /// Open positions.
    async fn query_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;
}
