//! Alpaca API request and response types.
//!
//! These types map directly to Alpaca's REST and trade updates wire formats.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::AlpacaError;
use crate::application::ports::{
    BrokerOrder, BrokerOrderStatus, BrokerPosition, OrderAck, OrderUpdate, SubmitOrderRequest,
};
use crate::domain::order_intent::{OrderSide, OrderType};
use crate::domain::shared::{BrokerOrderId, Instrument};

// ============================================================================
// Order Request Types
// ============================================================================

/// Order request for the Alpaca API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlpacaOrderRequest {
    /// Symbol.
    pub symbol: String,
    /// Quantity.
    pub qty: String,
    /// Order side.
    pub side: &'static str,
    /// Order type.
    #[serde(rename = "type")]
    pub order_type: &'static str,
    /// Time in force.
    pub time_in_force: &'static str,
    /// Limit price (for limit orders).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    /// Stop price (for stop orders).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
    /// Client order id; always the intent id.
    pub client_order_id: String,
}

impl From<&SubmitOrderRequest> for AlpacaOrderRequest {
    fn from(request: &SubmitOrderRequest) -> Self {
        Self {
            symbol: request.instrument.to_string(),
            qty: request.quantity.normalize().to_string(),
            side: request.side.as_str(),
            order_type: request.order_type.as_str(),
            // Market orders live for the day; resting orders until cancelled
            time_in_force: match request.order_type {
                OrderType::Market => "day",
                OrderType::Limit | OrderType::Stop => "gtc",
            },
            limit_price: request.limit_price.map(|p| p.normalize().to_string()),
            stop_price: request.stop_price.map(|p| p.normalize().to_string()),
            client_order_id: request.client_order_id.to_string(),
        }
    }
}

// ============================================================================
// Order Response Types
// ============================================================================

/// Order as returned by `/v2/orders` and carried on trade updates.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlpacaOrderResponse {
    /// Broker order id.
    pub id: String,
    /// Client order id.
    #[serde(default)]
    pub client_order_id: Option<String>,
    /// Symbol.
    pub symbol: String,
    /// Quantity (null for notional orders).
    #[serde(default)]
    pub qty: Option<String>,
    /// Filled quantity.
    #[serde(default)]
    pub filled_qty: Option<String>,
    /// Average fill price.
    #[serde(default)]
    pub filled_avg_price: Option<String>,
    /// Order status.
    pub status: String,
    /// Order side.
    pub side: String,
    /// Submitted timestamp.
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    /// Last update timestamp.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AlpacaOrderResponse {
    /// Convert to the port's order snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric field or the side does not parse.
    pub fn to_broker_order(&self) -> Result<BrokerOrder, AlpacaError> {
        Ok(BrokerOrder {
            broker_order_id: BrokerOrderId::new(&self.id),
            client_order_id: self.client_order_id.clone().filter(|id| !id.is_empty()),
            instrument: Instrument::new(&self.symbol),
            side: self
                .side
                .parse::<OrderSide>()
                .map_err(|e| AlpacaError::JsonParse(e.to_string()))?,
            quantity: parse_decimal(self.qty.as_deref(), "qty")?.unwrap_or(Decimal::ZERO),
            filled_quantity: parse_decimal(self.filled_qty.as_deref(), "filled_qty")?
                .unwrap_or(Decimal::ZERO),
            avg_fill_price: parse_decimal(self.filled_avg_price.as_deref(), "filled_avg_price")?,
            status: parse_order_status(&self.status),
            submitted_at: self.submitted_at,
        })
    }

    /// Convert to a submission acknowledgment.
    #[must_use]
    pub fn to_order_ack(&self) -> OrderAck {
        OrderAck {
            broker_order_id: BrokerOrderId::new(&self.id),
            client_order_id: self.client_order_id.clone().unwrap_or_default(),
            status: parse_order_status(&self.status),
        }
    }
}

// ============================================================================
// Account & Position Types
// ============================================================================

/// Account response; only used as an authenticated liveness check.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaAccountResponse {
    /// Account id.
    pub id: String,
    /// Account status (`ACTIVE`, ...).
    #[serde(default)]
    pub status: Option<String>,
}

/// Position response from the Alpaca API.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaPositionResponse {
    /// Symbol.
    pub symbol: String,
    /// Quantity; negative for shorts on most accounts.
    pub qty: String,
    /// Side (`long`/`short`).
    #[serde(default)]
    pub side: Option<String>,
    /// Average entry price.
    #[serde(default)]
    pub avg_entry_price: Option<String>,
}

impl AlpacaPositionResponse {
    /// Convert to the port's signed position.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric field does not parse.
    pub fn to_broker_position(&self) -> Result<BrokerPosition, AlpacaError> {
        let qty = parse_decimal(Some(&self.qty), "qty")?.unwrap_or(Decimal::ZERO);
        let quantity = match self.side.as_deref() {
            Some("short") => -qty.abs(),
            _ => qty,
        };
        Ok(BrokerPosition {
            instrument: Instrument::new(&self.symbol),
            quantity,
            avg_entry_price: parse_decimal(self.avg_entry_price.as_deref(), "avg_entry_price")?,
        })
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error response from the Alpaca API.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaErrorResponse {
    /// Error code; numeric on most endpoints.
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    /// Error message.
    #[serde(default)]
    pub message: String,
}

impl AlpacaErrorResponse {
    /// Code as text.
    #[must_use]
    pub fn code_string(&self) -> Option<String> {
        self.code.as_ref().map(|code| match code {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

// ============================================================================
// Trade Updates Stream
// ============================================================================

/// Authentication request for the trade updates stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamAuthRequest<'a> {
    /// Always `auth`.
    pub action: &'static str,
    /// API key.
    pub key: &'a str,
    /// API secret.
    pub secret: &'a str,
}

/// Listen request for the trade updates stream.
#[derive(Debug, Clone, Serialize)]
pub struct ListenRequest {
    /// Always `listen`.
    pub action: &'static str,
    /// Streams to listen to.
    pub data: ListenData,
}

/// Streams named in a listen request.
#[derive(Debug, Clone, Serialize)]
pub struct ListenData {
    /// Stream names.
    pub streams: Vec<&'static str>,
}

impl ListenRequest {
    /// Listen to `trade_updates`.
    #[must_use]
    pub fn trade_updates() -> Self {
        Self {
            action: "listen",
            data: ListenData {
                streams: vec!["trade_updates"],
            },
        }
    }
}

/// Any message on the trade updates stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "stream", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Answer to the auth request.
    Authorization {
        /// `authorized` or `unauthorized`.
        status: String,
    },
    /// Answer to the listen request.
    Listening {
        /// Streams now active.
        streams: Vec<String>,
    },
    /// Order event.
    TradeUpdates(TradeUpdateData),
}

/// Payload of a `trade_updates` message.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeUpdateData {
    /// Event (`new`, `fill`, `partial_fill`, `canceled`, ...).
    pub event: String,
    /// Order after the event.
    pub order: AlpacaOrderResponse,
    /// Event time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TradeUpdateData {
    /// Convert to the port's order update.
    ///
    /// # Errors
    ///
    /// Returns an error if the order payload does not parse.
    pub fn to_order_update(&self) -> Result<OrderUpdate, AlpacaError> {
        let order = self.order.to_broker_order()?;
        let ts = self
            .timestamp
            .or(self.order.updated_at)
            .unwrap_or_else(Utc::now);
        Ok(OrderUpdate::from_order(&order, ts))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_decimal(value: Option<&str>, field: &str) -> Result<Option<Decimal>, AlpacaError> {
    match value {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<Decimal>()
            .map(Some)
            .map_err(|e| AlpacaError::JsonParse(format!("{field}={raw}: {e}"))),
    }
}

/// Map an Alpaca order status onto the port's status.
pub(crate) fn parse_order_status(status: &str) -> BrokerOrderStatus {
    match status.to_lowercase().as_str() {
        "accepted" | "accepted_for_bidding" | "replaced" | "pending_replace" | "calculated"
        | "stopped" | "suspended" => BrokerOrderStatus::Accepted,
        "partially_filled" => BrokerOrderStatus::PartiallyFilled,
        "filled" => BrokerOrderStatus::Filled,
        "pending_cancel" => BrokerOrderStatus::PendingCancel,
        "canceled" => BrokerOrderStatus::Cancelled,
        "done_for_day" | "expired" => BrokerOrderStatus::Expired,
        "rejected" => BrokerOrderStatus::Rejected,
        // new, pending_new and anything unknown
        _ => BrokerOrderStatus::Pending,
    }
}
