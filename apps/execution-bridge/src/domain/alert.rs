//! Normalized inbound alert.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::order_intent::{OrderSide, OrderType};
use crate::domain::shared::Instrument;

/// What the alert asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertAction {
    /// Open (or reverse into) a position.
    #[default]
    Open,
    /// Flatten the position.
    Close,
}

impl fmt::Display for AlertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Close => f.write_str("close"),
        }
    }
}

/// Alert after transport decoding, before any trading rule applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSignal {
    /// Originating alert id (or payload fingerprint).
    pub source_signal_id: String,
    /// Open or close.
    pub action: AlertAction,
    /// Instrument.
    pub instrument: Instrument,
    /// Side; required for `open`.
    pub side: Option<OrderSide>,
    /// Quantity; required for `open`.
    pub quantity: Option<Decimal>,
    /// Order type.
    pub order_type: OrderType,
    /// Limit price.
    pub limit_price: Option<Decimal>,
    /// Stop price.
    pub stop_price: Option<Decimal>,
    /// Bracket profit target.
    pub take_profit: Option<Decimal>,
    /// Bracket protective stop.
    pub stop_loss: Option<Decimal>,
    /// Strategy that produced the alert.
    pub strategy_tag: String,
    /// When the bridge received it.
    pub received_at: DateTime<Utc>,
}
