//! HTTP request DTOs.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::alert::{AlertAction, AlertSignal};
use crate::domain::order_intent::{IntentState, OrderSide, OrderType, fingerprint_payload};
use crate::domain::shared::Instrument;

/// Strategy tag used when an alert carries none.
pub const DEFAULT_STRATEGY_TAG: &str = "default";

/// Alert webhook body.
///
/// Field names follow common charting-platform alert templates; `side`
/// accepts `buy`/`sell` as well as `long`/`short`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookRequest {
    /// `open` (default) or `close`.
    #[serde(default)]
    pub action: Option<AlertAction>,
    /// Instrument symbol.
    #[serde(alias = "ticker", alias = "instrument")]
    pub symbol: String,
    /// Side; required for `open`.
    #[serde(default)]
    pub side: Option<String>,
    /// Quantity; required for `open`.
    #[serde(default, alias = "qty")]
    pub quantity: Option<Decimal>,
    /// `market` (default), `limit` or `stop`.
    #[serde(default)]
    pub order_type: Option<String>,
    /// Limit price.
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Stop price.
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    /// Bracket profit target.
    #[serde(default, alias = "take_profit")]
    pub tp: Option<Decimal>,
    /// Bracket protective stop.
    #[serde(default, alias = "stop_loss")]
    pub sl: Option<Decimal>,
    /// Strategy tag.
    #[serde(default, alias = "strategy")]
    pub strategy_tag: Option<String>,
    /// Alert id; the body fingerprint is used when absent.
    #[serde(default, alias = "alert_id")]
    pub signal_id: Option<String>,
    /// Shared secret.
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl WebhookRequest {
    /// Normalize into an alert. `raw` is the exact body received.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed field.
    pub fn into_alert(self, raw: &[u8]) -> Result<AlertSignal, String> {
        let side = self
            .side
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<OrderSide>)
            .transpose()
            .map_err(|e| e.to_string())?;
        let order_type = self
            .order_type
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<OrderType>)
            .transpose()
            .map_err(|e| e.to_string())?
            .unwrap_or_default();
        let source_signal_id = self
            .signal_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| fingerprint_payload(raw));

        Ok(AlertSignal {
            source_signal_id,
            action: self.action.unwrap_or_default(),
            instrument: Instrument::new(&self.symbol),
            side,
            quantity: self.quantity,
            order_type,
            limit_price: self.limit_price,
            stop_price: self.stop_price,
            take_profit: self.tp,
            stop_loss: self.sl,
            strategy_tag: self
                .strategy_tag
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_STRATEGY_TAG.to_string()),
            received_at: Utc::now(),
        })
    }
}

/// Query string of `GET /api/v1/intents`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListIntentsQuery {
    /// State filter (`ACKED`, `FILLED`, ...).
    #[serde(default)]
    pub state: Option<String>,
    /// Instrument filter.
    #[serde(default)]
    pub symbol: Option<String>,
}

impl ListIntentsQuery {
    /// Parsed state filter.
    ///
    /// # Errors
    ///
    /// Returns a message when the state is not recognized.
    pub fn state(&self) -> Result<Option<IntentState>, String> {
        self.state
            .as_deref()
            .map(str::parse::<IntentState>)
            .transpose()
            .map_err(|e| e.to_string())
    }
}

/// Optional body of `POST /api/v1/intents/{id}/cancel`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelIntentRequest {
    /// Why the operator cancels.
    #[serde(default)]
    pub reason: Option<String>,
}
