//! Reconciliation value types: brokerage truth and pass reports.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::order_intent::OrderSide;
use crate::domain::shared::{BrokerOrderId, Instrument, IntentId};

/// Brokerage-reported position for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Instrument.
    pub instrument: Instrument,
    /// Signed quantity: positive long, negative short.
    pub quantity: Decimal,
    /// Average entry price.
    pub avg_entry_price: Option<Decimal>,
    /// When the broker was asked.
    pub as_of: DateTime<Utc>,
}

impl PositionSnapshot {
    /// Side of the open position, `None` when flat.
    #[must_use]
    pub fn side(&self) -> Option<OrderSide> {
        if self.quantity > Decimal::ZERO {
            Some(OrderSide::Buy)
        } else if self.quantity < Decimal::ZERO {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }
}

/// What started a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileTrigger {
    /// Process start.
    Startup,
    /// Fixed interval.
    Interval,
    /// Session reconnected.
    Resynced,
    /// Stream updates were dropped on overflow.
    UpdatesDropped,
    /// Operator request.
    Manual,
}

impl ReconcileTrigger {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Interval => "interval",
            Self::Resynced => "resynced",
            Self::UpdatesDropped => "updates_dropped",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ReconcileTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broker order no local intent accounts for.
///
/// Flagged for manual review, never cancelled automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanOrder {
    /// Broker order id.
    pub broker_order_id: BrokerOrderId,
    /// Client order id the broker reports, if any.
    pub client_order_id: Option<String>,
    /// Instrument.
    pub instrument: Instrument,
    /// Side.
    pub side: OrderSide,
    /// Order quantity.
    pub quantity: Decimal,
    /// When the broker created it.
    pub submitted_at: Option<DateTime<Utc>>,
    /// When it was first flagged.
    pub detected_at: DateTime<Utc>,
}

/// How a mismatch was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMismatch {
    /// Intent.
    pub intent_id: IntentId,
    /// Description of the disagreement.
    pub description: String,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// What started the pass.
    pub trigger: ReconcileTrigger,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub finished_at: DateTime<Utc>,
    /// Intents compared with the broker.
    pub checked: usize,
    /// Mismatches flagged and resolved.
    pub resolved: Vec<ResolvedMismatch>,
    /// Indeterminate submissions that adopted a broker order.
    pub adopted: Vec<IntentId>,
    /// Indeterminate submissions sent back for a fresh submission.
    pub resubmitted: Vec<IntentId>,
    /// Orphan broker orders found in this pass.
    pub orphans: Vec<OrphanOrder>,
    /// Writes lost to a concurrent writer; picked up by the next pass.
    pub conflicts: usize,
    /// Errors that did not abort the pass.
    pub errors: Vec<String>,
}

impl ReconciliationReport {
    /// Empty report for a pass starting now.
    #[must_use]
    pub fn begin(trigger: ReconcileTrigger) -> Self {
        let now = Utc::now();
        Self {
            trigger,
            started_at: now,
            finished_at: now,
            checked: 0,
            resolved: Vec::new(),
            adopted: Vec::new(),
            resubmitted: Vec::new(),
            orphans: Vec::new(),
            conflicts: 0,
            errors: Vec::new(),
        }
    }

    /// Whether the pass found nothing to fix.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.resolved.is_empty()
            && self.adopted.is_empty()
            && self.resubmitted.is_empty()
            && self.orphans.is_empty()
            && self.errors.is_empty()
    }
}
