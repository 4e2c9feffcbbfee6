//! Signal translation rules.
//!
//! Turns a normalized alert into the intents (and cancels) it implies. Two
//! rule sets exist:
//! - `direct`: every `open` alert becomes exactly one entry intent
//! - `position_aware`: one position per instrument, with close, reversal,
//!   same-side refusal and no re-entry right after a take-profit

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::alert::{AlertAction, AlertSignal};
use crate::domain::order_intent::{
    IntentDraft, IntentRole, IntentState, OrderIntent, OrderSide, OrderType,
};
use crate::domain::reconciliation::PositionSnapshot;
use crate::domain::shared::{Instrument, IntentId};

/// Which rule set translates alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSet {
    /// One alert, one entry.
    #[default]
    Direct,
    /// Position-aware journal rules.
    PositionAware,
}

/// Build the translator for a rule set.
#[must_use]
pub fn translator_for(rules: RuleSet) -> Arc<dyn SignalTranslator> {
    match rules {
        RuleSet::Direct => Arc::new(DirectTranslator),
        RuleSet::PositionAware => Arc::new(PositionAwareTranslator),
    }
}

/// An alert the rules refuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleRejection {
    /// A field the action needs is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),
    /// The rule set has no notion of closing.
    #[error("close alerts are not supported by the {0} rules")]
    CloseUnsupported(&'static str),
    /// Nothing to close.
    #[error("no open position in {0}")]
    NoPosition(Instrument),
    /// Already positioned on this side.
    #[error("{side} signal matches the open position in {instrument}")]
    SameSide {
        /// Instrument.
        instrument: Instrument,
        /// Requested side.
        side: OrderSide,
    },
    /// The last trade on this side just hit its profit target.
    #[error("re-entry {side} in {instrument} blocked after take-profit")]
    ReentryBlocked {
        /// Instrument.
        instrument: Instrument,
        /// Requested side.
        side: OrderSide,
    },
}

/// What the translator sees of the instrument.
#[derive(Debug, Clone, Default)]
pub struct TranslationContext {
    /// Signed net position: positive long, negative short.
    pub position: Decimal,
    /// Every intent for the instrument, oldest first.
    pub intents: Vec<OrderIntent>,
}

impl TranslationContext {
    /// Context from the intent journal and the last brokerage position.
    ///
    /// The brokerage position wins unless a fill was journaled after it was
    /// taken; then the journal is the fresher view.
    #[must_use]
    pub fn new(intents: Vec<OrderIntent>, broker_position: Option<&PositionSnapshot>) -> Self {
        let position = match broker_position {
            Some(snapshot) if !filled_since(&intents, snapshot.as_of) => snapshot.quantity,
            _ => journal_position(&intents),
        };
        Self { position, intents }
    }

    fn position_side(&self) -> Option<OrderSide> {
        if self.position > Decimal::ZERO {
            Some(OrderSide::Buy)
        } else if self.position < Decimal::ZERO {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }

    fn live_entry(&self) -> Option<&OrderIntent> {
        self.intents
            .iter()
            .rev()
            .find(|i| i.role() == IntentRole::Entry && !i.is_terminal())
    }

    /// Live intents a close or reversal must cancel.
    fn live_to_cancel(&self) -> Vec<IntentId> {
        self.intents
            .iter()
            .filter(|i| !i.is_terminal() && i.role() != IntentRole::Exit)
            .map(|i| i.intent_id().clone())
            .collect()
    }

    fn last_fill(&self) -> Option<&OrderIntent> {
        self.intents
            .iter()
            .filter(|i| i.state() == IntentState::Filled)
            .max_by_key(|i| i.updated_at())
    }
}

fn journal_position(intents: &[OrderIntent]) -> Decimal {
    intents
        .iter()
        .map(|i| match i.side() {
            OrderSide::Buy => i.filled_quantity(),
            OrderSide::Sell => -i.filled_quantity(),
        })
        .sum()
}

fn filled_since(intents: &[OrderIntent], as_of: DateTime<Utc>) -> bool {
    intents
        .iter()
        .any(|i| i.filled_quantity() > Decimal::ZERO && i.updated_at() > as_of)
}

/// Intents to create and intents to cancel for one alert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Translation {
    /// New intents, in submission order.
    pub drafts: Vec<IntentDraft>,
    /// Live intents to cancel first.
    pub cancels: Vec<IntentId>,
}

/// Pluggable alert-to-intent rules.
pub trait SignalTranslator: Send + Sync {
    /// Rule set name for logs.
    fn name(&self) -> &'static str;

    /// Translate one alert.
    ///
    /// # Errors
    ///
    /// Returns the rule that refused the alert.
    fn translate(
        &self,
        alert: &AlertSignal,
        context: &TranslationContext,
    ) -> Result<Translation, RuleRejection>;

    /// Whether [`Self::translate`] reads [`TranslationContext`].
    fn needs_context(&self) -> bool {
        false
    }
}

fn entry_draft(alert: &AlertSignal) -> Result<IntentDraft, RuleRejection> {
    let side = alert.side.ok_or(RuleRejection::MissingField("side"))?;
    let quantity = alert.quantity.ok_or(RuleRejection::MissingField("quantity"))?;
    Ok(IntentDraft {
        source_signal: alert.source_signal_id.clone(),
        instrument: alert.instrument.clone(),
        side,
        quantity,
        order_type: alert.order_type,
        limit_price: alert.limit_price,
        stop_price: alert.stop_price,
        strategy_tag: alert.strategy_tag.clone(),
        role: IntentRole::Entry,
        parent_intent_id: None,
        take_profit: alert.take_profit,
        stop_loss: alert.stop_loss,
    })
}

fn exit_draft(alert: &AlertSignal, position: Decimal) -> IntentDraft {
    let side = if position > Decimal::ZERO {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    };
    IntentDraft {
        source_signal: format!("{}:exit", alert.source_signal_id),
        instrument: alert.instrument.clone(),
        side,
        quantity: position.abs(),
        order_type: OrderType::Market,
        limit_price: None,
        stop_price: None,
        strategy_tag: alert.strategy_tag.clone(),
        role: IntentRole::Exit,
        parent_intent_id: None,
        take_profit: None,
        stop_loss: None,
    }
}

/// One alert, one entry intent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectTranslator;

impl SignalTranslator for DirectTranslator {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn translate(
        &self,
        alert: &AlertSignal,
        _context: &TranslationContext,
    ) -> Result<Translation, RuleRejection> {
        match alert.action {
            AlertAction::Open => Ok(Translation {
                drafts: vec![entry_draft(alert)?],
                cancels: Vec::new(),
            }),
            AlertAction::Close => Err(RuleRejection::CloseUnsupported(self.name())),
        }
    }
}

/// One position per instrument.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionAwareTranslator;

impl PositionAwareTranslator {
    fn open(
        alert: &AlertSignal,
        context: &TranslationContext,
    ) -> Result<Translation, RuleRejection> {
        let entry = entry_draft(alert)?;
        let side = entry.side;

        if context.position.is_zero() {
            if let Some(last) = context.last_fill() {
                if last.role() == IntentRole::TakeProfit && last.side() == side.opposite() {
                    return Err(RuleRejection::ReentryBlocked {
                        instrument: alert.instrument.clone(),
                        side,
                    });
                }
            }
        }

        let active = context
            .position_side()
            .or_else(|| context.live_entry().map(OrderIntent::side));
        match active {
            Some(active) if active == side => Err(RuleRejection::SameSide {
                instrument: alert.instrument.clone(),
                side,
            }),
            Some(_) => {
                let mut drafts = Vec::with_capacity(2);
                if !context.position.is_zero() {
                    drafts.push(exit_draft(alert, context.position));
                }
                drafts.push(entry);
                Ok(Translation {
                    drafts,
                    cancels: context.live_to_cancel(),
                })
            }
            None => Ok(Translation {
                drafts: vec![entry],
                cancels: Vec::new(),
            }),
        }
    }

    fn close(
        alert: &AlertSignal,
        context: &TranslationContext,
    ) -> Result<Translation, RuleRejection> {
        let cancels = context.live_to_cancel();
        if context.position.is_zero() && cancels.is_empty() {
            return Err(RuleRejection::NoPosition(alert.instrument.clone()));
        }
        let drafts = if context.position.is_zero() {
            Vec::new()
        } else {
            vec![exit_draft(alert, context.position)]
        };
        Ok(Translation { drafts, cancels })
    }
}

impl SignalTranslator for PositionAwareTranslator {
    fn name(&self) -> &'static str {
        "position_aware"
    }

    fn translate(
        &self,
        alert: &AlertSignal,
        context: &TranslationContext,
    ) -> Result<Translation, RuleRejection> {
        match alert.action {
            AlertAction::Open => Self::open(alert, context),
            AlertAction::Close => Self::close(alert, context),
        }
    }

    fn needs_context(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::BrokerOrderId;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn alert(action: AlertAction, side: Option<OrderSide>) -> AlertSignal {
        AlertSignal {
            source_signal_id: "sig-1".into(),
            action,
            instrument: Instrument::new("EUR/USD"),
            side,
            quantity: Some(dec!(1000)),
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            take_profit: None,
            stop_loss: None,
            strategy_tag: "t".into(),
            received_at: Utc::now(),
        }
    }

    fn filled(side: OrderSide, role: IntentRole) -> OrderIntent {
        let mut intent = OrderIntent::new(IntentDraft {
            source_signal: format!("prior-{role}"),
            instrument: Instrument::new("EURUSD"),
            side,
            quantity: dec!(1000),
            order_type: if role == IntentRole::TakeProfit {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            limit_price: (role == IntentRole::TakeProfit).then_some(dec!(1.2)),
            stop_price: None,
            strategy_tag: "t".into(),
            role,
            parent_intent_id: None,
            take_profit: None,
            stop_loss: None,
        })
        .unwrap();
        intent.begin_submission().unwrap();
        intent
            .acknowledge(BrokerOrderId::new(format!("b-{role}")), "ack")
            .unwrap();
        intent.apply_fill(dec!(1000), Some(dec!(1.1))).unwrap();
        intent
    }

    #[test]
    fn test_direct_open_is_one_entry() {
        let ctx = TranslationContext::default();
        let t = DirectTranslator
            .translate(&alert(AlertAction::Open, Some(OrderSide::Buy)), &ctx)
            .unwrap();
        assert_eq!(t.drafts.len(), 1);
        assert_eq!(t.drafts[0].role, IntentRole::Entry);
        assert_eq!(t.drafts[0].instrument.as_str(), "EURUSD");
    }

    #[test]
    fn test_direct_refuses_close_and_missing_side() {
        let ctx = TranslationContext::default();
        assert!(matches!(
            DirectTranslator.translate(&alert(AlertAction::Close, None), &ctx),
            Err(RuleRejection::CloseUnsupported(_))
        ));
        assert_eq!(
            DirectTranslator.translate(&alert(AlertAction::Open, None), &ctx),
            Err(RuleRejection::MissingField("side"))
        );
    }

    #[test]
    fn test_same_side_is_refused() {
        let ctx = TranslationContext::new(vec![filled(OrderSide::Buy, IntentRole::Entry)], None);
        assert!(matches!(
            PositionAwareTranslator
                .translate(&alert(AlertAction::Open, Some(OrderSide::Buy)), &ctx),
            Err(RuleRejection::SameSide { .. })
        ));
    }

    #[test]
    fn test_opposite_side_reverses() {
        let ctx = TranslationContext::new(vec![filled(OrderSide::Buy, IntentRole::Entry)], None);
        let t = PositionAwareTranslator
            .translate(&alert(AlertAction::Open, Some(OrderSide::Sell)), &ctx)
            .unwrap();
        assert_eq!(t.drafts.len(), 2);
        assert_eq!(t.drafts[0].role, IntentRole::Exit);
        assert_eq!(t.drafts[0].side, OrderSide::Sell);
        assert_eq!(t.drafts[0].quantity, dec!(1000));
        assert_eq!(t.drafts[1].role, IntentRole::Entry);
    }

    fn snapshot(quantity: Decimal, as_of: DateTime<Utc>) -> PositionSnapshot {
        PositionSnapshot {
            instrument: Instrument::new("EURUSD"),
            quantity,
            avg_entry_price: None,
            as_of,
        }
    }

    #[test]
    fn test_close_flattens_broker_position() {
        let ctx = TranslationContext::new(Vec::new(), Some(&snapshot(dec!(-250), Utc::now())));
        let t = PositionAwareTranslator
            .translate(&alert(AlertAction::Close, None), &ctx)
            .unwrap();
        assert_eq!(t.drafts.len(), 1);
        assert_eq!(t.drafts[0].side, OrderSide::Buy);
        assert_eq!(t.drafts[0].quantity, dec!(250));
    }

    #[test]
    fn test_fill_after_snapshot_prefers_journal() {
        let taken = Utc::now() - chrono::TimeDelta::seconds(30);
        let entry = filled(OrderSide::Buy, IntentRole::Entry);
        let take_profit = filled(OrderSide::Sell, IntentRole::TakeProfit);

        // Snapshot still shows the long the take profit already closed
        let ctx = TranslationContext::new(
            vec![entry.clone(), take_profit],
            Some(&snapshot(dec!(1000), taken)),
        );
        assert!(ctx.position.is_zero());
        assert!(matches!(
            PositionAwareTranslator.translate(&alert(AlertAction::Close, None), &ctx),
            Err(RuleRejection::NoPosition(_))
        ));

        // Nothing filled since the snapshot: the broker view stands
        let ctx = TranslationContext::new(vec![entry], Some(&snapshot(dec!(400), Utc::now())));
        assert_eq!(ctx.position, dec!(400));
    }

    #[test]
    fn test_close_without_position_is_refused() {
        assert!(matches!(
            PositionAwareTranslator
                .translate(&alert(AlertAction::Close, None), &TranslationContext::default()),
            Err(RuleRejection::NoPosition(_))
        ));
    }

    #[test]
    fn test_reentry_after_take_profit_is_blocked() {
        let ctx = TranslationContext::new(
            vec![
                filled(OrderSide::Buy, IntentRole::Entry),
                filled(OrderSide::Sell, IntentRole::TakeProfit),
            ],
            None,
        );
        assert!(ctx.position.is_zero());
        assert!(matches!(
            PositionAwareTranslator
                .translate(&alert(AlertAction::Open, Some(OrderSide::Buy)), &ctx),
            Err(RuleRejection::ReentryBlocked { .. })
        ));
        // The other side is still allowed
        assert!(
            PositionAwareTranslator
                .translate(&alert(AlertAction::Open, Some(OrderSide::Sell)), &ctx)
                .is_ok()
        );
    }
}
