//! Bracket children of a filled entry.
//!
//! An entry carrying take-profit and/or stop-loss levels spawns one closing
//! intent per level once it fills. Children are derived deterministically
//! from the parent so that re-deriving them yields the same idempotency keys.

use crate::domain::order_intent::{IntentDraft, IntentRole, OrderIntent, OrderType};

/// Child drafts for a filled bracket entry. Empty for anything else.
#[must_use]
pub fn bracket_children(parent: &OrderIntent) -> Vec<IntentDraft> {
    if parent.role() != IntentRole::Entry || parent.filled_quantity().is_zero() {
        return Vec::new();
    }

    let child = |role: IntentRole, order_type: OrderType| IntentDraft {
        source_signal: format!("{}:{}", parent.idempotency_key(), role),
        instrument: parent.instrument().clone(),
        side: parent.side().opposite(),
        quantity: parent.filled_quantity(),
        order_type,
        limit_price: None,
        stop_price: None,
        strategy_tag: parent.strategy_tag().to_string(),
        role,
        parent_intent_id: Some(parent.intent_id().clone()),
        take_profit: None,
        stop_loss: None,
    };

    let mut children = Vec::with_capacity(2);
    if let Some(target) = parent.take_profit() {
        let mut draft = child(IntentRole::TakeProfit, OrderType::Limit);
        draft.limit_price = Some(target);
        children.push(draft);
    }
    if let Some(stop) = parent.stop_loss() {
        let mut draft = child(IntentRole::StopLoss, OrderType::Stop);
        draft.stop_price = Some(stop);
        children.push(draft);
    }
    children
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_intent::{OrderSide, derive_idempotency_key};
    use crate::domain::shared::{BrokerOrderId, Instrument};
    use rust_decimal_macros::dec;

    fn filled_entry(tp: bool, sl: bool) -> OrderIntent {
        let mut intent = OrderIntent::new(IntentDraft {
            source_signal: "alert-7".into(),
            instrument: Instrument::new("NQ"),
            side: OrderSide::Buy,
            quantity: dec!(2),
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            strategy_tag: "breakout".into(),
            role: IntentRole::Entry,
            parent_intent_id: None,
            take_profit: tp.then_some(dec!(110)),
            stop_loss: sl.then_some(dec!(95)),
        })
        .unwrap();
        intent.begin_submission().unwrap();
        intent.acknowledge(BrokerOrderId::new("b"), "ack").unwrap();
        intent.apply_fill(dec!(2), Some(dec!(100))).unwrap();
        intent
    }

    #[test]
    fn test_children_close_the_filled_quantity() {
        let parent = filled_entry(true, true);
        let children = bracket_children(&parent);
        assert_eq!(children.len(), 2);

        let tp = &children[0];
        assert_eq!(tp.role, IntentRole::TakeProfit);
        assert_eq!(tp.side, OrderSide::Sell);
        assert_eq!(tp.order_type, OrderType::Limit);
        assert_eq!(tp.limit_price, Some(dec!(110)));
        assert_eq!(tp.quantity, dec!(2));

        let sl = &children[1];
        assert_eq!(sl.role, IntentRole::StopLoss);
        assert_eq!(sl.order_type, OrderType::Stop);
        assert_eq!(sl.stop_price, Some(dec!(95)));
        assert_eq!(sl.parent_intent_id.as_ref(), Some(parent.intent_id()));
    }

    #[test]
    fn test_children_are_deterministic() {
        let parent = filled_entry(true, false);
        let first = bracket_children(&parent);
        let second = bracket_children(&parent);
        assert_eq!(first.len(), 1);
        assert_eq!(
            derive_idempotency_key(&first[0]),
            derive_idempotency_key(&second[0])
        );
    }

    #[test]
    fn test_no_levels_no_children() {
        assert!(bracket_children(&filled_entry(false, false)).is_empty());
    }
}
