//! Take-Profit Ladder Property Tests
//!
//! Slices taken across the ladder never exceed the opened quantity, and the
//! final level flattens whatever remains.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use perp_engine::execution::Precision;
use perp_engine::models::{Position, PositionStatus, Side, TradeMode};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn position(quantity: Decimal, splits: Vec<Decimal>) -> Position {
    let take_profits = (1..=splits.len())
        .map(|i| Decimal::from(100 + i as i64))
        .collect();
    Position {
        id: "prop".to_string(),
        side: Side::Long,
        quantity,
        original_quantity: quantity,
        entry_price: Decimal::from(100),
        stop_price: Decimal::from(98),
        initial_stop_price: Decimal::from(98),
        stop_order_id: "1".to_string(),
        take_profits,
        tp_splits: splits,
        tp_level_index: 0,
        breakeven_active: false,
        best_price: Decimal::from(100),
        averaged: false,
        mode: TradeMode::Trend,
        status: PositionStatus::Open,
        realized_pnl: Decimal::ZERO,
        leverage: 5,
        opened_at: Utc::now(),
    }
}

/// Splits in thousandths that sum to exactly one.
fn splits_strategy() -> impl Strategy<Value = Vec<Decimal>> {
    prop::collection::vec(1u32..1000, 1..5).prop_map(|weights| {
        let total: u32 = weights.iter().sum();
        let mut splits: Vec<Decimal> = weights
            .iter()
            .map(|w| (Decimal::from(*w) / Decimal::from(total)).round_dp(3))
            .collect();
        let assigned: Decimal = splits[..splits.len() - 1].iter().sum();
        if let Some(last) = splits.last_mut() {
            *last = Decimal::ONE - assigned;
        }
        splits
    })
}

proptest! {
    #[test]
    fn test_ladder_never_overcloses(
        lots in 1u32..100_000,
        splits in splits_strategy(),
    ) {
        let precision = Precision::default();
        let quantity = Decimal::from(lots) * precision.quantity_step;
        let mut position = position(quantity, splits);
        let mut closed = Decimal::ZERO;

        while position.next_target().is_some() && position.quantity > Decimal::ZERO {
            let slice = precision.floor_quantity(position.tp_slice_quantity());
            prop_assert!(slice >= Decimal::ZERO);
            prop_assert!(slice <= position.quantity);
            closed += slice;
            position.quantity -= slice;
            position.tp_level_index += 1;
        }

        prop_assert_eq!(closed, quantity);
        prop_assert_eq!(position.quantity, Decimal::ZERO);
    }

    #[test]
    fn test_breakeven_stop_favours_position(
        entry in 1u32..100_000,
        offset_bps in 0u32..100,
    ) {
        let mut position = position(Decimal::ONE, vec![Decimal::ONE]);
        position.entry_price = Decimal::from(entry);
        let offset = Decimal::from(offset_bps) / Decimal::from(10_000);

        prop_assert!(position.breakeven_price(offset) >= position.entry_price);

        position.side = Side::Short;
        prop_assert!(position.breakeven_price(offset) <= position.entry_price);
    }
}
