//! Sized order plans.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Side, TradeMode};

/// How the protective stop of a plan is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum StopSpec {
    /// Fractional distance from the actual fill price.
    Distance(Decimal),
    /// Absolute stop price from a structural level.
    Reference(Decimal),
}

impl StopSpec {
    /// Resolve the stop price for a fill at `fill_price`.
    #[must_use]
    pub fn resolve(self, side: Side, fill_price: Decimal) -> Decimal {
        match self {
            Self::Distance(fraction) => fill_price * (Decimal::ONE - side.sign() * fraction),
            Self::Reference(price) => price,
        }
    }
}

/// How a plan enters the market.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "price")]
pub enum EntryOrder {
    /// Market order, filled immediately.
    #[default]
    Market,
    /// Limit order resting at the given price until filled or timed out.
    Limit(Decimal),
}

/// A risk-sized plan produced by the translator and consumed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlan {
    /// Plan identifier, reused as the client order id prefix.
    pub id: String,
    /// Position direction.
    pub side: Side,
    /// Quantity to open (before precision rounding).
    pub quantity: Decimal,
    /// Price the plan was sized against.
    pub reference_price: Decimal,
    /// Entry order type.
    #[serde(default)]
    pub entry: EntryOrder,
    /// Stop derivation.
    pub stop: StopSpec,
    /// Take-profit targets, nearest first.
    pub take_profits: Vec<Decimal>,
    /// Fraction of the original quantity closed at each target.
    pub tp_splits: Vec<Decimal>,
    /// Originating mode.
    pub mode: TradeMode,
    /// Leverage applied when sizing.
    pub leverage: u32,
}

impl OrderPlan {
    /// Stop price the plan would get if filled exactly at the reference price.
    #[must_use]
    pub fn indicative_stop(&self) -> Decimal {
        self.stop.resolve(self.side, self.reference_price)
    }

    /// Take-profit targets shifted so their distances hold relative to `fill_price`.
    #[must_use]
    pub fn anchored_targets(&self, fill_price: Decimal) -> Vec<Decimal> {
        if self.reference_price.is_zero() {
            return self.take_profits.clone();
        }
        self.take_profits
            .iter()
            .map(|target| *target * fill_price / self.reference_price)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn plan(stop: StopSpec) -> OrderPlan {
        OrderPlan {
            id: "plan-1".to_string(),
            side: Side::Long,
            quantity: dec!(5),
            reference_price: dec!(100),
            entry: EntryOrder::Market,
            stop,
            take_profits: vec![dec!(101.5), dec!(103), dec!(106)],
            tp_splits: vec![dec!(0.3), dec!(0.3), dec!(0.4)],
            mode: TradeMode::Trend,
            leverage: 5,
        }
    }

    #[test]
    fn test_distance_stop_resolves_from_fill() {
        assert_eq!(StopSpec::Distance(dec!(0.02)).resolve(Side::Long, dec!(100)), dec!(98));
        assert_eq!(StopSpec::Distance(dec!(0.02)).resolve(Side::Short, dec!(100)), dec!(102));
    }

    #[test]
    fn test_reference_stop_ignores_fill() {
        assert_eq!(StopSpec::Reference(dec!(97.5)).resolve(Side::Long, dec!(101)), dec!(97.5));
    }

    #[test]
    fn test_targets_follow_fill_price() {
        let targets = plan(StopSpec::Distance(dec!(0.02))).anchored_targets(dec!(200));
        assert_eq!(targets, vec![dec!(203), dec!(206), dec!(212)]);
    }

    #[test]
    fn test_entry_defaults_to_market() {
        let json = r#"{"id":"p","side":"LONG","quantity":"1","reference_price":"100",
            "stop":{"kind":"distance","value":"0.02"},"take_profits":[],"tp_splits":[],
            "mode":"TREND","leverage":5}"#;
        let plan: OrderPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.entry, EntryOrder::Market);
    }

    #[test]
    fn test_indicative_stop() {
        assert_eq!(plan(StopSpec::Distance(dec!(0.02))).indicative_stop(), dec!(98));
    }
}
