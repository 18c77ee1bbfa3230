//! Quantity and price precision.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Instrument precision rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    /// Quantity increment.
    pub quantity_step: Decimal,
    /// Price increment.
    pub tick_size: Decimal,
    /// Smallest accepted quantity.
    pub min_quantity: Decimal,
}

impl Default for Precision {
    fn default() -> Self {
        Self {
            quantity_step: dec!(0.001),
            tick_size: dec!(0.01),
            min_quantity: dec!(0.001),
        }
    }
}

impl Precision {
    /// Create precision rules.
    #[must_use]
    pub const fn new(quantity_step: Decimal, tick_size: Decimal, min_quantity: Decimal) -> Self {
        Self {
            quantity_step,
            tick_size,
            min_quantity,
        }
    }

    /// Round a quantity down to the step. Never rounds up, so sizing never
    /// exceeds the computed risk.
    #[must_use]
    pub fn floor_quantity(&self, quantity: Decimal) -> Decimal {
        floor_to_step(quantity, self.quantity_step)
    }

    /// Round a price to the nearest tick.
    #[must_use]
    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        ((price / self.tick_size).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            * self.tick_size)
            .normalize()
    }

    /// Whether `quantity` is large enough to send.
    #[must_use]
    pub fn is_tradable(&self, quantity: Decimal) -> bool {
        quantity > Decimal::ZERO && quantity >= self.min_quantity
    }

    /// Quantity formatted for the wire.
    #[must_use]
    pub fn format_quantity(&self, quantity: Decimal) -> String {
        format_to_step(self.floor_quantity(quantity), self.quantity_step)
    }

    /// Price formatted for the wire.
    #[must_use]
    pub fn format_price(&self, price: Decimal) -> String {
        format_to_step(self.round_price(price), self.tick_size)
    }
}

fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

fn format_to_step(value: Decimal, step: Decimal) -> String {
    let scale = step.normalize().scale();
    let mut rounded = value.round_dp(scale);
    rounded.rescale(scale);
    rounded.to_string()
}
