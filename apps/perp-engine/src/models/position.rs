//! Durable position state.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Side, TradeMode};

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    /// Full quantity still open.
    Open,
    /// At least one take-profit level has been closed.
    Partial,
    /// Quantity reached zero.
    Closed,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A locally tracked position.
///
/// While `status != Closed` the position owns a resident stop order on the
/// venue identified by `stop_order_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Local identifier.
    pub id: String,
    /// Direction.
    pub side: Side,
    /// Remaining quantity.
    pub quantity: Decimal,
    /// Quantity at open (grows only when averaging down).
    pub original_quantity: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Current protective stop price.
    pub stop_price: Decimal,
    /// Stop price at open, used for averaging distance.
    pub initial_stop_price: Decimal,
    /// Venue id of the resident stop order.
    pub stop_order_id: String,
    /// Take-profit targets, nearest first.
    pub take_profits: Vec<Decimal>,
    /// Fraction of `original_quantity` closed at each target.
    pub tp_splits: Vec<Decimal>,
    /// Index of the next target to hit. Never decreases.
    pub tp_level_index: usize,
    /// Set once the stop has been moved to breakeven. Never reverts.
    pub breakeven_active: bool,
    /// Best price seen since open (highest for long, lowest for short).
    pub best_price: Decimal,
    /// Set once the one-shot averaging has been used.
    pub averaged: bool,
    /// Originating mode.
    pub mode: TradeMode,
    /// Lifecycle status.
    pub status: PositionStatus,
    /// P&L realized by partial closes so far.
    pub realized_pnl: Decimal,
    /// Leverage at open.
    pub leverage: u32,
    /// Open time.
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Whether the position still has quantity on the venue.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status != PositionStatus::Closed
    }

    /// Unrealized P&L of the remaining quantity at `price`.
    #[must_use]
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.pnl_for(self.quantity, price)
    }

    /// P&L of closing `quantity` at `exit_price`.
    #[must_use]
    pub fn pnl_for(&self, quantity: Decimal, exit_price: Decimal) -> Decimal {
        (exit_price - self.entry_price) * quantity * self.side.sign()
    }

    /// Price move relative to entry, signed so that profit is positive.
    #[must_use]
    pub fn pnl_ratio(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry_price) / self.entry_price * self.side.sign()
    }

    /// The next take-profit target, if any remain.
    #[must_use]
    pub fn next_target(&self) -> Option<Decimal> {
        self.take_profits.get(self.tp_level_index).copied()
    }

    /// Whether `price` reaches `target` for this side.
    #[must_use]
    pub fn target_reached(&self, target: Decimal, price: Decimal) -> bool {
        match self.side {
            Side::Long => price >= target,
            Side::Short => price <= target,
        }
    }

    /// Whether `price` has crossed the stop.
    #[must_use]
    pub fn stop_breached(&self, price: Decimal) -> bool {
        match self.side {
            Side::Long => price <= self.stop_price,
            Side::Short => price >= self.stop_price,
        }
    }

    /// Whether `candidate` would tighten the stop (never loosen it).
    #[must_use]
    pub fn improves_stop(&self, candidate: Decimal) -> bool {
        match self.side {
            Side::Long => candidate > self.stop_price,
            Side::Short => candidate < self.stop_price,
        }
    }

    /// Quantity to close at the current take-profit level.
    ///
    /// The final level closes whatever remains.
    #[must_use]
    pub fn tp_slice_quantity(&self) -> Decimal {
        let is_last = self.tp_level_index + 1 >= self.take_profits.len();
        if is_last {
            return self.quantity;
        }
        let split = self
            .tp_splits
            .get(self.tp_level_index)
            .copied()
            .unwrap_or(Decimal::ZERO);
        (split * self.original_quantity).min(self.quantity)
    }

    /// Breakeven stop price: entry shifted by `offset` in the profitable direction.
    #[must_use]
    pub fn breakeven_price(&self, offset: Decimal) -> Decimal {
        self.entry_price * (Decimal::ONE + self.side.sign() * offset)
    }

    /// Absolute distance between entry and the initial stop.
    #[must_use]
    pub fn initial_risk(&self) -> Decimal {
        (self.entry_price - self.initial_stop_price).abs()
    }
}
