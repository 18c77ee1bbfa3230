//! Trade signals handed to the translator.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Side, TradeMode};

/// Where a signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalOrigin {
    /// Produced by an automated strategy.
    Strategy,
    /// Requested by an operator over the command channel.
    Manual,
}

/// An abstract request to open a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Desired position direction.
    pub side: Side,
    /// Mode whose settings size and protect the position.
    pub mode: TradeMode,
    /// Reference price at signal time.
    pub price: Decimal,
    /// Structural invalidation level (swing low/high, gap edge).
    #[serde(default)]
    pub structural_stop: Option<Decimal>,
    /// Rest the entry as a limit order at this price instead of taking the market.
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Signal origin.
    pub origin: SignalOrigin,
}

impl Signal {
    /// Create a strategy signal without a structural stop.
    #[must_use]
    pub const fn new(side: Side, mode: TradeMode, price: Decimal) -> Self {
        Self {
            side,
            mode,
            price,
            structural_stop: None,
            limit_price: None,
            origin: SignalOrigin::Strategy,
        }
    }

    /// Create an operator signal in manual mode.
    #[must_use]
    pub const fn manual(side: Side, price: Decimal) -> Self {
        Self {
            side,
            mode: TradeMode::Manual,
            price,
            structural_stop: None,
            limit_price: None,
            origin: SignalOrigin::Manual,
        }
    }

    /// Attach a structural stop reference.
    #[must_use]
    pub const fn with_structural_stop(mut self, level: Decimal) -> Self {
        self.structural_stop = Some(level);
        self
    }

    /// Enter with a limit order at `price`.
    #[must_use]
    pub const fn with_limit_price(mut self, price: Decimal) -> Self {
        self.limit_price = Some(price);
        self
    }

    /// Price the position is expected to open at.
    #[must_use]
    pub fn entry_price(&self) -> Decimal {
        self.limit_price.unwrap_or(self.price)
    }

    /// Whether the signal bypasses slot exclusivity.
    #[must_use]
    pub fn is_manual(&self) -> bool {
        self.origin == SignalOrigin::Manual || self.mode == TradeMode::Manual
    }
}
