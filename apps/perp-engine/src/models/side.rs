//! Position and order sides.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a position.
///
/// In hedge mode each side is an independent venue position, so the side
/// doubles as the `positionSide` tag carried by every order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    /// Profits when price rises.
    Long,
    /// Profits when price falls.
    Short,
}

impl Side {
    /// Both sides, long first.
    pub const ALL: [Self; 2] = [Self::Long, Self::Short];

    /// Order side that opens or adds to this position.
    #[must_use]
    pub const fn entry_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces or closes this position.
    #[must_use]
    pub const fn exit_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Buy,
        }
    }

    /// `+1` for long, `-1` for short.
    #[must_use]
    pub const fn sign(self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Venue tag for this side.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }

    /// The opposite side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Whether `price` has moved in this side's favour relative to `reference`.
    #[must_use]
    pub fn is_favourable(self, price: Decimal, reference: Decimal) -> bool {
        match self {
            Self::Long => price > reference,
            Self::Short => price < reference,
        }
    }

    /// Whether `candidate` is the better of two prices for this side
    /// (higher for long, lower for short).
    #[must_use]
    pub fn better_price(self, current: Decimal, candidate: Decimal) -> Decimal {
        match self {
            Self::Long => current.max(candidate),
            Self::Short => current.min(candidate),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order direction on the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// Venue tag for this order side.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_sides_for_long() {
        assert_eq!(Side::Long.entry_order_side(), OrderSide::Buy);
        assert_eq!(Side::Long.exit_order_side(), OrderSide::Sell);
    }

    #[test]
    fn test_order_sides_for_short() {
        assert_eq!(Side::Short.entry_order_side(), OrderSide::Sell);
        assert_eq!(Side::Short.exit_order_side(), OrderSide::Buy);
    }

    #[test]
    fn test_favourable_moves() {
        assert!(Side::Long.is_favourable(dec!(101), dec!(100)));
        assert!(!Side::Long.is_favourable(dec!(99), dec!(100)));
        assert!(Side::Short.is_favourable(dec!(99), dec!(100)));
    }

    #[test]
    fn test_better_price() {
        assert_eq!(Side::Long.better_price(dec!(100), dec!(105)), dec!(105));
        assert_eq!(Side::Short.better_price(dec!(100), dec!(105)), dec!(100));
    }

    #[test]
    fn test_side_serializes_as_venue_tag() {
        let json = serde_json::to_string(&Side::Short).unwrap();
        assert_eq!(json, "\"SHORT\"");
        assert_eq!(Side::Long.to_string(), "LONG");
    }
}
