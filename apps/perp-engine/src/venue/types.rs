//! Venue wire-level types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{OrderSide, Side};

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Market order.
    Market,
    /// Good-till-cancelled limit order resting at `price`.
    Limit,
    /// Stop market order, triggered at `stop_price`.
    StopMarket,
    /// Any other order type found resident on the venue.
    Other,
}

impl OrderKind {
    /// Venue tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::StopMarket => "STOP_MARKET",
            Self::Other => "OTHER",
        }
    }
}

/// A new order.
///
/// Every order carries a `position_side`; reduce-only is never used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client order id. Retries of the same request reuse it.
    pub client_order_id: String,
    /// Order direction.
    pub side: OrderSide,
    /// Hedge-mode position the order applies to.
    pub position_side: Side,
    /// Order type.
    pub kind: OrderKind,
    /// Quantity. `None` for close-position stops.
    pub quantity: Option<Decimal>,
    /// Limit price for limit orders.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Trigger price for stop orders.
    pub stop_price: Option<Decimal>,
    /// Close the whole side when triggered.
    pub close_position: bool,
}

impl OrderRequest {
    /// Market order opening or adding to `position_side`.
    #[must_use]
    pub fn open(client_order_id: impl Into<String>, position_side: Side, quantity: Decimal) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            side: position_side.entry_order_side(),
            position_side,
            kind: OrderKind::Market,
            quantity: Some(quantity),
            price: None,
            stop_price: None,
            close_position: false,
        }
    }

    /// Market order reducing `position_side`.
    #[must_use]
    pub fn close(client_order_id: impl Into<String>, position_side: Side, quantity: Decimal) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            side: position_side.exit_order_side(),
            position_side,
            kind: OrderKind::Market,
            quantity: Some(quantity),
            price: None,
            stop_price: None,
            close_position: false,
        }
    }

    /// Limit order opening or adding to `position_side` at `price`.
    #[must_use]
    pub fn limit(
        client_order_id: impl Into<String>,
        position_side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            side: position_side.entry_order_side(),
            position_side,
            kind: OrderKind::Limit,
            quantity: Some(quantity),
            price: Some(price),
            stop_price: None,
            close_position: false,
        }
    }

    /// Protective stop closing all of `position_side` at `stop_price`.
    #[must_use]
    pub fn stop(client_order_id: impl Into<String>, position_side: Side, stop_price: Decimal) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            side: position_side.exit_order_side(),
            position_side,
            kind: OrderKind::StopMarket,
            quantity: None,
            price: None,
            stop_price: Some(stop_price),
            close_position: true,
        }
    }

    /// Whether the order reduces its position side.
    #[must_use]
    pub fn is_reducing(&self) -> bool {
        self.side == self.position_side.exit_order_side()
    }

    /// Price reported in audit rows.
    #[must_use]
    pub fn audit_price(&self) -> Decimal {
        self.stop_price.or(self.price).unwrap_or(Decimal::ZERO)
    }
}

/// Order status on the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted, not filled.
    New,
    /// Partially filled.
    PartiallyFilled,
    /// Fully filled.
    Filled,
    /// Canceled.
    Canceled,
    /// Rejected.
    Rejected,
    /// Expired.
    Expired,
}

impl OrderStatus {
    /// Venue tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Whether the order can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }
}

/// Order acknowledgement or status query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReport {
    /// Venue order id.
    pub order_id: String,
    /// Client order id.
    pub client_order_id: String,
    /// Current status.
    pub status: OrderStatus,
    /// Filled quantity.
    pub executed_quantity: Decimal,
    /// Average fill price (zero when nothing filled).
    pub average_price: Decimal,
}

impl OrderReport {
    /// Whether anything has filled.
    #[must_use]
    pub fn has_fill(&self) -> bool {
        self.executed_quantity > Decimal::ZERO
    }
}

/// A resident (unfilled) order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    /// Venue order id.
    pub order_id: String,
    /// Client order id.
    pub client_order_id: String,
    /// Order type.
    pub kind: OrderKind,
    /// Order direction.
    pub side: OrderSide,
    /// Position side.
    pub position_side: Side,
    /// Trigger price for stops.
    pub stop_price: Option<Decimal>,
    /// Order quantity (zero for close-position stops).
    pub quantity: Decimal,
    /// Close-position flag.
    pub close_position: bool,
}

impl OpenOrder {
    /// Whether this is a protective stop for `side`.
    #[must_use]
    pub fn is_stop_for(&self, side: Side) -> bool {
        self.kind == OrderKind::StopMarket
            && self.position_side == side
            && self.side == side.exit_order_side()
    }
}

/// A venue position on one hedge side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenuePosition {
    /// Hedge side.
    pub side: Side,
    /// Absolute quantity.
    pub quantity: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Unrealized P&L reported by the venue.
    pub unrealized_pnl: Decimal,
}

/// Positions and resident orders fetched in one slow cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteState {
    /// Non-zero positions.
    pub positions: Vec<VenuePosition>,
    /// Resident orders.
    pub open_orders: Vec<OpenOrder>,
}

impl RemoteState {
    /// The position on `side`, if non-zero.
    #[must_use]
    pub fn position(&self, side: Side) -> Option<&VenuePosition> {
        self.positions
            .iter()
            .find(|p| p.side == side && p.quantity > Decimal::ZERO)
    }

    /// Resident stops protecting `side`.
    pub fn stops_for(&self, side: Side) -> impl Iterator<Item = &OpenOrder> {
        self.open_orders.iter().filter(move |o| o.is_stop_for(side))
    }

    /// Whether `order_id` is resident.
    #[must_use]
    pub fn has_order(&self, order_id: &str) -> bool {
        self.open_orders.iter().any(|o| o.order_id == order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stop_request_closes_whole_side() {
        let request = OrderRequest::stop("p-stop", Side::Long, dec!(98));
        assert_eq!(request.side, OrderSide::Sell);
        assert!(request.close_position);
        assert!(request.quantity.is_none());
        assert!(request.is_reducing());
    }

    #[test]
    fn test_open_request_is_not_reducing() {
        let request = OrderRequest::open("p-entry", Side::Short, dec!(1));
        assert_eq!(request.side, OrderSide::Sell);
        assert!(!request.is_reducing());
        assert!(OrderRequest::close("p-exit", Side::Short, dec!(1)).is_reducing());
    }

    #[test]
    fn test_limit_request_carries_price() {
        let request = OrderRequest::limit("p-entry", Side::Long, dec!(2), dec!(99.5));
        assert_eq!(request.kind, OrderKind::Limit);
        assert_eq!(request.side, OrderSide::Buy);
        assert!(!request.is_reducing());
        assert_eq!(request.audit_price(), dec!(99.5));
    }

    #[test]
    fn test_remote_state_lookup() {
        let state = RemoteState {
            positions: vec![VenuePosition {
                side: Side::Long,
                quantity: dec!(2),
                entry_price: dec!(50),
                unrealized_pnl: Decimal::ZERO,
            }],
            open_orders: vec![OpenOrder {
                order_id: "7".to_string(),
                client_order_id: "x".to_string(),
                kind: OrderKind::StopMarket,
                side: OrderSide::Sell,
                position_side: Side::Long,
                stop_price: Some(dec!(49)),
                quantity: Decimal::ZERO,
                close_position: true,
            }],
        };

        assert!(state.position(Side::Long).is_some());
        assert!(state.position(Side::Short).is_none());
        assert_eq!(state.stops_for(Side::Long).count(), 1);
        assert_eq!(state.stops_for(Side::Short).count(), 0);
        assert!(state.has_order("7"));
    }
}
