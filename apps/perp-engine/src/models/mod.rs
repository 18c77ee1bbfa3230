//! Core domain models for the perp engine.
//!
//! These types are shared by every component: the translator builds
//! [`OrderPlan`]s from [`Signal`]s, the gateway turns plans into
//! [`Position`]s, and the custodian manages positions until they close.

mod mode;
mod plan;
mod position;
mod side;
mod signal;

pub use mode::TradeMode;
pub use plan::{EntryOrder, OrderPlan, StopSpec};
pub use position::{Position, PositionStatus};
pub use side::{OrderSide, Side};
pub use signal::{Signal, SignalOrigin};
