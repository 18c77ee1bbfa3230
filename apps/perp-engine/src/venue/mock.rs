//! In-memory venue for tests and dry runs.
//!
//! This mock keeps hedge-mode positions and resident orders in memory and
//! fills market orders at the current price. Limit orders rest until the
//! price crosses them. Failures can be injected per
//! order class so the entry-then-protect protocol and reconciliation can be
//! exercised without a network.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::execution::Precision;
use crate::models::Side;

use super::{
    OpenOrder, OrderKind, OrderReport, OrderRequest, OrderStatus, VenueAdapter, VenueError,
    VenuePosition,
};

/// How marketable entries fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillBehavior {
    /// Fill completely at the current price.
    Immediate,
    /// Stay unfilled until cancelled.
    Never,
    /// Fill this fraction of the requested quantity.
    Partial(Decimal),
}

#[derive(Debug)]
struct MockState {
    price: Decimal,
    balance: Decimal,
    positions: BTreeMap<Side, (Decimal, Decimal)>,
    resident: Vec<OpenOrder>,
    reports: HashMap<String, OrderReport>,
    limit_prices: HashMap<String, Decimal>,
    client_ids: HashMap<String, String>,
    fill: FillBehavior,
    entry_failures: u32,
    stop_failures: u32,
    reject_stops: bool,
    reject_closes: bool,
    outage: bool,
    placed: Vec<OrderRequest>,
    cancel_all_calls: u32,
    leverage: Option<u32>,
}

/// In-memory venue.
///
/// Order IDs are generated sequentially starting from 1.
#[derive(Debug)]
pub struct MockVenue {
    state: Mutex<MockState>,
    order_counter: AtomicU64,
    precision: Precision,
}

impl MockVenue {
    /// Create a venue quoting `price` with `balance` available.
    #[must_use]
    pub fn new(price: Decimal, balance: Decimal) -> Self {
        Self {
            state: Mutex::new(MockState {
                price,
                balance,
                positions: BTreeMap::new(),
                resident: Vec::new(),
                reports: HashMap::new(),
                limit_prices: HashMap::new(),
                client_ids: HashMap::new(),
                fill: FillBehavior::Immediate,
                entry_failures: 0,
                stop_failures: 0,
                reject_stops: false,
                reject_closes: false,
                outage: false,
                placed: Vec::new(),
                cancel_all_calls: 0,
                leverage: None,
            }),
            order_counter: AtomicU64::new(1),
            precision: Precision::default(),
        }
    }

    /// Use custom precision rules.
    #[must_use]
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_order_id(&self) -> String {
        self.order_counter.fetch_add(1, Ordering::SeqCst).to_string()
    }

    // ------------------------------------------------------------------
    // Test controls
    // ------------------------------------------------------------------

    /// Move the price, triggering any resident stop or limit it crosses.
    pub fn set_price(&self, price: Decimal) {
        let mut state = self.state();
        state.price = price;
        Self::fill_crossed_limits(&mut state);

        let triggered: Vec<OpenOrder> = state
            .resident
            .iter()
            .filter(|o| o.kind == OrderKind::StopMarket)
            .filter(|o| match (o.position_side, o.stop_price) {
                (Side::Long, Some(stop)) => price <= stop,
                (Side::Short, Some(stop)) => price >= stop,
                _ => false,
            })
            .cloned()
            .collect();

        for order in triggered {
            state.resident.retain(|o| o.order_id != order.order_id);
            if let Some((quantity, entry)) = state.positions.remove(&order.position_side) {
                state.balance += (price - entry) * quantity * order.position_side.sign();
            }
            if let Some(report) = state.reports.get_mut(&order.order_id) {
                report.status = OrderStatus::Filled;
                report.average_price = price;
            }
        }
    }

    /// Change how marketable entries fill.
    pub fn set_fill_behavior(&self, fill: FillBehavior) {
        self.state().fill = fill;
    }

    /// Fail the next `count` entry submissions with a network error.
    pub fn fail_next_entries(&self, count: u32) {
        self.state().entry_failures = count;
    }

    /// Fail the next `count` stop placements with a network error.
    pub fn fail_next_stops(&self, count: u32) {
        self.state().stop_failures = count;
    }

    /// Reject every stop placement.
    pub fn reject_stops(&self, reject: bool) {
        self.state().reject_stops = reject;
    }

    /// Fail every reducing market order with a network error.
    pub fn reject_closes(&self, reject: bool) {
        self.state().reject_closes = reject;
    }

    /// Fail every call with a network error.
    pub fn set_outage(&self, outage: bool) {
        self.state().outage = outage;
    }

    /// Create a position as if opened outside the engine.
    pub fn inject_position(&self, side: Side, quantity: Decimal, entry_price: Decimal) {
        self.state().positions.insert(side, (quantity, entry_price));
    }

    /// Remove a position as if closed outside the engine.
    pub fn remove_position(&self, side: Side) {
        self.state().positions.remove(&side);
    }

    /// Place a resident stop as if created outside the engine.
    pub fn inject_stop(&self, side: Side, stop_price: Decimal) -> String {
        let order_id = self.next_order_id();
        let order = OpenOrder {
            order_id: order_id.clone(),
            client_order_id: format!("external-{order_id}"),
            kind: OrderKind::StopMarket,
            side: side.exit_order_side(),
            position_side: side,
            stop_price: Some(stop_price),
            quantity: Decimal::ZERO,
            close_position: true,
        };
        self.state().resident.push(order);
        order_id
    }

    /// Current position on `side`.
    #[must_use]
    pub fn position(&self, side: Side) -> Option<VenuePosition> {
        let state = self.state();
        state.positions.get(&side).map(|(quantity, entry)| VenuePosition {
            side,
            quantity: *quantity,
            entry_price: *entry,
            unrealized_pnl: (state.price - *entry) * *quantity * side.sign(),
        })
    }

    /// Resident orders.
    #[must_use]
    pub fn resident_orders(&self) -> Vec<OpenOrder> {
        self.state().resident.clone()
    }

    /// Every accepted order request, in order.
    #[must_use]
    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state().placed.clone()
    }

    /// Number of accepted stop orders.
    #[must_use]
    pub fn stops_placed(&self) -> usize {
        self.state()
            .placed
            .iter()
            .filter(|o| o.kind == OrderKind::StopMarket)
            .count()
    }

    /// Number of `cancel_all_orders` calls.
    #[must_use]
    pub fn cancel_all_calls(&self) -> u32 {
        self.state().cancel_all_calls
    }

    /// Leverage set by `prepare_account`.
    #[must_use]
    pub fn leverage(&self) -> Option<u32> {
        self.state().leverage
    }

    fn check_outage(&self) -> Result<(), VenueError> {
        if self.state().outage {
            return Err(VenueError::Network("venue unreachable".to_string()));
        }
        Ok(())
    }

    fn fill_market(
        state: &mut MockState,
        request: &OrderRequest,
        order_id: &str,
    ) -> Result<OrderReport, VenueError> {
        let quantity = request.quantity.unwrap_or(Decimal::ZERO);
        let price = state.price;
        let side = request.position_side;

        if request.is_reducing() {
            if state.reject_closes {
                return Err(VenueError::Network("injected close failure".to_string()));
            }
            let Some((held, entry)) = state.positions.get(&side).copied() else {
                return Err(VenueError::NoPosition);
            };
            let closed = quantity.min(held);
            let remaining = held - closed;
            state.balance += (price - entry) * closed * side.sign();
            if remaining > Decimal::ZERO {
                state.positions.insert(side, (remaining, entry));
            } else {
                state.positions.remove(&side);
            }
            return Ok(report(request, order_id, OrderStatus::Filled, closed, price));
        }

        if state.entry_failures > 0 {
            state.entry_failures -= 1;
            return Err(VenueError::Network("injected entry failure".to_string()));
        }

        let (status, filled) = match state.fill {
            FillBehavior::Immediate => (OrderStatus::Filled, quantity),
            FillBehavior::Never => (OrderStatus::New, Decimal::ZERO),
            FillBehavior::Partial(ratio) => (OrderStatus::PartiallyFilled, quantity * ratio),
        };

        if filled > Decimal::ZERO {
            let (held, entry) = state
                .positions
                .get(&side)
                .copied()
                .unwrap_or((Decimal::ZERO, Decimal::ZERO));
            let total = held + filled;
            let average = (held * entry + filled * price) / total;
            state.positions.insert(side, (total, average));
        }

        if status == OrderStatus::New {
            return Ok(Self::rest_order(state, request, order_id));
        }

        Ok(report(request, order_id, status, filled, price))
    }

    fn place_limit(
        state: &mut MockState,
        request: &OrderRequest,
        order_id: &str,
    ) -> Result<OrderReport, VenueError> {
        let Some(limit) = request.price else {
            return Err(VenueError::Rejected {
                code: -1102,
                message: "Mandatory parameter 'price' was not sent.".to_string(),
            });
        };
        if crosses(request.position_side, state.price, limit) {
            return Self::fill_market(state, request, order_id);
        }

        if state.entry_failures > 0 {
            state.entry_failures -= 1;
            return Err(VenueError::Network("injected entry failure".to_string()));
        }
        Ok(Self::rest_order(state, request, order_id))
    }

    /// Leave `request` resident and unfilled.
    fn rest_order(state: &mut MockState, request: &OrderRequest, order_id: &str) -> OrderReport {
        state.resident.push(OpenOrder {
            order_id: order_id.to_string(),
            client_order_id: request.client_order_id.clone(),
            kind: request.kind,
            side: request.side,
            position_side: request.position_side,
            stop_price: None,
            quantity: request.quantity.unwrap_or(Decimal::ZERO),
            close_position: false,
        });
        if let Some(limit) = request.price {
            state.limit_prices.insert(order_id.to_string(), limit);
        }
        report(request, order_id, OrderStatus::New, Decimal::ZERO, Decimal::ZERO)
    }

    fn fill_crossed_limits(state: &mut MockState) {
        let price = state.price;
        let crossed: Vec<(OpenOrder, Decimal)> = state
            .resident
            .iter()
            .filter(|o| o.kind == OrderKind::Limit)
            .filter_map(|o| {
                let limit = state.limit_prices.get(&o.order_id).copied()?;
                crosses(o.position_side, price, limit).then(|| (o.clone(), limit))
            })
            .collect();

        for (order, limit) in crossed {
            state.resident.retain(|o| o.order_id != order.order_id);
            let (held, entry) = state
                .positions
                .get(&order.position_side)
                .copied()
                .unwrap_or((Decimal::ZERO, Decimal::ZERO));
            let total = held + order.quantity;
            let average = (held * entry + order.quantity * limit) / total;
            state.positions.insert(order.position_side, (total, average));
            if let Some(report) = state.reports.get_mut(&order.order_id) {
                report.status = OrderStatus::Filled;
                report.executed_quantity = order.quantity;
                report.average_price = limit;
            }
        }
    }

    fn place_stop(
        state: &mut MockState,
        request: &OrderRequest,
        order_id: &str,
    ) -> Result<OrderReport, VenueError> {
        if state.reject_stops {
            return Err(VenueError::Rejected {
                code: -2021,
                message: "Order would immediately trigger.".to_string(),
            });
        }
        if state.stop_failures > 0 {
            state.stop_failures -= 1;
            return Err(VenueError::Network("injected stop failure".to_string()));
        }

        state.resident.push(OpenOrder {
            order_id: order_id.to_string(),
            client_order_id: request.client_order_id.clone(),
            kind: OrderKind::StopMarket,
            side: request.side,
            position_side: request.position_side,
            stop_price: request.stop_price,
            quantity: request.quantity.unwrap_or(Decimal::ZERO),
            close_position: request.close_position,
        });
        Ok(report(
            request,
            order_id,
            OrderStatus::New,
            Decimal::ZERO,
            Decimal::ZERO,
        ))
    }
}

/// Whether a buy (long) or sell (short) limit at `limit` is marketable at `price`.
fn crosses(side: Side, price: Decimal, limit: Decimal) -> bool {
    match side {
        Side::Long => price <= limit,
        Side::Short => price >= limit,
    }
}

fn report(
    request: &OrderRequest,
    order_id: &str,
    status: OrderStatus,
    executed_quantity: Decimal,
    average_price: Decimal,
) -> OrderReport {
    OrderReport {
        order_id: order_id.to_string(),
        client_order_id: request.client_order_id.clone(),
        status,
        executed_quantity,
        average_price,
    }
}

#[async_trait]
impl VenueAdapter for MockVenue {
    async fn prepare_account(&self, leverage: u32) -> Result<(), VenueError> {
        self.check_outage()?;
        self.state().leverage = Some(leverage);
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReport, VenueError> {
        self.check_outage()?;
        let mut state = self.state();

        if let Some(existing) = state
            .client_ids
            .get(&request.client_order_id)
            .and_then(|id| state.reports.get(id))
        {
            return Ok(existing.clone());
        }

        let order_id = self.next_order_id();
        let result = match request.kind {
            OrderKind::Market => Self::fill_market(&mut state, request, &order_id),
            OrderKind::Limit => Self::place_limit(&mut state, request, &order_id),
            OrderKind::StopMarket => Self::place_stop(&mut state, request, &order_id),
            OrderKind::Other => Err(VenueError::Rejected {
                code: -1116,
                message: "Invalid orderType.".to_string(),
            }),
        };

        if let Ok(report) = &result {
            state
                .client_ids
                .insert(request.client_order_id.clone(), order_id.clone());
            state.reports.insert(order_id, report.clone());
            state.placed.push(request.clone());
        }
        result
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderReport, VenueError> {
        self.check_outage()?;
        self.state()
            .reports
            .get(order_id)
            .cloned()
            .ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError> {
        self.check_outage()?;
        let mut state = self.state();
        let before = state.resident.len();
        state.resident.retain(|o| o.order_id != order_id);
        if state.resident.len() == before {
            return Err(VenueError::OrderNotFound(order_id.to_string()));
        }
        if let Some(report) = state.reports.get_mut(order_id) {
            report.status = OrderStatus::Canceled;
        }
        Ok(())
    }

    async fn cancel_all_orders(&self) -> Result<(), VenueError> {
        self.check_outage()?;
        let mut state = self.state();
        state.cancel_all_calls += 1;
        let cancelled: Vec<String> = state.resident.drain(..).map(|o| o.order_id).collect();
        for order_id in cancelled {
            if let Some(report) = state.reports.get_mut(&order_id) {
                report.status = OrderStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>, VenueError> {
        self.check_outage()?;
        Ok(self.resident_orders())
    }

    async fn positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        self.check_outage()?;
        Ok(Side::ALL
            .into_iter()
            .filter_map(|side| self.position(side))
            .collect())
    }

    async fn balance(&self) -> Result<Decimal, VenueError> {
        self.check_outage()?;
        Ok(self.state().balance)
    }

    async fn last_price(&self) -> Result<Decimal, VenueError> {
        self.check_outage()?;
        Ok(self.state().price)
    }

    async fn instrument_rules(&self) -> Result<Precision, VenueError> {
        self.check_outage()?;
        Ok(self.precision)
    }

    fn venue_name(&self) -> &'static str {
        "mock"
    }
}
