//! Execution gateway.
//!
//! The gateway is the only component that places or cancels orders. Every
//! such path takes one `tokio::sync::Mutex`, and [`ExecutionGateway::execute`]
//! holds it across the whole entry, protect and rollback sequence so no other
//! actor can interleave orders with an unprotected entry.
//!
//! Orders sent for a plan carry the plan id as client id prefix
//! (`<plan>-entry`, `<plan>-stop`, `<plan>-unwind`). Timeouts and rollbacks
//! cancel only those, never the stops of other positions.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::models::{EntryOrder, OrderPlan, Position, PositionStatus, Side};
use crate::observability::{record_order_attempt, record_rollback};
use crate::persistence::{CsvLog, OrderAuditRow};
use crate::venue::{
    OrderReport, OrderRequest, OrderStatus, RemoteState, VenueAdapter, VenueError,
    call_with_retry,
};

use super::{ExecutionError, Precision};

/// Quantity and average price of an executed market order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fill {
    /// Executed quantity.
    pub quantity: Decimal,
    /// Average execution price.
    pub price: Decimal,
}

/// Client order id with a short random suffix.
///
/// Kept under the 36-character limit common to derivatives venues.
#[must_use]
pub fn client_order_id(tag: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{tag}-{}", &suffix[..12])
}

// ============================================
// ExecutionGateway
// ============================================

/// Places, protects and unwinds orders on one venue instrument.
pub struct ExecutionGateway {
    venue: Arc<dyn VenueAdapter>,
    config: ExecutionConfig,
    precision: Precision,
    audit: Option<Arc<CsvLog<OrderAuditRow>>>,
    order_lock: Mutex<()>,
}

impl std::fmt::Debug for ExecutionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGateway")
            .field("venue", &self.venue.venue_name())
            .field("precision", &self.precision)
            .finish_non_exhaustive()
    }
}

impl ExecutionGateway {
    /// Create a gateway.
    ///
    /// # Arguments
    ///
    /// * `venue` - Venue adapter
    /// * `config` - Timeouts, attempt counts and backoff
    /// * `precision` - Instrument rounding rules
    #[must_use]
    pub fn new(venue: Arc<dyn VenueAdapter>, config: ExecutionConfig, precision: Precision) -> Self {
        Self {
            venue,
            config,
            precision,
            audit: None,
            order_lock: Mutex::new(()),
        }
    }

    /// Append a row to `audit` for every order attempt.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<CsvLog<OrderAuditRow>>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Instrument rounding rules.
    #[must_use]
    pub const fn precision(&self) -> &Precision {
        &self.precision
    }

    /// Execution settings.
    #[must_use]
    pub const fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Venue name for logs.
    #[must_use]
    pub fn venue_name(&self) -> &'static str {
        self.venue.venue_name()
    }

    // ------------------------------------------------------------------
    // Entry-then-protect
    // ------------------------------------------------------------------

    /// Open a position from `plan` and protect it with a stop.
    ///
    /// Market entries are polled for the configured number of attempts.
    /// Limit entries rest for up to `limit_fill_timeout` before they are
    /// cancelled. Never returns `Ok` while the opened quantity is
    /// unprotected.
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::InvalidPlan`] before anything is sent
    /// - [`ExecutionError::EntryFailed`] if the entry was not accepted
    /// - [`ExecutionError::EntryTimeout`] if nothing filled in time
    /// - [`ExecutionError::ProtectionFailed`] if the stop failed and the
    ///   entry was unwound
    /// - [`ExecutionError::RollbackFailed`] if the unwind failed too
    pub async fn execute(&self, plan: &OrderPlan) -> Result<Position, ExecutionError> {
        let _guard = self.order_lock.lock().await;

        let quantity = self.precision.floor_quantity(plan.quantity);
        validate_plan(plan, quantity, &self.precision)?;

        let entry_id = format!("{}-entry", plan.id);
        let entry = match plan.entry {
            EntryOrder::Market => OrderRequest::open(entry_id, plan.side, quantity),
            EntryOrder::Limit(price) => OrderRequest::limit(
                entry_id,
                plan.side,
                quantity,
                self.precision.round_price(price),
            ),
        };
        let ack = self
            .submit(&entry, self.config.entry_attempts)
            .await
            .map_err(ExecutionError::EntryFailed)?;

        tracing::info!(
            plan_id = %plan.id,
            side = %plan.side,
            kind = entry.kind.as_str(),
            quantity = %quantity,
            order_id = %ack.order_id,
            "Entry submitted"
        );

        let report = match plan.entry {
            EntryOrder::Market => self.poll_fill(ack).await,
            EntryOrder::Limit(_) => self.poll_until(ack, self.config.limit_fill_timeout()).await,
        };
        let report = self.settle_entry(report).await?;
        let filled = report.executed_quantity;
        let fill_price = if report.average_price > Decimal::ZERO {
            report.average_price
        } else {
            entry.price.unwrap_or(plan.reference_price)
        };

        let stop_price = self
            .precision
            .round_price(plan.stop.resolve(plan.side, fill_price));
        if !plan.side.is_favourable(fill_price, stop_price) {
            tracing::error!(
                plan_id = %plan.id,
                fill_price = %fill_price,
                stop_price = %stop_price,
                "Stop is on the wrong side of the fill, unwinding entry"
            );
            self.rollback(plan.side, filled, &plan.id).await?;
            return Err(ExecutionError::ProtectionFailed {
                reason: format!("stop {stop_price} on wrong side of fill {fill_price}"),
            });
        }

        let stop = OrderRequest::stop(format!("{}-stop", plan.id), plan.side, stop_price);
        let stop_ack = match self.submit(&stop, self.config.stop_attempts).await {
            Ok(ack) => ack,
            Err(e) => {
                tracing::error!(
                    plan_id = %plan.id,
                    side = %plan.side,
                    quantity = %filled,
                    error = %e,
                    "Protective stop failed, unwinding entry"
                );
                self.rollback(plan.side, filled, &plan.id).await?;
                return Err(ExecutionError::ProtectionFailed {
                    reason: e.to_string(),
                });
            }
        };

        let take_profits = plan
            .anchored_targets(fill_price)
            .into_iter()
            .map(|t| self.precision.round_price(t))
            .collect();

        tracing::info!(
            plan_id = %plan.id,
            side = %plan.side,
            quantity = %filled,
            entry_price = %fill_price,
            stop_price = %stop_price,
            stop_order_id = %stop_ack.order_id,
            "Position opened and protected"
        );

        Ok(Position {
            id: plan.id.clone(),
            side: plan.side,
            quantity: filled,
            original_quantity: filled,
            entry_price: fill_price,
            stop_price,
            initial_stop_price: stop_price,
            stop_order_id: stop_ack.order_id,
            take_profits,
            tp_splits: plan.tp_splits.clone(),
            tp_level_index: 0,
            breakeven_active: false,
            best_price: fill_price,
            averaged: false,
            mode: plan.mode,
            status: PositionStatus::Open,
            realized_pnl: Decimal::ZERO,
            leverage: plan.leverage,
            opened_at: Utc::now(),
        })
    }

    /// Decide what a polled entry left behind.
    ///
    /// A partial fill is accepted and its remainder cancelled. With nothing
    /// filled, the entry order alone is cancelled.
    async fn settle_entry(&self, report: OrderReport) -> Result<OrderReport, ExecutionError> {
        if report.status == OrderStatus::Filled && report.has_fill() {
            return Ok(report);
        }

        if report.has_fill() {
            tracing::warn!(
                order_id = %report.order_id,
                filled = %report.executed_quantity,
                "Entry partially filled, cancelling remainder"
            );
            if let Err(e) = self.cancel_unlocked(&report.order_id).await {
                tracing::warn!(order_id = %report.order_id, error = %e, "Failed to cancel entry remainder");
            }
            return Ok(report);
        }

        if report.status.is_terminal() {
            return Err(ExecutionError::EntryFailed(VenueError::Rejected {
                code: 0,
                message: format!("entry {} {}", report.order_id, report.status.as_str()),
            }));
        }

        tracing::warn!(order_id = %report.order_id, "Entry not filled in time, cancelling");
        if let Err(e) = self.cancel_unlocked(&report.order_id).await {
            tracing::error!(order_id = %report.order_id, error = %e, "Failed to cancel unfilled entry");
        }

        // The entry may have filled between the last poll and the cancel.
        let latest = self.query_order(&report.order_id).await;
        if let Some(latest) = latest.filter(OrderReport::has_fill) {
            tracing::warn!(
                order_id = %latest.order_id,
                filled = %latest.executed_quantity,
                "Entry filled while being cancelled"
            );
            return Ok(latest);
        }

        Err(ExecutionError::EntryTimeout {
            order_id: report.order_id,
        })
    }

    /// Re-query `ack` until it is terminal or `timeout` elapses.
    async fn poll_until(&self, ack: OrderReport, timeout: std::time::Duration) -> OrderReport {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut report = ack;

        while !report.status.is_terminal() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(self.config.fill_poll_interval()).await;
            if let Some(latest) = self.query_order(&report.order_id).await {
                report = latest;
            }
        }
        report
    }

    async fn query_order(&self, order_id: &str) -> Option<OrderReport> {
        let policy = self.config.retry_policy(self.config.call_attempts);
        match call_with_retry(
            "order_status",
            &policy,
            self.config.request_timeout(),
            || self.venue.order_status(order_id),
        )
        .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "Order status query failed");
                None
            }
        }
    }

    /// Re-query `ack` until it is terminal or the poll budget runs out.
    async fn poll_fill(&self, ack: OrderReport) -> OrderReport {
        let mut report = ack;

        for _ in 0..self.config.fill_poll_attempts {
            if report.status.is_terminal() {
                break;
            }
            tokio::time::sleep(self.config.fill_poll_interval()).await;
            if let Some(latest) = self.query_order(&report.order_id).await {
                report = latest;
            }
        }
        report
    }

    /// Close `quantity` on `side` and cancel the orders sent for plan `tag`.
    async fn rollback(&self, side: Side, quantity: Decimal, tag: &str) -> Result<(), ExecutionError> {
        let close = OrderRequest::close(format!("{tag}-unwind"), side, quantity);
        let outcome = match self.submit(&close, self.config.call_attempts).await {
            Ok(_) | Err(VenueError::NoPosition) => Ok(()),
            Err(e) => Err(e),
        };
        self.cancel_tagged_unlocked(tag).await;
        record_rollback(outcome.is_ok());

        match outcome {
            Ok(()) => {
                tracing::warn!(side = %side, quantity = %quantity, "Entry rolled back, side flat");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    side = %side,
                    quantity = %quantity,
                    error = %e,
                    "Rollback failed, position may be unprotected"
                );
                Err(ExecutionError::RollbackFailed {
                    side,
                    quantity,
                    reason: e.to_string(),
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Position maintenance
    // ------------------------------------------------------------------

    /// Close `quantity` of `side` at market.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::InvalidPlan`] if the rounded quantity is not
    /// tradable, or the venue error.
    pub async fn close_quantity(&self, side: Side, quantity: Decimal) -> Result<Fill, ExecutionError> {
        let _guard = self.order_lock.lock().await;
        self.close_unlocked(side, quantity).await
    }

    async fn close_unlocked(&self, side: Side, quantity: Decimal) -> Result<Fill, ExecutionError> {
        let quantity = self.precision.floor_quantity(quantity);
        if !self.precision.is_tradable(quantity) {
            return Err(ExecutionError::InvalidPlan(format!(
                "close quantity {quantity} below minimum {}",
                self.precision.min_quantity
            )));
        }

        let request = OrderRequest::close(client_order_id("close"), side, quantity);
        let ack = self.submit(&request, self.config.call_attempts).await?;
        let report = self.poll_fill(ack).await;

        if !report.has_fill() {
            let cancelled = if report.status.is_terminal() {
                Ok(())
            } else {
                self.cancel_unlocked(&report.order_id).await
            };
            if let Err(e) = cancelled {
                tracing::warn!(order_id = %report.order_id, error = %e, "Failed to cancel unfilled close");
            }
            tracing::error!(
                side = %side,
                quantity = %quantity,
                order_id = %report.order_id,
                status = report.status.as_str(),
                "Close order did not fill"
            );
            return Err(ExecutionError::CloseNotFilled {
                order_id: report.order_id,
                status: report.status,
            });
        }

        let price = if report.average_price > Decimal::ZERO {
            report.average_price
        } else {
            self.last_price().await?
        };

        Ok(Fill {
            quantity: report.executed_quantity,
            price,
        })
    }

    /// Close `fraction` of `position` at market.
    ///
    /// Returns `Ok(false)` when the slice rounds below the venue minimum.
    ///
    /// # Errors
    ///
    /// Returns the venue error if the close is not accepted.
    pub async fn close_partial(
        &self,
        position: &Position,
        fraction: Decimal,
    ) -> Result<bool, ExecutionError> {
        let quantity = self
            .precision
            .floor_quantity(position.quantity * fraction.min(Decimal::ONE));
        if !self.precision.is_tradable(quantity) {
            return Ok(false);
        }
        self.close_quantity(position.side, quantity).await?;
        Ok(true)
    }

    /// Close everything on `side` at market.
    ///
    /// Returns `Ok(None)` if the venue holds nothing on that side.
    ///
    /// # Errors
    ///
    /// Returns the venue error if the position query or close fails.
    pub async fn close_side(&self, side: Side) -> Result<Option<Fill>, ExecutionError> {
        let _guard = self.order_lock.lock().await;

        let positions = self.fetch_positions().await?;
        let Some(remote) = positions.into_iter().find(|p| p.side == side) else {
            return Ok(None);
        };

        match self.close_unlocked(side, remote.quantity).await {
            Ok(fill) => Ok(Some(fill)),
            Err(ExecutionError::Venue(VenueError::NoPosition)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Open `quantity` more on `side` at market.
    ///
    /// # Errors
    ///
    /// Returns the venue error if the order is not accepted or does not fill.
    pub async fn add_to_position(&self, side: Side, quantity: Decimal) -> Result<Fill, ExecutionError> {
        let _guard = self.order_lock.lock().await;

        let quantity = self.precision.floor_quantity(quantity);
        if !self.precision.is_tradable(quantity) {
            return Err(ExecutionError::InvalidPlan(format!(
                "add quantity {quantity} below minimum"
            )));
        }

        let request = OrderRequest::open(client_order_id("add"), side, quantity);
        let ack = self
            .submit(&request, self.config.entry_attempts)
            .await
            .map_err(ExecutionError::EntryFailed)?;
        let report = self.poll_fill(ack).await;
        if !report.has_fill() {
            if let Err(e) = self.cancel_unlocked(&report.order_id).await {
                tracing::warn!(order_id = %report.order_id, error = %e, "Failed to cancel unfilled add");
            }
            return Err(ExecutionError::EntryTimeout {
                order_id: report.order_id,
            });
        }

        Ok(Fill {
            quantity: report.executed_quantity,
            price: report.average_price,
        })
    }

    /// Place a close-position stop for `side` at `stop_price`.
    ///
    /// Returns the venue order id.
    ///
    /// # Errors
    ///
    /// Returns the venue error once stop attempts are exhausted.
    pub async fn place_stop(&self, side: Side, stop_price: Decimal) -> Result<String, ExecutionError> {
        let _guard = self.order_lock.lock().await;
        self.place_stop_unlocked(side, stop_price).await
    }

    async fn place_stop_unlocked(
        &self,
        side: Side,
        stop_price: Decimal,
    ) -> Result<String, ExecutionError> {
        let price = self.precision.round_price(stop_price);
        let request = OrderRequest::stop(client_order_id("stop"), side, price);
        let ack = self.submit(&request, self.config.stop_attempts).await?;
        Ok(ack.order_id)
    }

    /// Replace the stop `old_order_id` with one at `stop_price`.
    ///
    /// The new stop is placed before the old one is cancelled, so the side
    /// is never without a resident stop. Returns the new order id.
    ///
    /// # Errors
    ///
    /// Returns the venue error if the new stop cannot be placed. The old stop
    /// is left in place in that case.
    pub async fn move_stop(
        &self,
        side: Side,
        old_order_id: &str,
        stop_price: Decimal,
    ) -> Result<String, ExecutionError> {
        let _guard = self.order_lock.lock().await;

        let new_order_id = self.place_stop_unlocked(side, stop_price).await?;
        if let Err(e) = self.cancel_unlocked(old_order_id).await {
            tracing::warn!(
                order_id = %old_order_id,
                error = %e,
                "Failed to cancel replaced stop"
            );
        }
        Ok(new_order_id)
    }

    /// Cancel one order. An order that no longer exists counts as cancelled.
    ///
    /// # Errors
    ///
    /// Returns the venue error for anything else.
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), ExecutionError> {
        let _guard = self.order_lock.lock().await;
        self.cancel_unlocked(order_id).await
    }

    async fn cancel_unlocked(&self, order_id: &str) -> Result<(), ExecutionError> {
        let policy = self.config.retry_policy(self.config.call_attempts);
        match call_with_retry(
            "cancel_order",
            &policy,
            self.config.request_timeout(),
            || self.venue.cancel_order(order_id),
        )
        .await
        {
            Ok(()) | Err(VenueError::OrderNotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Cancel resident orders whose client id carries the `tag` prefix.
    async fn cancel_tagged_unlocked(&self, tag: &str) {
        let prefix = format!("{tag}-");
        let policy = self.config.retry_policy(self.config.call_attempts);
        let orders = match call_with_retry(
            "open_orders",
            &policy,
            self.config.request_timeout(),
            || self.venue.open_orders(),
        )
        .await
        {
            Ok(orders) => orders,
            Err(e) => {
                tracing::warn!(tag, error = %e, "Failed to list orders for cleanup");
                return;
            }
        };

        for order in orders.iter().filter(|o| o.client_order_id.starts_with(&prefix)) {
            if let Err(e) = self.cancel_unlocked(&order.order_id).await {
                tracing::warn!(tag, order_id = %order.order_id, error = %e, "Failed to cancel plan order");
            }
        }
    }

    /// Cancel every resident order, best effort.
    ///
    /// Used by the panic command and the supervisor halt. Returns whether
    /// the venue confirmed.
    pub async fn cancel_all(&self) -> bool {
        let _guard = self.order_lock.lock().await;
        let policy = self.config.retry_policy(self.config.call_attempts);
        match call_with_retry(
            "cancel_all_orders",
            &policy,
            self.config.request_timeout(),
            || self.venue.cancel_all_orders(),
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Cancel-all failed");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    async fn fetch_positions(&self) -> Result<Vec<crate::venue::VenuePosition>, VenueError> {
        let policy = self.config.retry_policy(self.config.call_attempts);
        call_with_retry(
            "positions",
            &policy,
            self.config.request_timeout(),
            || self.venue.positions(),
        )
        .await
    }

    /// Fetch remote positions and resident orders.
    ///
    /// # Errors
    ///
    /// Returns the venue error once attempts are exhausted.
    pub async fn fetch_remote_state(&self) -> Result<RemoteState, VenueError> {
        let policy = self.config.retry_policy(self.config.call_attempts);
        let positions = self.fetch_positions().await?;
        let open_orders = call_with_retry(
            "open_orders",
            &policy,
            self.config.request_timeout(),
            || self.venue.open_orders(),
        )
        .await?;

        Ok(RemoteState {
            positions,
            open_orders,
        })
    }

    /// Last traded price.
    ///
    /// # Errors
    ///
    /// Returns the venue error once attempts are exhausted.
    pub async fn last_price(&self) -> Result<Decimal, VenueError> {
        let policy = self.config.retry_policy(self.config.call_attempts);
        call_with_retry(
            "last_price",
            &policy,
            self.config.request_timeout(),
            || self.venue.last_price(),
        )
        .await
    }

    /// Available quote balance.
    ///
    /// # Errors
    ///
    /// Returns the venue error once attempts are exhausted.
    pub async fn balance(&self) -> Result<Decimal, VenueError> {
        let policy = self.config.retry_policy(self.config.call_attempts);
        call_with_retry(
            "balance",
            &policy,
            self.config.request_timeout(),
            || self.venue.balance(),
        )
        .await
    }

    /// Put the account in hedge mode with isolated margin at `leverage`.
    ///
    /// # Errors
    ///
    /// Returns the venue error once attempts are exhausted.
    pub async fn prepare_account(&self, leverage: u32) -> Result<(), VenueError> {
        let policy = self.config.retry_policy(self.config.call_attempts);
        call_with_retry(
            "prepare_account",
            &policy,
            self.config.request_timeout(),
            || self.venue.prepare_account(leverage),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Place `request` with up to `attempts` tries, auditing each one.
    ///
    /// The client order id is reused across tries so a retried order that
    /// did reach the venue is not duplicated.
    async fn submit(&self, request: &OrderRequest, attempts: u32) -> Result<OrderReport, VenueError> {
        let policy = self.config.retry_policy(attempts);
        let operation = format!("place_{}", request.kind.as_str().to_lowercase());

        let result = call_with_retry(
            &operation,
            &policy,
            self.config.request_timeout(),
            move || async move {
                let result = self.venue.place_order(request).await;
                self.audit_attempt(request, &result);
                result
            },
        )
        .await;

        if let Err(e @ VenueError::Timeout { .. }) = &result {
            self.audit_attempt(request, &Err(e.clone()));
        }
        result
    }

    fn audit_attempt(&self, request: &OrderRequest, result: &Result<OrderReport, VenueError>) {
        let (status, price) = match result {
            Ok(report) if report.average_price > Decimal::ZERO => {
                (report.status.as_str(), report.average_price)
            }
            Ok(report) => (report.status.as_str(), request.audit_price()),
            Err(e) => (e.label(), request.audit_price()),
        };

        record_order_attempt(self.venue.venue_name(), request.kind.as_str(), status);

        if let Some(audit) = &self.audit {
            audit.record(&OrderAuditRow {
                id: request.client_order_id.clone(),
                timestamp: Utc::now(),
                side: format!("{}/{}", request.side, request.position_side),
                order_type: request.kind.as_str().to_string(),
                price,
                quantity: request.quantity.unwrap_or(Decimal::ZERO),
                status: status.to_string(),
            });
        }
    }
}

fn validate_plan(
    plan: &OrderPlan,
    quantity: Decimal,
    precision: &Precision,
) -> Result<(), ExecutionError> {
    if !precision.is_tradable(quantity) {
        return Err(ExecutionError::InvalidPlan(format!(
            "quantity {} rounds to {quantity}, below minimum {}",
            plan.quantity, precision.min_quantity
        )));
    }
    match plan.entry {
        EntryOrder::Limit(price) if price <= Decimal::ZERO => {
            return Err(ExecutionError::InvalidPlan(format!(
                "limit price {price} must be positive"
            )));
        }
        _ => {}
    }
    if plan.reference_price <= Decimal::ZERO {
        return Err(ExecutionError::InvalidPlan(format!(
            "reference price {} must be positive",
            plan.reference_price
        )));
    }
    if plan.take_profits.len() != plan.tp_splits.len() {
        return Err(ExecutionError::InvalidPlan(format!(
            "{} targets but {} splits",
            plan.take_profits.len(),
            plan.tp_splits.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryOrder, StopSpec, TradeMode};
    use crate::venue::{FillBehavior, MockVenue, MockVenueAdapter};
    use rust_decimal_macros::dec;

    fn fast_config() -> ExecutionConfig {
        ExecutionConfig {
            fill_poll_interval_ms: 5,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            request_timeout_ms: 200,
            ..ExecutionConfig::default()
        }
    }

    fn gateway(venue: &Arc<MockVenue>) -> ExecutionGateway {
        ExecutionGateway::new(
            Arc::clone(venue) as Arc<dyn VenueAdapter>,
            fast_config(),
            Precision::default(),
        )
    }

    fn plan() -> OrderPlan {
        OrderPlan {
            id: "plan-1".to_string(),
            side: Side::Long,
            quantity: dec!(5),
            reference_price: dec!(100),
            entry: EntryOrder::Market,
            stop: StopSpec::Distance(dec!(0.02)),
            take_profits: vec![dec!(101.5), dec!(103), dec!(106)],
            tp_splits: vec![dec!(0.3), dec!(0.3), dec!(0.4)],
            mode: TradeMode::Trend,
            leverage: 5,
        }
    }

    fn mock_venue() -> Arc<MockVenue> {
        Arc::new(MockVenue::new(dec!(100), dec!(1000)))
    }

    #[tokio::test]
    async fn test_execute_opens_protected_position() {
        let venue = mock_venue();
        let position = gateway(&venue).execute(&plan()).await.unwrap();

        assert_eq!(position.quantity, dec!(5));
        assert_eq!(position.entry_price, dec!(100));
        assert_eq!(position.stop_price, dec!(98));
        assert_eq!(
            position.take_profits,
            vec![dec!(101.5), dec!(103), dec!(106)]
        );

        let resident = venue.resident_orders();
        assert_eq!(resident.len(), 1);
        assert_eq!(resident[0].order_id, position.stop_order_id);
        assert!(resident[0].is_stop_for(Side::Long));
        assert_eq!(resident[0].stop_price, Some(dec!(98)));
    }

    #[tokio::test]
    async fn test_stop_failure_rolls_back_to_flat() {
        let venue = mock_venue();
        venue.reject_stops(true);

        let Err(err) = gateway(&venue).execute(&plan()).await else {
            panic!("execute must fail when the stop is rejected");
        };

        assert!(matches!(err, ExecutionError::ProtectionFailed { .. }));
        assert!(venue.position(Side::Long).is_none());
        assert!(venue.resident_orders().is_empty());
    }

    #[tokio::test]
    async fn test_transient_stop_failures_are_retried() {
        let venue = mock_venue();
        venue.fail_next_stops(2);

        let position = gateway(&venue).execute(&plan()).await.unwrap();
        assert_eq!(venue.stops_placed(), 1);
        assert!(!position.stop_order_id.is_empty());
    }

    #[tokio::test]
    async fn test_stop_attempts_exhausted_rolls_back() {
        let venue = mock_venue();
        venue.fail_next_stops(3);

        let result = gateway(&venue).execute(&plan()).await;
        assert!(matches!(result, Err(ExecutionError::ProtectionFailed { .. })));
        assert!(venue.position(Side::Long).is_none());
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported() {
        let venue = mock_venue();
        venue.reject_stops(true);
        venue.reject_closes(true);

        let Err(err) = gateway(&venue).execute(&plan()).await else {
            panic!("execute must fail");
        };
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            ExecutionError::RollbackFailed { side: Side::Long, .. }
        ));
    }

    #[tokio::test]
    async fn test_entry_failure_changes_nothing() {
        let venue = mock_venue();
        venue.fail_next_entries(2);

        let result = gateway(&venue).execute(&plan()).await;
        assert!(matches!(result, Err(ExecutionError::EntryFailed(_))));
        assert!(venue.position(Side::Long).is_none());
        assert!(venue.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_unfilled_entry_times_out_and_cancels() {
        let venue = mock_venue();
        venue.set_fill_behavior(FillBehavior::Never);

        let result = gateway(&venue).execute(&plan()).await;
        assert!(matches!(result, Err(ExecutionError::EntryTimeout { .. })));
        assert!(venue.resident_orders().is_empty());
        assert_eq!(venue.cancel_all_calls(), 0);
    }

    fn short_plan(id: &str) -> OrderPlan {
        OrderPlan {
            id: id.to_string(),
            side: Side::Short,
            take_profits: vec![dec!(98.5), dec!(97), dec!(94)],
            ..plan()
        }
    }

    #[tokio::test]
    async fn test_rollback_keeps_other_stops() {
        let venue = mock_venue();
        let gateway = gateway(&venue);
        let long = gateway.execute(&plan()).await.unwrap();

        venue.reject_stops(true);
        let result = gateway.execute(&short_plan("plan-2")).await;

        assert!(matches!(result, Err(ExecutionError::ProtectionFailed { .. })));
        assert!(venue.position(Side::Short).is_none());
        let resident = venue.resident_orders();
        assert_eq!(resident.len(), 1);
        assert_eq!(resident[0].order_id, long.stop_order_id);
        assert_eq!(venue.cancel_all_calls(), 0);
    }

    #[tokio::test]
    async fn test_entry_timeout_keeps_other_stops() {
        let venue = mock_venue();
        let gateway = gateway(&venue);
        let long = gateway.execute(&plan()).await.unwrap();

        venue.set_fill_behavior(FillBehavior::Never);
        let result = gateway.execute(&short_plan("plan-2")).await;

        assert!(matches!(result, Err(ExecutionError::EntryTimeout { .. })));
        let resident = venue.resident_orders();
        assert_eq!(resident.len(), 1);
        assert_eq!(resident[0].order_id, long.stop_order_id);
    }

    #[tokio::test]
    async fn test_limit_entry_fills_when_price_crosses() {
        let venue = mock_venue();
        let gateway = ExecutionGateway::new(
            Arc::clone(&venue) as Arc<dyn VenueAdapter>,
            ExecutionConfig {
                limit_fill_timeout_ms: 2_000,
                ..fast_config()
            },
            Precision::default(),
        );
        let limit = OrderPlan {
            entry: EntryOrder::Limit(dec!(99)),
            reference_price: dec!(99),
            ..plan()
        };

        let mover = Arc::clone(&venue);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            mover.set_price(dec!(98.9));
        });
        let position = gateway.execute(&limit).await.unwrap();

        assert_eq!(position.entry_price, dec!(99));
        assert_eq!(position.quantity, dec!(5));
        assert_eq!(position.stop_price, dec!(97.02));
        let entry = &venue.placed_orders()[0];
        assert_eq!(entry.kind, crate::venue::OrderKind::Limit);
        assert_eq!(entry.price, Some(dec!(99)));
    }

    #[tokio::test]
    async fn test_unfilled_limit_entry_cancels_only_itself() {
        let venue = mock_venue();
        let gateway = ExecutionGateway::new(
            Arc::clone(&venue) as Arc<dyn VenueAdapter>,
            ExecutionConfig {
                limit_fill_timeout_ms: 30,
                ..fast_config()
            },
            Precision::default(),
        );
        let long = gateway.execute(&plan()).await.unwrap();
        let limit = OrderPlan {
            id: "plan-2".to_string(),
            entry: EntryOrder::Limit(dec!(95)),
            ..plan()
        };

        let result = gateway.execute(&limit).await;

        assert!(matches!(result, Err(ExecutionError::EntryTimeout { .. })));
        assert_eq!(venue.position(Side::Long).unwrap().quantity, dec!(5));
        let resident = venue.resident_orders();
        assert_eq!(resident.len(), 1);
        assert_eq!(resident[0].order_id, long.stop_order_id);
    }

    #[tokio::test]
    async fn test_non_positive_limit_is_invalid() {
        let venue = mock_venue();
        let limit = OrderPlan {
            entry: EntryOrder::Limit(Decimal::ZERO),
            ..plan()
        };

        let result = gateway(&venue).execute(&limit).await;
        assert!(matches!(result, Err(ExecutionError::InvalidPlan(_))));
        assert!(venue.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_partial_fill_protects_filled_quantity() {
        let venue = mock_venue();
        venue.set_fill_behavior(FillBehavior::Partial(dec!(0.4)));

        let position = gateway(&venue).execute(&plan()).await.unwrap();
        assert_eq!(position.quantity, dec!(2));
        assert_eq!(venue.position(Side::Long).unwrap().quantity, dec!(2));
        assert_eq!(venue.stops_placed(), 1);
    }

    #[tokio::test]
    async fn test_tiny_quantity_rejected_before_sending() {
        let venue = mock_venue();
        let mut tiny = plan();
        tiny.quantity = dec!(0.0004);

        let result = gateway(&venue).execute(&tiny).await;
        assert!(matches!(result, Err(ExecutionError::InvalidPlan(_))));
        assert!(venue.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_short_stop_above_fill() {
        let venue = mock_venue();
        let mut short = plan();
        short.side = Side::Short;
        short.take_profits = vec![dec!(98.5), dec!(97), dec!(94)];

        let position = gateway(&venue).execute(&short).await.unwrap();
        assert_eq!(position.stop_price, dec!(102));
        assert!(venue.resident_orders()[0].is_stop_for(Side::Short));
    }

    #[tokio::test]
    async fn test_move_stop_places_before_cancelling() {
        let venue = mock_venue();
        let gateway = gateway(&venue);
        let position = gateway.execute(&plan()).await.unwrap();

        let new_id = gateway
            .move_stop(Side::Long, &position.stop_order_id, dec!(100.1))
            .await
            .unwrap();

        let resident = venue.resident_orders();
        assert_eq!(resident.len(), 1);
        assert_eq!(resident[0].order_id, new_id);
        assert_eq!(resident[0].stop_price, Some(dec!(100.1)));
    }

    #[tokio::test]
    async fn test_close_partial_reduces_position() {
        let venue = mock_venue();
        let gateway = gateway(&venue);
        let position = gateway.execute(&plan()).await.unwrap();

        assert!(gateway.close_partial(&position, dec!(0.3)).await.unwrap());
        assert_eq!(venue.position(Side::Long).unwrap().quantity, dec!(3.5));
    }

    #[tokio::test]
    async fn test_close_side_without_position_is_none() {
        let venue = mock_venue();
        assert!(gateway(&venue).close_side(Side::Short).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audit_rows_for_every_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(CsvLog::new(dir.path().join("orders.csv")));
        let venue = mock_venue();
        venue.fail_next_stops(1);

        let gateway = gateway(&venue).with_audit(Arc::clone(&audit));
        gateway.execute(&plan()).await.unwrap();

        let content = std::fs::read_to_string(audit.path()).unwrap();
        // header + entry + failed stop + stop
        assert_eq!(content.lines().count(), 4);
        assert!(content.contains("plan-1-entry"));
        assert!(content.contains("network"));
    }

    #[tokio::test]
    async fn test_entry_retry_reuses_client_id() {
        let mut mock = MockVenueAdapter::new();
        let mut seq = mockall::Sequence::new();

        mock.expect_venue_name().return_const("mock");
        mock.expect_place_order()
            .withf(|r: &OrderRequest| r.client_order_id == "plan-1-entry")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(VenueError::Network("reset".to_string())));
        mock.expect_place_order()
            .withf(|r: &OrderRequest| r.client_order_id == "plan-1-entry")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| {
                Ok(OrderReport {
                    order_id: "10".to_string(),
                    client_order_id: r.client_order_id.clone(),
                    status: OrderStatus::Filled,
                    executed_quantity: dec!(5),
                    average_price: dec!(100),
                })
            });
        mock.expect_place_order()
            .withf(|r: &OrderRequest| r.client_order_id == "plan-1-stop" && r.close_position)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| {
                Ok(OrderReport {
                    order_id: "11".to_string(),
                    client_order_id: r.client_order_id.clone(),
                    status: OrderStatus::New,
                    executed_quantity: Decimal::ZERO,
                    average_price: Decimal::ZERO,
                })
            });

        let gateway = ExecutionGateway::new(Arc::new(mock), fast_config(), Precision::default());
        let position = gateway.execute(&plan()).await.unwrap();
        assert_eq!(position.stop_order_id, "11");
    }

    #[tokio::test]
    async fn test_rejected_entry_is_not_retried() {
        let mut mock = MockVenueAdapter::new();
        mock.expect_venue_name().return_const("mock");
        mock.expect_place_order().times(1).returning(|_| {
            Err(VenueError::Rejected {
                code: -2019,
                message: "Margin is insufficient.".to_string(),
            })
        });

        let gateway = ExecutionGateway::new(Arc::new(mock), fast_config(), Precision::default());
        let result = gateway.execute(&plan()).await;
        assert!(matches!(
            result,
            Err(ExecutionError::EntryFailed(VenueError::Rejected { code: -2019, .. }))
        ));
    }

    fn close_report(r: &OrderRequest, status: OrderStatus) -> OrderReport {
        OrderReport {
            order_id: "20".to_string(),
            client_order_id: r.client_order_id.clone(),
            status,
            executed_quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_cancelled_close_is_not_a_fill() {
        let mut mock = MockVenueAdapter::new();
        mock.expect_venue_name().return_const("mock");
        mock.expect_place_order()
            .times(1)
            .returning(|r| Ok(close_report(r, OrderStatus::Canceled)));
        mock.expect_cancel_order().never();
        mock.expect_last_price().never();

        let gateway = ExecutionGateway::new(Arc::new(mock), fast_config(), Precision::default());
        let result = gateway.close_quantity(Side::Long, dec!(1.5)).await;

        assert_eq!(
            result,
            Err(ExecutionError::CloseNotFilled {
                order_id: "20".to_string(),
                status: OrderStatus::Canceled,
            })
        );
    }

    #[tokio::test]
    async fn test_stuck_close_is_cancelled_and_reported() {
        let mut mock = MockVenueAdapter::new();
        mock.expect_venue_name().return_const("mock");
        mock.expect_place_order()
            .times(1)
            .returning(|r| Ok(close_report(r, OrderStatus::New)));
        mock.expect_order_status().returning(|id| {
            Ok(OrderReport {
                order_id: id.to_string(),
                client_order_id: "close".to_string(),
                status: OrderStatus::New,
                executed_quantity: Decimal::ZERO,
                average_price: Decimal::ZERO,
            })
        });
        mock.expect_cancel_order()
            .withf(|id: &str| id == "20")
            .times(1)
            .returning(|_| Ok(()));

        let gateway = ExecutionGateway::new(Arc::new(mock), fast_config(), Precision::default());
        let result = gateway.close_quantity(Side::Short, dec!(1)).await;

        assert!(matches!(
            result,
            Err(ExecutionError::CloseNotFilled {
                status: OrderStatus::New,
                ..
            })
        ));
    }

    #[test]
    fn test_client_order_id_fits_limit() {
        let id = client_order_id("close");
        assert!(id.starts_with("close-"));
        assert!(id.len() <= 36);
    }
}
