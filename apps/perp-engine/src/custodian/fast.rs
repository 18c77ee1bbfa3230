//! Fast cycle: local position math against the latest price.
//!
//! No remote reads happen here. Orders are only sent when a target is hit
//! or a stop needs to move.

use rust_decimal::Decimal;

use crate::execution::ExecutionError;
use crate::models::{Position, PositionStatus};
use crate::observability::update_open_positions;

use super::{FastCycleSummary, PositionCustodian};

/// What a stop adjustment did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopMove {
    Moved,
    Unchanged,
    Failed,
}

impl PositionCustodian {
    /// Run one fast cycle over every tracked position at `price`.
    ///
    /// Each position goes through, in order: best price tracking, the
    /// take-profit ladder, breakeven, trailing and averaging down. Errors are
    /// collected in the summary and never stop the cycle.
    pub async fn run_fast_cycle(&self, price: Decimal) -> FastCycleSummary {
        let mut summary = FastCycleSummary::default();

        for position in self.registry.all() {
            summary.positions += 1;
            self.manage(position, price, &mut summary).await;
        }

        summary.unrealized_pnl = self
            .registry
            .all()
            .iter()
            .map(|p| p.unrealized_pnl(price))
            .sum();
        summary
    }

    async fn manage(&self, mut position: Position, price: Decimal, summary: &mut FastCycleSummary) {
        position.best_price = position.side.better_price(position.best_price, price);

        // A crossed stop belongs to the venue; reconciliation books the exit.
        if position.stop_breached(price) {
            self.registry.upsert(position);
            return;
        }

        self.take_profit(&mut position, price, summary).await;
        if position.quantity <= Decimal::ZERO {
            self.finish(position, summary).await;
            return;
        }

        let moved = self.breakeven(&mut position, price, summary).await;
        if moved != StopMove::Moved {
            self.trail(&mut position, price, summary).await;
        }
        self.average_down(&mut position, price, summary).await;

        self.registry.upsert(position);
    }

    // ------------------------------------------------------------------
    // Take-profit ladder
    // ------------------------------------------------------------------

    /// Close the slice for the current level if its target is reached.
    ///
    /// At most one level is taken per cycle.
    async fn take_profit(
        &self,
        position: &mut Position,
        price: Decimal,
        summary: &mut FastCycleSummary,
    ) {
        let Some(target) = position.next_target() else {
            return;
        };
        if !position.target_reached(target, price) {
            return;
        }

        let level = position.tp_level_index + 1;
        let slice = position.tp_slice_quantity();

        match self.gateway.close_quantity(position.side, slice).await {
            Ok(fill) => {
                let closed = fill.quantity.min(position.quantity);
                let pnl = position.pnl_for(closed, fill.price);

                position.quantity -= closed;
                position.realized_pnl += pnl;
                position.tp_level_index += 1;
                position.status = PositionStatus::Partial;

                self.book_pnl(pnl);
                self.journal_exit(position, fill, pnl, &format!("TP{level}"));
                summary.take_profits += 1;

                tracing::info!(
                    position_id = %position.id,
                    level,
                    target = %target,
                    closed = %closed,
                    fill_price = %fill.price,
                    pnl = %pnl,
                    remaining = %position.quantity,
                    "Take profit hit"
                );
            }
            Err(ExecutionError::InvalidPlan(reason)) => {
                tracing::warn!(
                    position_id = %position.id,
                    level,
                    reason = %reason,
                    "Take-profit slice not tradable, skipping level"
                );
                position.tp_level_index += 1;
            }
            Err(e) => {
                tracing::error!(position_id = %position.id, level, error = %e, "Take-profit close failed");
                summary.errors.push(format!("{} TP{level}: {e}", position.id));
            }
        }
    }

    /// Cancel the stop of a fully closed position and stop tracking it.
    async fn finish(&self, mut position: Position, summary: &mut FastCycleSummary) {
        if let Err(e) = self.gateway.cancel_order(&position.stop_order_id).await {
            tracing::warn!(position_id = %position.id, error = %e, "Failed to cancel stop of closed position");
            summary.errors.push(format!("{} stop cancel: {e}", position.id));
        }

        position.status = PositionStatus::Closed;
        self.registry.remove(&position.id);
        update_open_positions(self.registry.len());
        summary.closed += 1;

        tracing::info!(
            position_id = %position.id,
            total_pnl = %position.realized_pnl,
            "Position fully closed by take profits"
        );
    }

    // ------------------------------------------------------------------
    // Stop management
    // ------------------------------------------------------------------

    /// Move the stop to breakeven once, after the first take profit or when
    /// the profit ratio reaches the trigger.
    async fn breakeven(
        &self,
        position: &mut Position,
        price: Decimal,
        summary: &mut FastCycleSummary,
    ) -> StopMove {
        if position.breakeven_active {
            return StopMove::Unchanged;
        }
        let after_first_target = position.tp_level_index > 0;
        if !after_first_target && position.pnl_ratio(price) < self.config.breakeven_trigger {
            return StopMove::Unchanged;
        }

        let candidate = self
            .gateway
            .precision()
            .round_price(position.breakeven_price(self.config.breakeven_offset));

        if !position.improves_stop(candidate) {
            position.breakeven_active = true;
            return StopMove::Unchanged;
        }
        // Price is already back through the breakeven level.
        if !position.side.is_favourable(price, candidate) {
            return StopMove::Unchanged;
        }

        let outcome = self.move_stop(position, candidate, "breakeven", summary).await;
        if outcome == StopMove::Moved {
            position.breakeven_active = true;
        }
        outcome
    }

    /// Ratchet the stop behind the best price.
    async fn trail(&self, position: &mut Position, price: Decimal, summary: &mut FastCycleSummary) {
        let trailing = &self.config.trailing;
        if !trailing.enabled {
            return;
        }
        if !position.breakeven_active && position.pnl_ratio(price) < trailing.activation {
            return;
        }

        let raw = position.best_price * (Decimal::ONE - position.side.sign() * trailing.distance);
        let candidate = self.gateway.precision().round_price(raw);

        if !position.improves_stop(candidate) {
            return;
        }
        if (candidate - position.stop_price).abs() < trailing.min_step * position.entry_price {
            return;
        }
        if !position.side.is_favourable(price, candidate) {
            return;
        }

        self.move_stop(position, candidate, "trailing", summary).await;
    }

    async fn move_stop(
        &self,
        position: &mut Position,
        stop_price: Decimal,
        reason: &'static str,
        summary: &mut FastCycleSummary,
    ) -> StopMove {
        match self
            .gateway
            .move_stop(position.side, &position.stop_order_id, stop_price)
            .await
        {
            Ok(order_id) => {
                tracing::info!(
                    position_id = %position.id,
                    from = %position.stop_price,
                    to = %stop_price,
                    order_id = %order_id,
                    reason,
                    "Stop moved"
                );
                position.stop_price = stop_price;
                position.stop_order_id = order_id;
                summary.stop_moves += 1;
                StopMove::Moved
            }
            Err(e) => {
                tracing::error!(position_id = %position.id, reason, error = %e, "Stop move failed");
                summary.errors.push(format!("{} {reason} stop: {e}", position.id));
                StopMove::Failed
            }
        }
    }

    // ------------------------------------------------------------------
    // Averaging down
    // ------------------------------------------------------------------

    /// Add an equal quantity once the adverse move reaches the configured
    /// fraction of the initial stop distance.
    async fn average_down(
        &self,
        position: &mut Position,
        price: Decimal,
        summary: &mut FastCycleSummary,
    ) {
        let averaging = &self.config.averaging;
        if !averaging.enabled || position.averaged || position.tp_level_index > 0 {
            return;
        }

        let risk = position.initial_risk();
        let adverse = (position.entry_price - price) * position.side.sign();
        if risk <= Decimal::ZERO || adverse < averaging.trigger_fraction * risk {
            return;
        }

        let (allowed, reason) = self.ledger.can_trade();
        if !allowed {
            tracing::info!(position_id = %position.id, reason = %reason, "Averaging skipped");
            return;
        }

        // One shot, whatever the outcome.
        position.averaged = true;

        match self
            .gateway
            .add_to_position(position.side, position.quantity)
            .await
        {
            Ok(fill) => {
                let total = position.quantity + fill.quantity;
                let entry = (position.entry_price * position.quantity + fill.price * fill.quantity)
                    / total;

                tracing::info!(
                    position_id = %position.id,
                    added = %fill.quantity,
                    fill_price = %fill.price,
                    old_entry = %position.entry_price,
                    new_entry = %entry,
                    "Averaged down"
                );

                position.entry_price = entry;
                position.quantity = total;
                position.original_quantity += fill.quantity;
            }
            Err(e) => {
                tracing::error!(position_id = %position.id, error = %e, "Averaging order failed");
                summary.errors.push(format!("{} averaging: {e}", position.id));
            }
        }
    }
}
