//! Position custodian.
//!
//! Owns the [`PositionRegistry`] and runs two cycles over it:
//!
//! - the fast cycle ([`PositionCustodian::run_fast_cycle`]) does local math
//!   against the latest price: take-profit ladder, breakeven, trailing stop
//!   and one-shot averaging down
//! - the slow cycle ([`PositionCustodian::reconcile`]) compares the registry
//!   with the venue and heals orphans, ghosts and unprotected positions
//!
//! Realized P&L from either cycle is booked with the [`CapitalLedger`].

mod fast;
mod reconcile;
mod registry;
mod report;

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::{CustodianConfig, ModesConfig};
use crate::execution::{ExecutionError, ExecutionGateway, Fill};
use crate::ledger::CapitalLedger;
use crate::models::{Position, PositionStatus, Side};
use crate::observability::update_open_positions;
use crate::persistence::{CsvLog, TradeJournalRow};
use crate::venue::VenueError;

pub use registry::PositionRegistry;
pub use report::{
    FastCycleSummary, Finding, FindingKind, ReconciliationReport, Severity, StatusReport,
};

/// Errors from custodian operations.
#[derive(Debug, Error)]
pub enum CustodianError {
    /// A gateway operation failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// A venue read failed.
    #[error(transparent)]
    Venue(#[from] VenueError),

    /// No position with that id.
    #[error("Position not found: {0}")]
    NotFound(String),
}

/// Outcome of a panic close.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseAllOutcome {
    /// Local positions purged.
    pub positions_closed: usize,
    /// Hedge sides flattened on the venue.
    pub sides_flattened: usize,
    /// Estimated P&L booked.
    pub realized_pnl: Decimal,
    /// Whether cancel-all was confirmed.
    pub orders_cancelled: bool,
}

/// Position custodian.
#[derive(Debug)]
pub struct PositionCustodian {
    gateway: Arc<ExecutionGateway>,
    ledger: Arc<CapitalLedger>,
    registry: PositionRegistry,
    config: CustodianConfig,
    modes: ModesConfig,
    leverage: u32,
    journal: Option<Arc<CsvLog<TradeJournalRow>>>,
}

impl PositionCustodian {
    /// Create a custodian.
    ///
    /// # Arguments
    ///
    /// * `gateway` - Order placement
    /// * `ledger` - Where realized P&L is booked
    /// * `registry` - Tracked positions (possibly restored from disk)
    /// * `config` - Cycle intervals and stop management settings
    /// * `modes` - Mode settings; `manual` is used for adopted positions
    /// * `leverage` - Leverage recorded on adopted positions
    #[must_use]
    pub fn new(
        gateway: Arc<ExecutionGateway>,
        ledger: Arc<CapitalLedger>,
        registry: PositionRegistry,
        config: CustodianConfig,
        modes: ModesConfig,
        leverage: u32,
    ) -> Self {
        Self {
            gateway,
            ledger,
            registry,
            config,
            modes,
            leverage,
            journal: None,
        }
    }

    /// Append every exit to `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<CsvLog<TradeJournalRow>>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Read-only view of tracked positions.
    #[must_use]
    pub const fn registry(&self) -> &PositionRegistry {
        &self.registry
    }

    /// Cycle settings.
    #[must_use]
    pub const fn config(&self) -> &CustodianConfig {
        &self.config
    }

    /// Start tracking a position opened by the gateway.
    pub fn register(&self, position: Position) {
        tracing::info!(
            position_id = %position.id,
            side = %position.side,
            mode = %position.mode,
            quantity = %position.quantity,
            entry_price = %position.entry_price,
            stop_price = %position.stop_price,
            "Position registered"
        );
        self.registry.upsert(position);
        update_open_positions(self.registry.len());
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    fn book_pnl(&self, amount: Decimal) {
        if let Err(e) = self.ledger.register_pnl(amount) {
            tracing::error!(pnl = %amount, error = %e, "Failed to persist realized P&L");
        }
    }

    fn journal_exit(&self, position: &Position, exit: Fill, pnl: Decimal, reason: &str) {
        if let Some(journal) = &self.journal {
            journal.record(&TradeJournalRow {
                position_id: position.id.clone(),
                timestamp: Utc::now(),
                mode: position.mode.to_string(),
                side: position.side.to_string(),
                entry_price: position.entry_price,
                exit_price: exit.price,
                quantity: exit.quantity,
                pnl,
                reason: reason.to_string(),
            });
        }
    }

    /// Book the exit of everything left in `position` and stop tracking it.
    fn retire(&self, mut position: Position, exit_price: Decimal, reason: &str) -> Decimal {
        let pnl = position.pnl_for(position.quantity, exit_price);
        self.book_pnl(pnl);
        self.journal_exit(
            &position,
            Fill {
                quantity: position.quantity,
                price: exit_price,
            },
            pnl,
            reason,
        );

        position.realized_pnl += pnl;
        position.quantity = Decimal::ZERO;
        position.status = PositionStatus::Closed;
        self.registry.remove(&position.id);
        update_open_positions(self.registry.len());

        tracing::info!(
            position_id = %position.id,
            exit_price = %exit_price,
            pnl = %pnl,
            total_pnl = %position.realized_pnl,
            reason,
            "Position closed"
        );
        pnl
    }

    async fn price_or(&self, fallback: Decimal) -> Decimal {
        match self.gateway.last_price().await {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!(error = %e, "Price unavailable, using fallback");
                fallback
            }
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Flatten both sides, cancel every order and purge the registry.
    ///
    /// Runs every step even when earlier ones fail.
    pub async fn close_all(&self) -> CloseAllOutcome {
        let mut outcome = CloseAllOutcome::default();
        let mut fills: Vec<(Side, Fill)> = Vec::new();

        for side in Side::ALL {
            match self.gateway.close_side(side).await {
                Ok(Some(fill)) => {
                    outcome.sides_flattened += 1;
                    fills.push((side, fill));
                }
                Ok(None) => {}
                Err(e) => tracing::error!(side = %side, error = %e, "Panic close failed for side"),
            }
        }

        outcome.orders_cancelled = self.gateway.cancel_all().await;

        let positions = self.registry.all();
        let fallback = positions.first().map_or(Decimal::ZERO, |p| p.entry_price);
        let last = self.price_or(fallback).await;
        for position in positions {
            let exit_price = fills
                .iter()
                .find(|(side, _)| *side == position.side)
                .map_or(last, |(_, fill)| fill.price);
            outcome.realized_pnl += self.retire(position, exit_price, "PANIC");
            outcome.positions_closed += 1;
        }

        tracing::warn!(
            positions = outcome.positions_closed,
            sides = outcome.sides_flattened,
            pnl = %outcome.realized_pnl,
            cancelled = outcome.orders_cancelled,
            "Panic close completed"
        );
        outcome
    }

    /// Close one position at market and cancel its stop.
    ///
    /// Returns the realized P&L.
    ///
    /// # Errors
    ///
    /// Returns [`CustodianError::NotFound`] for an unknown id, or the
    /// gateway error if the close is not accepted.
    pub async fn close_position(&self, id: &str) -> Result<Decimal, CustodianError> {
        let position = self
            .registry
            .get(id)
            .ok_or_else(|| CustodianError::NotFound(id.to_string()))?;

        let exit_price = match self
            .gateway
            .close_quantity(position.side, position.quantity)
            .await
        {
            Ok(fill) => fill.price,
            Err(ExecutionError::Venue(VenueError::NoPosition)) => {
                tracing::info!(position_id = %id, "Side already flat on venue");
                self.price_or(position.stop_price).await
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.gateway.cancel_order(&position.stop_order_id).await {
            tracing::warn!(position_id = %id, error = %e, "Failed to cancel stop of closed position");
        }
        Ok(self.retire(position, exit_price, "MANUAL"))
    }

    /// Place a fresh stop for every position, then reconcile.
    ///
    /// Returns how many stops were replaced.
    ///
    /// # Errors
    ///
    /// Returns the error of the follow-up reconciliation.
    pub async fn restore_protection(&self) -> Result<usize, CustodianError> {
        let mut replaced = 0;
        for mut position in self.registry.all() {
            match self
                .gateway
                .move_stop(position.side, &position.stop_order_id, position.stop_price)
                .await
            {
                Ok(order_id) => {
                    position.stop_order_id = order_id;
                    self.registry.upsert(position);
                    replaced += 1;
                }
                Err(e) => tracing::error!(
                    position_id = %position.id,
                    error = %e,
                    "Failed to refresh stop"
                ),
            }
        }
        self.reconcile().await?;
        Ok(replaced)
    }

    /// Cancel every resident order no position refers to, then reconcile.
    ///
    /// Returns how many orders were cancelled.
    ///
    /// # Errors
    ///
    /// Returns the venue error if remote state cannot be read.
    pub async fn clean_orders(&self) -> Result<usize, CustodianError> {
        let remote = self.gateway.fetch_remote_state().await?;
        let referenced: Vec<String> = self
            .registry
            .all()
            .into_iter()
            .map(|p| p.stop_order_id)
            .collect();

        let mut cancelled = 0;
        for order in remote
            .open_orders
            .iter()
            .filter(|o| !referenced.contains(&o.order_id))
        {
            match self.gateway.cancel_order(&order.order_id).await {
                Ok(()) => cancelled += 1,
                Err(e) => tracing::warn!(order_id = %order.order_id, error = %e, "Failed to cancel order"),
            }
        }

        tracing::info!(cancelled, "Unreferenced orders cleaned");
        self.reconcile().await?;
        Ok(cancelled)
    }

    /// Snapshot of positions and capital at `price`.
    #[must_use]
    pub fn status(&self, price: Option<Decimal>) -> StatusReport {
        StatusReport {
            price,
            positions: self.registry.all(),
            capital: self.ledger.snapshot(),
            can_trade: self.ledger.can_trade(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::harness;
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_close_position_books_pnl_and_cancels_stop() {
        let h = harness(CustodianConfig::default());
        let position = h.open_long().await;
        h.venue.set_price(dec!(102));

        let pnl = h.custodian.close_position(&position.id).await.unwrap();

        assert_eq!(pnl, dec!(10));
        assert!(h.custodian.registry().is_empty());
        assert!(h.venue.position(Side::Long).is_none());
        assert!(h.venue.resident_orders().is_empty());
        assert_eq!(h.ledger.snapshot().daily_realized_pnl, dec!(10));
    }

    #[tokio::test]
    async fn test_close_unknown_position() {
        let h = harness(CustodianConfig::default());
        assert!(matches!(
            h.custodian.close_position("nope").await,
            Err(CustodianError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_all_flattens_everything() {
        let h = harness(CustodianConfig::default());
        h.open_long().await;
        h.venue.inject_position(Side::Short, dec!(1), dec!(100));
        h.venue.set_price(dec!(99));

        let outcome = h.custodian.close_all().await;

        assert_eq!(outcome.positions_closed, 1);
        assert_eq!(outcome.sides_flattened, 2);
        assert_eq!(outcome.realized_pnl, dec!(-5));
        assert!(outcome.orders_cancelled);
        assert!(h.venue.position(Side::Long).is_none());
        assert!(h.venue.position(Side::Short).is_none());
        assert!(h.venue.resident_orders().is_empty());
        assert!(h.custodian.registry().is_empty());
    }

    #[tokio::test]
    async fn test_restore_protection_replaces_stops() {
        let h = harness(CustodianConfig::default());
        let position = h.open_long().await;

        let replaced = h.custodian.restore_protection().await.unwrap();

        assert_eq!(replaced, 1);
        let refreshed = h.custodian.registry().get(&position.id).unwrap();
        assert_ne!(refreshed.stop_order_id, position.stop_order_id);
        assert_eq!(refreshed.stop_price, dec!(98));
        let resident = h.venue.resident_orders();
        assert_eq!(resident.len(), 1);
        assert_eq!(resident[0].order_id, refreshed.stop_order_id);
    }

    #[tokio::test]
    async fn test_clean_orders_cancels_unreferenced() {
        let h = harness(CustodianConfig::default());
        let position = h.open_long().await;
        h.venue.inject_stop(Side::Long, dec!(90));

        let cancelled = h.custodian.clean_orders().await.unwrap();

        assert_eq!(cancelled, 1);
        let resident = h.venue.resident_orders();
        assert_eq!(resident.len(), 1);
        assert_eq!(resident[0].order_id, position.stop_order_id);
    }

    #[tokio::test]
    async fn test_status_report_lists_positions() {
        let h = harness(CustodianConfig::default());
        h.open_long().await;

        let status = h.custodian.status(Some(dec!(101)));
        assert_eq!(status.positions.len(), 1);
        assert_eq!(status.unrealized_pnl(), dec!(5));
        let text = status.to_string();
        assert!(text.contains("plan-1"));
        assert!(text.contains("trading"));
    }
}
