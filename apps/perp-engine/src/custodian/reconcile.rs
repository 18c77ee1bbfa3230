//! Slow cycle: reconcile the registry against the venue.
//!
//! Each hedge side is compared independently:
//!
//! ```text
//! local  remote
//!   -      -     nothing to do
//!   -      +     ORPHAN        adopt, protect (or close if unprotectable)
//!   +      -     GHOST         purge, book estimated exit
//!   +      +     UNPROTECTED   re-place stop (or close)
//!                QUANTITY_DRIFT sync local quantity
//! ```
//!
//! Afterwards every resident stop on the side that no position refers to is
//! cancelled (STALE_ORDER). Against unchanged remote state a second pass
//! finds nothing and sends nothing.

use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::execution::ExecutionError;
use crate::models::{Position, PositionStatus, Side, TradeMode};
use crate::observability::{record_reconciliation_finding, update_open_positions};
use crate::venue::{RemoteState, VenueError, VenuePosition};

use super::{CustodianError, Finding, FindingKind, PositionCustodian, ReconciliationReport, Severity};

impl PositionCustodian {
    /// Run one slow cycle.
    ///
    /// # Errors
    ///
    /// Returns the venue error if remote positions or orders cannot be
    /// read. Nothing is changed in that case.
    pub async fn reconcile(&self) -> Result<ReconciliationReport, CustodianError> {
        let started = Instant::now();
        let remote = self.gateway.fetch_remote_state().await?;
        let price = match self.gateway.last_price().await {
            Ok(price) => Some(price),
            Err(e) => {
                tracing::warn!(error = %e, "Last price unavailable during reconciliation");
                None
            }
        };

        let mut report = ReconciliationReport::new(remote.positions.len(), remote.open_orders.len());
        for side in Side::ALL {
            self.reconcile_side(side, &remote, price, &mut report).await;
        }

        for finding in &report.findings {
            record_reconciliation_finding(finding.kind.as_str());
        }
        update_open_positions(self.registry.len());
        report.completed_at = Utc::now();
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if report.is_clean() {
            tracing::debug!(matched = report.matched, "Reconciliation clean");
        } else {
            tracing::info!(
                findings = report.findings.len(),
                critical = report.has_critical(),
                duration_ms = report.duration_ms,
                "Reconciliation healed drift"
            );
        }
        Ok(report)
    }

    async fn reconcile_side(
        &self,
        side: Side,
        remote: &RemoteState,
        price: Option<Decimal>,
        report: &mut ReconciliationReport,
    ) {
        let local = self.registry.by_side(side);

        match (local.is_empty(), remote.position(side)) {
            (true, None) => {}
            (true, Some(venue_position)) => {
                self.adopt_orphan(venue_position, remote, price, report).await;
            }
            (false, None) => {
                for position in local {
                    self.purge_ghost(position, remote, price, report);
                }
            }
            (false, Some(venue_position)) => {
                self.check_side(local, venue_position, remote, report).await;
            }
        }

        self.cancel_stale_stops(side, remote, report).await;
    }

    // ------------------------------------------------------------------
    // ORPHAN
    // ------------------------------------------------------------------

    async fn adopt_orphan(
        &self,
        venue_position: &VenuePosition,
        remote: &RemoteState,
        price: Option<Decimal>,
        report: &mut ReconciliationReport,
    ) {
        let side = venue_position.side;
        let entry = venue_position.entry_price;
        let settings = self.modes.settings(TradeMode::Manual);
        let precision = self.gateway.precision();
        let detail = format!(
            "remote {side} {} @ {entry} not tracked",
            venue_position.quantity
        );

        let resident = remote
            .stops_for(side)
            .find_map(|o| o.stop_price.map(|p| (p, o.order_id.clone())));

        let (stop_price, stop_order_id, action) = if let Some((stop_price, order_id)) = resident {
            (stop_price, order_id, "adopted with resident stop".to_string())
        } else {
            let stop_price =
                precision.round_price(entry * (Decimal::ONE - side.sign() * settings.stop_pct));
            let reference = price.unwrap_or(entry);

            let placed = if side.is_favourable(reference, stop_price) {
                self.gateway.place_stop(side, stop_price).await
            } else {
                Err(ExecutionError::ProtectionFailed {
                    reason: format!("price {reference} already beyond default stop {stop_price}"),
                })
            };

            match placed {
                Ok(order_id) => (stop_price, order_id, format!("adopted, stop placed at {stop_price}")),
                Err(e) => {
                    tracing::error!(side = %side, error = %e, "Orphan cannot be protected, closing side");
                    let (action, severity) = self.flatten_side(side, venue_position.quantity).await;
                    report.findings.push(Finding {
                        kind: FindingKind::Orphan,
                        side,
                        position_id: None,
                        detail,
                        action,
                        severity,
                    });
                    return;
                }
            }
        };

        let position = Position {
            id: format!(
                "adopted-{}-{}",
                side.as_str().to_lowercase(),
                Utc::now().timestamp_millis()
            ),
            side,
            quantity: venue_position.quantity,
            original_quantity: venue_position.quantity,
            entry_price: entry,
            stop_price,
            initial_stop_price: stop_price,
            stop_order_id,
            take_profits: settings
                .tp_distances
                .iter()
                .map(|d| precision.round_price(entry * (Decimal::ONE + side.sign() * d)))
                .collect(),
            tp_splits: settings.tp_splits.clone(),
            tp_level_index: 0,
            breakeven_active: false,
            best_price: price.map_or(entry, |p| side.better_price(entry, p)),
            averaged: false,
            mode: TradeMode::Manual,
            status: PositionStatus::Open,
            realized_pnl: Decimal::ZERO,
            leverage: self.leverage,
            opened_at: Utc::now(),
        };

        tracing::info!(
            position_id = %position.id,
            side = %side,
            quantity = %position.quantity,
            entry_price = %entry,
            stop_price = %position.stop_price,
            "Orphan position adopted"
        );
        report.findings.push(Finding {
            kind: FindingKind::Orphan,
            side,
            position_id: Some(position.id.clone()),
            detail,
            action,
            severity: Severity::Info,
        });
        self.registry.upsert(position);
    }

    /// Close `quantity` on `side` at market. Returns the finding action and
    /// its severity.
    async fn flatten_side(&self, side: Side, quantity: Decimal) -> (String, Severity) {
        match self.gateway.close_quantity(side, quantity).await {
            Ok(fill) => (
                format!("closed {} at {}", fill.quantity, fill.price),
                Severity::Warning,
            ),
            Err(ExecutionError::Venue(VenueError::NoPosition)) => {
                ("side already flat".to_string(), Severity::Warning)
            }
            Err(e) => {
                tracing::error!(side = %side, error = %e, "Failed to close unprotected side");
                (format!("close failed: {e}"), Severity::Critical)
            }
        }
    }

    // ------------------------------------------------------------------
    // GHOST
    // ------------------------------------------------------------------

    fn purge_ghost(
        &self,
        position: Position,
        remote: &RemoteState,
        price: Option<Decimal>,
        report: &mut ReconciliationReport,
    ) {
        let stop_resident = remote.has_order(&position.stop_order_id);
        let exit_price = if stop_resident {
            price.unwrap_or(position.stop_price)
        } else {
            position.stop_price
        };

        let id = position.id.clone();
        let side = position.side;
        let pnl = self.retire(position, exit_price, "GHOST");

        report.findings.push(Finding {
            kind: FindingKind::Ghost,
            side,
            position_id: Some(id),
            detail: format!("no remote {side} position"),
            action: format!("purged, estimated exit {exit_price}, pnl {pnl}"),
            severity: Severity::Info,
        });
    }

    // ------------------------------------------------------------------
    // UNPROTECTED / QUANTITY_DRIFT
    // ------------------------------------------------------------------

    async fn check_side(
        &self,
        local: Vec<Position>,
        venue_position: &VenuePosition,
        remote: &RemoteState,
        report: &mut ReconciliationReport,
    ) {
        let side = venue_position.side;
        let findings_before = report.findings.len();
        let single = local.len() == 1;

        let mut claimed: HashSet<String> = self
            .registry
            .all()
            .into_iter()
            .map(|p| p.stop_order_id)
            .collect();

        for mut position in local {
            if !remote.has_order(&position.stop_order_id) {
                let Some(protected) = self
                    .restore_stop(position, remote, &mut claimed, report)
                    .await
                else {
                    continue;
                };
                position = protected;
            }

            if single {
                self.sync_quantity(position, venue_position, report);
            }
        }

        if report.findings.len() == findings_before {
            report.matched += 1;
        }
    }

    /// Give `position` a resident stop again. Returns `None` if the position
    /// had to be closed instead.
    async fn restore_stop(
        &self,
        mut position: Position,
        remote: &RemoteState,
        claimed: &mut HashSet<String>,
        report: &mut ReconciliationReport,
    ) -> Option<Position> {
        let side = position.side;
        let detail = format!("stop {} not resident", position.stop_order_id);

        let unclaimed = remote
            .stops_for(side)
            .find(|o| o.stop_price.is_some() && !claimed.contains(&o.order_id));

        let action = if let Some(order) = unclaimed {
            position.stop_order_id = order.order_id.clone();
            if let Some(stop_price) = order.stop_price {
                position.stop_price = stop_price;
            }
            format!("adopted resident stop {}", order.order_id)
        } else {
            match self.gateway.place_stop(side, position.stop_price).await {
                Ok(order_id) => {
                    position.stop_order_id = order_id;
                    format!("stop re-placed at {}", position.stop_price)
                }
                Err(e) => {
                    tracing::error!(
                        position_id = %position.id,
                        stop_price = %position.stop_price,
                        error = %e,
                        "Stop cannot be restored, closing position"
                    );
                    self.close_unprotected(position, detail, report).await;
                    return None;
                }
            }
        };

        tracing::info!(
            position_id = %position.id,
            stop_order_id = %position.stop_order_id,
            stop_price = %position.stop_price,
            "Protection restored"
        );
        claimed.insert(position.stop_order_id.clone());
        report.findings.push(Finding {
            kind: FindingKind::Unprotected,
            side,
            position_id: Some(position.id.clone()),
            detail,
            action,
            severity: Severity::Info,
        });
        self.registry.upsert(position.clone());
        Some(position)
    }

    async fn close_unprotected(
        &self,
        position: Position,
        detail: String,
        report: &mut ReconciliationReport,
    ) {
        let side = position.side;
        let id = position.id.clone();

        let (action, severity) = match self.gateway.close_quantity(side, position.quantity).await {
            Ok(fill) => {
                let pnl = self.retire(position, fill.price, "UNPROTECTED");
                (format!("closed at {}, pnl {pnl}", fill.price), Severity::Warning)
            }
            Err(ExecutionError::Venue(VenueError::NoPosition)) => {
                let exit_price = position.stop_price;
                self.retire(position, exit_price, "UNPROTECTED");
                ("side already flat".to_string(), Severity::Warning)
            }
            Err(e) => (format!("close failed: {e}"), Severity::Critical),
        };

        report.findings.push(Finding {
            kind: FindingKind::Unprotected,
            side,
            position_id: Some(id),
            detail,
            action,
            severity,
        });
    }

    fn sync_quantity(
        &self,
        mut position: Position,
        venue_position: &VenuePosition,
        report: &mut ReconciliationReport,
    ) {
        let step = self.gateway.precision().quantity_step;
        let drift = (venue_position.quantity - position.quantity).abs();
        if drift <= step {
            return;
        }

        tracing::info!(
            position_id = %position.id,
            local = %position.quantity,
            remote = %venue_position.quantity,
            "Quantity drift synced"
        );
        report.findings.push(Finding {
            kind: FindingKind::QuantityDrift,
            side: position.side,
            position_id: Some(position.id.clone()),
            detail: format!(
                "local {} vs remote {}",
                position.quantity, venue_position.quantity
            ),
            action: "local quantity synced".to_string(),
            severity: Severity::Info,
        });

        position.quantity = venue_position.quantity;
        position.original_quantity = position.original_quantity.max(venue_position.quantity);
        self.registry.upsert(position);
    }

    // ------------------------------------------------------------------
    // STALE_ORDER
    // ------------------------------------------------------------------

    async fn cancel_stale_stops(
        &self,
        side: Side,
        remote: &RemoteState,
        report: &mut ReconciliationReport,
    ) {
        let referenced: HashSet<String> = self
            .registry
            .all()
            .into_iter()
            .map(|p| p.stop_order_id)
            .collect();

        for order in remote
            .stops_for(side)
            .filter(|o| !referenced.contains(&o.order_id))
        {
            let action = match self.gateway.cancel_order(&order.order_id).await {
                Ok(()) => "cancelled".to_string(),
                Err(e) => format!("cancel failed: {e}"),
            };
            tracing::info!(order_id = %order.order_id, side = %side, action = %action, "Stale stop");
            report.findings.push(Finding {
                kind: FindingKind::StaleOrder,
                side,
                position_id: None,
                detail: format!(
                    "stop {} at {} has no position",
                    order.order_id,
                    order.stop_price.unwrap_or(Decimal::ZERO)
                ),
                action,
                severity: Severity::Info,
            });
        }
    }
}
