//! Reconciliation and status report types.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::ledger::CapitalState;
use crate::models::{Position, Side};

/// Kind of disagreement between local and remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    /// Remote position with no local counterpart.
    Orphan,
    /// Local position with no remote counterpart.
    Ghost,
    /// Local position whose stop is not resident.
    Unprotected,
    /// Sides agree but quantities differ by more than one step.
    QuantityDrift,
    /// Resident stop no local position refers to.
    StaleOrder,
}

impl FindingKind {
    /// Tag used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Orphan => "ORPHAN",
            Self::Ghost => "GHOST",
            Self::Unprotected => "UNPROTECTED",
            Self::QuantityDrift => "QUANTITY_DRIFT",
            Self::StaleOrder => "STALE_ORDER",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    /// Healed automatically.
    Info,
    /// Healed by closing exposure.
    Warning,
    /// Could not be healed; a side may be unprotected.
    Critical,
}

/// One reconciliation finding and what was done about it.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    /// Kind of finding.
    pub kind: FindingKind,
    /// Hedge side concerned.
    pub side: Side,
    /// Local position concerned, if any.
    pub position_id: Option<String>,
    /// What was found.
    pub detail: String,
    /// What was done.
    pub action: String,
    /// Severity.
    pub severity: Severity,
}

/// Result of one slow cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    /// Findings, in the order they were handled.
    pub findings: Vec<Finding>,
    /// Sides where local and remote agreed without action.
    pub matched: usize,
    /// Remote positions compared.
    pub positions_compared: usize,
    /// Resident orders compared.
    pub orders_compared: usize,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ReconciliationReport {
    pub(crate) fn new(positions_compared: usize, orders_compared: usize) -> Self {
        Self {
            findings: Vec::new(),
            matched: 0,
            positions_compared,
            orders_compared,
            completed_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Whether nothing needed fixing.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Number of findings of `kind`.
    #[must_use]
    pub fn count(&self, kind: FindingKind) -> usize {
        self.findings.iter().filter(|f| f.kind == kind).count()
    }

    /// Check if any finding could not be healed.
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity == Severity::Critical)
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "Reconciliation clean ({} sides matched)", self.matched);
        }
        writeln!(f, "Reconciliation: {} finding(s)", self.findings.len())?;
        for finding in &self.findings {
            writeln!(
                f,
                "  {} {} {}: {} -> {}",
                finding.kind,
                finding.side,
                finding.position_id.as_deref().unwrap_or("-"),
                finding.detail,
                finding.action
            )?;
        }
        Ok(())
    }
}

/// Outcome of a fast cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FastCycleSummary {
    /// Positions evaluated.
    pub positions: usize,
    /// Sum of unrealized P&L at the cycle price.
    pub unrealized_pnl: Decimal,
    /// Take-profit slices filled.
    pub take_profits: usize,
    /// Stops moved (breakeven or trailing).
    pub stop_moves: usize,
    /// Positions that reached zero quantity.
    pub closed: usize,
    /// Failures, one line each.
    pub errors: Vec<String>,
}

/// Operator-facing snapshot of the book.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Price the report was computed at, if known.
    pub price: Option<Decimal>,
    /// Tracked positions.
    pub positions: Vec<Position>,
    /// Ledger state.
    pub capital: CapitalState,
    /// Whether the ledger permits new risk, and why.
    pub can_trade: (bool, String),
}

impl StatusReport {
    /// Sum of unrealized P&L at `price`.
    #[must_use]
    pub fn unrealized_pnl(&self) -> Decimal {
        self.price.map_or(Decimal::ZERO, |price| {
            self.positions
                .iter()
                .map(|p| p.unrealized_pnl(price))
                .sum()
        })
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let price = self
            .price
            .map_or_else(|| "n/a".to_string(), |p| p.to_string());
        writeln!(
            f,
            "Price {price} | capital {} | day P&L {} | trades today {} | {}",
            self.capital.base_capital,
            self.capital.daily_realized_pnl,
            self.capital.trades_today,
            if self.can_trade.0 {
                "trading".to_string()
            } else {
                format!("halted: {}", self.can_trade.1)
            }
        )?;
        if self.positions.is_empty() {
            return writeln!(f, "No open positions");
        }
        for p in &self.positions {
            let upnl = self
                .price
                .map_or(Decimal::ZERO, |price| p.unrealized_pnl(price));
            writeln!(
                f,
                "  {} {} {} qty {} @ {} stop {} tp {}/{} {}uPnL {}",
                p.id,
                p.mode,
                p.side,
                p.quantity,
                p.entry_price,
                p.stop_price,
                p.tp_level_index,
                p.take_profits.len(),
                if p.breakeven_active { "BE " } else { "" },
                upnl.round_dp(2)
            )?;
        }
        write!(f, "Total uPnL {}", self.unrealized_pnl().round_dp(2))
    }
}
