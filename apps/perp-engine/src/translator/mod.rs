//! Signal translator.
//!
//! Turns an abstract [`Signal`] into a risk-sized [`OrderPlan`], applies the
//! admission checks and hands accepted plans to the gateway:
//!
//! 1. capacity: fewer than `max_open_positions` positions open
//! 2. slot: no position in the signal's slot group (manual signals and
//!    stacking modes skip this)
//! 3. ledger: the daily circuit breaker allows new risk
//!
//! Every failure comes back as a [`Rejection`] with a readable reason.

use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::{CapitalConfig, ModesConfig};
use crate::custodian::PositionCustodian;
use crate::execution::{ExecutionError, ExecutionGateway, client_order_id};
use crate::ledger::CapitalLedger;
use crate::models::{EntryOrder, OrderPlan, Position, Signal, StopSpec, TradeMode};

/// Why a signal did not become a position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Too many positions open.
    #[error("capacity full: {open} of {max} positions open")]
    CapacityFull {
        /// Positions currently open.
        open: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Another position already holds the slot.
    #[error("slot '{slot}' occupied")]
    SlotOccupied {
        /// Slot group name.
        slot: String,
    },

    /// The ledger refuses new risk.
    #[error("circuit breaker: {0}")]
    CircuitBreaker(String),

    /// The signal cannot be sized.
    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    /// The gateway did not open a protected position.
    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),
}

impl Rejection {
    /// Whether this rejection must be escalated to the supervisor.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Execution(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Whether the rejection came from a remote failure rather than a check.
    #[must_use]
    pub const fn is_execution_failure(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}

/// Signal translator.
#[derive(Debug)]
pub struct SignalTranslator {
    gateway: Arc<ExecutionGateway>,
    custodian: Arc<PositionCustodian>,
    ledger: Arc<CapitalLedger>,
    modes: ModesConfig,
    capital: CapitalConfig,
    structural_buffer: Decimal,
}

impl SignalTranslator {
    /// Create a translator.
    ///
    /// # Arguments
    ///
    /// * `gateway` - Executes accepted plans
    /// * `custodian` - Receives opened positions
    /// * `ledger` - Capital base and circuit breaker
    /// * `modes` - Per-mode sizing and protection
    /// * `capital` - Leverage and position cap
    /// * `structural_buffer` - Fraction a structural stop is pushed beyond its level
    #[must_use]
    pub fn new(
        gateway: Arc<ExecutionGateway>,
        custodian: Arc<PositionCustodian>,
        ledger: Arc<CapitalLedger>,
        modes: ModesConfig,
        capital: CapitalConfig,
        structural_buffer: Decimal,
    ) -> Self {
        Self {
            gateway,
            custodian,
            ledger,
            modes,
            capital,
            structural_buffer,
        }
    }

    /// Size and protect `signal` without sending anything.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::InvalidSignal`] if the price is not positive or
    /// the capital base is empty.
    pub fn plan(&self, signal: &Signal) -> Result<OrderPlan, Rejection> {
        let price = signal.entry_price();
        if price <= Decimal::ZERO {
            return Err(Rejection::InvalidSignal(format!(
                "price {price} must be positive"
            )));
        }

        let settings = self.modes.settings(signal.mode);
        let leverage = settings.leverage.unwrap_or(self.capital.leverage);
        let capital = self.ledger.capital();
        if capital <= Decimal::ZERO {
            return Err(Rejection::InvalidSignal(format!("capital {capital} is empty")));
        }

        let quantity = capital * settings.wallet_fraction * Decimal::from(leverage) / price;
        let sign = signal.side.sign();

        let stop = match signal.structural_stop {
            Some(level) if signal.side.is_favourable(price, level) => {
                StopSpec::Reference(level * (Decimal::ONE - sign * self.structural_buffer))
            }
            Some(level) => {
                tracing::warn!(
                    side = %signal.side,
                    price = %price,
                    level = %level,
                    "Structural stop on wrong side of price, using distance stop"
                );
                StopSpec::Distance(settings.stop_pct)
            }
            None => StopSpec::Distance(settings.stop_pct),
        };

        let take_profits = settings
            .tp_distances
            .iter()
            .map(|d| price * (Decimal::ONE + sign * d))
            .collect();

        Ok(OrderPlan {
            id: client_order_id(&signal.mode.as_str().to_lowercase()),
            side: signal.side,
            quantity,
            reference_price: price,
            entry: signal
                .limit_price
                .map_or(EntryOrder::Market, EntryOrder::Limit),
            stop,
            take_profits,
            tp_splits: settings.tp_splits.clone(),
            mode: signal.mode,
            leverage,
        })
    }

    /// Admission checks in order. The first failure wins.
    fn admit(&self, signal: &Signal) -> Result<(), Rejection> {
        let registry = self.custodian.registry();

        let open = registry.len();
        if open >= self.capital.max_open_positions {
            return Err(Rejection::CapacityFull {
                open,
                max: self.capital.max_open_positions,
            });
        }

        let settings = self.modes.settings(signal.mode);
        if !signal.is_manual() && !settings.allow_stacking {
            let same_slot: Vec<TradeMode> = self
                .modes
                .iter()
                .filter(|(_, s)| s.slot == settings.slot)
                .map(|(mode, _)| mode)
                .collect();
            if registry.any_in_modes(&same_slot) {
                return Err(Rejection::SlotOccupied {
                    slot: settings.slot.clone(),
                });
            }
        }

        let (allowed, reason) = self.ledger.can_trade();
        if !allowed {
            return Err(Rejection::CircuitBreaker(reason));
        }
        Ok(())
    }

    /// Admit, size and execute `signal`.
    ///
    /// On success the position is already registered with the custodian.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] naming the first failed check, or wrapping the
    /// gateway error.
    pub async fn submit(&self, signal: &Signal) -> Result<Position, Rejection> {
        if let Err(rejection) = self.admit(signal) {
            tracing::info!(
                side = %signal.side,
                mode = %signal.mode,
                reason = %rejection,
                "Signal rejected"
            );
            return Err(rejection);
        }

        let plan = self.plan(signal)?;
        tracing::info!(
            plan_id = %plan.id,
            side = %plan.side,
            mode = %plan.mode,
            quantity = %plan.quantity,
            reference_price = %plan.reference_price,
            indicative_stop = %plan.indicative_stop(),
            "Executing plan"
        );

        let position = self.gateway.execute(&plan).await.map_err(|e| {
            tracing::error!(plan_id = %plan.id, error = %e, "Plan execution failed");
            Rejection::from(e)
        })?;

        self.custodian.register(position.clone());
        if let Err(e) = self.ledger.record_trade_opened() {
            tracing::warn!(error = %e, "Failed to persist trade count");
        }
        Ok(position)
    }
}
