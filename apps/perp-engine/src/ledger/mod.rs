//! Capital ledger.
//!
//! Tracks the risk capital base and realized P&L for the trading day, and
//! acts as the daily circuit breaker:
//!
//! ```text
//! capital < min_capital                               → halt
//! daily_pnl < 0 && |daily_pnl| / day_start >= max     → halt
//! target set && daily_pnl >= day_start * target       → halt
//! ```
//!
//! State is persisted after every mutation and reset on date rollover.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CapitalConfig;
use crate::observability::set_daily_pnl;
use crate::persistence::{JsonSnapshot, PersistenceError};

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger snapshot could not be read or written.
    #[error("Ledger persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Persisted ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapitalState {
    /// Capital used for sizing.
    pub base_capital: Decimal,
    /// Capital at the start of `trading_day`.
    pub day_start_capital: Decimal,
    /// Realized P&L booked on `trading_day`.
    pub daily_realized_pnl: Decimal,
    /// UTC date the daily counters belong to.
    pub trading_day: NaiveDate,
    /// Whether realized P&L feeds back into `base_capital`.
    pub compounding: bool,
    /// Positions opened on `trading_day`.
    #[serde(default)]
    pub trades_today: u32,
    /// Sum of winning exits since the ledger was created.
    #[serde(default)]
    pub gross_profit: Decimal,
    /// Sum of losing exits since the ledger was created (positive number).
    #[serde(default)]
    pub gross_loss: Decimal,
}

impl CapitalState {
    fn fresh(config: &CapitalConfig, today: NaiveDate) -> Self {
        Self {
            base_capital: config.base_capital,
            day_start_capital: config.base_capital,
            daily_realized_pnl: Decimal::ZERO,
            trading_day: today,
            compounding: config.compounding,
            trades_today: 0,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
        }
    }

    /// Reset daily counters if `today` is a new day. Returns whether it did.
    fn roll_over(&mut self, today: NaiveDate) -> bool {
        if today == self.trading_day {
            return false;
        }
        self.trading_day = today;
        self.day_start_capital = self.base_capital;
        self.daily_realized_pnl = Decimal::ZERO;
        self.trades_today = 0;
        true
    }
}

/// Capital ledger and daily circuit breaker.
#[derive(Debug)]
pub struct CapitalLedger {
    config: CapitalConfig,
    state: Mutex<CapitalState>,
    snapshot: Option<JsonSnapshot<CapitalState>>,
}

impl CapitalLedger {
    /// In-memory ledger starting from the configured base capital.
    #[must_use]
    pub fn new(config: CapitalConfig) -> Self {
        let state = CapitalState::fresh(&config, Utc::now().date_naive());
        Self {
            config,
            state: Mutex::new(state),
            snapshot: None,
        }
    }

    /// Ledger persisted in `snapshot`, resuming from it if it exists.
    ///
    /// Without compounding the capital base always comes from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read.
    pub fn open(
        config: CapitalConfig,
        snapshot: JsonSnapshot<CapitalState>,
    ) -> Result<Self, LedgerError> {
        let today = Utc::now().date_naive();
        let state = match snapshot.load()? {
            Some(mut state) => {
                state.compounding = config.compounding;
                if !config.compounding {
                    state.base_capital = config.base_capital;
                }
                tracing::info!(
                    base_capital = %state.base_capital,
                    daily_pnl = %state.daily_realized_pnl,
                    trading_day = %state.trading_day,
                    "Capital ledger restored"
                );
                state
            }
            None => CapitalState::fresh(&config, today),
        };

        let ledger = Self {
            config,
            state: Mutex::new(state),
            snapshot: Some(snapshot),
        };
        {
            let mut state = ledger.lock();
            state.roll_over(today);
            ledger.persist(&state)?;
        }
        Ok(ledger)
    }

    fn lock(&self) -> MutexGuard<'_, CapitalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &CapitalState) -> Result<(), LedgerError> {
        set_daily_pnl(state.daily_realized_pnl);
        if let Some(snapshot) = &self.snapshot {
            snapshot.save(state)?;
        }
        Ok(())
    }

    /// Whether new risk may be opened now, with the reason.
    #[must_use]
    pub fn can_trade(&self) -> (bool, String) {
        self.can_trade_at(Utc::now().date_naive())
    }

    /// Whether new risk may be opened on `today`, with the reason.
    #[must_use]
    pub fn can_trade_at(&self, today: NaiveDate) -> (bool, String) {
        let mut state = self.lock();
        if state.roll_over(today) {
            tracing::info!(trading_day = %today, capital = %state.base_capital, "New trading day");
            if let Err(e) = self.persist(&state) {
                tracing::warn!(error = %e, "Failed to persist ledger rollover");
            }
        }

        if state.base_capital < self.config.min_capital {
            return (
                false,
                format!(
                    "capital {} below minimum {}",
                    state.base_capital, self.config.min_capital
                ),
            );
        }

        let pnl = state.daily_realized_pnl;
        let day_start = state.day_start_capital;

        if pnl < Decimal::ZERO && day_start > Decimal::ZERO {
            let loss_fraction = -pnl / day_start;
            if loss_fraction >= self.config.max_daily_loss_fraction {
                return (
                    false,
                    format!(
                        "daily loss {} reached limit of {} of {}",
                        pnl, self.config.max_daily_loss_fraction, day_start
                    ),
                );
            }
        }

        if let Some(target) = self.config.daily_profit_target_fraction {
            let goal = day_start * target;
            if pnl >= goal {
                return (
                    false,
                    format!("daily profit target reached: {pnl} >= {goal}"),
                );
            }
        }

        (true, "ok".to_string())
    }

    /// Book realized P&L and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written. The in-memory
    /// state is updated regardless.
    pub fn register_pnl(&self, amount: Decimal) -> Result<(), LedgerError> {
        self.register_pnl_at(amount, Utc::now().date_naive())
    }

    /// Book realized P&L on `today` and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn register_pnl_at(&self, amount: Decimal, today: NaiveDate) -> Result<(), LedgerError> {
        let mut state = self.lock();
        state.roll_over(today);

        state.daily_realized_pnl += amount;
        if amount >= Decimal::ZERO {
            state.gross_profit += amount;
        } else {
            state.gross_loss -= amount;
        }
        if state.compounding {
            state.base_capital = (state.base_capital + amount).max(self.config.min_capital);
        }

        tracing::info!(
            pnl = %amount,
            daily_pnl = %state.daily_realized_pnl,
            capital = %state.base_capital,
            "Realized P&L booked"
        );
        self.persist(&state)
    }

    /// Count a newly opened position.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn record_trade_opened(&self) -> Result<(), LedgerError> {
        let mut state = self.lock();
        state.roll_over(Utc::now().date_naive());
        state.trades_today += 1;
        self.persist(&state)
    }

    /// Capital used for sizing.
    #[must_use]
    pub fn capital(&self) -> Decimal {
        self.lock().base_capital
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> CapitalState {
        self.lock().clone()
    }

    /// Configured limits.
    #[must_use]
    pub const fn config(&self) -> &CapitalConfig {
        &self.config
    }
}
