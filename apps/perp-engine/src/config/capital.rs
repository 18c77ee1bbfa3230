//! Capital and risk limits.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Capital base, leverage and the daily circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    /// Starting risk capital in quote currency.
    #[serde(default = "default_base_capital")]
    pub base_capital: Decimal,
    /// Default leverage applied to every mode without an override.
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Add realized P&L to the capital base.
    #[serde(default)]
    pub compounding: bool,
    /// Trading halts while capital is below this floor.
    #[serde(default = "default_min_capital")]
    pub min_capital: Decimal,
    /// Daily loss, as a fraction of day-start capital, that halts trading.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss_fraction: Decimal,
    /// Daily profit, as a fraction of day-start capital, that halts trading.
    #[serde(default = "default_daily_target")]
    pub daily_profit_target_fraction: Option<Decimal>,
    /// Maximum simultaneously open positions.
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            base_capital: default_base_capital(),
            leverage: default_leverage(),
            compounding: false,
            min_capital: default_min_capital(),
            max_daily_loss_fraction: default_max_daily_loss(),
            daily_profit_target_fraction: default_daily_target(),
            max_open_positions: default_max_open_positions(),
        }
    }
}

fn default_base_capital() -> Decimal {
    dec!(1000)
}

const fn default_leverage() -> u32 {
    5
}

fn default_min_capital() -> Decimal {
    dec!(10)
}

fn default_max_daily_loss() -> Decimal {
    dec!(0.04)
}

fn default_daily_target() -> Option<Decimal> {
    Some(dec!(0.06))
}

const fn default_max_open_positions() -> usize {
    3
}
