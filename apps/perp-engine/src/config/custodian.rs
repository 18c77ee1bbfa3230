//! Position custodian cycle settings.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Position custodian configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodianConfig {
    /// Fast (local math) cycle interval.
    #[serde(default = "default_fast_interval_ms")]
    pub fast_interval_ms: u64,
    /// Slow (reconciliation) cycle interval.
    #[serde(default = "default_slow_interval_ms")]
    pub slow_interval_ms: u64,
    /// Profit ratio that moves the stop to breakeven.
    #[serde(default = "default_breakeven_trigger")]
    pub breakeven_trigger: Decimal,
    /// Offset beyond entry for the breakeven stop.
    #[serde(default = "default_breakeven_offset")]
    pub breakeven_offset: Decimal,
    /// Trailing stop settings.
    #[serde(default)]
    pub trailing: TrailingConfig,
    /// One-shot averaging down settings.
    #[serde(default)]
    pub averaging: AveragingConfig,
}

impl Default for CustodianConfig {
    fn default() -> Self {
        Self {
            fast_interval_ms: default_fast_interval_ms(),
            slow_interval_ms: default_slow_interval_ms(),
            breakeven_trigger: default_breakeven_trigger(),
            breakeven_offset: default_breakeven_offset(),
            trailing: TrailingConfig::default(),
            averaging: AveragingConfig::default(),
        }
    }
}

impl CustodianConfig {
    /// Fast cycle interval.
    #[must_use]
    pub const fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.fast_interval_ms)
    }

    /// Slow cycle interval.
    #[must_use]
    pub const fn slow_interval(&self) -> Duration {
        Duration::from_millis(self.slow_interval_ms)
    }
}

/// Trailing stop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingConfig {
    /// Enable trailing.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Profit ratio that activates trailing before breakeven has latched.
    #[serde(default = "default_trail_activation")]
    pub activation: Decimal,
    /// Stop distance behind the best price.
    #[serde(default = "default_trail_distance")]
    pub distance: Decimal,
    /// Minimum stop improvement, as a fraction of entry, worth an order.
    #[serde(default = "default_trail_min_step")]
    pub min_step: Decimal,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            activation: default_trail_activation(),
            distance: default_trail_distance(),
            min_step: default_trail_min_step(),
        }
    }
}

/// One-shot averaging down settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AveragingConfig {
    /// Enable averaging down.
    #[serde(default)]
    pub enabled: bool,
    /// Fraction of the initial stop distance the price must move against
    /// the position before averaging.
    #[serde(default = "default_averaging_trigger")]
    pub trigger_fraction: Decimal,
}

impl Default for AveragingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_fraction: default_averaging_trigger(),
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_fast_interval_ms() -> u64 {
    1_000
}

const fn default_slow_interval_ms() -> u64 {
    10_000
}

fn default_breakeven_trigger() -> Decimal {
    dec!(0.008)
}

fn default_breakeven_offset() -> Decimal {
    dec!(0.001)
}

fn default_trail_activation() -> Decimal {
    dec!(0.015)
}

fn default_trail_distance() -> Decimal {
    dec!(0.01)
}

fn default_trail_min_step() -> Decimal {
    dec!(0.001)
}

fn default_averaging_trigger() -> Decimal {
    dec!(0.5)
}
