//! Per-mode sizing and protection settings.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::TradeMode;

/// Settings applied to positions opened in one [`TradeMode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSettings {
    /// Fraction of capital committed as margin.
    pub wallet_fraction: Decimal,
    /// Stop distance from entry when no structural stop is supplied.
    pub stop_pct: Decimal,
    /// Take-profit distances from entry, nearest first.
    #[serde(default = "default_tp_distances")]
    pub tp_distances: Vec<Decimal>,
    /// Fraction of the original quantity closed at each target.
    #[serde(default = "default_tp_splits")]
    pub tp_splits: Vec<Decimal>,
    /// Slot group. Two modes in the same slot never hold positions together.
    pub slot: String,
    /// Allow more than one position in this slot.
    #[serde(default)]
    pub allow_stacking: bool,
    /// Leverage override for this mode.
    #[serde(default)]
    pub leverage: Option<u32>,
}

impl ModeSettings {
    fn with(wallet_fraction: Decimal, stop_pct: Decimal, slot: &str) -> Self {
        Self {
            wallet_fraction,
            stop_pct,
            tp_distances: default_tp_distances(),
            tp_splits: default_tp_splits(),
            slot: slot.to_string(),
            allow_stacking: false,
            leverage: None,
        }
    }
}

/// Settings for every mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModesConfig {
    /// Bollinger scalps.
    #[serde(default = "default_scalp_bb")]
    pub scalp_bb: ModeSettings,
    /// Trend entries.
    #[serde(default = "default_trend")]
    pub trend: ModeSettings,
    /// Fair value gap entries.
    #[serde(default = "default_sniper_fvg")]
    pub sniper_fvg: ModeSettings,
    /// Manual entries and adopted orphans.
    #[serde(default = "default_manual")]
    pub manual: ModeSettings,
}

impl ModesConfig {
    /// Settings for `mode`.
    #[must_use]
    pub const fn settings(&self, mode: TradeMode) -> &ModeSettings {
        match mode {
            TradeMode::ScalpBb => &self.scalp_bb,
            TradeMode::Trend => &self.trend,
            TradeMode::SniperFvg => &self.sniper_fvg,
            TradeMode::Manual => &self.manual,
        }
    }

    /// Iterate `(mode, settings)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (TradeMode, &ModeSettings)> {
        TradeMode::ALL
            .into_iter()
            .map(move |mode| (mode, self.settings(mode)))
    }
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            scalp_bb: default_scalp_bb(),
            trend: default_trend(),
            sniper_fvg: default_sniper_fvg(),
            manual: default_manual(),
        }
    }
}

fn default_tp_distances() -> Vec<Decimal> {
    vec![dec!(0.015), dec!(0.03), dec!(0.06)]
}

fn default_tp_splits() -> Vec<Decimal> {
    vec![dec!(0.3), dec!(0.3), dec!(0.4)]
}

fn default_scalp_bb() -> ModeSettings {
    ModeSettings::with(dec!(0.05), dec!(0.015), "tactical")
}

fn default_trend() -> ModeSettings {
    ModeSettings::with(dec!(0.10), dec!(0.02), "tactical")
}

fn default_sniper_fvg() -> ModeSettings {
    ModeSettings::with(dec!(0.15), dec!(0.02), "fvg")
}

fn default_manual() -> ModeSettings {
    ModeSettings {
        allow_stacking: true,
        ..ModeSettings::with(dec!(0.05), dec!(0.02), "manual")
    }
}
