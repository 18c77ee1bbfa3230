//! Trading modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Strategy family that produced a position.
///
/// Each mode carries its own sizing, stop and target settings
/// (see [`crate::config::ModesConfig`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeMode {
    /// Bollinger-band mean reversion scalps.
    ScalpBb,
    /// Trend following entries.
    Trend,
    /// Fair value gap entries with a structural stop.
    SniperFvg,
    /// Operator-initiated positions and adopted orphans.
    Manual,
}

impl TradeMode {
    /// All modes.
    pub const ALL: [Self; 4] = [Self::ScalpBb, Self::Trend, Self::SniperFvg, Self::Manual];

    /// Stable identifier used in logs and files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScalpBb => "SCALP_BB",
            Self::Trend => "TREND",
            Self::SniperFvg => "SNIPER_FVG",
            Self::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for TradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SCALP_BB" => Ok(Self::ScalpBb),
            "TREND" => Ok(Self::Trend),
            "SNIPER_FVG" => Ok(Self::SniperFvg),
            "MANUAL" => Ok(Self::Manual),
            other => Err(format!("unknown trade mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trips_through_str() {
        for mode in TradeMode::ALL {
            assert_eq!(mode.as_str().parse::<TradeMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_mode_parse_is_case_insensitive() {
        assert_eq!("sniper_fvg".parse::<TradeMode>().unwrap(), TradeMode::SniperFvg);
        assert!("grid".parse::<TradeMode>().is_err());
    }
}
