//! Venue connection settings.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Which venue adapter to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueKind {
    /// In-memory venue (dry run).
    Mock,
    /// Signed REST futures API.
    Rest,
}

/// Venue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Adapter selection.
    #[serde(default = "default_kind")]
    pub kind: VenueKind,
    /// REST base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key (use `${VENUE_API_KEY}` interpolation).
    #[serde(default)]
    pub api_key: String,
    /// API secret (use `${VENUE_API_SECRET}` interpolation).
    #[serde(default)]
    pub api_secret: String,
    /// Traded instrument.
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Signed request validity window.
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    /// Starting price for the in-memory venue.
    #[serde(default = "default_mock_price")]
    pub mock_price: Decimal,
    /// Starting balance for the in-memory venue.
    #[serde(default = "default_mock_balance")]
    pub mock_balance: Decimal,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            base_url: default_base_url(),
            api_key: String::new(),
            api_secret: String::new(),
            symbol: default_symbol(),
            recv_window_ms: default_recv_window_ms(),
            mock_price: default_mock_price(),
            mock_balance: default_mock_balance(),
        }
    }
}

impl VenueConfig {
    /// Whether credentials are present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

const fn default_kind() -> VenueKind {
    VenueKind::Mock
}

fn default_base_url() -> String {
    "https://testnet.binancefuture.com".to_string()
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

const fn default_recv_window_ms() -> u64 {
    5_000
}

fn default_mock_price() -> Decimal {
    dec!(100)
}

fn default_mock_balance() -> Decimal {
    dec!(1000)
}
