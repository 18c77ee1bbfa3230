//! Order execution timing and retry settings.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::venue::RetryPolicy;

/// Execution gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Per-call timeout for every venue request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Attempts to submit the market entry.
    #[serde(default = "default_entry_attempts")]
    pub entry_attempts: u32,
    /// Attempts to place the protective stop.
    #[serde(default = "default_stop_attempts")]
    pub stop_attempts: u32,
    /// Attempts for every other venue call.
    #[serde(default = "default_call_attempts")]
    pub call_attempts: u32,
    /// Fill status polls after the entry is accepted.
    #[serde(default = "default_fill_poll_attempts")]
    pub fill_poll_attempts: u32,
    /// Delay between fill polls.
    #[serde(default = "default_fill_poll_interval_ms")]
    pub fill_poll_interval_ms: u64,
    /// How long a limit entry may rest before it is cancelled.
    #[serde(default = "default_limit_fill_timeout_ms")]
    pub limit_fill_timeout_ms: u64,
    /// Initial retry backoff.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Maximum retry backoff.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Backoff jitter factor (0.2 = ±20%).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Buffer applied beyond a structural stop level.
    #[serde(default = "default_structural_buffer")]
    pub structural_stop_buffer: Decimal,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            entry_attempts: default_entry_attempts(),
            stop_attempts: default_stop_attempts(),
            call_attempts: default_call_attempts(),
            fill_poll_attempts: default_fill_poll_attempts(),
            fill_poll_interval_ms: default_fill_poll_interval_ms(),
            limit_fill_timeout_ms: default_limit_fill_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
            structural_stop_buffer: default_structural_buffer(),
        }
    }
}

impl ExecutionConfig {
    /// Per-call timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay between fill polls.
    #[must_use]
    pub const fn fill_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fill_poll_interval_ms)
    }

    /// Resting time allowed for a limit entry.
    #[must_use]
    pub const fn limit_fill_timeout(&self) -> Duration {
        Duration::from_millis(self.limit_fill_timeout_ms)
    }

    /// Retry policy with `max_attempts` total attempts.
    #[must_use]
    pub const fn retry_policy(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.backoff_multiplier,
            self.jitter_factor,
        )
    }
}

const fn default_request_timeout_ms() -> u64 {
    2_000
}

const fn default_entry_attempts() -> u32 {
    2
}

const fn default_stop_attempts() -> u32 {
    3
}

const fn default_call_attempts() -> u32 {
    3
}

const fn default_fill_poll_attempts() -> u32 {
    3
}

const fn default_fill_poll_interval_ms() -> u64 {
    1_000
}

const fn default_limit_fill_timeout_ms() -> u64 {
    60_000
}

const fn default_initial_backoff_ms() -> u64 {
    200
}

const fn default_max_backoff_ms() -> u64 {
    2_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_jitter_factor() -> f64 {
    0.2
}

fn default_structural_buffer() -> Decimal {
    dec!(0.002)
}
