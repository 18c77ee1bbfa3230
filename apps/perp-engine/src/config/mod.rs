//! Configuration module for the perp engine.
//!
//! Provides configuration loading, validation, and environment variable
//! interpolation for every engine component.
//!
//! # Usage
//!
//! ```rust,ignore
//! use perp_engine::config::load_config;
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Load from custom path
//! let config = load_config(Some("custom/config.yaml"))?;
//!
//! println!("max open positions: {}", config.capital.max_open_positions);
//! ```

mod capital;
mod custodian;
mod engine;
mod execution;
mod modes;
mod observability;
mod persistence;
mod supervisor;
mod venue;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capital::CapitalConfig;
pub use custodian::{AveragingConfig, CustodianConfig, TrailingConfig};
pub use engine::EngineSettings;
pub use execution::ExecutionConfig;
pub use modes::{ModeSettings, ModesConfig};
pub use observability::{LoggingConfig, MetricsSettings, ObservabilityConfig};
pub use persistence::PersistenceConfig;
pub use supervisor::SupervisorConfig;
pub use venue::{VenueConfig, VenueKind};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Venue connection.
    #[serde(default)]
    pub venue: VenueConfig,
    /// Capital base and circuit breaker.
    #[serde(default)]
    pub capital: CapitalConfig,
    /// Per-mode sizing and protection.
    #[serde(default)]
    pub modes: ModesConfig,
    /// Execution gateway timing and retries.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Position custodian cycles.
    #[serde(default)]
    pub custodian: CustodianConfig,
    /// Supervisor threshold.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Snapshot and audit files.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Control loop.
    #[serde(default)]
    pub engine: EngineSettings,
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map(|m| m.as_str());
        let Some(var_name) = cap.get(1).map(|m| m.as_str()) else {
            return String::new();
        };
        match std::env::var(var_name) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        }
    })
    .into_owned()
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

fn is_fraction(value: Decimal) -> bool {
    value > Decimal::ZERO && value < Decimal::ONE
}

/// Validate configuration values.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_capital(&config.capital)?;
    validate_modes(&config.modes)?;
    validate_execution(&config.execution)?;
    validate_custodian(&config.custodian)?;

    if config.supervisor.failure_threshold == 0 {
        return Err(invalid("supervisor.failure_threshold must be at least 1"));
    }

    if config.venue.kind == VenueKind::Rest && !config.venue.has_credentials() {
        return Err(invalid(
            "venue.api_key and venue.api_secret are required for the rest venue",
        ));
    }

    let valid_formats = ["json", "pretty"];
    if !valid_formats.contains(&config.observability.logging.format.as_str()) {
        return Err(invalid(format!(
            "observability.logging.format must be one of: {valid_formats:?}"
        )));
    }

    Ok(())
}

fn validate_capital(capital: &CapitalConfig) -> Result<(), ConfigError> {
    if capital.base_capital <= Decimal::ZERO {
        return Err(invalid("capital.base_capital must be positive"));
    }
    if capital.min_capital < Decimal::ZERO {
        return Err(invalid("capital.min_capital must not be negative"));
    }
    if capital.leverage == 0 || capital.leverage > 125 {
        return Err(invalid("capital.leverage must be between 1 and 125"));
    }
    if !is_fraction(capital.max_daily_loss_fraction) {
        return Err(invalid(
            "capital.max_daily_loss_fraction must be between 0 and 1",
        ));
    }
    if let Some(target) = capital.daily_profit_target_fraction {
        if target <= Decimal::ZERO {
            return Err(invalid(
                "capital.daily_profit_target_fraction must be positive",
            ));
        }
    }
    if capital.max_open_positions == 0 {
        return Err(invalid("capital.max_open_positions must be at least 1"));
    }
    Ok(())
}

fn validate_modes(modes: &ModesConfig) -> Result<(), ConfigError> {
    for (mode, settings) in modes.iter() {
        let name = mode.as_str().to_ascii_lowercase();
        if settings.wallet_fraction <= Decimal::ZERO || settings.wallet_fraction > Decimal::ONE {
            return Err(invalid(format!(
                "modes.{name}.wallet_fraction must be in (0, 1]"
            )));
        }
        if !is_fraction(settings.stop_pct) {
            return Err(invalid(format!("modes.{name}.stop_pct must be in (0, 1)")));
        }
        if settings.tp_distances.is_empty() {
            return Err(invalid(format!(
                "modes.{name}.tp_distances must not be empty"
            )));
        }
        if settings.tp_distances.iter().any(|d| *d <= Decimal::ZERO)
            || settings.tp_distances.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(invalid(format!(
                "modes.{name}.tp_distances must be positive and increasing"
            )));
        }
        if settings.tp_splits.len() != settings.tp_distances.len() {
            return Err(invalid(format!(
                "modes.{name}.tp_splits must have one entry per tp_distance"
            )));
        }
        if settings.tp_splits.iter().any(|s| *s <= Decimal::ZERO) {
            return Err(invalid(format!(
                "modes.{name}.tp_splits must all be positive"
            )));
        }
        let total: Decimal = settings.tp_splits.iter().sum();
        if total != Decimal::ONE {
            return Err(invalid(format!(
                "modes.{name}.tp_splits must sum to 1 (got {total})"
            )));
        }
        if settings.slot.trim().is_empty() {
            return Err(invalid(format!("modes.{name}.slot must not be empty")));
        }
        if settings.leverage == Some(0) {
            return Err(invalid(format!("modes.{name}.leverage must be at least 1")));
        }
    }
    Ok(())
}

fn validate_execution(execution: &ExecutionConfig) -> Result<(), ConfigError> {
    if execution.request_timeout_ms == 0 {
        return Err(invalid("execution.request_timeout_ms must be positive"));
    }
    if execution.entry_attempts == 0
        || execution.stop_attempts == 0
        || execution.call_attempts == 0
        || execution.fill_poll_attempts == 0
    {
        return Err(invalid("execution attempt counts must be at least 1"));
    }
    if execution.backoff_multiplier < 1.0 {
        return Err(invalid("execution.backoff_multiplier must be at least 1.0"));
    }
    if !(0.0..=1.0).contains(&execution.jitter_factor) {
        return Err(invalid("execution.jitter_factor must be between 0.0 and 1.0"));
    }
    if execution.structural_stop_buffer < Decimal::ZERO
        || execution.structural_stop_buffer >= Decimal::ONE
    {
        return Err(invalid("execution.structural_stop_buffer must be in [0, 1)"));
    }
    Ok(())
}

fn validate_custodian(custodian: &CustodianConfig) -> Result<(), ConfigError> {
    if custodian.fast_interval_ms == 0 || custodian.slow_interval_ms == 0 {
        return Err(invalid("custodian intervals must be positive"));
    }
    if custodian.slow_interval_ms < custodian.fast_interval_ms {
        return Err(invalid(
            "custodian.slow_interval_ms must not be shorter than fast_interval_ms",
        ));
    }
    if !is_fraction(custodian.breakeven_trigger) {
        return Err(invalid("custodian.breakeven_trigger must be in (0, 1)"));
    }
    if custodian.breakeven_offset < Decimal::ZERO
        || custodian.breakeven_offset >= custodian.breakeven_trigger
    {
        return Err(invalid(
            "custodian.breakeven_offset must be non-negative and below breakeven_trigger",
        ));
    }
    if custodian.trailing.enabled && !is_fraction(custodian.trailing.distance) {
        return Err(invalid("custodian.trailing.distance must be in (0, 1)"));
    }
    if custodian.averaging.enabled && custodian.averaging.trigger_fraction <= Decimal::ZERO {
        return Err(invalid(
            "custodian.averaging.trigger_fraction must be positive",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.capital.base_capital, dec!(1000));
        assert_eq!(config.capital.leverage, 5);
        assert_eq!(config.capital.max_open_positions, 3);
        assert_eq!(config.capital.max_daily_loss_fraction, dec!(0.04));
        assert_eq!(config.execution.request_timeout_ms, 2_000);
        assert_eq!(config.custodian.fast_interval_ms, 1_000);
        assert_eq!(config.custodian.slow_interval_ms, 10_000);
        assert_eq!(config.supervisor.failure_threshold, 5);
        assert_eq!(config.venue.kind, VenueKind::Mock);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_empty_config_uses_defaults() {
        let config = match load_config_from_string("{}") {
            Ok(c) => c,
            Err(e) => panic!("should load empty config: {e}"),
        };
        assert_eq!(config.modes.trend.wallet_fraction, dec!(0.10));
        assert_eq!(config.modes.sniper_fvg.slot, "fvg");
    }

    #[test]
    fn test_load_partial_mode_override() {
        let yaml = r#"
capital:
  base_capital: "2500"
  leverage: 10
modes:
  trend:
    wallet_fraction: "0.2"
    stop_pct: "0.01"
    slot: tactical
"#;

        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load config: {e}"),
        };
        assert_eq!(config.capital.base_capital, dec!(2500));
        assert_eq!(config.capital.leverage, 10);
        assert_eq!(config.modes.trend.wallet_fraction, dec!(0.2));
        assert_eq!(config.modes.trend.tp_splits.len(), 3);
        assert_eq!(config.modes.scalp_bb.stop_pct, dec!(0.015));
    }

    #[test]
    fn test_splits_must_sum_to_one() {
        let yaml = r#"
modes:
  scalp_bb:
    wallet_fraction: "0.05"
    stop_pct: "0.015"
    slot: tactical
    tp_distances: ["0.01", "0.02"]
    tp_splits: ["0.5", "0.4"]
"#;

        let Err(err) = load_config_from_string(yaml) else {
            panic!("splits summing to 0.9 should be rejected");
        };
        assert!(err.to_string().contains("sum to 1"));
    }

    #[test]
    fn test_split_count_must_match_distances() {
        let mut config = Config::default();
        config.modes.manual.tp_splits = vec![dec!(1)];

        let Err(err) = validate_config(&config) else {
            panic!("mismatched split count should be rejected");
        };
        assert!(err.to_string().contains("one entry per tp_distance"));
    }

    #[test]
    fn test_rest_venue_requires_credentials() {
        let mut config = Config::default();
        config.venue.kind = VenueKind::Rest;

        let Err(err) = validate_config(&config) else {
            panic!("rest venue without credentials should be rejected");
        };
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = Config::default();
        config.supervisor.failure_threshold = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_slow_cycle_not_faster_than_fast() {
        let mut config = Config::default();
        config.custodian.slow_interval_ms = 500;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = Config::default();
        config.observability.logging.format = "xml".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_env_var_with_default_when_missing() {
        let input = "symbol: ${PERP_ENGINE_CONFIG_TEST_NONEXISTENT_VAR:-ETHUSDT}";
        let result = interpolate_env_vars(input);
        assert_eq!(result, "symbol: ETHUSDT");
    }

    #[test]
    fn test_env_var_missing_without_default_is_empty() {
        let input = "api_key: \"${PERP_ENGINE_CONFIG_TEST_NONEXISTENT_KEY}\"";
        let result = interpolate_env_vars(input);
        assert_eq!(result, "api_key: \"\"");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let Err(err) = load_config(Some("/nonexistent/perp-engine.yaml")) else {
            panic!("missing file should fail");
        };
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
