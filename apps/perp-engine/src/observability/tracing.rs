//! Log subscriber initialisation.
//!
//! `RUST_LOG` overrides the configured level. The output format is either
//! human-readable (`pretty`) or one JSON object per line (`json`).

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Error type for tracing initialisation.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    /// The configured level is not a valid filter directive.
    #[error("invalid log filter '{0}'")]
    InvalidFilter(String),
    /// A global subscriber is already installed.
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberError(String),
}

/// Build the filter: `RUST_LOG` if set, else `perp_engine=<level>`.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, TracingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = format!("perp_engine={}", config.level);
    EnvFilter::try_new(&directive).map_err(|_| TracingError::InvalidFilter(directive))
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the filter does not parse or a subscriber is already
/// installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TracingError> {
    let filter = build_filter(config)?;

    let result = if config.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };

    result.map_err(|e| TracingError::SubscriberError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "not a level!".to_string(),
            format: "pretty".to_string(),
        };
        assert!(matches!(
            build_filter(&config),
            Err(TracingError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_default_level_parses() {
        assert!(build_filter(&LoggingConfig::default()).is_ok());
    }
}
