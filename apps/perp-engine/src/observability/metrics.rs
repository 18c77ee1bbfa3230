//! Prometheus metrics for the engine.
//!
//! The `record_*` helpers are no-ops until [`init_metrics`] installs a
//! recorder, so library code calls them unconditionally.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::config::MetricsSettings;

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Listen address does not parse.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Initialize the Prometheus metrics exporter.
///
/// This starts an HTTP listener that exposes metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the address is invalid or the exporter fails to start
/// (e.g., port already in use).
pub fn init_metrics(settings: &MetricsSettings) -> Result<(), MetricsError> {
    let addr: SocketAddr = settings
        .listen_addr
        .parse()
        .map_err(|e: std::net::AddrParseError| MetricsError::Configuration(e.to_string()))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(addr = %addr, "Prometheus metrics exporter started");
    Ok(())
}

// ============================================================================
// Order Metrics
// ============================================================================

/// Record one order attempt.
///
/// # Arguments
///
/// * `venue` - Venue name (e.g., "mock", "rest")
/// * `order_type` - Order type tag (e.g., "MARKET", "STOP_MARKET")
/// * `outcome` - Venue status or error label
pub fn record_order_attempt(venue: &str, order_type: &str, outcome: &str) {
    counter!(
        "order_attempts_total",
        "venue" => venue.to_string(),
        "order_type" => order_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an entry rollback.
///
/// # Arguments
///
/// * `succeeded` - Whether the venue ended flat on that side
pub fn record_rollback(succeeded: bool) {
    counter!(
        "rollbacks_total",
        "result" => if succeeded { "flat" } else { "failed" }
    )
    .increment(1);
}

// ============================================================================
// Custodian Metrics
// ============================================================================

/// Record a reconciliation finding by kind (`ORPHAN`, `GHOST`, ...).
pub fn record_reconciliation_finding(kind: &str) {
    counter!("reconciliation_findings_total", "kind" => kind.to_string()).increment(1);
}

/// Update the number of tracked positions.
pub fn update_open_positions(count: usize) {
    gauge!("open_positions").set(count as f64);
}

/// Update realized P&L for the current trading day.
pub fn set_daily_pnl(pnl: Decimal) {
    gauge!("daily_realized_pnl").set(pnl.to_f64().unwrap_or(0.0));
}

// ============================================================================
// Supervisor Metrics
// ============================================================================

/// Record a failure reported to the supervisor.
///
/// # Arguments
///
/// * `consecutive` - Consecutive failure count after this one
pub fn record_supervisor_failure(consecutive: u32) {
    counter!("supervisor_failures_total").increment(1);
    gauge!("supervisor_consecutive_failures").set(f64::from(consecutive));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_listen_addr() {
        let settings = MetricsSettings {
            enabled: true,
            listen_addr: "not-an-addr".to_string(),
        };
        assert!(matches!(
            init_metrics(&settings),
            Err(MetricsError::Configuration(_))
        ));
    }

    #[test]
    fn test_helpers_without_recorder_are_noops() {
        record_order_attempt("mock", "MARKET", "FILLED");
        record_rollback(true);
        record_reconciliation_finding("ORPHAN");
        update_open_positions(2);
        set_daily_pnl(Decimal::ONE);
        record_supervisor_failure(1);
    }
}
