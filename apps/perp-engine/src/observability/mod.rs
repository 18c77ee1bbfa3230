//! Observability module for metrics and logging.
//!
//! This module provides instrumentation for the engine: a `tracing`
//! subscriber configured from [`LoggingConfig`](crate::config::LoggingConfig)
//! and Prometheus metrics for orders, reconciliation and supervision.

mod metrics;
mod tracing;

pub use metrics::{
    MetricsError, init_metrics, record_order_attempt, record_reconciliation_finding,
    record_rollback, record_supervisor_failure, set_daily_pnl, update_open_positions,
};
pub use tracing::{TracingError, init_tracing};
