// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Perp Engine - Execution & Reconciliation Core
//!
//! Turns abstract trade signals into protected leveraged positions on a
//! perpetual-futures venue, keeps them managed, and keeps local state
//! consistent with the venue.
//!
//! # Components
//!
//! - **Execution Gateway** ([`execution`]): entry-then-protect. A position is
//!   never reported open without a resident stop; a failed stop unwinds the
//!   entry.
//! - **Position Custodian** ([`custodian`]): fast cycle (take-profit ladder,
//!   breakeven, trailing, averaging) and slow cycle (reconciliation of
//!   orphans, ghosts and unprotected positions).
//! - **Signal Translator** ([`translator`]): capacity, slot and circuit
//!   breaker checks, then risk sizing.
//! - **Capital Ledger** ([`ledger`]): capital base, daily P&L and the daily
//!   circuit breaker.
//! - **Supervisor** ([`supervisor`]): consecutive failure counter with an
//!   emergency halt.
//! - **Engine** ([`engine`]): the single control loop and its command
//!   channel.
//!
//! # Account model
//!
//! Hedge mode. Every order carries a position side; reduce-only is never
//! sent. Protective stops close the whole side when triggered.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Modules
// =============================================================================

/// Configuration loading and validation.
pub mod config;

/// Capital ledger and daily circuit breaker.
pub mod ledger;

/// Position custodian: fast cycle, reconciliation and operator commands.
pub mod custodian;

/// Control loop, commands and signal sources.
pub mod engine;

/// Execution gateway and instrument precision.
pub mod execution;

/// Domain models.
pub mod models;

/// Tracing and metrics.
pub mod observability;

/// JSON snapshots and CSV logs.
pub mod persistence;

/// Failure counter and emergency halt.
pub mod supervisor;

/// Signal admission and sizing.
pub mod translator;

/// Venue adapters.
pub mod venue;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{Config, ConfigError, load_config, load_config_from_string, validate_config};
pub use custodian::{PositionCustodian, PositionRegistry, ReconciliationReport};
pub use engine::{Command, CommandHandle, Engine, EngineError, EngineParts, SignalSource};
pub use execution::{ExecutionError, ExecutionGateway, Precision};
pub use ledger::{CapitalLedger, CapitalState};
pub use models::{OrderPlan, Position, Side, Signal, TradeMode};
pub use supervisor::{Supervisor, Verdict};
pub use translator::{Rejection, SignalTranslator};
pub use venue::{MockVenue, RestVenue, VenueAdapter, VenueError};
