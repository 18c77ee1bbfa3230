//! Order execution.
//!
//! This module provides:
//! - [`ExecutionGateway`]: the entry-then-protect protocol with rollback, plus
//!   the close/stop/cancel operations used by the custodian and commands
//! - [`Precision`]: venue quantity and price rounding
//! - [`ExecutionError`]: typed outcomes of gateway operations

mod error;
mod gateway;
mod precision;

pub use error::ExecutionError;
pub use gateway::{ExecutionGateway, Fill, client_order_id};
pub use precision::Precision;
