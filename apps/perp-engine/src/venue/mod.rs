//! Venue adapters.
//!
//! This module provides:
//! - The [`VenueAdapter`] trait every venue integration implements
//! - Wire-level order and position types
//! - The retry/timeout policy layer wrapped around every remote call
//! - [`MockVenue`], an in-memory venue for tests and dry runs
//! - [`RestVenue`], a signed REST client for USDⓈ-margined perpetual futures

mod error;
mod mock;
mod rest;
mod retry;
mod types;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::execution::Precision;

pub use error::VenueError;
pub use mock::{FillBehavior, MockVenue};
pub use rest::RestVenue;
pub use retry::{
    ErrorCategory, ExponentialBackoffCalculator, RetryPolicy, call_with_retry, categorize_status,
};
pub use types::{
    OpenOrder, OrderKind, OrderReport, OrderRequest, OrderStatus, RemoteState, VenuePosition,
};

/// Trait for venue integrations.
///
/// Implementations translate these calls into venue-specific requests.
/// They must not retry internally: the gateway's policy layer owns retries
/// and deadlines.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Switch the account to hedge mode, isolated margin and `leverage`.
    ///
    /// Settings that are already in place are not an error.
    async fn prepare_account(&self, leverage: u32) -> Result<(), VenueError>;

    /// Submit an order.
    ///
    /// # Errors
    ///
    /// Returns [`VenueError::NoPosition`] when a reducing order finds nothing
    /// to reduce.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReport, VenueError>;

    /// Query an order by venue id.
    async fn order_status(&self, order_id: &str) -> Result<OrderReport, VenueError>;

    /// Cancel one order.
    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError>;

    /// Cancel every resident order on the instrument.
    async fn cancel_all_orders(&self) -> Result<(), VenueError>;

    /// Resident orders on the instrument.
    async fn open_orders(&self) -> Result<Vec<OpenOrder>, VenueError>;

    /// Non-zero positions on the instrument.
    async fn positions(&self) -> Result<Vec<VenuePosition>, VenueError>;

    /// Available quote balance.
    async fn balance(&self) -> Result<Decimal, VenueError>;

    /// Last traded price.
    async fn last_price(&self) -> Result<Decimal, VenueError>;

    /// Quantity step and price tick of the instrument.
    async fn instrument_rules(&self) -> Result<Precision, VenueError>;

    /// Get the venue name for logging and metrics.
    fn venue_name(&self) -> &'static str;
}
