//! Execution error type.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::Side;
use crate::venue::{OrderStatus, VenueError};

/// Errors from gateway operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The plan cannot be sent (quantity below minimum, bad targets).
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// The entry order was not accepted. Nothing changed on the venue.
    #[error("Entry submission failed: {0}")]
    EntryFailed(#[source] VenueError),

    /// The entry did not fill in time and was cancelled.
    #[error("Entry order {order_id} not filled in time")]
    EntryTimeout {
        /// Venue id of the cancelled entry.
        order_id: String,
    },

    /// The stop could not be placed; the entry was rolled back.
    #[error("Protective stop failed, entry rolled back: {reason}")]
    ProtectionFailed {
        /// Why the stop failed.
        reason: String,
    },

    /// The stop failed and so did the rollback. The side may be naked.
    #[error("Rollback failed for {side} {quantity}: {reason}")]
    RollbackFailed {
        /// Side left open.
        side: Side,
        /// Quantity that could not be closed.
        quantity: Decimal,
        /// Why the close failed.
        reason: String,
    },

    /// A reducing order was accepted but closed nothing.
    #[error("Close order {order_id} ended {} without a fill", status.as_str())]
    CloseNotFilled {
        /// Venue id of the close order.
        order_id: String,
        /// Last status seen.
        status: OrderStatus,
    },

    /// Any other venue failure.
    #[error(transparent)]
    Venue(#[from] VenueError),
}

impl ExecutionError {
    /// Whether this failure must be escalated to the supervisor immediately.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }

    /// Whether the venue was left unchanged by the failed operation.
    #[must_use]
    pub const fn left_venue_unchanged(&self) -> bool {
        matches!(
            self,
            Self::InvalidPlan(_) | Self::EntryFailed(_) | Self::ProtectionFailed { .. }
        )
    }
}
