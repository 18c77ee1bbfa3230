//! Venue error type.

/// Errors from venue operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VenueError {
    /// Transport failed (connection reset, DNS, 5xx).
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not complete within its deadline.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation name.
        operation: String,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// Rate limited by the venue.
    #[error("Rate limited, retry after {retry_after_secs:?}s")]
    RateLimited {
        /// Seconds to wait before retrying, when the venue says.
        retry_after_secs: Option<u64>,
    },

    /// The venue rejected the request.
    #[error("Rejected by venue: {code} - {message}")]
    Rejected {
        /// Venue error code.
        code: i64,
        /// Venue error message.
        message: String,
    },

    /// A closing order found no position on that side.
    #[error("No open position on that side")]
    NoPosition,

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Authentication failed.
    #[error("Authentication failed")]
    Authentication,

    /// Response body could not be decoded.
    #[error("Failed to decode venue response: {0}")]
    Decode(String),
}

impl VenueError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }

    /// Short label for metrics and audit rows.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Rejected { .. } => "rejected",
            Self::NoPosition => "no_position",
            Self::OrderNotFound(_) => "order_not_found",
            Self::Authentication => "authentication",
            Self::Decode(_) => "decode",
        }
    }
}
