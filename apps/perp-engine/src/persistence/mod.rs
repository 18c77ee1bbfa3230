//! Durable local state.
//!
//! - [`JsonSnapshot`]: atomically replaced JSON documents (position registry,
//!   capital ledger)
//! - [`CsvLog`]: append-only CSV files (order audit trail, trade journal)

mod audit;
mod snapshot;

use std::path::PathBuf;

use thiserror::Error;

pub use audit::{CsvLog, OrderAuditRow, TradeJournalRow};
pub use snapshot::{JsonSnapshot, write_atomic};

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem error.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV encoding failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
