//! Append-only CSV logs.

use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::PersistenceError;

/// One order submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderAuditRow {
    /// Client order id.
    pub id: String,
    /// Submission time.
    pub timestamp: DateTime<Utc>,
    /// `BUY`/`SELL` plus position side, e.g. `SELL/LONG`.
    pub side: String,
    /// Order type tag.
    pub order_type: String,
    /// Trigger price for stops, fill price otherwise (zero when unknown).
    pub price: Decimal,
    /// Requested quantity (zero for close-position stops).
    pub quantity: Decimal,
    /// Outcome: venue status or error label.
    pub status: String,
}

/// One realized exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeJournalRow {
    /// Local position id.
    pub position_id: String,
    /// Exit time.
    pub timestamp: DateTime<Utc>,
    /// Mode tag.
    pub mode: String,
    /// Position side.
    pub side: String,
    /// Entry price.
    pub entry_price: Decimal,
    /// Exit price.
    pub exit_price: Decimal,
    /// Quantity closed.
    pub quantity: Decimal,
    /// Realized P&L.
    pub pnl: Decimal,
    /// What closed it (`TP1`, `STOP`, `MANUAL`, `GHOST`...).
    pub reason: String,
}

/// Append-only CSV file of `R` rows.
///
/// The header is written once, when the file is created.
#[derive(Debug)]
pub struct CsvLog<R> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn(R)>,
}

impl<R: Serialize> CsvLog<R> {
    /// Log appending to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// File backing this log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written.
    pub fn append(&self, row: &R) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PersistenceError::io(&self.path, e))?;
        let is_new = file
            .metadata()
            .map_err(|e| PersistenceError::io(&self.path, e))?
            .len()
            == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer.serialize(row)?;
        writer
            .flush()
            .map_err(|e| PersistenceError::io(&self.path, e))
    }

    /// Append a row, logging instead of failing.
    ///
    /// Audit output never blocks trading.
    pub fn record(&self, row: &R) {
        if let Err(e) = self.append(row) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to append CSV row");
        }
    }
}
