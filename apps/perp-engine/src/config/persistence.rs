//! State persistence configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// File locations for snapshots and audit logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable state persistence.
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,
    /// Directory holding every file below.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Position registry snapshot (JSON).
    #[serde(default = "default_registry_file")]
    pub registry_file: String,
    /// Capital ledger snapshot (JSON).
    #[serde(default = "default_ledger_file")]
    pub ledger_file: String,
    /// Order attempt audit log (CSV).
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
    /// Closed trade journal (CSV).
    #[serde(default = "default_journal_file")]
    pub journal_file: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            data_dir: default_data_dir(),
            registry_file: default_registry_file(),
            ledger_file: default_ledger_file(),
            audit_file: default_audit_file(),
            journal_file: default_journal_file(),
        }
    }
}

impl PersistenceConfig {
    /// Full path of a file inside `data_dir`.
    #[must_use]
    pub fn path(&self, file: &str) -> PathBuf {
        PathBuf::from(&self.data_dir).join(file)
    }

    /// Registry snapshot path.
    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.path(&self.registry_file)
    }

    /// Ledger snapshot path.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.path(&self.ledger_file)
    }

    /// Audit log path.
    #[must_use]
    pub fn audit_path(&self) -> PathBuf {
        self.path(&self.audit_file)
    }

    /// Trade journal path.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path(&self.journal_file)
    }
}

const fn default_persistence_enabled() -> bool {
    true
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_registry_file() -> String {
    "positions.json".to_string()
}

fn default_ledger_file() -> String {
    "capital.json".to_string()
}

fn default_audit_file() -> String {
    "orders.csv".to_string()
}

fn default_journal_file() -> String {
    "trades.csv".to_string()
}
