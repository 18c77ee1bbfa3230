//! Supervisor settings.

use serde::{Deserialize, Serialize};

/// Supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Consecutive failures that trigger the emergency halt.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Process exit code after the emergency halt.
    #[serde(default = "default_exit_code")]
    pub exit_code: i32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            exit_code: default_exit_code(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_exit_code() -> i32 {
    1
}
