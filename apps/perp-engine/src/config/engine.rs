//! Control loop settings.

use serde::{Deserialize, Serialize};

/// Control loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Capacity of the command channel.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Read operator commands from stdin.
    #[serde(default = "default_console")]
    pub console: bool,
    /// Reconcile against the venue before the first tick.
    #[serde(default = "default_reconcile_on_start")]
    pub reconcile_on_start: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command_buffer: default_command_buffer(),
            console: default_console(),
            reconcile_on_start: default_reconcile_on_start(),
        }
    }
}

const fn default_command_buffer() -> usize {
    32
}

const fn default_console() -> bool {
    true
}

const fn default_reconcile_on_start() -> bool {
    true
}
