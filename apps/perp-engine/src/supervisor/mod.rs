//! Engine supervisor.
//!
//! Counts consecutive engine failures and halts the process once they reach
//! the threshold:
//!
//! ```text
//! failure → count += 1
//! success → count = 0
//! count >= threshold → cancel_all (best effort) → terminate(exit_code)
//! ```
//!
//! A fatal error (failed rollback) halts immediately regardless of count.
//! The termination hook is injectable so tests can observe the halt without
//! exiting.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::SupervisorConfig;
use crate::execution::ExecutionGateway;
use crate::observability::record_supervisor_failure;

/// Process termination hook, called with the configured exit code.
pub type Terminator = Arc<dyn Fn(i32) + Send + Sync>;

/// What the caller should do after reporting an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep running.
    Continue,
    /// The emergency halt ran; stop the control loop.
    Halted,
}

/// Failure counter with an emergency halt.
pub struct Supervisor {
    gateway: Arc<ExecutionGateway>,
    config: SupervisorConfig,
    consecutive: AtomicU32,
    halted: AtomicBool,
    terminate: Terminator,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("consecutive", &self.consecutive.load(Ordering::SeqCst))
            .field("halted", &self.halted.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Supervisor that exits the process when it halts.
    #[must_use]
    pub fn new(gateway: Arc<ExecutionGateway>, config: SupervisorConfig) -> Self {
        Self::with_terminator(gateway, config, Arc::new(|code| std::process::exit(code)))
    }

    /// Supervisor with a custom termination hook.
    #[must_use]
    pub fn with_terminator(
        gateway: Arc<ExecutionGateway>,
        config: SupervisorConfig,
        terminate: Terminator,
    ) -> Self {
        Self {
            gateway,
            config,
            consecutive: AtomicU32::new(0),
            halted: AtomicBool::new(false),
            terminate,
        }
    }

    /// Consecutive failures so far.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive.load(Ordering::SeqCst)
    }

    /// Whether the emergency halt has run.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Report a successful engine step.
    pub fn record_success(&self) {
        let previous = self.consecutive.swap(0, Ordering::SeqCst);
        if previous > 0 {
            tracing::info!(previous_failures = previous, "Engine recovered");
        }
    }

    /// Report a failed engine step.
    pub async fn record_failure(&self, reason: &str) -> Verdict {
        let count = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        record_supervisor_failure(count);
        tracing::warn!(
            consecutive = count,
            threshold = self.config.failure_threshold,
            reason,
            "Engine failure"
        );

        if count >= self.config.failure_threshold {
            self.halt(&format!("{count} consecutive failures, last: {reason}"))
                .await;
            return Verdict::Halted;
        }
        Verdict::Continue
    }

    /// Halt immediately for an error that cannot be retried.
    pub async fn escalate(&self, reason: &str) -> Verdict {
        self.consecutive.fetch_add(1, Ordering::SeqCst);
        self.halt(reason).await;
        Verdict::Halted
    }

    async fn halt(&self, reason: &str) {
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::error!(reason, "Emergency halt: cancelling all orders");
        let cancelled = self.gateway.cancel_all().await;
        if !cancelled {
            tracing::error!("Emergency cancel-all was not confirmed");
        }

        tracing::error!(exit_code = self.config.exit_code, "Terminating");
        (self.terminate)(self.config.exit_code);
    }
}
