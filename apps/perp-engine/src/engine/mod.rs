//! Control loop.
//!
//! One task drives everything that changes venue state:
//!
//! ```text
//! every fast interval:
//!   price → slow cycle (if due) → fast cycle → signal → status
//! on command:
//!   handle, reply over oneshot
//! on shutdown token:
//!   return
//! ```
//!
//! Other actors only enqueue [`Command`]s through a [`CommandHandle`].

mod command;
mod signals;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::EngineSettings;
use crate::custodian::PositionCustodian;
use crate::execution::ExecutionGateway;
use crate::models::Signal;
use crate::supervisor::{Supervisor, Verdict};
use crate::translator::SignalTranslator;

pub use command::{Command, CommandHandle};
pub use signals::{IdleSignalSource, QueuedSignals, SignalSource};

use command::Envelope;

/// Errors that stop the control loop.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The supervisor ran the emergency halt.
    #[error("Engine halted by supervisor")]
    Halted,

    /// The command channel is closed.
    #[error("Engine command channel closed")]
    ChannelClosed,
}

/// Outcome of one part of a tick.
///
/// A tick resets the supervisor count only if none of its parts failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Clean,
    Failed,
    Halted,
}

impl Step {
    const fn after_failure(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Continue => Self::Failed,
            Verdict::Halted => Self::Halted,
        }
    }

    const fn verdict(self) -> Verdict {
        match self {
            Self::Halted => Verdict::Halted,
            Self::Clean | Self::Failed => Verdict::Continue,
        }
    }
}

/// Components the control loop drives.
#[derive(Debug, Clone)]
pub struct EngineParts {
    /// Order placement.
    pub gateway: Arc<ExecutionGateway>,
    /// Position management.
    pub custodian: Arc<PositionCustodian>,
    /// Signal admission and sizing.
    pub translator: Arc<SignalTranslator>,
    /// Failure counter.
    pub supervisor: Arc<Supervisor>,
}

/// The control loop.
pub struct Engine {
    parts: EngineParts,
    commands: mpsc::Receiver<Envelope>,
    signals: Box<dyn SignalSource>,
    fast_interval: Duration,
    slow_interval: Duration,
    reconcile_on_start: bool,
    last_slow: Option<Instant>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("fast_interval", &self.fast_interval)
            .field("slow_interval", &self.slow_interval)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create the engine and the handle used to send it commands.
    #[must_use]
    pub fn new(
        parts: EngineParts,
        signals: Box<dyn SignalSource>,
        settings: &EngineSettings,
    ) -> (Self, CommandHandle) {
        let (sender, commands) = mpsc::channel(settings.command_buffer.max(1));
        let config = parts.custodian.config();
        let engine = Self {
            fast_interval: config.fast_interval(),
            slow_interval: config.slow_interval(),
            reconcile_on_start: settings.reconcile_on_start,
            parts,
            commands,
            signals,
            last_slow: None,
        };
        (engine, CommandHandle::new(sender))
    }

    /// Run until `shutdown` is cancelled or the supervisor halts.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Halted`] after an emergency halt.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), EngineError> {
        tracing::info!(
            fast_interval_ms = self.fast_interval.as_millis(),
            slow_interval_ms = self.slow_interval.as_millis(),
            venue = self.parts.gateway.venue_name(),
            "Engine started"
        );

        if self.reconcile_on_start && self.slow_cycle().await == Step::Halted {
            return Err(EngineError::Halted);
        }

        let mut interval = tokio::time::interval(self.fast_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::info!("Engine shutting down");
                    return Ok(());
                }
                Some(envelope) = self.commands.recv() => {
                    if self.handle(envelope).await == Verdict::Halted {
                        return Err(EngineError::Halted);
                    }
                }
                _ = interval.tick() => {
                    if self.tick().await == Verdict::Halted {
                        return Err(EngineError::Halted);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    async fn tick(&mut self) -> Verdict {
        let price = match self.parts.gateway.last_price().await {
            Ok(price) => price,
            Err(e) => {
                return self
                    .parts
                    .supervisor
                    .record_failure(&format!("price fetch: {e}"))
                    .await;
            }
        };
        let mut failed = false;

        let slow_due = self
            .last_slow
            .is_none_or(|at| at.elapsed() >= self.slow_interval);
        if slow_due {
            match self.slow_cycle().await {
                Step::Halted => return Verdict::Halted,
                Step::Failed => failed = true,
                Step::Clean => {}
            }
        }

        let summary = self.parts.custodian.run_fast_cycle(price).await;
        if !summary.errors.is_empty() {
            let reason = format!("fast cycle: {}", summary.errors.join("; "));
            if self.parts.supervisor.record_failure(&reason).await == Verdict::Halted {
                return Verdict::Halted;
            }
            failed = true;
        }

        if let Some(signal) = self.signals.next_signal(price).await {
            match open(&self.parts, &signal).await.1 {
                Step::Halted => return Verdict::Halted,
                Step::Failed => failed = true,
                Step::Clean => {}
            }
        }

        tracing::debug!(
            price = %price,
            positions = summary.positions,
            unrealized_pnl = %summary.unrealized_pnl,
            take_profits = summary.take_profits,
            stop_moves = summary.stop_moves,
            closed = summary.closed,
            failed,
            "Tick"
        );
        if !failed {
            self.parts.supervisor.record_success();
        }
        Verdict::Continue
    }

    async fn slow_cycle(&mut self) -> Step {
        self.last_slow = Some(Instant::now());
        let supervisor = &self.parts.supervisor;

        match self.parts.custodian.reconcile().await {
            Ok(report) if report.has_critical() => {
                tracing::error!(report = %report, "Reconciliation left a side unprotected");
                Step::after_failure(supervisor.record_failure("reconciliation critical finding").await)
            }
            Ok(report) => {
                let status = self.parts.custodian.status(None);
                tracing::info!(
                    positions = status.positions.len(),
                    capital = %status.capital.base_capital,
                    daily_pnl = %status.capital.daily_realized_pnl,
                    findings = report.findings.len(),
                    "Status"
                );
                Step::Clean
            }
            Err(e) => Step::after_failure(supervisor.record_failure(&format!("reconcile: {e}")).await),
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn handle(&mut self, envelope: Envelope) -> Verdict {
        let Envelope { command, reply } = envelope;
        tracing::info!(command = %command, "Command received");

        let (text, verdict) = self.execute_command(command).await;
        if let Some(reply) = reply {
            // The requester may have gone away.
            let _ = reply.send(text);
        }
        verdict
    }

    async fn execute_command(&mut self, command: Command) -> (String, Verdict) {
        let custodian = Arc::clone(&self.parts.custodian);

        match command {
            Command::OpenManual { side, limit } => match self.parts.gateway.last_price().await {
                Ok(price) => {
                    let mut signal = Signal::manual(side, price);
                    if let Some(limit) = limit {
                        signal = signal.with_limit_price(limit);
                    }
                    let (text, step) = open(&self.parts, &signal).await;
                    (text, step.verdict())
                }
                Err(e) => (format!("Price unavailable: {e}"), Verdict::Continue),
            },
            Command::ClosePosition { id } => {
                let text = match custodian.close_position(&id).await {
                    Ok(pnl) => format!("Closed {id}, pnl {pnl}"),
                    Err(e) => format!("Close failed: {e}"),
                };
                (text, Verdict::Continue)
            }
            Command::PanicCloseAll => {
                let outcome = custodian.close_all().await;
                (
                    format!(
                        "Panic close: {} positions closed, {} sides flattened, pnl {}, orders cancelled: {}",
                        outcome.positions_closed,
                        outcome.sides_flattened,
                        outcome.realized_pnl,
                        outcome.orders_cancelled
                    ),
                    Verdict::Continue,
                )
            }
            Command::RestoreProtection => {
                let text = match custodian.restore_protection().await {
                    Ok(count) => format!("Protection restored for {count} positions"),
                    Err(e) => format!("Restore failed: {e}"),
                };
                self.last_slow = Some(Instant::now());
                (text, Verdict::Continue)
            }
            Command::CleanOrders => {
                let text = match custodian.clean_orders().await {
                    Ok(count) => format!("Cancelled {count} unreferenced orders"),
                    Err(e) => format!("Clean failed: {e}"),
                };
                self.last_slow = Some(Instant::now());
                (text, Verdict::Continue)
            }
            Command::StatusReport => {
                let price: Option<Decimal> = self.parts.gateway.last_price().await.ok();
                (custodian.status(price).to_string(), Verdict::Continue)
            }
        }
    }
}

/// Submit `signal`, returning the reply text and how the attempt went.
///
/// Admission rejections are not failures; execution errors are.
async fn open(parts: &EngineParts, signal: &Signal) -> (String, Step) {
    let supervisor = &parts.supervisor;
    match parts.translator.submit(signal).await {
        Ok(position) => (
            format!(
                "Opened {} {} {} @ {} stop {}",
                position.id,
                position.side,
                position.quantity,
                position.entry_price,
                position.stop_price
            ),
            Step::Clean,
        ),
        Err(rejection) => {
            let reply = format!("Rejected: {rejection}");
            let step = if rejection.is_fatal() {
                Step::after_failure(supervisor.escalate(&rejection.to_string()).await)
            } else if rejection.is_execution_failure() {
                Step::after_failure(supervisor.record_failure(&rejection.to_string()).await)
            } else {
                Step::Clean
            };
            (reply, step)
        }
    }
}
