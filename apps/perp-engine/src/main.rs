//! Perp Engine Binary
//!
//! Starts the execution and reconciliation engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin perp-engine -- config.yaml
//! ```
//!
//! # Environment Variables
//!
//! - `VENUE_API_KEY` / `VENUE_API_SECRET`: interpolated into `venue` when
//!   `venue.kind: rest`
//! - `RUST_LOG`: overrides `observability.logging.level`
//!
//! # Console
//!
//! With `engine.console: true`, stdin accepts one command per line:
//! `long [limit]`, `short [limit]`, `close <id>`, `panic`, `protect`, `clean`, `status`.

use std::sync::Arc;

use anyhow::Context;
use perp_engine::config::{Config, VenueKind, load_config};
use perp_engine::custodian::{PositionCustodian, PositionRegistry};
use perp_engine::engine::{Command, CommandHandle, Engine, EngineParts, IdleSignalSource};
use perp_engine::execution::{ExecutionGateway, Precision};
use perp_engine::ledger::CapitalLedger;
use perp_engine::observability::{init_metrics, init_tracing};
use perp_engine::persistence::{CsvLog, JsonSnapshot};
use perp_engine::supervisor::Supervisor;
use perp_engine::translator::SignalTranslator;
use perp_engine::venue::{MockVenue, RestVenue, VenueAdapter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref()).context("failed to load configuration")?;

    init_tracing(&config.observability.logging).context("failed to initialise tracing")?;
    if config.observability.metrics.enabled {
        init_metrics(&config.observability.metrics).context("failed to start metrics exporter")?;
    }

    tracing::info!(
        venue = ?config.venue.kind,
        symbol = %config.venue.symbol,
        capital = %config.capital.base_capital,
        leverage = config.capital.leverage,
        "Starting perp engine"
    );

    let venue = create_venue(&config)?;
    let precision = match venue.instrument_rules().await {
        Ok(precision) => precision,
        Err(e) => {
            tracing::warn!(error = %e, "Instrument rules unavailable, using defaults");
            Precision::default()
        }
    };

    let parts = assemble(&config, venue, precision)?;
    parts
        .gateway
        .prepare_account(config.capital.leverage)
        .await
        .context("failed to prepare venue account")?;

    let (engine, handle) = Engine::new(parts, Box::new(IdleSignalSource), &config.engine);

    let shutdown = CancellationToken::new();
    if config.engine.console {
        tokio::spawn(run_console(handle, shutdown.clone()));
    }
    tokio::spawn(shutdown_signal(shutdown.clone()));

    engine.run(shutdown).await?;
    tracing::info!("Perp engine stopped");
    Ok(())
}

/// Load .env file from the working directory if present.
fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring unreadable .env file: {e}");
        }
    }
}

fn create_venue(config: &Config) -> anyhow::Result<Arc<dyn VenueAdapter>> {
    match config.venue.kind {
        VenueKind::Mock => {
            tracing::warn!("Running against the in-memory venue");
            Ok(Arc::new(MockVenue::new(
                config.venue.mock_price,
                config.venue.mock_balance,
            )))
        }
        VenueKind::Rest => {
            let venue = RestVenue::new(&config.venue, config.execution.request_timeout())
                .context("failed to create REST venue")?;
            Ok(Arc::new(venue))
        }
    }
}

/// Wire the components together, restoring persisted state.
fn assemble(
    config: &Config,
    venue: Arc<dyn VenueAdapter>,
    precision: Precision,
) -> anyhow::Result<EngineParts> {
    let persistence = &config.persistence;

    let mut gateway = ExecutionGateway::new(venue, config.execution.clone(), precision);
    if persistence.enabled {
        gateway = gateway.with_audit(Arc::new(CsvLog::new(persistence.audit_path())));
    }
    let gateway = Arc::new(gateway);

    let (ledger, registry) = if persistence.enabled {
        let ledger = CapitalLedger::open(
            config.capital.clone(),
            JsonSnapshot::new(persistence.ledger_path()),
        )
        .context("failed to open capital ledger")?;
        let registry = PositionRegistry::with_snapshot(JsonSnapshot::new(persistence.registry_path()))
            .context("failed to load position registry")?;
        (ledger, registry)
    } else {
        (CapitalLedger::new(config.capital.clone()), PositionRegistry::new())
    };
    let ledger = Arc::new(ledger);

    let mut custodian = PositionCustodian::new(
        Arc::clone(&gateway),
        Arc::clone(&ledger),
        registry,
        config.custodian.clone(),
        config.modes.clone(),
        config.capital.leverage,
    );
    if persistence.enabled {
        custodian = custodian.with_journal(Arc::new(CsvLog::new(persistence.journal_path())));
    }
    let custodian = Arc::new(custodian);

    let translator = Arc::new(SignalTranslator::new(
        Arc::clone(&gateway),
        Arc::clone(&custodian),
        ledger,
        config.modes.clone(),
        config.capital.clone(),
        config.execution.structural_stop_buffer,
    ));
    let supervisor = Arc::new(Supervisor::new(Arc::clone(&gateway), config.supervisor.clone()));

    Ok(EngineParts {
        gateway,
        custodian,
        translator,
        supervisor,
    })
}

/// Read commands from stdin until EOF or shutdown.
async fn run_console(handle: CommandHandle, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => return,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Console read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match Command::parse(&line) {
            Ok(command) => match handle.request(command).await {
                Ok(reply) => println!("{reply}"),
                Err(e) => {
                    tracing::warn!(error = %e, "Engine no longer accepts commands");
                    return;
                }
            },
            Err(usage) => println!("{usage}"),
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown.cancel();
}
