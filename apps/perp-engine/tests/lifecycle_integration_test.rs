//! Position Lifecycle Integration Tests
//!
//! Drives signals through the translator, gateway and custodian against the
//! in-memory venue: sizing, entry-then-protect, the take-profit ladder and
//! the daily circuit breaker.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use perp_engine::config::{
    CapitalConfig, CustodianConfig, EngineSettings, ExecutionConfig, ModesConfig,
    SupervisorConfig, TrailingConfig,
};
use perp_engine::custodian::{PositionCustodian, PositionRegistry};
use perp_engine::engine::{Command, Engine, EngineParts, QueuedSignals};
use perp_engine::execution::{ExecutionError, ExecutionGateway, Precision};
use perp_engine::ledger::CapitalLedger;
use perp_engine::models::{PositionStatus, Side, Signal, StopSpec, TradeMode};
use perp_engine::supervisor::Supervisor;
use perp_engine::translator::{Rejection, SignalTranslator};
use perp_engine::venue::{MockVenue, VenueAdapter};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Rig
// =============================================================================

struct Rig {
    venue: Arc<MockVenue>,
    gateway: Arc<ExecutionGateway>,
    ledger: Arc<CapitalLedger>,
    custodian: Arc<PositionCustodian>,
    translator: Arc<SignalTranslator>,
}

fn execution_config() -> ExecutionConfig {
    ExecutionConfig {
        fill_poll_interval_ms: 5,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        request_timeout_ms: 200,
        ..ExecutionConfig::default()
    }
}

fn no_trailing() -> CustodianConfig {
    CustodianConfig {
        trailing: TrailingConfig {
            enabled: false,
            ..TrailingConfig::default()
        },
        ..CustodianConfig::default()
    }
}

fn rig(custodian_config: CustodianConfig) -> Rig {
    let venue = Arc::new(MockVenue::new(dec!(100), dec!(1000)));
    let gateway = Arc::new(ExecutionGateway::new(
        Arc::clone(&venue) as Arc<dyn VenueAdapter>,
        execution_config(),
        Precision::default(),
    ));
    let capital = CapitalConfig::default();
    let ledger = Arc::new(CapitalLedger::new(capital.clone()));
    let custodian = Arc::new(PositionCustodian::new(
        Arc::clone(&gateway),
        Arc::clone(&ledger),
        PositionRegistry::new(),
        custodian_config,
        ModesConfig::default(),
        capital.leverage,
    ));
    let translator = Arc::new(SignalTranslator::new(
        Arc::clone(&gateway),
        Arc::clone(&custodian),
        Arc::clone(&ledger),
        ModesConfig::default(),
        capital,
        dec!(0.002),
    ));
    Rig {
        venue,
        gateway,
        ledger,
        custodian,
        translator,
    }
}

fn remote_quantity(venue: &MockVenue, side: Side) -> Decimal {
    venue.position(side).map_or(Decimal::ZERO, |p| p.quantity)
}

// =============================================================================
// Sizing and Entry
// =============================================================================

#[tokio::test]
async fn test_trend_signal_sized_and_protected() {
    let rig = rig(no_trailing());
    let signal = Signal::new(Side::Long, TradeMode::Trend, dec!(100));

    let plan = rig.translator.plan(&signal).unwrap();
    assert_eq!(plan.quantity, dec!(5));
    assert_eq!(plan.stop, StopSpec::Distance(dec!(0.02)));
    assert_eq!(plan.indicative_stop(), dec!(98));
    assert_eq!(plan.take_profits, vec![dec!(101.5), dec!(103), dec!(106)]);

    let position = rig.translator.submit(&signal).await.unwrap();

    assert_eq!(position.quantity, dec!(5));
    assert_eq!(position.stop_price, dec!(98));
    assert_eq!(position.status, PositionStatus::Open);
    assert_eq!(rig.custodian.registry().len(), 1);
    assert_eq!(remote_quantity(&rig.venue, Side::Long), dec!(5));

    let resident = rig.venue.resident_orders();
    assert_eq!(resident.len(), 1);
    assert_eq!(resident[0].order_id, position.stop_order_id);
    assert_eq!(rig.ledger.snapshot().trades_today, 1);
}

#[tokio::test]
async fn test_first_target_realizes_slice() {
    let rig = rig(no_trailing());
    let position = rig
        .translator
        .submit(&Signal::new(Side::Long, TradeMode::Trend, dec!(100)))
        .await
        .unwrap();

    rig.venue.set_price(dec!(101.5));
    let summary = rig.custodian.run_fast_cycle(dec!(101.5)).await;

    assert_eq!(summary.take_profits, 1);
    let updated = rig.custodian.registry().get(&position.id).unwrap();
    assert_eq!(updated.quantity, dec!(3.5));
    assert_eq!(updated.realized_pnl, dec!(2.25));
    assert!(updated.breakeven_active);
    assert_eq!(rig.ledger.snapshot().daily_realized_pnl, dec!(2.25));
    assert_eq!(remote_quantity(&rig.venue, Side::Long), dec!(3.5));
}

// =============================================================================
// Never Naked
// =============================================================================

#[tokio::test]
async fn test_rejected_stop_leaves_no_exposure() {
    let rig = rig(no_trailing());
    rig.venue.reject_stops(true);

    let result = rig
        .translator
        .submit(&Signal::new(Side::Long, TradeMode::Trend, dec!(100)))
        .await;

    let Err(Rejection::Execution(ExecutionError::ProtectionFailed { .. })) = &result else {
        panic!("expected protection failure, got {result:?}");
    };
    assert_eq!(remote_quantity(&rig.venue, Side::Long), Decimal::ZERO);
    assert!(rig.custodian.registry().is_empty());
    assert!(rig.venue.resident_orders().is_empty());
}

#[tokio::test]
async fn test_every_open_position_has_resident_stop() {
    let rig = rig(no_trailing());
    rig.translator
        .submit(&Signal::new(Side::Long, TradeMode::Trend, dec!(100)))
        .await
        .unwrap();
    rig.translator
        .submit(&Signal::new(Side::Short, TradeMode::SniperFvg, dec!(100)))
        .await
        .unwrap();

    for price in [dec!(101), dec!(101.5), dec!(100.5), dec!(100.3)] {
        rig.venue.set_price(price);
        rig.custodian.run_fast_cycle(price).await;

        let state = rig.gateway.fetch_remote_state().await.unwrap();
        for position in rig.custodian.registry().all() {
            assert!(
                state.has_order(&position.stop_order_id),
                "{} has no resident stop at {price}",
                position.id
            );
        }
    }
}

// =============================================================================
// Breakeven
// =============================================================================

#[tokio::test]
async fn test_breakeven_moves_stop_once() {
    let rig = rig(no_trailing());
    let position = rig
        .translator
        .submit(&Signal::new(Side::Long, TradeMode::Trend, dec!(100)))
        .await
        .unwrap();
    let placed_at_open = rig.venue.stops_placed();

    for price in [dec!(100.9), dec!(101.0), dec!(100.6), dec!(101.2)] {
        rig.venue.set_price(price);
        rig.custodian.run_fast_cycle(price).await;
    }

    let updated = rig.custodian.registry().get(&position.id).unwrap();
    assert!(updated.breakeven_active);
    assert_eq!(updated.stop_price, dec!(100.1));
    assert_eq!(rig.venue.stops_placed(), placed_at_open + 1);
}

// =============================================================================
// Circuit Breaker
// =============================================================================

#[tokio::test]
async fn test_daily_loss_limit_blocks_new_entries() {
    let rig = rig(no_trailing());
    rig.ledger.register_pnl(dec!(-39.99)).unwrap();
    assert!(rig.ledger.can_trade().0);

    rig.ledger.register_pnl(dec!(-0.02)).unwrap();
    let (allowed, reason) = rig.ledger.can_trade();
    assert!(!allowed);
    assert!(reason.contains("daily loss"), "{reason}");

    let result = rig
        .translator
        .submit(&Signal::new(Side::Long, TradeMode::Trend, dec!(100)))
        .await;
    assert!(matches!(result, Err(Rejection::CircuitBreaker(_))));
    assert!(rig.venue.placed_orders().is_empty());
}

#[tokio::test]
async fn test_losing_exit_can_trip_breaker() {
    let rig = rig(no_trailing());
    rig.ledger.register_pnl(dec!(-35)).unwrap();
    let position = rig
        .translator
        .submit(&Signal::new(Side::Long, TradeMode::Trend, dec!(100)))
        .await
        .unwrap();

    rig.venue.set_price(dec!(99));
    let pnl = rig.custodian.close_position(&position.id).await.unwrap();

    assert_eq!(pnl, dec!(-5));
    assert!(!rig.ledger.can_trade().0);
}

// =============================================================================
// Engine
// =============================================================================

#[tokio::test]
async fn test_engine_runs_signal_to_exit() {
    let rig = rig(no_trailing());
    let exits = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&exits);
    let supervisor = Arc::new(Supervisor::with_terminator(
        Arc::clone(&rig.gateway),
        SupervisorConfig::default(),
        Arc::new(move |code| recorded.lock().unwrap().push(code)),
    ));
    let parts = EngineParts {
        gateway: Arc::clone(&rig.gateway),
        custodian: Arc::clone(&rig.custodian),
        translator: Arc::clone(&rig.translator),
        supervisor,
    };
    let settings = EngineSettings {
        console: false,
        ..EngineSettings::default()
    };

    let (sender, source) = QueuedSignals::channel(4);
    sender
        .send(Signal::new(Side::Long, TradeMode::Trend, dec!(100)))
        .await
        .unwrap();

    let (engine, handle) = Engine::new(parts, Box::new(source), &settings);
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(engine.run(shutdown.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while rig.custodian.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("signal was not executed");

    let reply = handle.request(Command::PanicCloseAll).await.unwrap();
    assert!(reply.contains("1 positions closed"), "{reply}");
    assert_eq!(remote_quantity(&rig.venue, Side::Long), Decimal::ZERO);

    shutdown.cancel();
    task.await.unwrap().unwrap();
    assert!(exits.lock().unwrap().is_empty());
}
