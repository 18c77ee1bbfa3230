//! Reconciliation Integration Tests
//!
//! Compares the local registry against the in-memory venue after restarts,
//! manual interventions and stop triggers, and checks that healing is
//! idempotent.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use perp_engine::config::{CapitalConfig, CustodianConfig, ExecutionConfig, ModesConfig};
use perp_engine::custodian::{FindingKind, PositionCustodian, PositionRegistry};
use perp_engine::execution::{ExecutionGateway, Precision};
use perp_engine::ledger::CapitalLedger;
use perp_engine::models::{Side, Signal, TradeMode};
use perp_engine::persistence::JsonSnapshot;
use perp_engine::translator::SignalTranslator;
use perp_engine::venue::{MockVenue, VenueAdapter};
use rust_decimal_macros::dec;

struct Book {
    venue: Arc<MockVenue>,
    ledger: Arc<CapitalLedger>,
    custodian: Arc<PositionCustodian>,
    translator: SignalTranslator,
}

fn book_with(venue: Arc<MockVenue>, registry: PositionRegistry) -> Book {
    let gateway = Arc::new(ExecutionGateway::new(
        Arc::clone(&venue) as Arc<dyn VenueAdapter>,
        ExecutionConfig {
            fill_poll_interval_ms: 5,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            ..ExecutionConfig::default()
        },
        Precision::default(),
    ));
    let ledger = Arc::new(CapitalLedger::new(CapitalConfig::default()));
    let custodian = Arc::new(PositionCustodian::new(
        Arc::clone(&gateway),
        Arc::clone(&ledger),
        registry,
        CustodianConfig::default(),
        ModesConfig::default(),
        5,
    ));
    let translator = SignalTranslator::new(
        gateway,
        Arc::clone(&custodian),
        Arc::clone(&ledger),
        ModesConfig::default(),
        CapitalConfig::default(),
        dec!(0.002),
    );
    Book {
        venue,
        ledger,
        custodian,
        translator,
    }
}

fn book() -> Book {
    book_with(
        Arc::new(MockVenue::new(dec!(100), dec!(1000))),
        PositionRegistry::new(),
    )
}

#[tokio::test]
async fn test_orphan_is_adopted_and_protected() {
    let book = book();
    book.venue.set_price(dec!(50));
    book.venue.inject_position(Side::Long, dec!(2), dec!(50));

    let report = book.custodian.reconcile().await.unwrap();

    assert_eq!(report.count(FindingKind::Orphan), 1);
    let positions = book.custodian.registry().all();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].side, Side::Long);
    assert_eq!(positions[0].quantity, dec!(2));
    assert_eq!(positions[0].entry_price, dec!(50));
    assert_eq!(positions[0].stop_price, dec!(49));

    let resident = book.venue.resident_orders();
    assert_eq!(resident.len(), 1);
    assert!(resident[0].is_stop_for(Side::Long));
    assert_eq!(resident[0].order_id, positions[0].stop_order_id);
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let book = book();
    book.translator
        .submit(&Signal::new(Side::Long, TradeMode::Trend, dec!(100)))
        .await
        .unwrap();
    book.venue.inject_position(Side::Short, dec!(1), dec!(100));
    book.venue.inject_stop(Side::Short, dec!(110));
    book.venue.inject_stop(Side::Long, dec!(90));

    let first = book.custodian.reconcile().await.unwrap();
    assert!(!first.is_clean());
    assert_eq!(first.count(FindingKind::Orphan), 1);

    let registry = book.custodian.registry().all();
    let orders = book.venue.resident_orders();
    let placed = book.venue.placed_orders().len();

    let second = book.custodian.reconcile().await.unwrap();
    let third = book.custodian.reconcile().await.unwrap();

    assert!(second.is_clean(), "{second}");
    assert!(third.is_clean(), "{third}");
    assert_eq!(book.custodian.registry().all(), registry);
    assert_eq!(book.venue.resident_orders(), orders);
    assert_eq!(book.venue.placed_orders().len(), placed);
}

#[tokio::test]
async fn test_triggered_stop_becomes_ghost() {
    let book = book();
    let position = book
        .translator
        .submit(&Signal::new(Side::Short, TradeMode::Trend, dec!(100)))
        .await
        .unwrap();
    assert_eq!(position.stop_price, dec!(102));

    book.venue.set_price(dec!(103));
    let report = book.custodian.reconcile().await.unwrap();

    assert_eq!(report.count(FindingKind::Ghost), 1);
    assert!(book.custodian.registry().is_empty());
    assert_eq!(book.ledger.snapshot().daily_realized_pnl, dec!(-10));
}

#[tokio::test]
async fn test_manual_partial_close_is_synced() {
    let book = book();
    let position = book
        .translator
        .submit(&Signal::new(Side::Long, TradeMode::Trend, dec!(100)))
        .await
        .unwrap();
    book.venue.inject_position(Side::Long, dec!(2), dec!(100));

    let report = book.custodian.reconcile().await.unwrap();

    assert_eq!(report.count(FindingKind::QuantityDrift), 1);
    let synced = book.custodian.registry().get(&position.id).unwrap();
    assert_eq!(synced.quantity, dec!(2));
}

#[tokio::test]
async fn test_restart_restores_registry_and_heals() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("positions.json");
    let venue = Arc::new(MockVenue::new(dec!(100), dec!(1000)));

    let opened = {
        let book = book_with(
            Arc::clone(&venue),
            PositionRegistry::with_snapshot(JsonSnapshot::new(&path)).unwrap(),
        );
        book.translator
            .submit(&Signal::new(Side::Long, TradeMode::Trend, dec!(100)))
            .await
            .unwrap()
    };

    // The stop was cancelled by hand while the process was down.
    for order in venue.resident_orders() {
        venue.cancel_order(&order.order_id).await.unwrap();
    }

    let book = book_with(
        Arc::clone(&venue),
        PositionRegistry::with_snapshot(JsonSnapshot::new(&path)).unwrap(),
    );
    assert_eq!(book.custodian.registry().get(&opened.id).unwrap(), opened);

    let report = book.custodian.reconcile().await.unwrap();

    assert_eq!(report.count(FindingKind::Unprotected), 1);
    let healed = book.custodian.registry().get(&opened.id).unwrap();
    assert_ne!(healed.stop_order_id, opened.stop_order_id);
    assert_eq!(healed.stop_price, dec!(98));
    let resident = venue.resident_orders();
    assert_eq!(resident.len(), 1);
    assert_eq!(resident[0].order_id, healed.stop_order_id);
}

#[tokio::test]
async fn test_venue_outage_leaves_registry_untouched() {
    let book = book();
    book.translator
        .submit(&Signal::new(Side::Long, TradeMode::Trend, dec!(100)))
        .await
        .unwrap();
    let before = book.custodian.registry().all();

    book.venue.set_outage(true);
    assert!(book.custodian.reconcile().await.is_err());
    assert_eq!(book.custodian.registry().all(), before);
}
