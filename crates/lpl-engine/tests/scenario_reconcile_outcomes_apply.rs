//! Scenario: accrual outcomes map onto order + balance state.
//!
//! Invariants under test:
//!
//! 1. A 200 PROCESSED/500 reply moves the order to PROCESSED with
//!    `accrual = 500` and credits the owner's balance by exactly 500.
//!
//! 2. A 204 (order unknown to the accrual service) changes nothing.
//!
//! 3. An INVALID reply is terminal: no balance change, and later ticks no
//!    longer consider the order (it drops out of the pending listing, so the
//!    accrual service is never asked about it again).
//!
//! 4. REGISTERED/PROCESSING replies keep the order pending across ticks
//!    without crediting, until a final verdict lands.
//!
//! Driven through `Reconciler::pass` — the same code path the scheduler
//! ticks — with in-memory fakes.

use std::sync::Arc;

use rust_decimal_macros::dec;

use lpl_engine::{EngineConfig, Reconciler};
use lpl_schemas::{AccrualOutcome, AccrualStatus, OrderStatus, OrderStore};
use lpl_testkit::{MemStore, ScriptedAccrual};

fn engine(store: &Arc<MemStore>, accrual: &Arc<ScriptedAccrual>) -> Reconciler {
    Reconciler::new(
        store.clone(),
        accrual.clone(),
        EngineConfig::default(),
    )
}

#[tokio::test]
async fn processed_reply_credits_exactly_the_accrued_amount() {
    let store = Arc::new(MemStore::new());
    let accrual = Arc::new(ScriptedAccrual::new());

    store.seed_user(1);
    store.seed_order("79927398713", 1);
    accrual.script_processed("79927398713", dec!(500));

    let report = engine(&store, &accrual).pass().await.unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(
        store.order_state("79927398713"),
        Some((OrderStatus::Processed, Some(dec!(500))))
    );
    assert_eq!(store.balance(1).current, dec!(500));
}

#[tokio::test]
async fn unregistered_reply_changes_nothing() {
    let store = Arc::new(MemStore::new());
    let accrual = Arc::new(ScriptedAccrual::new());

    store.seed_user(2);
    store.seed_order("12345678903", 2);
    accrual.script("12345678903", Ok(AccrualOutcome::Unregistered));

    let report = engine(&store, &accrual).pass().await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(
        store.order_state("12345678903"),
        Some((OrderStatus::New, None))
    );
    assert_eq!(store.balance(2).current, dec!(0));
    // Still pending: the next tick will ask again.
    assert_eq!(store.list_pending_orders().await.unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_reply_is_terminal_and_skipped_on_later_ticks() {
    let store = Arc::new(MemStore::new());
    let accrual = Arc::new(ScriptedAccrual::new());

    store.seed_user(3);
    store.seed_order("3001", 3);
    accrual.script(
        "3001",
        Ok(AccrualOutcome::Resolved {
            status: AccrualStatus::Invalid,
            accrual: None,
        }),
    );

    let eng = engine(&store, &accrual);
    eng.pass().await.unwrap();

    assert_eq!(store.order_state("3001"), Some((OrderStatus::Invalid, None)));
    assert_eq!(store.balance(3).current, dec!(0));
    assert_eq!(accrual.calls_for("3001"), 1);

    // Later ticks never touch a terminal order.
    let report = eng.pass().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(accrual.calls_for("3001"), 1);
}

#[tokio::test]
async fn processing_reply_keeps_order_pending_until_final_verdict() {
    let store = Arc::new(MemStore::new());
    let accrual = Arc::new(ScriptedAccrual::new());

    store.seed_user(4);
    store.seed_order("4001", 4);
    accrual.script(
        "4001",
        Ok(AccrualOutcome::Resolved {
            status: AccrualStatus::Registered,
            accrual: None,
        }),
    );
    accrual.script(
        "4001",
        Ok(AccrualOutcome::Resolved {
            status: AccrualStatus::Processing,
            accrual: None,
        }),
    );
    accrual.script_processed("4001", dec!(42.5));

    let eng = engine(&store, &accrual);

    eng.pass().await.unwrap();
    assert_eq!(
        store.order_state("4001"),
        Some((OrderStatus::Processing, None))
    );
    assert_eq!(store.balance(4).current, dec!(0));

    eng.pass().await.unwrap();
    assert_eq!(
        store.order_state("4001"),
        Some((OrderStatus::Processing, None))
    );

    eng.pass().await.unwrap();
    assert_eq!(
        store.order_state("4001"),
        Some((OrderStatus::Processed, Some(dec!(42.5))))
    );
    assert_eq!(store.balance(4).current, dec!(42.5));
    assert_eq!(accrual.calls_for("4001"), 3);
}
