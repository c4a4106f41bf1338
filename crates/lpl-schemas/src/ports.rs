//! Async ports the reconciliation engine is generic over.
//!
//! Production wires `lpl-db::PgStore` and the reqwest gateway from
//! `lpl-engine`; scenario tests wire the in-memory fakes from `lpl-testkit`.

use anyhow::Result;
use async_trait::async_trait;

use crate::{AccrualError, AccrualOutcome, PendingOrder, ReconcileUpdate};

/// Persistent order + balance state, as seen by the engine.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Orders in NEW or PROCESSING at the moment of the call. Orders that
    /// turn NEW afterwards are picked up on the next tick.
    async fn list_pending_orders(&self) -> Result<Vec<PendingOrder>>;

    /// Atomically apply one reconciliation result: order status (+ accrual)
    /// and, on the transition into PROCESSED, the owner's balance credit.
    /// Must be a no-op if the stored order is already terminal.
    async fn reconcile_order(&self, update: &ReconcileUpdate) -> Result<()>;
}

/// The external accrual service, one order number at a time.
#[async_trait]
pub trait AccrualSource: Send + Sync {
    /// Resolve one order. Implementations own the 429 wait-and-retry policy;
    /// callers only ever see a final outcome or a final error for this tick.
    async fn fetch(&self, order_number: &str) -> Result<AccrualOutcome, AccrualError>;
}
