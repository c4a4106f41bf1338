//! Bounded worker pool for one reconciliation tick.
//!
//! The batch goes into an mpsc queue sized to the batch; a fixed number of
//! workers race to pull orders off it, call the accrual source, and apply
//! the result to the store. Workers share nothing beyond the queue and the
//! store's transactional interface; one order's failure never aborts the
//! rest of the batch. The function returns once every order has been
//! attempted exactly once.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use lpl_schemas::{
    AccrualOutcome, AccrualSource, OrderStatus, OrderStore, PendingOrder, ReconcileUpdate,
};

/// What happened to one tick's batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Orders handed to a worker.
    pub attempted: usize,
    /// Store updates that committed.
    pub updated: usize,
    /// 204 responses: order unknown to the accrual service, left as is.
    pub skipped: usize,
    /// Gateway or store failures; the order is retried on a later tick.
    pub failed: usize,
}

impl std::ops::AddAssign for BatchReport {
    fn add_assign(&mut self, rhs: Self) {
        self.attempted += rhs.attempted;
        self.updated += rhs.updated;
        self.skipped += rhs.skipped;
        self.failed += rhs.failed;
    }
}

/// Drain `batch` with `worker_count` concurrent workers.
pub async fn run_batch(
    store: Arc<dyn OrderStore>,
    accrual: Arc<dyn AccrualSource>,
    batch: Vec<PendingOrder>,
    worker_count: usize,
) -> BatchReport {
    if batch.is_empty() {
        return BatchReport::default();
    }

    let (tx, rx) = mpsc::channel::<PendingOrder>(batch.len());
    for order in batch {
        // Capacity equals the batch length, so this never blocks.
        let _ = tx.send(order).await;
    }
    drop(tx);

    let rx = Arc::new(Mutex::new(rx));
    let workers = worker_count.max(1);

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let rx = Arc::clone(&rx);
        let store = Arc::clone(&store);
        let accrual = Arc::clone(&accrual);
        handles.push(tokio::spawn(async move {
            let mut report = BatchReport::default();
            loop {
                // Lock only for the dequeue; the HTTP round trip and the
                // store update run without holding it.
                let order = { rx.lock().await.recv().await };
                let Some(order) = order else { break };
                report += process_order(store.as_ref(), accrual.as_ref(), order).await;
            }
            report
        }));
    }

    let mut total = BatchReport::default();
    for handle in handles {
        match handle.await {
            Ok(report) => total += report,
            Err(e) => error!(error = %e, "reconcile worker panicked"),
        }
    }
    total
}

async fn process_order(
    store: &dyn OrderStore,
    accrual: &dyn AccrualSource,
    order: PendingOrder,
) -> BatchReport {
    let mut report = BatchReport {
        attempted: 1,
        ..Default::default()
    };

    let outcome = match accrual.fetch(&order.number).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(order = %order.number, error = %e, "accrual fetch failed, will retry next tick");
            report.failed = 1;
            return report;
        }
    };

    let (status, amount) = match outcome {
        AccrualOutcome::Unregistered => {
            debug!(order = %order.number, "not registered with accrual service, skipping");
            report.skipped = 1;
            return report;
        }
        AccrualOutcome::Resolved { status, accrual } => (status.to_order_status(), accrual),
    };

    let update = ReconcileUpdate {
        number: order.number.clone(),
        owner: order.owner,
        status,
        accrual: if status == OrderStatus::Processed {
            amount
        } else {
            None
        },
    };

    match store.reconcile_order(&update).await {
        Ok(()) => {
            debug!(order = %order.number, status = status.as_str(), "order reconciled");
            report.updated = 1;
        }
        Err(e) => {
            warn!(order = %order.number, error = %e, "store update failed, will retry next tick");
            report.failed = 1;
        }
    }
    report
}
