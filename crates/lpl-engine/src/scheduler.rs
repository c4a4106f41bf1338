//! Fixed-interval reconciliation loop.
//!
//! One loop owns the tick cadence. A pass runs inline in the loop body, so
//! ticks never overlap; a pass that outlives the interval delays the next
//! tick instead of stacking. A failed pass is logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::pool::{run_batch, BatchReport};
use lpl_schemas::{AccrualSource, OrderStore};

#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub worker_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            worker_count: 5,
        }
    }
}

/// The engine: store + accrual source + cadence, no ambient globals.
pub struct Reconciler {
    store: Arc<dyn OrderStore>,
    accrual: Arc<dyn AccrualSource>,
    cfg: EngineConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        accrual: Arc<dyn AccrualSource>,
        cfg: EngineConfig,
    ) -> Self {
        Self { store, accrual, cfg }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between ticks: a pass that is already
    /// running finishes naturally (its workers are awaited), then the loop
    /// exits without scheduling another tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.cfg.poll_interval.as_secs(),
            workers = self.cfg.worker_count,
            "reconciler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("reconciler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.pass().await {
                        Ok(report) if report.attempted > 0 => {
                            info!(
                                attempted = report.attempted,
                                updated = report.updated,
                                skipped = report.skipped,
                                failed = report.failed,
                                "reconcile pass complete"
                            );
                        }
                        Ok(_) => {}
                        // Store unreachable, etc. Next tick retries.
                        Err(e) => error!(error = %e, "reconcile pass failed"),
                    }
                }
            }
        }
    }

    /// One reconciliation pass: list pending orders, drain them through the
    /// worker pool. Public so tests and one-shot tools can tick manually.
    pub async fn pass(&self) -> Result<BatchReport> {
        let batch = self
            .store
            .list_pending_orders()
            .await
            .context("list pending orders")?;

        Ok(run_batch(
            Arc::clone(&self.store),
            Arc::clone(&self.accrual),
            batch,
            self.cfg.worker_count,
        )
        .await)
    }
}
