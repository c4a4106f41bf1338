//! lpl-daemon entry point.
//!
//! Intentionally thin: tracing setup, config, DB connect + migrate, then the
//! reconciliation engine runs until SIGINT. The engine itself lives in
//! `lpl-engine`; all persistence in `lpl-db`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use lpl_engine::{AccrualGateway, Reconciler};
use lpl_schemas::{AccrualSource, OrderStore};

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = config::from_env_and_args()?;

    let pool = lpl_db::connect(&cfg.database_url).await?;
    lpl_db::migrate(&pool).await?;

    let db = lpl_db::status(&pool).await.context("database readiness probe")?;
    if !db.ok || !db.has_orders_table {
        bail!("database not ready after migrate: {db:?}");
    }
    info!("database ready");

    let store: Arc<dyn OrderStore> = Arc::new(lpl_db::PgStore::new(pool));
    let accrual: Arc<dyn AccrualSource> =
        Arc::new(AccrualGateway::new(&cfg.accrual_addr).context("build accrual gateway")?);

    let engine = Reconciler::new(store, accrual, cfg.engine);
    let shutdown = CancellationToken::new();

    let engine_task = tokio::spawn({
        let token = shutdown.clone();
        async move { engine.run(token).await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("install SIGINT handler")?;
    info!("shutdown signal received");

    shutdown.cancel();
    engine_task.await.context("engine task panicked")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
