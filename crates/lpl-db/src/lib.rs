//! PostgreSQL order store for the loyalty-point ledger.
//!
//! Free async functions over `&PgPool`, plus [`PgStore`] which adapts the
//! pool to the [`OrderStore`] port consumed by the reconciliation engine.
//! All multi-row updates (reconcile, withdraw) run in a single transaction.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::debug;

use lpl_schemas::{
    BalanceSnapshot, OrderRecord, OrderStatus, PendingOrder, ReconcileUpdate, UserId,
    WithdrawalRecord,
};

pub const ENV_DB_URL: &str = "LPL_DATABASE_URL";

/// Store-level violations callers are expected to branch on.
/// Wrapped in `anyhow::Error`; use `downcast_ref::<StoreViolation>()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreViolation {
    #[error("duplicate entry")]
    Duplicate,
    #[error("insufficient funds")]
    InsufficientFunds,
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Readiness probe (connectivity + schema presence). The daemon refuses to
/// start the engine against a database that fails this.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_orders_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

// ---------------------------------------------------------------------------
// Users & submission-path helpers
// ---------------------------------------------------------------------------

/// Insert a user row, returning its id. Duplicate login surfaces as
/// [`StoreViolation::Duplicate`].
pub async fn insert_user(pool: &PgPool, login: &str) -> Result<UserId> {
    let row: Option<(UserId,)> = sqlx::query_as(
        r#"
        insert into users (login)
        values ($1)
        on conflict (login) do nothing
        returning id
        "#,
    )
    .bind(login)
    .fetch_optional(pool)
    .await
    .context("insert_user failed")?;

    match row {
        Some((id,)) => Ok(id),
        None => Err(anyhow!(StoreViolation::Duplicate)),
    }
}

/// Insert a NEW order for `owner`. A duplicate order number surfaces as
/// [`StoreViolation::Duplicate`]; callers use [`order_owner`] to tell
/// "mine already" from "someone else's".
pub async fn insert_order(pool: &PgPool, owner: UserId, number: &str) -> Result<()> {
    let res = sqlx::query(
        r#"
        insert into orders (order_number, user_id, status)
        values ($1, $2, 'NEW')
        "#,
    )
    .bind(number)
    .bind(owner)
    .execute(pool)
    .await;

    match res {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(anyhow!(StoreViolation::Duplicate)),
        Err(e) => Err(anyhow::Error::new(e).context("insert_order failed")),
    }
}

/// Who submitted `number`, if anyone.
pub async fn order_owner(pool: &PgPool, number: &str) -> Result<Option<UserId>> {
    let row: Option<(UserId,)> =
        sqlx::query_as("select user_id from orders where order_number = $1")
            .bind(number)
            .fetch_optional(pool)
            .await
            .context("order_owner failed")?;
    Ok(row.map(|(id,)| id))
}

/// Detect a Postgres unique-constraint violation (SQLSTATE 23505).
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Read paths
// ---------------------------------------------------------------------------

pub async fn orders_for_user(pool: &PgPool, user: UserId) -> Result<Vec<OrderRecord>> {
    let rows: Vec<(String, String, Option<Decimal>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        select order_number, status, accrual, uploaded_at
        from orders
        where user_id = $1
        order by uploaded_at desc
        "#,
    )
    .bind(user)
    .fetch_all(pool)
    .await
    .context("orders_for_user failed")?;

    rows.into_iter()
        .map(|(number, status, accrual, uploaded_at)| {
            Ok(OrderRecord {
                number,
                status: OrderStatus::parse(&status)?,
                accrual,
                uploaded_at,
            })
        })
        .collect()
}

pub async fn user_balance(pool: &PgPool, user: UserId) -> Result<BalanceSnapshot> {
    let (current, withdrawn): (Decimal, Decimal) =
        sqlx::query_as("select balance, withdrawn from users where id = $1")
            .bind(user)
            .fetch_one(pool)
            .await
            .context("user_balance failed")?;
    Ok(BalanceSnapshot { current, withdrawn })
}

pub async fn user_withdrawals(pool: &PgPool, user: UserId) -> Result<Vec<WithdrawalRecord>> {
    let rows: Vec<(String, Decimal, DateTime<Utc>)> = sqlx::query_as(
        r#"
        select order_number, amount, withdrawn_at
        from withdrawals
        where user_id = $1
        order by withdrawn_at desc
        "#,
    )
    .bind(user)
    .fetch_all(pool)
    .await
    .context("user_withdrawals failed")?;

    Ok(rows
        .into_iter()
        .map(|(order, sum, processed_at)| WithdrawalRecord {
            order,
            sum,
            processed_at,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Withdrawal debit (independent of the reconciliation engine)
// ---------------------------------------------------------------------------

/// Debit `amount` points: balance -> withdrawn, plus a withdrawals row, in
/// one transaction. Fails with [`StoreViolation::InsufficientFunds`] without
/// touching anything when the balance does not cover the amount.
pub async fn withdraw_balance(
    pool: &PgPool,
    user: UserId,
    order_number: &str,
    amount: Decimal,
) -> Result<()> {
    let mut tx = pool.begin().await.context("withdraw begin failed")?;

    let (current,): (Decimal,) =
        sqlx::query_as("select balance from users where id = $1 for update")
            .bind(user)
            .fetch_one(&mut *tx)
            .await
            .context("withdraw balance read failed")?;

    if current < amount {
        return Err(anyhow!(StoreViolation::InsufficientFunds));
    }

    sqlx::query(
        r#"
        update users
        set balance = balance - $1, withdrawn = withdrawn + $1
        where id = $2
        "#,
    )
    .bind(amount)
    .bind(user)
    .execute(&mut *tx)
    .await
    .context("withdraw balance update failed")?;

    sqlx::query(
        r#"
        insert into withdrawals (user_id, order_number, amount)
        values ($1, $2, $3)
        "#,
    )
    .bind(user)
    .bind(order_number)
    .bind(amount)
    .execute(&mut *tx)
    .await
    .context("withdraw insert failed")?;

    tx.commit().await.context("withdraw commit failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Orders still awaiting a final accrual verdict.
pub async fn list_pending_orders(pool: &PgPool) -> Result<Vec<PendingOrder>> {
    let rows: Vec<(String, UserId, String)> = sqlx::query_as(
        r#"
        select order_number, user_id, status
        from orders
        where status in ('NEW', 'PROCESSING')
        "#,
    )
    .fetch_all(pool)
    .await
    .context("list_pending_orders failed")?;

    rows.into_iter()
        .map(|(number, owner, status)| {
            Ok(PendingOrder {
                number,
                owner,
                status: OrderStatus::parse(&status)?,
            })
        })
        .collect()
}

/// Apply one reconciliation result atomically.
///
/// Invariants enforced here, not by callers:
/// - the order row is locked (`for update`) for the whole transaction, so
///   two writers to the same order serialize;
/// - an already-terminal order is left untouched (monotonicity), which also
///   makes the balance credit fire only on the actual transition into
///   PROCESSED — re-observing PROCESSED can never double-credit;
/// - status, accrual and the owner's balance commit or roll back together.
pub async fn reconcile_order(pool: &PgPool, update: &ReconcileUpdate) -> Result<()> {
    let mut tx = pool.begin().await.context("reconcile begin failed")?;

    let prev: Option<(String,)> =
        sqlx::query_as("select status from orders where order_number = $1 for update")
            .bind(&update.number)
            .fetch_optional(&mut *tx)
            .await
            .context("reconcile status read failed")?;

    let prev = match prev {
        Some((s,)) => OrderStatus::parse(&s)?,
        None => bail!("reconcile_order: unknown order {}", update.number),
    };

    if prev.is_terminal() {
        debug!(order = %update.number, status = prev.as_str(), "already terminal, skipping");
        return Ok(());
    }

    sqlx::query(
        r#"
        update orders
        set status = $1, accrual = $2
        where order_number = $3
        "#,
    )
    .bind(update.status.as_str())
    .bind(update.accrual)
    .bind(&update.number)
    .execute(&mut *tx)
    .await
    .context("reconcile order update failed")?;

    if update.status == OrderStatus::Processed {
        if let Some(amount) = update.accrual {
            if amount > Decimal::ZERO {
                sqlx::query(
                    r#"
                    update users
                    set balance = balance + $1
                    where id = $2
                    "#,
                )
                .bind(amount)
                .bind(update.owner)
                .execute(&mut *tx)
                .await
                .context("reconcile balance credit failed")?;
                debug!(order = %update.number, user = update.owner, %amount, "balance credited");
            }
        }
    }

    tx.commit().await.context("reconcile commit failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Port adapter
// ---------------------------------------------------------------------------

/// [`OrderStore`] implementation backed by a `PgPool`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl lpl_schemas::OrderStore for PgStore {
    async fn list_pending_orders(&self) -> Result<Vec<PendingOrder>> {
        list_pending_orders(&self.pool).await
    }

    async fn reconcile_order(&self, update: &ReconcileUpdate) -> Result<()> {
        reconcile_order(&self.pool, update).await
    }
}
