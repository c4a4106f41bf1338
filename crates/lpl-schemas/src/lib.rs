//! Shared domain types for the loyalty-point ledger.
//!
//! Everything the engine, the store, and the fakes agree on lives here:
//! order/accrual status enums, the rows exchanged across the store port, the
//! gateway outcome type, and the two async ports themselves.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod ports;

pub use ports::{AccrualSource, OrderStore};

/// Stable key for a user row. Serial in Postgres, plain integer in fakes.
pub type UserId = i64;

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// Local lifecycle of an order in the ledger.
///
/// NEW is the insertion state; PROCESSED and INVALID are terminal and are
/// never left once entered. PROCESSING records that the accrual service has
/// seen the order but has not finished scoring it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Processed,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "PROCESSED" => Ok(OrderStatus::Processed),
            "INVALID" => Ok(OrderStatus::Invalid),
            other => Err(anyhow!("invalid order status: {}", other)),
        }
    }

    /// Terminal states are never reconciled again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }
}

// ---------------------------------------------------------------------------
// AccrualStatus
// ---------------------------------------------------------------------------

/// Status vocabulary of the external accrual service (wire values).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl AccrualStatus {
    /// Local status an order moves to after observing this remote status.
    ///
    /// REGISTERED and PROCESSING both map to the local PROCESSING state: the
    /// distinction only matters to the remote service.
    pub fn to_order_status(self) -> OrderStatus {
        match self {
            AccrualStatus::Registered | AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

// ---------------------------------------------------------------------------
// Rows exchanged over the store port
// ---------------------------------------------------------------------------

/// A reconciliation candidate as listed at the start of a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOrder {
    pub number: String,
    pub owner: UserId,
    pub status: OrderStatus,
}

/// One reconciliation result, ready to be applied atomically.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileUpdate {
    pub number: String,
    pub owner: UserId,
    pub status: OrderStatus,
    /// Present only when `status` is PROCESSED.
    pub accrual: Option<Decimal>,
}

/// Full order row for read paths and assertions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderRecord {
    pub number: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

/// Per-user balance: points currently spendable and lifetime debits.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BalanceSnapshot {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

/// One debit made against a balance (independent withdrawal subsystem).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WithdrawalRecord {
    pub order: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Gateway outcome
// ---------------------------------------------------------------------------

/// What the accrual service said about one order.
///
/// Rate limiting and transport failures are not outcomes: the gateway
/// resolves 429 internally (mandatory wait-and-retry) and surfaces anything
/// unrecoverable as [`AccrualError`].
#[derive(Clone, Debug, PartialEq)]
pub enum AccrualOutcome {
    /// HTTP 200 with a decodable payload.
    Resolved {
        status: AccrualStatus,
        /// Populated only when `status` is PROCESSED.
        accrual: Option<Decimal>,
    },
    /// HTTP 204 — the order is unknown to the service; skip it this tick.
    Unregistered,
}

/// Gateway failure modes. All of them leave the order unchanged; the order
/// stays non-terminal and is naturally retried on the next tick.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum AccrualError {
    #[error("accrual request failed: {0}")]
    Transport(String),
    #[error("accrual response undecodable: {0}")]
    Protocol(String),
    #[error("accrual returned unexpected status {0}")]
    UnexpectedStatus(u16),
    #[error("accrual rate limit not cleared after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },
}

// ---------------------------------------------------------------------------
// Order-number checksum
// ---------------------------------------------------------------------------

/// Luhn checksum over a digit string. The submission path rejects numbers
/// failing this before they ever reach the ledger; the engine assumes it.
pub fn luhn_valid(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let mut sum: u32 = 0;
    for (i, b) in number.bytes().rev().enumerate() {
        let mut d = u32::from(b - b'0');
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}
