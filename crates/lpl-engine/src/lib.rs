//! Order accrual reconciliation engine.
//!
//! Three pieces, wired together by the daemon:
//!
//! - [`gateway::AccrualGateway`] — reqwest client for the external accrual
//!   service, including the mandatory 429 wait-and-retry.
//! - [`pool`] — bounded worker pool that drains one tick's batch of pending
//!   orders through the gateway and into the store.
//! - [`scheduler::Reconciler`] — the fixed-interval loop that owns the tick
//!   cadence and the cancellation path.
//!
//! The engine holds no global state: it is constructed from an
//! [`lpl_schemas::OrderStore`] and an [`lpl_schemas::AccrualSource`] and can
//! therefore run against the in-memory fakes from `lpl-testkit`.

pub mod gateway;
pub mod pool;
pub mod scheduler;

pub use gateway::AccrualGateway;
pub use pool::BatchReport;
pub use scheduler::{EngineConfig, Reconciler};
