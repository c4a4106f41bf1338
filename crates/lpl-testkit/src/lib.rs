//! In-memory fakes for engine scenario tests: a store with the same
//! transition semantics as the Postgres store, and a scripted accrual
//! source. No DB, no network.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;

use lpl_schemas::{
    AccrualError, AccrualOutcome, AccrualSource, BalanceSnapshot, OrderStatus, OrderStore,
    PendingOrder, ReconcileUpdate, UserId,
};

// ---------------------------------------------------------------------------
// MemStore
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct MemOrder {
    owner: UserId,
    status: OrderStatus,
    accrual: Option<Decimal>,
}

#[derive(Default)]
struct MemState {
    orders: BTreeMap<String, MemOrder>,
    balances: BTreeMap<UserId, BalanceSnapshot>,
}

/// Mutex-guarded order/balance state mirroring the Postgres reconcile
/// semantics: terminal no-op, credit only on the transition into PROCESSED.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
    fail_next_list: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_user(&self, user: UserId) {
        self.state.lock().unwrap().balances.insert(
            user,
            BalanceSnapshot {
                current: Decimal::ZERO,
                withdrawn: Decimal::ZERO,
            },
        );
    }

    /// Insert an order in NEW, the way the submission path would.
    pub fn seed_order(&self, number: &str, owner: UserId) {
        self.state.lock().unwrap().orders.insert(
            number.to_string(),
            MemOrder {
                owner,
                status: OrderStatus::New,
                accrual: None,
            },
        );
    }

    pub fn order_state(&self, number: &str) -> Option<(OrderStatus, Option<Decimal>)> {
        self.state
            .lock()
            .unwrap()
            .orders
            .get(number)
            .map(|o| (o.status, o.accrual))
    }

    pub fn balance(&self, user: UserId) -> BalanceSnapshot {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&user)
            .copied()
            .unwrap_or(BalanceSnapshot {
                current: Decimal::ZERO,
                withdrawn: Decimal::ZERO,
            })
    }

    /// Make the next `list_pending_orders` call fail (store outage).
    pub fn fail_next_list(&self) {
        self.fail_next_list.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderStore for MemStore {
    async fn list_pending_orders(&self) -> Result<Vec<PendingOrder>> {
        if self.fail_next_list.swap(false, Ordering::SeqCst) {
            bail!("injected store outage");
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .orders
            .iter()
            .filter(|(_, o)| !o.status.is_terminal())
            .map(|(number, o)| PendingOrder {
                number: number.clone(),
                owner: o.owner,
                status: o.status,
            })
            .collect())
    }

    async fn reconcile_order(&self, update: &ReconcileUpdate) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let order = state
            .orders
            .get_mut(&update.number)
            .ok_or_else(|| anyhow!("unknown order {}", update.number))?;

        if order.status.is_terminal() {
            return Ok(());
        }

        order.status = update.status;
        order.accrual = update.accrual;

        if update.status == OrderStatus::Processed {
            if let Some(amount) = update.accrual {
                if amount > Decimal::ZERO {
                    let bal = state.balances.entry(update.owner).or_insert(BalanceSnapshot {
                        current: Decimal::ZERO,
                        withdrawn: Decimal::ZERO,
                    });
                    bal.current += amount;
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedAccrual
// ---------------------------------------------------------------------------

type Scripted = Result<AccrualOutcome, AccrualError>;

/// Accrual source answering from per-order scripts. Each `fetch` pops the
/// next scripted reply for that order; an exhausted (or absent) script
/// answers `Unregistered`. Call counts are recorded per order.
#[derive(Default)]
pub struct ScriptedAccrual {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedAccrual {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, number: &str, reply: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(number.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Shorthand for a 200 PROCESSED reply.
    pub fn script_processed(&self, number: &str, amount: Decimal) {
        self.script(
            number,
            Ok(AccrualOutcome::Resolved {
                status: lpl_schemas::AccrualStatus::Processed,
                accrual: Some(amount),
            }),
        );
    }

    pub fn calls_for(&self, number: &str) -> usize {
        self.calls.lock().unwrap().get(number).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl AccrualSource for ScriptedAccrual {
    async fn fetch(&self, order_number: &str) -> Result<AccrualOutcome, AccrualError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(order_number.to_string())
            .or_insert(0) += 1;

        self.scripts
            .lock()
            .unwrap()
            .get_mut(order_number)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(AccrualOutcome::Unregistered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lpl_schemas::AccrualStatus;
    use rust_decimal_macros::dec;

    fn processed(number: &str, owner: UserId, amount: Decimal) -> ReconcileUpdate {
        ReconcileUpdate {
            number: number.to_string(),
            owner,
            status: OrderStatus::Processed,
            accrual: Some(amount),
        }
    }

    #[tokio::test]
    async fn mem_store_credits_on_transition_only() {
        let store = MemStore::new();
        store.seed_user(1);
        store.seed_order("79927398713", 1);

        store
            .reconcile_order(&processed("79927398713", 1, dec!(500)))
            .await
            .unwrap();
        assert_eq!(store.balance(1).current, dec!(500));

        // Re-observing PROCESSED must not credit again.
        store
            .reconcile_order(&processed("79927398713", 1, dec!(500)))
            .await
            .unwrap();
        assert_eq!(store.balance(1).current, dec!(500));
        assert_eq!(
            store.order_state("79927398713"),
            Some((OrderStatus::Processed, Some(dec!(500))))
        );
    }

    #[tokio::test]
    async fn mem_store_lists_only_non_terminal() {
        let store = MemStore::new();
        store.seed_user(1);
        store.seed_order("1", 1);
        store.seed_order("2", 1);
        store
            .reconcile_order(&ReconcileUpdate {
                number: "2".to_string(),
                owner: 1,
                status: OrderStatus::Invalid,
                accrual: None,
            })
            .await
            .unwrap();

        let pending = store.list_pending_orders().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].number, "1");
    }

    #[tokio::test]
    async fn scripted_accrual_pops_in_order_and_counts() {
        let acc = ScriptedAccrual::new();
        acc.script(
            "42",
            Ok(AccrualOutcome::Resolved {
                status: AccrualStatus::Processing,
                accrual: None,
            }),
        );
        acc.script_processed("42", dec!(10));

        assert!(matches!(
            acc.fetch("42").await,
            Ok(AccrualOutcome::Resolved {
                status: AccrualStatus::Processing,
                ..
            })
        ));
        assert!(matches!(
            acc.fetch("42").await,
            Ok(AccrualOutcome::Resolved {
                status: AccrualStatus::Processed,
                ..
            })
        ));
        // Script exhausted: behaves like HTTP 204.
        assert_eq!(acc.fetch("42").await, Ok(AccrualOutcome::Unregistered));
        assert_eq!(acc.calls_for("42"), 3);
    }
}
