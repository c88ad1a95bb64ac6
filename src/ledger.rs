//! Ledger store with per-account serialization
//!
//! Balances live in a concurrent map of per-account cells; concurrent
//! operations on one account serialize on that account's lock while disjoint
//! accounts proceed fully in parallel. There is deliberately no global
//! balance lock. Multi-account batches lock every touched account in global
//! key order and apply all-or-nothing, so a failed debit can never leave a
//! partial settlement behind. Retried mutations are absorbed by a bounded
//! recent-operation token window.

use crate::currency::CurrencyId;
use crate::errors::{EngineError, EngineResult};
use crate::snapshot::AccountRecord;
use crate::{OpToken, UserId};
use dashmap::DashMap;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// One balance is held per (user, currency) pair
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountKey {
    pub user: UserId,
    pub currency: CurrencyId,
}

impl AccountKey {
    pub fn new(user: UserId, currency: CurrencyId) -> Self {
        Self { user, currency }
    }
}

/// A single ledger mutation inside a batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerOp {
    Credit { account: AccountKey, amount: u64 },
    Debit { account: AccountKey, amount: u64 },
}

impl LedgerOp {
    fn account(&self) -> &AccountKey {
        match self {
            LedgerOp::Credit { account, .. } | LedgerOp::Debit { account, .. } => account,
        }
    }
}

#[derive(Debug, Default)]
struct AccountCell {
    balance: u64,
    version: u64,
}

/// Concurrent multi-currency balance store
pub struct LedgerStore {
    accounts: DashMap<AccountKey, Arc<Mutex<AccountCell>>>,
    recent_ops: Mutex<LruCache<OpToken, ()>>,
}

impl LedgerStore {
    /// Create a store with the given dedup window size
    pub fn new(dedup_window: usize) -> Self {
        let window = NonZeroUsize::new(dedup_window.max(1)).expect("window is at least 1");
        Self {
            accounts: DashMap::new(),
            recent_ops: Mutex::new(LruCache::new(window)),
        }
    }

    /// Fetch or lazily create the cell for an account
    fn cell(&self, key: &AccountKey) -> Arc<Mutex<AccountCell>> {
        self.accounts
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(AccountCell::default())))
            .clone()
    }

    /// Claim a token; returns false if it was seen recently
    fn claim_token(&self, token: OpToken) -> bool {
        self.recent_ops.lock().unwrap().put(token, ()).is_none()
    }

    /// Give a claimed token back after a failed operation so a later retry
    /// is not swallowed
    fn unclaim_token(&self, token: OpToken) {
        self.recent_ops.lock().unwrap().pop(&token);
    }

    /// Credit an account, returning the new balance
    pub fn credit(&self, key: &AccountKey, amount: u64, token: OpToken) -> EngineResult<u64> {
        let op = LedgerOp::Credit {
            account: key.clone(),
            amount,
        };
        self.apply_batch(std::slice::from_ref(&op), token)?;
        Ok(self.balance(key))
    }

    /// Debit an account, failing with `InsufficientFunds` on shortfall and
    /// returning the new balance otherwise
    pub fn debit(&self, key: &AccountKey, amount: u64, token: OpToken) -> EngineResult<u64> {
        let op = LedgerOp::Debit {
            account: key.clone(),
            amount,
        };
        self.apply_batch(std::slice::from_ref(&op), token)?;
        Ok(self.balance(key))
    }

    /// Atomically move funds between two users; on failure both accounts are
    /// left untouched
    pub fn transfer(
        &self,
        from: UserId,
        to: UserId,
        currency: &CurrencyId,
        amount: u64,
        token: OpToken,
    ) -> EngineResult<()> {
        let ops = [
            LedgerOp::Debit {
                account: AccountKey::new(from, currency.clone()),
                amount,
            },
            LedgerOp::Credit {
                account: AccountKey::new(to, currency.clone()),
                amount,
            },
        ];
        self.apply_batch(&ops, token)?;
        Ok(())
    }

    /// Apply a batch of mutations all-or-nothing.
    ///
    /// Every touched account is locked in global key order, the whole batch
    /// is validated against a scratch projection of the balances, and only
    /// then written back. Returns `Ok(false)` when the token was already
    /// applied (idempotent retry).
    pub fn apply_batch(&self, ops: &[LedgerOp], token: OpToken) -> EngineResult<bool> {
        if ops.is_empty() {
            return Ok(true);
        }
        if !self.claim_token(token) {
            debug!(%token, "duplicate operation token, skipping batch");
            return Ok(false);
        }

        let mut keys: Vec<AccountKey> = ops.iter().map(|op| op.account().clone()).collect();
        keys.sort();
        keys.dedup();

        let cells: Vec<Arc<Mutex<AccountCell>>> = keys.iter().map(|key| self.cell(key)).collect();
        let mut guards: Vec<MutexGuard<'_, AccountCell>> =
            cells.iter().map(|cell| cell.lock().unwrap()).collect();
        let index: HashMap<&AccountKey, usize> =
            keys.iter().enumerate().map(|(i, key)| (key, i)).collect();

        // Validate on scratch balances before touching anything
        let mut scratch: Vec<u64> = guards.iter().map(|guard| guard.balance).collect();
        let mut touches: Vec<u64> = vec![0; guards.len()];
        for op in ops {
            let slot = index[op.account()];
            match op {
                LedgerOp::Credit { amount, .. } => {
                    scratch[slot] = scratch[slot].checked_add(*amount).ok_or_else(|| {
                        self.unclaim_token(token);
                        EngineError::BalanceOverflow
                    })?;
                }
                LedgerOp::Debit { amount, .. } => {
                    if scratch[slot] < *amount {
                        let balance = scratch[slot];
                        self.unclaim_token(token);
                        return Err(EngineError::InsufficientFunds {
                            balance,
                            required: *amount,
                        });
                    }
                    scratch[slot] -= amount;
                }
            }
            touches[slot] += 1;
        }

        // Commit: write balances and bump one version per applied mutation
        for (slot, guard) in guards.iter_mut().enumerate() {
            guard.balance = scratch[slot];
            guard.version += touches[slot];
        }
        Ok(true)
    }

    /// Current balance (0 for accounts that were never credited)
    pub fn balance(&self, key: &AccountKey) -> u64 {
        self.accounts
            .get(key)
            .map(|cell| cell.lock().unwrap().balance)
            .unwrap_or(0)
    }

    /// Current version counter for optimistic conflict detection
    pub fn version(&self, key: &AccountKey) -> u64 {
        self.accounts
            .get(key)
            .map(|cell| cell.lock().unwrap().version)
            .unwrap_or(0)
    }

    /// Number of accounts ever touched
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Copy out every account for a snapshot
    pub fn snapshot_accounts(&self) -> Vec<AccountRecord> {
        let mut records: Vec<AccountRecord> = self
            .accounts
            .iter()
            .map(|entry| {
                let cell = entry.value().lock().unwrap();
                AccountRecord {
                    user: entry.key().user,
                    currency: entry.key().currency.clone(),
                    balance: cell.balance,
                    version: cell.version,
                }
            })
            .collect();
        records.sort_by(|a, b| (a.user, &a.currency).cmp(&(b.user, &b.currency)));
        records
    }

    /// Load accounts from a snapshot into an empty store
    pub fn restore_accounts(&self, records: &[AccountRecord]) {
        for record in records {
            let key = AccountKey::new(record.user, record.currency.clone());
            let cell = self.cell(&key);
            let mut cell = cell.lock().unwrap();
            cell.balance = record.balance;
            cell.version = record.version;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn vc(user: i64) -> AccountKey {
        AccountKey::new(UserId(user), CurrencyId::new("voxcent"))
    }

    #[test]
    fn test_credit_and_debit() {
        let ledger = LedgerStore::new(64);
        assert_eq!(ledger.credit(&vc(1), 100, OpToken::new()).unwrap(), 100);
        assert_eq!(ledger.debit(&vc(1), 30, OpToken::new()).unwrap(), 70);
        assert_eq!(ledger.balance(&vc(1)), 70);
        assert_eq!(ledger.version(&vc(1)), 2);
    }

    #[test]
    fn test_debit_insufficient_funds_leaves_balance() {
        let ledger = LedgerStore::new(64);
        ledger.credit(&vc(1), 10, OpToken::new()).unwrap();
        let err = ledger.debit(&vc(1), 50, OpToken::new()).unwrap_err();
        assert_eq!(
            err,
            EngineError::InsufficientFunds {
                balance: 10,
                required: 50
            }
        );
        assert_eq!(ledger.balance(&vc(1)), 10);
        assert_eq!(ledger.version(&vc(1)), 1);
    }

    #[test]
    fn test_transfer_is_atomic() {
        let ledger = LedgerStore::new(64);
        let coin = CurrencyId::new("voxcoin");
        let alice = AccountKey::new(UserId(1), coin.clone());
        let bob = AccountKey::new(UserId(2), coin.clone());
        ledger.credit(&alice, 100, OpToken::new()).unwrap();

        ledger
            .transfer(UserId(1), UserId(2), &coin, 60, OpToken::new())
            .unwrap();
        assert_eq!(ledger.balance(&alice), 40);
        assert_eq!(ledger.balance(&bob), 60);

        // Failing transfer changes neither side
        let err = ledger
            .transfer(UserId(1), UserId(2), &coin, 1000, OpToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert_eq!(ledger.balance(&alice), 40);
        assert_eq!(ledger.balance(&bob), 60);
    }

    #[test]
    fn test_batch_all_or_nothing() {
        let ledger = LedgerStore::new(64);
        ledger.credit(&vc(1), 100, OpToken::new()).unwrap();
        let ops = vec![
            LedgerOp::Credit {
                account: vc(2),
                amount: 40,
            },
            LedgerOp::Debit {
                account: vc(1),
                amount: 500,
            },
        ];
        assert!(ledger.apply_batch(&ops, OpToken::new()).is_err());
        // The credit in the same batch must not have landed
        assert_eq!(ledger.balance(&vc(2)), 0);
        assert_eq!(ledger.balance(&vc(1)), 100);
    }

    #[test]
    fn test_batch_sees_its_own_credits() {
        let ledger = LedgerStore::new(64);
        let ops = vec![
            LedgerOp::Credit {
                account: vc(1),
                amount: 50,
            },
            LedgerOp::Debit {
                account: vc(1),
                amount: 20,
            },
        ];
        assert!(ledger.apply_batch(&ops, OpToken::new()).unwrap());
        assert_eq!(ledger.balance(&vc(1)), 30);
        assert_eq!(ledger.version(&vc(1)), 2);
    }

    #[test]
    fn test_duplicate_token_is_not_reapplied() {
        let ledger = LedgerStore::new(64);
        let token = OpToken::new();
        assert_eq!(ledger.credit(&vc(1), 25, token).unwrap(), 25);
        // Same token again: no-op, balance unchanged
        assert_eq!(ledger.credit(&vc(1), 25, token).unwrap(), 25);
        assert_eq!(ledger.balance(&vc(1)), 25);
        assert_eq!(ledger.version(&vc(1)), 1);
    }

    #[test]
    fn test_failed_op_releases_its_token() {
        let ledger = LedgerStore::new(64);
        let token = OpToken::new();
        assert!(ledger.debit(&vc(1), 10, token).is_err());
        // Retrying the same token after funding must apply
        ledger.credit(&vc(1), 10, OpToken::new()).unwrap();
        assert_eq!(ledger.debit(&vc(1), 10, token).unwrap(), 0);
    }

    #[test]
    fn test_concurrent_credits_sum_serially() {
        let ledger = Arc::new(LedgerStore::new(4096));
        let mut handles = vec![];
        for _ in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(thread::spawn(move || {
                for _ in 0..250 {
                    ledger.credit(&vc(7), 1, OpToken::new()).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ledger.balance(&vc(7)), 2000);
        assert_eq!(ledger.version(&vc(7)), 2000);
    }

    #[test]
    fn test_concurrent_debits_never_go_negative() {
        let ledger = Arc::new(LedgerStore::new(4096));
        ledger.credit(&vc(9), 100, OpToken::new()).unwrap();
        let mut handles = vec![];
        for _ in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(thread::spawn(move || {
                let mut applied = 0u64;
                for _ in 0..50 {
                    if ledger.debit(&vc(9), 3, OpToken::new()).is_ok() {
                        applied += 3;
                    }
                }
                applied
            }));
        }
        let drained: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(ledger.balance(&vc(9)), 100 - drained);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let ledger = LedgerStore::new(64);
        ledger.credit(&vc(1), 11, OpToken::new()).unwrap();
        ledger.credit(&vc(2), 22, OpToken::new()).unwrap();

        let records = ledger.snapshot_accounts();
        let restored = LedgerStore::new(64);
        restored.restore_accounts(&records);
        assert_eq!(restored.balance(&vc(1)), 11);
        assert_eq!(restored.balance(&vc(2)), 22);
        assert_eq!(restored.version(&vc(1)), 1);
    }
}
