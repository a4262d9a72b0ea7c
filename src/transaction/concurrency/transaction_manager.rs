use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Transaction manager - creates transactions and drives their lifecycle,
/// releasing held locks through the lock manager on commit and abort.
pub struct TransactionManager {
    /// Next transaction ID to assign; lower IDs are older for wound-wait.
    next_txn_id: AtomicU32,

    /// Lock manager used to release locks at end of transaction
    lock_manager: Arc<LockManager>,

    /// Active transactions map (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction at the given isolation level.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit a transaction: release its locks and mark it committed.
    pub fn commit(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self.take_active(txn_id)?;
        if txn.state() == TransactionState::Aborted {
            return Err(TransactionError::InvalidState(txn_id));
        }
        self.lock_manager.unlock_all(&txn);
        txn.set_state(TransactionState::Committed);
        Ok(())
    }

    /// Abort a transaction: release its locks and mark it aborted. Aborting
    /// a transaction that was already wounded is fine.
    pub fn abort(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self.take_active(txn_id)?;
        self.lock_manager.unlock_all(&txn);
        txn.set_state(TransactionState::Aborted);
        Ok(())
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn transaction_exists(&self, txn_id: TxnId) -> bool {
        self.active_transactions.lock().contains_key(&txn_id)
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }

    fn take_active(&self, txn_id: TxnId) -> Result<Arc<Transaction>, TransactionError> {
        self.active_transactions
            .lock()
            .remove(&txn_id)
            .ok_or_else(|| {
                TransactionError::InternalError(format!("Transaction {} not found", txn_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Rid;

    fn manager() -> TransactionManager {
        TransactionManager::new(Arc::new(LockManager::new()))
    }

    #[test]
    fn test_begin_assigns_dense_ids() {
        let tm = manager();
        let t1 = tm.begin(IsolationLevel::ReadCommitted);
        let t2 = tm.begin(IsolationLevel::RepeatableRead);
        assert_eq!(t1.id(), 1);
        assert_eq!(t2.id(), 2);
        assert!(tm.transaction_exists(1));
        assert!(tm.transaction_exists(2));
        assert_eq!(t1.state(), TransactionState::Growing);
    }

    #[test]
    fn test_commit_releases_locks() {
        let lm = Arc::new(LockManager::new());
        let tm = TransactionManager::new(lm.clone());
        let t1 = tm.begin(IsolationLevel::RepeatableRead);
        let rid = Rid::new(1, 0);
        lm.lock_exclusive(&t1, rid).unwrap();

        tm.commit(t1.id()).unwrap();
        assert_eq!(t1.state(), TransactionState::Committed);
        assert!(!t1.is_exclusive_locked(rid));
        assert!(!tm.transaction_exists(t1.id()));

        // A later transaction can lock the record immediately.
        let t2 = tm.begin(IsolationLevel::RepeatableRead);
        assert!(lm.lock_exclusive(&t2, rid).unwrap());
    }

    #[test]
    fn test_abort_releases_locks() {
        let lm = Arc::new(LockManager::new());
        let tm = TransactionManager::new(lm.clone());
        let t1 = tm.begin(IsolationLevel::RepeatableRead);
        let rid = Rid::new(2, 0);
        lm.lock_shared(&t1, rid).unwrap();

        tm.abort(t1.id()).unwrap();
        assert_eq!(t1.state(), TransactionState::Aborted);
        assert!(!t1.is_shared_locked(rid));
    }

    #[test]
    fn test_commit_unknown_txn_fails() {
        let tm = manager();
        assert!(tm.commit(99).is_err());
        assert!(tm.abort(99).is_err());
    }
}
