//! Record-level lock manager: strict two-phase locking with wound-wait
//! deadlock prevention.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Lock modes; shared is compatible with shared, exclusive with nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// One transaction's pending or granted request on a record.
struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    granted: bool,
}

impl LockRequest {
    fn txn_id(&self) -> TxnId {
        self.txn.id()
    }
}

/// Per-record queue of requests, FIFO among survivors of wound-wait. The
/// condvar is broadcast on every queue mutation; waiters recheck their
/// abort state and grantability under the table latch.
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    cv: Arc<Condvar>,
    /// Transaction currently upgrading S to X, if any.
    upgrading: Option<TxnId>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            cv: Arc::new(Condvar::new()),
            upgrading: None,
        }
    }

    fn push(&mut self, txn: Arc<Transaction>, mode: LockMode) {
        self.requests.push_back(LockRequest {
            txn,
            mode,
            granted: false,
        });
    }

    fn position(&self, txn_id: TxnId) -> Option<usize> {
        self.requests.iter().position(|r| r.txn_id() == txn_id)
    }

    fn erase(&mut self, txn_id: TxnId) {
        if let Some(pos) = self.position(txn_id) {
            self.requests.remove(pos);
        }
    }

    fn grant(&mut self, txn_id: TxnId) {
        if let Some(pos) = self.position(txn_id) {
            self.requests[pos].granted = true;
        }
    }

    /// Wound-wait: an arriving older transaction aborts every younger
    /// conflicting transaction queued ahead of it.
    fn wound_younger(&mut self, my_id: TxnId, my_mode: LockMode) {
        let mut wounded = false;
        let mut reached_self = false;
        self.requests.retain(|req| {
            if reached_self {
                return true;
            }
            if req.txn_id() == my_id {
                reached_self = true;
                return true;
            }
            let conflicts =
                my_mode == LockMode::Exclusive || req.mode == LockMode::Exclusive;
            if req.txn_id() > my_id && conflicts {
                debug!("wound-wait: txn {} wounds txn {}", my_id, req.txn_id());
                req.txn.set_state(TransactionState::Aborted);
                wounded = true;
                return false;
            }
            true
        });
        if wounded {
            self.cv.notify_all();
        }
    }

    /// Whether the request must keep waiting.
    ///
    /// Shared: blocked by any exclusive request queued ahead of it.
    /// Exclusive: must be at the front of the queue.
    fn need_wait(&self, txn_id: TxnId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => {
                for req in &self.requests {
                    if req.mode == LockMode::Exclusive {
                        return true;
                    }
                    if req.txn_id() == txn_id {
                        return false;
                    }
                }
                unreachable!("lock request not found in queue")
            }
            LockMode::Exclusive => match self.requests.front() {
                Some(front) => front.txn_id() != txn_id,
                None => unreachable!("lock request queue should not be empty"),
            },
        }
    }
}

/// LockManager hands out record locks to transactions.
///
/// One latch covers the whole lock table; waits happen on per-queue
/// condition variables bound to that latch. The queue latch is never held
/// across buffer-pool calls.
#[derive(Default)]
pub struct LockManager {
    lock_table: Mutex<HashMap<Rid, LockRequestQueue>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a shared lock on `rid`.
    ///
    /// Returns `Ok(false)` when the transaction is already aborted. Aborts
    /// the transaction (and errors) on isolation or 2PL violations, or when
    /// it is wounded while waiting.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<bool, TransactionError> {
        let mut table = self.lock_table.lock();
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::SharedOnReadUncommitted,
            });
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }

        let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);
        queue.push(txn.clone(), LockMode::Shared);
        queue.wound_younger(txn.id(), LockMode::Shared);

        self.wait_for_grant(&mut table, txn, rid, LockMode::Shared)?;

        if let Some(queue) = table.get_mut(&rid) {
            queue.grant(txn.id());
        }
        txn.add_shared_lock(rid);
        Ok(true)
    }

    /// Acquire an exclusive lock on `rid`; delegates to [`Self::lock_upgrade`]
    /// when the transaction already holds the record in shared mode.
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        let mut table = self.lock_table.lock();
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        if txn.is_shared_locked(rid) {
            drop(table);
            return self.lock_upgrade(txn, rid);
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }

        let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);
        queue.push(txn.clone(), LockMode::Exclusive);
        queue.wound_younger(txn.id(), LockMode::Exclusive);

        self.wait_for_grant(&mut table, txn, rid, LockMode::Exclusive)?;

        if let Some(queue) = table.get_mut(&rid) {
            queue.grant(txn.id());
        }
        txn.add_exclusive_lock(rid);
        Ok(true)
    }

    /// Upgrade a held shared lock to exclusive.
    ///
    /// Only one upgrade may be in flight per record; a second upgrader
    /// fails with `UpgradeConflict`.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> Result<bool, TransactionError> {
        let mut table = self.lock_table.lock();
        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        if !txn.is_shared_locked(rid) {
            return Ok(false);
        }
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }

        let Some(queue) = table.get_mut(&rid) else {
            return Err(TransactionError::InternalError(format!(
                "no lock queue for held shared lock on {:?}",
                rid
            )));
        };
        if queue.upgrading.is_some() {
            return Err(TransactionError::Aborted {
                txn_id: txn.id(),
                reason: AbortReason::UpgradeConflict,
            });
        }
        queue.upgrading = Some(txn.id());

        // Reposition the request at the first waiting slot as a pending
        // exclusive request.
        if let Some(pos) = queue.position(txn.id()) {
            let mut request = queue.requests.remove(pos).expect("position just found");
            request.mode = LockMode::Exclusive;
            request.granted = false;
            let first_waiting = queue
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(queue.requests.len());
            queue.requests.insert(first_waiting, request);
        }
        txn.remove_lock(rid);
        queue.wound_younger(txn.id(), LockMode::Exclusive);

        if let Err(e) = self.wait_for_grant(&mut table, txn, rid, LockMode::Exclusive) {
            if let Some(queue) = table.get_mut(&rid) {
                if queue.upgrading == Some(txn.id()) {
                    queue.upgrading = None;
                }
            }
            return Err(e);
        }

        if let Some(queue) = table.get_mut(&rid) {
            queue.grant(txn.id());
            queue.upgrading = None;
        }
        txn.add_exclusive_lock(rid);
        Ok(true)
    }

    /// Release the lock held on `rid`. Under REPEATABLE_READ this moves a
    /// growing transaction into its shrinking phase.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let mut table = self.lock_table.lock();
        if !txn.is_shared_locked(rid) && !txn.is_exclusive_locked(rid) {
            return false;
        }
        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }
        if let Some(queue) = table.get_mut(&rid) {
            queue.erase(txn.id());
            queue.cv.notify_all();
        }
        txn.remove_lock(rid);
        true
    }

    /// Release every lock the transaction still holds. Used by commit and
    /// abort processing; does not touch the 2PL phase.
    pub fn unlock_all(&self, txn: &Arc<Transaction>) {
        let mut table = self.lock_table.lock();
        for rid in txn.held_locks() {
            if let Some(queue) = table.get_mut(&rid) {
                queue.erase(txn.id());
                queue.cv.notify_all();
            }
            txn.remove_lock(rid);
        }
    }

    /// No-op at READ_UNCOMMITTED, where reads take no shared locks.
    pub fn lock_shared_if_needed(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Ok(true);
        }
        self.lock_shared(txn, rid)
    }

    /// Upgrade when a shared lock is already held, else lock exclusive.
    pub fn lock_exclusive_if_needed(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        if txn.is_shared_locked(rid) {
            return self.lock_upgrade(txn, rid);
        }
        self.lock_exclusive(txn, rid)
    }

    /// Under READ_COMMITTED shared locks are released right after the read.
    pub fn unlock_shared_if_needed(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        if txn.isolation_level() == IsolationLevel::ReadCommitted && txn.is_shared_locked(rid) {
            return self.unlock(txn, rid);
        }
        true
    }

    /// Block until the request stops conflicting. Waking up aborted means
    /// the transaction was wounded; surface that as a deadlock abort.
    fn wait_for_grant(
        &self,
        table: &mut parking_lot::MutexGuard<'_, HashMap<Rid, LockRequestQueue>>,
        txn: &Arc<Transaction>,
        rid: Rid,
        mode: LockMode,
    ) -> Result<(), TransactionError> {
        loop {
            {
                let queue = table
                    .get(&rid)
                    .expect("queue exists while a request is pending");
                if !queue.need_wait(txn.id(), mode) {
                    return Ok(());
                }
                let cv = queue.cv.clone();
                cv.wait(table);
            }
            if txn.state() == TransactionState::Aborted {
                if let Some(queue) = table.get_mut(&rid) {
                    queue.erase(txn.id());
                    queue.cv.notify_all();
                }
                return Err(TransactionError::Aborted {
                    txn_id: txn.id(),
                    reason: AbortReason::Deadlock,
                });
            }
        }
    }
}
