use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{Transaction, TransactionState};

/// Grant state of a wait list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Init,
    Shared,
    Exclusive,
}

/// Per-waiter completion signal. The waiter blocks on it after releasing
/// the table mutex, so a waking waiter never re-enters the lock table.
struct WaitSignal {
    granted: Mutex<bool>,
    cv: Condvar,
}

impl WaitSignal {
    fn new() -> Self {
        Self {
            granted: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut granted = self.granted.lock();
        while !*granted {
            self.cv.wait(&mut granted);
        }
    }

    fn notify(&self) {
        let mut granted = self.granted.lock();
        *granted = true;
        self.cv.notify_one();
    }
}

struct Waiter {
    txn_id: TxnId,
    target_state: WaitState,
    signal: Arc<WaitSignal>,
}

/// Lock bookkeeping for a single RID.
///
/// `oldest` tracks the largest granted transaction id and is the wait-die
/// threshold: a requester whose id is `>= oldest` (younger or equal) is
/// aborted instead of enqueued.
struct WaitList {
    oldest: TxnId,
    state: WaitState,
    granted: HashSet<TxnId>,
    waiters: VecDeque<Waiter>,
}

impl WaitList {
    fn new(txn_id: TxnId, state: WaitState) -> Self {
        let mut granted = HashSet::new();
        granted.insert(txn_id);
        Self {
            oldest: txn_id,
            state,
            granted,
            waiters: VecDeque::new(),
        }
    }
}

/// Tuple-level lock manager: two-phase locking with wait-die deadlock
/// prevention. In strict mode locks release only after COMMIT or ABORT.
pub struct LockManager {
    strict_2pl: bool,
    table: Mutex<HashMap<Rid, WaitList>>,
}

impl LockManager {
    pub fn new(strict_2pl: bool) -> Self {
        Self {
            strict_2pl,
            table: Mutex::new(HashMap::new()),
        }
    }

    fn is_valid_to_acquire(&self, txn: &Transaction) -> bool {
        match txn.state() {
            TransactionState::Aborted | TransactionState::Committed => false,
            TransactionState::Shrinking => {
                // Acquiring after the first release violates 2PL.
                txn.set_state(TransactionState::Aborted);
                false
            }
            TransactionState::Growing => true,
        }
    }

    /// Request a shared lock on `rid`, blocking while an exclusive holder
    /// survives the wait-die check. Returns false (with the transaction
    /// aborted where 2PL demands it) when the lock cannot be granted.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> bool {
        if !self.is_valid_to_acquire(txn) {
            return false;
        }

        let mut table = self.table.lock();

        let wait_list = match table.entry(rid) {
            Entry::Vacant(entry) => {
                entry.insert(WaitList::new(txn.id(), WaitState::Shared));
                txn.insert_into_shared_lock_set(rid);
                return true;
            }
            Entry::Occupied(entry) => entry.into_mut(),
        };

        if wait_list.state == WaitState::Shared {
            wait_list.granted.insert(txn.id());
            wait_list.oldest = wait_list.oldest.max(txn.id());
            txn.insert_into_shared_lock_set(rid);
            return true;
        }

        // Exclusive holder: wait-die. Younger (or equal) requesters abort.
        if txn.id() >= wait_list.oldest {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        let signal = Arc::new(WaitSignal::new());
        wait_list.waiters.push_back(Waiter {
            txn_id: txn.id(),
            target_state: WaitState::Shared,
            signal: signal.clone(),
        });
        drop(table);

        signal.wait();
        txn.insert_into_shared_lock_set(rid);
        true
    }

    /// Request an exclusive lock on `rid`. Any existing holder, shared or
    /// exclusive, forces the wait-die check.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> bool {
        if !self.is_valid_to_acquire(txn) {
            return false;
        }

        let mut table = self.table.lock();

        let wait_list = match table.entry(rid) {
            Entry::Vacant(entry) => {
                entry.insert(WaitList::new(txn.id(), WaitState::Exclusive));
                txn.insert_into_exclusive_lock_set(rid);
                return true;
            }
            Entry::Occupied(entry) => entry.into_mut(),
        };

        if txn.id() >= wait_list.oldest {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        let signal = Arc::new(WaitSignal::new());
        wait_list.waiters.push_back(Waiter {
            txn_id: txn.id(),
            target_state: WaitState::Exclusive,
            signal: signal.clone(),
        });
        drop(table);

        signal.wait();
        txn.insert_into_exclusive_lock_set(rid);
        true
    }

    /// Upgrade a held shared lock to exclusive: release the shared grant
    /// without a 2PL state transition, then reacquire exclusively under the
    /// normal wait-die rule. Either succeeds fully or leaves the
    /// transaction aborted.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> bool {
        if !self.is_valid_to_acquire(txn) {
            return false;
        }

        {
            let table = self.table.lock();
            let wait_list = match table.get(&rid) {
                None => return false,
                Some(wait_list) => wait_list,
            };
            if wait_list.state != WaitState::Shared || !wait_list.granted.contains(&txn.id()) {
                return false;
            }
        }

        if !self.unlock_internal(txn, rid, false) {
            return false;
        }
        self.lock_exclusive(txn, rid)
    }

    /// Release a lock held by `txn` on `rid`. Under strict 2PL this is only
    /// legal once the transaction has committed or aborted; under plain 2PL
    /// the first release moves a growing transaction to shrinking.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        if self.strict_2pl
            && !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            )
        {
            return false;
        }
        self.unlock_internal(txn, rid, true)
    }

    /// Release every lock held by `txn`. Called by the transaction manager
    /// after the transaction reaches COMMITTED or ABORTED.
    pub fn unlock_all(&self, txn: &Transaction) {
        for rid in txn.locked_rids() {
            self.unlock(txn, rid);
        }
    }

    /// Shared release path. `transition` applies the plain-2PL
    /// growing-to-shrinking move; the upgrade path skips it.
    fn unlock_internal(&self, txn: &Transaction, rid: Rid, transition: bool) -> bool {
        let mut table = self.table.lock();

        let wait_list = match table.get_mut(&rid) {
            None => return false,
            Some(wait_list) => wait_list,
        };
        if !wait_list.granted.remove(&txn.id()) {
            return false;
        }

        if wait_list.state == WaitState::Exclusive {
            txn.remove_from_exclusive_lock_set(&rid);
        } else {
            txn.remove_from_shared_lock_set(&rid);
        }

        if transition && !self.strict_2pl && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        if !wait_list.granted.is_empty() {
            return true;
        }

        // Promote the head waiter to sole holder, or retire the list.
        if let Some(waiter) = wait_list.waiters.pop_front() {
            wait_list.state = waiter.target_state;
            wait_list.oldest = waiter.txn_id;
            wait_list.granted.insert(waiter.txn_id);
            waiter.signal.notify();
        } else {
            table.remove(&rid);
        }
        true
    }

    /// Number of RIDs with live lock state (diagnostics and tests).
    pub fn lock_count(&self) -> usize {
        self.table.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn rid() -> Rid {
        Rid::new(3, 0)
    }

    #[test]
    fn test_shared_locks_are_compatible() {
        let lm = LockManager::new(true);
        let t1 = Transaction::new(1);
        let t2 = Transaction::new(2);

        assert!(lm.lock_shared(&t1, rid()));
        assert!(lm.lock_shared(&t2, rid()));
        assert!(t1.holds_shared(&rid()));
        assert!(t2.holds_shared(&rid()));
        assert_eq!(lm.lock_count(), 1);
    }

    #[test]
    fn test_younger_shared_requester_dies_on_exclusive() {
        let lm = LockManager::new(true);
        let t1 = Transaction::new(1);
        let t2 = Transaction::new(2);

        assert!(lm.lock_exclusive(&t1, rid()));
        assert!(!lm.lock_shared(&t2, rid()));
        assert_eq!(t2.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_younger_exclusive_requester_dies_on_shared() {
        let lm = LockManager::new(true);
        let t1 = Transaction::new(1);
        let t2 = Transaction::new(2);

        assert!(lm.lock_shared(&t1, rid()));
        assert!(!lm.lock_exclusive(&t2, rid()));
        assert_eq!(t2.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_older_requester_blocks_and_wakes() {
        let lm = Arc::new(LockManager::new(true));
        let t1 = Arc::new(Transaction::new(1));
        let t0 = Arc::new(Transaction::new(0));

        assert!(lm.lock_exclusive(&t1, rid()));

        let waiter = {
            let lm = lm.clone();
            let t0 = t0.clone();
            thread::spawn(move || lm.lock_shared(&t0, rid()))
        };

        // Give the waiter time to enqueue, then release.
        thread::sleep(Duration::from_millis(50));
        t1.set_state(TransactionState::Committed);
        assert!(lm.unlock(&t1, rid()));

        assert!(waiter.join().unwrap());
        assert!(t0.holds_shared(&rid()));
    }

    #[test]
    fn test_strict_2pl_rejects_early_unlock() {
        let lm = LockManager::new(true);
        let t1 = Transaction::new(1);

        assert!(lm.lock_shared(&t1, rid()));
        assert!(!lm.unlock(&t1, rid()));

        t1.set_state(TransactionState::Committed);
        assert!(lm.unlock(&t1, rid()));
        assert_eq!(lm.lock_count(), 0);
    }

    #[test]
    fn test_plain_2pl_shrinks_then_aborts_new_requests() {
        let lm = LockManager::new(false);
        let t1 = Transaction::new(1);
        let other = Rid::new(4, 0);

        assert!(lm.lock_shared(&t1, rid()));
        assert!(lm.unlock(&t1, rid()));
        assert_eq!(t1.state(), TransactionState::Shrinking);

        assert!(!lm.lock_shared(&t1, other));
        assert_eq!(t1.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_lock_upgrade() {
        let lm = LockManager::new(true);
        let t1 = Transaction::new(1);

        assert!(lm.lock_shared(&t1, rid()));
        assert!(lm.lock_upgrade(&t1, rid()));
        assert!(t1.holds_exclusive(&rid()));
        assert!(!t1.holds_shared(&rid()));
        assert_eq!(t1.state(), TransactionState::Growing);
    }

    #[test]
    fn test_upgrade_without_shared_grant_fails() {
        let lm = LockManager::new(true);
        let t1 = Transaction::new(1);
        assert!(!lm.lock_upgrade(&t1, rid()));
    }

    #[test]
    fn test_unlock_unknown_rid_fails() {
        let lm = LockManager::new(true);
        let t1 = Transaction::new(1);
        t1.set_state(TransactionState::Committed);
        assert!(!lm.unlock(&t1, rid()));
    }
}
