use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, Rid, TxnId, INVALID_LSN};

/// Transaction states under two-phase locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),

    #[error("Failed to write to WAL: {0}")]
    LogError(String),

    #[error("Internal transaction error: {0}")]
    InternalError(String),
}

/// Result type for transaction operations
pub type Result<T> = std::result::Result<T, TransactionError>;

/// One data mutation performed by a transaction, kept so the transaction
/// manager can reverse it on abort.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub rid: Rid,
    pub op: WriteOp,
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert,
    MarkDelete,
    Update { old_tuple: Vec<u8> },
}

/// An active database transaction: its 2PL state, the RIDs it has locked in
/// each mode, the LSN of its most recent log record and its write set.
pub struct Transaction {
    id: TxnId,
    state: Mutex<TransactionState>,
    prev_lsn: AtomicU32,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    write_set: Mutex<Vec<WriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            state: Mutex::new(TransactionState::Growing),
            prev_lsn: AtomicU32::new(INVALID_LSN),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// LSN of this transaction's most recent log record.
    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn.load(Ordering::SeqCst)
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        self.prev_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn insert_into_shared_lock_set(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn insert_into_exclusive_lock_set(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn remove_from_shared_lock_set(&self, rid: &Rid) -> bool {
        self.shared_lock_set.lock().remove(rid)
    }

    pub fn remove_from_exclusive_lock_set(&self, rid: &Rid) -> bool {
        self.exclusive_lock_set.lock().remove(rid)
    }

    pub fn holds_shared(&self, rid: &Rid) -> bool {
        self.shared_lock_set.lock().contains(rid)
    }

    pub fn holds_exclusive(&self, rid: &Rid) -> bool {
        self.exclusive_lock_set.lock().contains(rid)
    }

    /// Snapshot of every RID this transaction currently has locked.
    pub fn locked_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.exclusive_lock_set.lock().iter().copied().collect();
        rids.extend(self.shared_lock_set.lock().iter().copied());
        rids
    }

    pub fn append_write_record(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    /// Drain the write set for abort processing, most recent first.
    pub fn take_write_set(&self) -> Vec<WriteRecord> {
        let mut records = std::mem::take(&mut *self.write_set.lock());
        records.reverse();
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(7);
        assert_eq!(txn.id(), 7);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.prev_lsn(), INVALID_LSN);
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let txn = Transaction::new(1);
        let rid = Rid::new(2, 0);

        txn.insert_into_shared_lock_set(rid);
        assert!(txn.holds_shared(&rid));
        assert!(!txn.holds_exclusive(&rid));

        assert!(txn.remove_from_shared_lock_set(&rid));
        assert!(!txn.remove_from_shared_lock_set(&rid));
    }

    #[test]
    fn test_write_set_drains_in_reverse() {
        let txn = Transaction::new(1);
        txn.append_write_record(WriteRecord {
            rid: Rid::new(2, 0),
            op: WriteOp::Insert,
        });
        txn.append_write_record(WriteRecord {
            rid: Rid::new(2, 1),
            op: WriteOp::MarkDelete,
        });

        let drained = txn.take_write_set();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].rid, Rid::new(2, 1));
        assert!(txn.take_write_set().is_empty());
    }
}
