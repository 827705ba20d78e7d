use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;
use log::debug;

use crate::common::types::{Rid, TxnId};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::PageManager;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{
    Result, Transaction, TransactionError, TransactionState, WriteOp, WriteRecord,
};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::LogRecord;
use crate::transaction::wal::logging_enabled;

/// Transaction manager: assigns monotonically increasing transaction ids,
/// writes the BEGIN/COMMIT/ABORT records, reverses a transaction's write
/// set on abort and releases its locks once it reaches a terminal state.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    log_manager: Option<Arc<LogManager>>,
    lock_manager: Option<Arc<LockManager>>,
    buffer_pool: Arc<BufferPoolManager>,
    page_manager: PageManager,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        log_manager: Option<Arc<LogManager>>,
        lock_manager: Option<Arc<LockManager>>,
    ) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            log_manager,
            lock_manager,
            buffer_pool,
            page_manager: PageManager::new(),
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction, writing its BEGIN record.
    pub fn begin(&self) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id));

        if let Some(log_manager) = self.log() {
            let mut record = LogRecord::new_begin(txn_id);
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
        }

        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit: write the COMMIT record, wait for it to become durable,
    /// release locks.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<()> {
        self.check_active(txn)?;

        if let Some(log_manager) = self.log() {
            let mut record = LogRecord::new_commit(txn.id(), txn.prev_lsn());
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
            log_manager.flush_till_lsn(lsn);
        }

        txn.set_state(TransactionState::Committed);
        self.release_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        debug!("transaction {} committed", txn.id());
        Ok(())
    }

    /// Abort: reverse the write set most-recent-first, write the ABORT
    /// record, release locks.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<()> {
        self.check_active(txn)?;

        for write in txn.take_write_set() {
            self.undo_write(txn, &write)?;
        }

        if let Some(log_manager) = self.log() {
            let mut record = LogRecord::new_abort(txn.id(), txn.prev_lsn());
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
            log_manager.flush_till_lsn(lsn);
        }

        txn.set_state(TransactionState::Aborted);
        self.release_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        debug!("transaction {} aborted", txn.id());
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

    fn check_active(&self, txn: &Transaction) -> Result<()> {
        match txn.state() {
            TransactionState::Committed | TransactionState::Aborted => {
                Err(TransactionError::InvalidState(txn.id()))
            }
            _ => Ok(()),
        }
    }

    /// Reverse one write-set entry against its page, logging the
    /// compensating operation.
    fn undo_write(&self, txn: &Transaction, write: &WriteRecord) -> Result<()> {
        let rid = write.rid;
        let page_ptr = self
            .buffer_pool
            .fetch_page(rid.page_id)
            .map_err(|e| TransactionError::InternalError(e.to_string()))?;

        let undo_result = {
            let mut page = page_ptr.write();
            match &write.op {
                WriteOp::Insert => self
                    .page_manager
                    .get_record_raw(&page, rid.slot)
                    .and_then(|tuple| {
                        self.page_manager.apply_delete(&mut page, rid.slot)?;
                        Ok(LogRecord::new_apply_delete(
                            txn.id(),
                            txn.prev_lsn(),
                            rid,
                            tuple,
                        ))
                    }),
                WriteOp::MarkDelete => self
                    .page_manager
                    .get_record_raw(&page, rid.slot)
                    .and_then(|tuple| {
                        self.page_manager.rollback_delete(&mut page, rid.slot)?;
                        Ok(LogRecord::new_rollback_delete(
                            txn.id(),
                            txn.prev_lsn(),
                            rid,
                            tuple,
                        ))
                    }),
                WriteOp::Update { old_tuple } => self
                    .page_manager
                    .get_record(&page, rid.slot)
                    .and_then(|current| {
                        self.page_manager.update_record(&mut page, rid.slot, old_tuple)?;
                        Ok(LogRecord::new_update(
                            txn.id(),
                            txn.prev_lsn(),
                            rid,
                            current,
                            old_tuple.clone(),
                        ))
                    }),
            }
        };

        let mut record = match undo_result {
            Ok(r) => r,
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(rid.page_id, false);
                return Err(TransactionError::InternalError(e.to_string()));
            }
        };

        if let Some(log_manager) = self.log() {
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
            page_ptr.write().set_lsn(lsn);
        }

        self.buffer_pool
            .unpin_page(rid.page_id, true)
            .map_err(|e| TransactionError::InternalError(e.to_string()))?;
        Ok(())
    }

    fn release_locks(&self, txn: &Transaction) {
        if let Some(lock_manager) = &self.lock_manager {
            lock_manager.unlock_all(txn);
        }
    }

    fn log(&self) -> Option<&Arc<LogManager>> {
        if logging_enabled() {
            self.log_manager.as_ref()
        } else {
            None
        }
    }

    /// Lock a RID exclusively on behalf of `txn`, for callers that want the
    /// manager's strictness policy applied.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> bool {
        match &self.lock_manager {
            Some(lock_manager) => lock_manager.lock_exclusive(txn, rid),
            None => true,
        }
    }

    /// Lock a RID in shared mode on behalf of `txn`.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> bool {
        match &self.lock_manager {
            Some(lock_manager) => lock_manager.lock_shared(txn, rid),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn test_manager() -> (TransactionManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        let buffer_pool = Arc::new(BufferPoolManager::new(8, disk, None));
        let manager = TransactionManager::new(buffer_pool, None, None);
        (manager, file)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let (manager, _file) = test_manager();
        let t1 = manager.begin();
        let t2 = manager.begin();
        assert_eq!(t1.id(), 1);
        assert_eq!(t2.id(), 2);
        assert!(manager.transaction_exists(1));
        assert!(manager.transaction_exists(2));
    }

    #[test]
    fn test_commit_removes_from_active_set() {
        let (manager, _file) = test_manager();
        let txn = manager.begin();
        manager.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(!manager.transaction_exists(txn.id()));

        // Committing twice is an error.
        assert!(manager.commit(&txn).is_err());
    }

    #[test]
    fn test_abort_reverses_insert() {
        let (manager, _file) = test_manager();
        let txn = manager.begin();

        let heap = crate::storage::heap::TableHeap::new(
            manager.buffer_pool.clone(),
            None,
            &txn,
        )
        .unwrap();
        let rid = heap.insert(&txn, b"ephemeral").unwrap();
        assert_eq!(heap.get(rid).unwrap().as_deref(), Some(&b"ephemeral"[..]));

        manager.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(heap.get(rid).unwrap(), None);
    }

    #[test]
    fn test_abort_reverses_update_and_delete() {
        let (manager, _file) = test_manager();

        let setup = manager.begin();
        let heap = crate::storage::heap::TableHeap::new(
            manager.buffer_pool.clone(),
            None,
            &setup,
        )
        .unwrap();
        let kept = heap.insert(&setup, b"before").unwrap();
        let marked = heap.insert(&setup, b"staying").unwrap();
        manager.commit(&setup).unwrap();

        let txn = manager.begin();
        heap.update(&txn, kept, b"after").unwrap();
        heap.mark_delete(&txn, marked).unwrap();
        assert_eq!(heap.get(kept).unwrap().as_deref(), Some(&b"after"[..]));
        assert_eq!(heap.get(marked).unwrap(), None);

        manager.abort(&txn).unwrap();
        assert_eq!(heap.get(kept).unwrap().as_deref(), Some(&b"before"[..]));
        assert_eq!(heap.get(marked).unwrap().as_deref(), Some(&b"staying"[..]));
    }
}
