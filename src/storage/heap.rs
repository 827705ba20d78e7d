use std::sync::Arc;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolManager, BufferPoolError};
use crate::storage::page::{PageManager, PageError};
use crate::transaction::transaction::{Transaction, WriteOp, WriteRecord};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::LogRecord;
use crate::transaction::wal::logging_enabled;

#[derive(Error, Debug)]
pub enum HeapError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    Page(#[from] PageError),
}

/// Result type for table heap operations
pub type Result<T> = std::result::Result<T, HeapError>;

/// A chain of slotted record pages holding opaque tuples.
///
/// Every mutation appends the matching WAL record (when logging is on),
/// stamps the page with the record's LSN and registers the change in the
/// transaction's write set so an abort can reverse it.
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    log_manager: Option<Arc<LogManager>>,
    page_manager: PageManager,
    first_page_id: PageId,
    /// Append cursor; also serializes inserts so page growth is race-free.
    insert_cursor: Mutex<PageId>,
}

impl TableHeap {
    /// Create a heap with a fresh first page, logged as NEWPAGE under `txn`.
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        log_manager: Option<Arc<LogManager>>,
        txn: &Transaction,
    ) -> Result<Self> {
        let page_manager = PageManager::new();
        let (page_ptr, page_id) = buffer_pool.new_page()?;
        {
            let mut page = page_ptr.write();
            page_manager.init_page(&mut page);
        }

        let heap = Self {
            buffer_pool,
            log_manager,
            page_manager,
            first_page_id: page_id,
            insert_cursor: Mutex::new(page_id),
        };
        if let Some(log_manager) = heap.log_for_txn() {
            let mut record =
                LogRecord::new_new_page(txn.id(), txn.prev_lsn(), INVALID_PAGE_ID, page_id);
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
            page_ptr.write().set_lsn(lsn);
        }
        heap.buffer_pool.unpin_page(page_id, true)?;
        Ok(heap)
    }

    /// Reattach to an existing heap rooted at `first_page_id`.
    pub fn open(
        buffer_pool: Arc<BufferPoolManager>,
        log_manager: Option<Arc<LogManager>>,
        first_page_id: PageId,
    ) -> Self {
        Self {
            buffer_pool,
            log_manager,
            page_manager: PageManager::new(),
            first_page_id,
            insert_cursor: Mutex::new(first_page_id),
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert a tuple, growing the page chain when the tail fills up.
    pub fn insert(&self, txn: &Transaction, data: &[u8]) -> Result<Rid> {
        let mut cursor = self.insert_cursor.lock();
        let mut page_id = *cursor;

        loop {
            let page_ptr = self.buffer_pool.fetch_page(page_id)?;
            let inserted = {
                let mut page = page_ptr.write();
                self.page_manager.insert_record(&mut page, data)
            };

            match inserted {
                Ok(slot) => {
                    let rid = Rid::new(page_id, slot);
                    if let Some(log_manager) = self.log_for_txn() {
                        let mut record = LogRecord::new_insert(
                            txn.id(),
                            txn.prev_lsn(),
                            rid,
                            data.to_vec(),
                        );
                        let lsn = log_manager.append_log_record(&mut record);
                        txn.set_prev_lsn(lsn);
                        page_ptr.write().set_lsn(lsn);
                    }
                    txn.append_write_record(WriteRecord {
                        rid,
                        op: WriteOp::Insert,
                    });
                    self.buffer_pool.unpin_page(page_id, true)?;
                    *cursor = page_id;
                    return Ok(rid);
                }
                Err(PageError::InsufficientSpace) => {
                    let next = {
                        let page = page_ptr.read();
                        self.page_manager.next_page_id(&page)
                    };
                    if next != INVALID_PAGE_ID {
                        self.buffer_pool.unpin_page(page_id, false)?;
                        page_id = next;
                        continue;
                    }

                    let new_id = self.grow(txn, page_id, &page_ptr)?;
                    self.buffer_pool.unpin_page(page_id, true)?;
                    page_id = new_id;
                }
                Err(e) => {
                    self.buffer_pool.unpin_page(page_id, false)?;
                    return Err(e.into());
                }
            }
        }
    }

    /// Read a live tuple; `None` when the RID is unknown or deleted.
    pub fn get(&self, rid: Rid) -> Result<Option<Vec<u8>>> {
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let page = page_ptr.read();
            self.page_manager.get_record(&page, rid.slot)
        };
        self.buffer_pool.unpin_page(rid.page_id, false)?;

        match result {
            Ok(tuple) => Ok(Some(tuple)),
            Err(PageError::RecordNotFound) | Err(PageError::InvalidSlot) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Tombstone a tuple (reversible until the delete is applied).
    pub fn mark_delete(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut page = page_ptr.write();
            self.page_manager
                .get_record(&page, rid.slot)
                .and_then(|tuple| {
                    self.page_manager.mark_delete(&mut page, rid.slot)?;
                    Ok(tuple)
                })
        };
        let tuple = match result {
            Ok(tuple) => tuple,
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                return Err(e.into());
            }
        };

        if let Some(log_manager) = self.log_for_txn() {
            let mut record =
                LogRecord::new_mark_delete(txn.id(), txn.prev_lsn(), rid, tuple);
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
            page_ptr.write().set_lsn(lsn);
        }
        txn.append_write_record(WriteRecord {
            rid,
            op: WriteOp::MarkDelete,
        });
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        Ok(())
    }

    /// Undo a `mark_delete`.
    pub fn rollback_delete(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut page = page_ptr.write();
            self.page_manager
                .get_record_raw(&page, rid.slot)
                .and_then(|tuple| {
                    self.page_manager.rollback_delete(&mut page, rid.slot)?;
                    Ok(tuple)
                })
        };
        let tuple = match result {
            Ok(tuple) => tuple,
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                return Err(e.into());
            }
        };

        if let Some(log_manager) = self.log_for_txn() {
            let mut record =
                LogRecord::new_rollback_delete(txn.id(), txn.prev_lsn(), rid, tuple);
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
            page_ptr.write().set_lsn(lsn);
        }
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        Ok(())
    }

    /// Physically remove a tuple (the commit half of a delete, or the undo
    /// of an insert).
    pub fn apply_delete(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut page = page_ptr.write();
            self.page_manager
                .get_record_raw(&page, rid.slot)
                .and_then(|tuple| {
                    self.page_manager.apply_delete(&mut page, rid.slot)?;
                    Ok(tuple)
                })
        };
        let tuple = match result {
            Ok(tuple) => tuple,
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                return Err(e.into());
            }
        };

        if let Some(log_manager) = self.log_for_txn() {
            let mut record =
                LogRecord::new_apply_delete(txn.id(), txn.prev_lsn(), rid, tuple);
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
            page_ptr.write().set_lsn(lsn);
        }
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        Ok(())
    }

    /// Replace a tuple, logging both images.
    pub fn update(&self, txn: &Transaction, rid: Rid, data: &[u8]) -> Result<()> {
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut page = page_ptr.write();
            self.page_manager
                .get_record(&page, rid.slot)
                .and_then(|old| {
                    self.page_manager.update_record(&mut page, rid.slot, data)?;
                    Ok(old)
                })
        };
        let old_tuple = match result {
            Ok(old) => old,
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                return Err(e.into());
            }
        };

        if let Some(log_manager) = self.log_for_txn() {
            let mut record = LogRecord::new_update(
                txn.id(),
                txn.prev_lsn(),
                rid,
                old_tuple.clone(),
                data.to_vec(),
            );
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
            page_ptr.write().set_lsn(lsn);
        }
        txn.append_write_record(WriteRecord {
            rid,
            op: WriteOp::Update { old_tuple },
        });
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        Ok(())
    }

    /// Collect every live tuple in chain order (scans and tests).
    pub fn scan(&self) -> Result<Vec<(Rid, Vec<u8>)>> {
        let mut out = Vec::new();
        let mut page_id = self.first_page_id;

        while page_id != INVALID_PAGE_ID {
            let page_ptr = self.buffer_pool.fetch_page(page_id)?;
            let next = {
                let page = page_ptr.read();
                for slot in 0..self.page_manager.slot_count(&page) {
                    if let Ok(tuple) = self.page_manager.get_record(&page, slot) {
                        out.push((Rid::new(page_id, slot), tuple));
                    }
                }
                self.page_manager.next_page_id(&page)
            };
            self.buffer_pool.unpin_page(page_id, false)?;
            page_id = next;
        }

        Ok(out)
    }

    /// Allocate a record page after `tail_id` and link it into the chain.
    fn grow(
        &self,
        txn: &Transaction,
        tail_id: PageId,
        tail_ptr: &crate::common::types::PagePtr,
    ) -> Result<PageId> {
        let (new_ptr, new_id) = self.buffer_pool.new_page()?;
        {
            let mut new_page = new_ptr.write();
            self.page_manager.init_page(&mut new_page);
            self.page_manager.set_prev_page_id(&mut new_page, tail_id);
        }
        {
            let mut tail = tail_ptr.write();
            self.page_manager.set_next_page_id(&mut tail, new_id);
        }

        if let Some(log_manager) = self.log_for_txn() {
            let mut record =
                LogRecord::new_new_page(txn.id(), txn.prev_lsn(), tail_id, new_id);
            let lsn = log_manager.append_log_record(&mut record);
            txn.set_prev_lsn(lsn);
            new_ptr.write().set_lsn(lsn);
        }

        self.buffer_pool.unpin_page(new_id, true)?;
        Ok(new_id)
    }

    fn log_for_txn(&self) -> Option<&Arc<LogManager>> {
        if logging_enabled() {
            self.log_manager.as_ref()
        } else {
            None
        }
    }
}
