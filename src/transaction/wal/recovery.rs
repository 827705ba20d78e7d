use std::collections::HashMap;
use std::sync::Arc;
use log::{debug, info, warn};
use thiserror::Error;

use crate::common::types::{Lsn, TxnId, INVALID_LSN, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::{PageError, PageManager};
use crate::transaction::wal::log_manager::LOG_BUFFER_SIZE;
use crate::transaction::wal::log_record::{
    LogPayload, LogRecord, LogRecordError, LogRecordType,
};
use crate::transaction::wal::{logging_enabled, set_logging_enabled};

/// Error type for recovery operations
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Disk error: {0}")]
    Disk(#[from] crate::storage::disk::DiskManagerError),

    #[error("Log record error: {0}")]
    LogRecord(#[from] LogRecordError),
}

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// ARIES-style crash recovery: a forward redo pass over the whole log
/// followed by a backward undo pass for every transaction without a COMMIT
/// or ABORT.
pub struct LogRecovery {
    buffer_pool: Arc<BufferPoolManager>,
    page_manager: PageManager,
    /// Loser candidates: transaction id -> LSN of its last record seen.
    active_txn: HashMap<TxnId, Lsn>,
    /// Byte offset of every record in the log file, for the undo walk.
    lsn_mapping: HashMap<Lsn, u64>,
}

impl LogRecovery {
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            page_manager: PageManager::new(),
            active_txn: HashMap::new(),
            lsn_mapping: HashMap::new(),
        }
    }

    /// Run both recovery passes.
    pub fn recover(&mut self) -> Result<()> {
        self.redo()?;
        self.undo()?;
        Ok(())
    }

    /// Transactions still open after the redo pass.
    pub fn loser_transactions(&self) -> Vec<TxnId> {
        self.active_txn.keys().copied().collect()
    }

    /// Forward pass: scan the log from offset 0 in buffer-sized chunks,
    /// rebuild the active-transaction table and the LSN-to-offset map, and
    /// reapply every page mutation the page has not already seen
    /// (`page.lsn >= record.lsn` means it has). A record that fails to
    /// parse ends the scan: the remainder is a torn tail.
    pub fn redo(&mut self) -> Result<()> {
        let was_logging = logging_enabled();
        set_logging_enabled(false);
        let result = self.redo_inner();
        set_logging_enabled(was_logging);
        result
    }

    fn redo_inner(&mut self) -> Result<()> {
        self.active_txn.clear();
        self.lsn_mapping.clear();

        let disk_manager = self.buffer_pool.disk_manager().clone();
        let mut buf = vec![0u8; LOG_BUFFER_SIZE];
        let mut offset = 0u64;
        let mut records = 0usize;

        info!("redo: scanning log from offset 0");
        loop {
            let available = disk_manager.read_log(&mut buf, offset)?;
            if available == 0 {
                break;
            }

            let mut pos = 0usize;
            while pos < available {
                let record = match LogRecord::deserialize(&buf[pos..available]) {
                    Ok(record) => record,
                    // Either a record straddling the chunk boundary (the
                    // next read picks it up) or the torn tail.
                    Err(_) => break,
                };

                self.lsn_mapping.insert(record.lsn, offset + pos as u64);
                self.apply_redo(&record)?;
                records += 1;
                pos += record.size as usize;
            }

            if pos == 0 {
                debug!("redo: unparseable record at offset {}, stopping", offset);
                break;
            }
            offset += pos as u64;
        }

        info!(
            "redo: replayed {} records, {} loser transaction(s)",
            records,
            self.active_txn.len()
        );
        Ok(())
    }

    fn apply_redo(&mut self, record: &LogRecord) -> Result<()> {
        match record.record_type {
            LogRecordType::Begin => {
                self.active_txn.insert(record.txn_id, record.lsn);
            }
            LogRecordType::Commit | LogRecordType::Abort => {
                self.active_txn.remove(&record.txn_id);
            }
            _ => {
                self.active_txn.insert(record.txn_id, record.lsn);
            }
        }

        match &record.payload {
            LogPayload::Transaction => {}
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                // NEWPAGE replays unconditionally: reinitialize the page
                // and relink the chain.
                let page_ptr = self.buffer_pool.fetch_page(*page_id)?;
                {
                    let mut page = page_ptr.write();
                    self.page_manager.init_page(&mut page);
                    self.page_manager.set_prev_page_id(&mut page, *prev_page_id);
                    page.set_lsn(record.lsn);
                }
                self.buffer_pool.unpin_page(*page_id, true)?;

                if *prev_page_id != INVALID_PAGE_ID {
                    let prev_ptr = self.buffer_pool.fetch_page(*prev_page_id)?;
                    {
                        let mut prev = prev_ptr.write();
                        self.page_manager.set_next_page_id(&mut prev, *page_id);
                    }
                    self.buffer_pool.unpin_page(*prev_page_id, true)?;
                }
            }
            LogPayload::Insert { rid, tuple } => {
                self.redo_on_page(record, rid.page_id, |pm, page| {
                    let slot = pm.insert_record(page, tuple)?;
                    if slot != rid.slot {
                        warn!(
                            "redo: insert for {} landed in slot {}",
                            rid, slot
                        );
                    }
                    Ok(())
                })?;
            }
            LogPayload::Delete { rid, .. } => {
                let kind = record.record_type;
                self.redo_on_page(record, rid.page_id, |pm, page| match kind {
                    LogRecordType::MarkDelete => pm.mark_delete(page, rid.slot),
                    LogRecordType::RollbackDelete => pm.rollback_delete(page, rid.slot),
                    _ => pm.apply_delete(page, rid.slot),
                })?;
            }
            LogPayload::Update { rid, new_tuple, .. } => {
                self.redo_on_page(record, rid.page_id, |pm, page| {
                    pm.update_record(page, rid.slot, new_tuple)
                })?;
            }
        }

        Ok(())
    }

    /// Fetch the page, skip the mutation if the page is already at or past
    /// this record, otherwise apply it and stamp the record's LSN.
    fn redo_on_page<F>(&self, record: &LogRecord, page_id: u32, mutate: F) -> Result<()>
    where
        F: FnOnce(&PageManager, &mut crate::common::types::Page) -> std::result::Result<(), PageError>,
    {
        let page_ptr = self.buffer_pool.fetch_page(page_id)?;
        let applied = {
            let mut page = page_ptr.write();
            if page.lsn >= record.lsn {
                false
            } else {
                mutate(&self.page_manager, &mut page)?;
                page.set_lsn(record.lsn);
                true
            }
        };
        self.buffer_pool.unpin_page(page_id, applied)?;
        Ok(())
    }

    /// Backward pass: for every loser transaction walk its log chain via
    /// `prev_lsn`, reversing each data operation, until its BEGIN record.
    /// Undo applies unconditionally; redo already brought every page to the
    /// tail of the log.
    pub fn undo(&mut self) -> Result<()> {
        let was_logging = logging_enabled();
        set_logging_enabled(false);
        let result = self.undo_inner();
        set_logging_enabled(was_logging);
        result
    }

    fn undo_inner(&mut self) -> Result<()> {
        let disk_manager = self.buffer_pool.disk_manager().clone();
        let mut buf = vec![0u8; LOG_BUFFER_SIZE];
        let losers: Vec<(TxnId, Lsn)> =
            self.active_txn.iter().map(|(t, l)| (*t, *l)).collect();

        for (txn_id, last_lsn) in losers {
            info!("undo: rolling back transaction {}", txn_id);
            let mut lsn = last_lsn;

            while lsn != INVALID_LSN {
                let offset = match self.lsn_mapping.get(&lsn) {
                    Some(offset) => *offset,
                    None => {
                        warn!("undo: no offset for LSN {}, stopping chain", lsn);
                        break;
                    }
                };

                let available = disk_manager.read_log(&mut buf, offset)?;
                let record = LogRecord::deserialize(&buf[..available])?;

                if record.record_type == LogRecordType::Begin {
                    break;
                }
                self.apply_undo(&record)?;
                lsn = record.prev_lsn;
            }

            self.active_txn.remove(&txn_id);
        }

        Ok(())
    }

    fn apply_undo(&self, record: &LogRecord) -> Result<()> {
        match &record.payload {
            LogPayload::Insert { rid, .. } => {
                self.undo_on_page(rid.page_id, |pm, page| pm.apply_delete(page, rid.slot))
            }
            LogPayload::Delete { rid, .. } => match record.record_type {
                LogRecordType::MarkDelete => {
                    self.undo_on_page(rid.page_id, |pm, page| {
                        pm.rollback_delete(page, rid.slot)
                    })
                }
                LogRecordType::RollbackDelete => {
                    self.undo_on_page(rid.page_id, |pm, page| pm.mark_delete(page, rid.slot))
                }
                _ => {
                    // A crash between APPLYDELETE and ABORT loses the slot's
                    // bytes; the tuple image is in the record but the slot
                    // cannot be repopulated in place.
                    warn!(
                        "undo: cannot restore applied delete at {}",
                        record.rid().map(|r| r.to_string()).unwrap_or_default()
                    );
                    Ok(())
                }
            },
            LogPayload::Update { rid, old_tuple, .. } => {
                self.undo_on_page(rid.page_id, |pm, page| {
                    pm.update_record(page, rid.slot, old_tuple)
                })
            }
            LogPayload::Transaction | LogPayload::NewPage { .. } => Ok(()),
        }
    }

    fn undo_on_page<F>(&self, page_id: u32, mutate: F) -> Result<()>
    where
        F: FnOnce(&PageManager, &mut crate::common::types::Page) -> std::result::Result<(), PageError>,
    {
        let page_ptr = self.buffer_pool.fetch_page(page_id)?;
        let result = {
            let mut page = page_ptr.write();
            mutate(&self.page_manager, &mut page)
        };
        match result {
            Ok(()) => {
                self.buffer_pool.unpin_page(page_id, true)?;
                Ok(())
            }
            Err(e) => {
                self.buffer_pool.unpin_page(page_id, false)?;
                Err(e.into())
            }
        }
    }
}
