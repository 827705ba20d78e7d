use std::sync::Arc;
use anyhow::Result;
use parking_lot::Mutex;
use tempfile::NamedTempFile;

use stratumdb::common::types::PageId;
use stratumdb::storage::buffer::BufferPoolManager;
use stratumdb::storage::disk::DiskManager;
use stratumdb::storage::heap::TableHeap;
use stratumdb::transaction::wal::log_manager::{LogConfig, LogManager};
use stratumdb::transaction::wal::recovery::LogRecovery;
use stratumdb::transaction::TransactionManager;

// Logging is a process-wide switch, so tests that toggle it run one at a
// time.
static LOGGING_GUARD: Mutex<()> = Mutex::new(());

struct Crashed {
    file: NamedTempFile,
    heap_first_page: PageId,
}

/// Run a workload against a logged database, then "crash" by dropping the
/// buffer pool without flushing any data pages. Only the log survives.
fn run_then_crash(
    workload: impl FnOnce(&TransactionManager, &Arc<BufferPoolManager>, &Arc<LogManager>) -> PageId,
) -> Result<Crashed> {
    let file = NamedTempFile::new()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);
    let log_manager = Arc::new(LogManager::new(disk_manager.clone(), LogConfig::default())?);
    let buffer_pool = Arc::new(BufferPoolManager::new(
        16,
        disk_manager,
        Some(log_manager.clone()),
    ));

    log_manager.run_flush_thread();
    let txn_manager = TransactionManager::new(buffer_pool.clone(), Some(log_manager.clone()), None);

    let heap_first_page = workload(&txn_manager, &buffer_pool, &log_manager);

    // Make the log durable, then drop everything without flushing pages.
    log_manager.flush_now_blocking();
    log_manager.stop_flush_thread();

    Ok(Crashed {
        file,
        heap_first_page,
    })
}

fn recover(crashed: &Crashed) -> Result<(Arc<BufferPoolManager>, TableHeap, Vec<u32>)> {
    let disk_manager = Arc::new(DiskManager::new(crashed.file.path())?);
    let buffer_pool = Arc::new(BufferPoolManager::new(16, disk_manager, None));

    let mut recovery = LogRecovery::new(buffer_pool.clone());
    recovery.redo()?;
    let losers = recovery.loser_transactions();
    recovery.undo()?;

    let heap = TableHeap::open(buffer_pool.clone(), None, crashed.heap_first_page);
    Ok((buffer_pool, heap, losers))
}

#[test]
fn test_uncommitted_transaction_is_rolled_back() -> Result<()> {
    let _serial = LOGGING_GUARD.lock();

    // BEGIN t, INSERT k1, INSERT k2 and no COMMIT.
    let crashed = run_then_crash(|txn_manager, buffer_pool, log_manager| {
        let txn = txn_manager.begin();
        let heap = TableHeap::new(
            buffer_pool.clone(),
            Some(log_manager.clone()),
            &txn,
        )
        .unwrap();
        heap.insert(&txn, b"k1").unwrap();
        heap.insert(&txn, b"k2").unwrap();
        heap.first_page_id()
    })?;

    let (_buffer_pool, heap, losers) = recover(&crashed)?;
    assert_eq!(losers.len(), 1);

    // Redo replayed the inserts, undo removed them again: the table is
    // empty.
    assert!(heap.scan()?.is_empty());
    Ok(())
}

#[test]
fn test_committed_transaction_survives_crash() -> Result<()> {
    let _serial = LOGGING_GUARD.lock();

    let crashed = run_then_crash(|txn_manager, buffer_pool, log_manager| {
        let committed = txn_manager.begin();
        let heap = TableHeap::new(
            buffer_pool.clone(),
            Some(log_manager.clone()),
            &committed,
        )
        .unwrap();
        heap.insert(&committed, b"durable").unwrap();
        txn_manager.commit(&committed).unwrap();

        // A second transaction mutates and never commits.
        let loser = txn_manager.begin();
        heap.insert(&loser, b"phantom").unwrap();
        heap.first_page_id()
    })?;

    let (_buffer_pool, heap, losers) = recover(&crashed)?;
    assert_eq!(losers.len(), 1);

    let rows: Vec<Vec<u8>> = heap.scan()?.into_iter().map(|(_, bytes)| bytes).collect();
    assert_eq!(rows, vec![b"durable".to_vec()]);
    Ok(())
}

#[test]
fn test_update_and_delete_are_recovered() -> Result<()> {
    let _serial = LOGGING_GUARD.lock();

    let crashed = run_then_crash(|txn_manager, buffer_pool, log_manager| {
        let setup = txn_manager.begin();
        let heap = TableHeap::new(
            buffer_pool.clone(),
            Some(log_manager.clone()),
            &setup,
        )
        .unwrap();
        let updated = heap.insert(&setup, b"original").unwrap();
        let deleted = heap.insert(&setup, b"condemned").unwrap();
        heap.update(&setup, updated, b"replaced").unwrap();
        heap.mark_delete(&setup, deleted).unwrap();
        txn_manager.commit(&setup).unwrap();

        // An open transaction updates the surviving row, then crashes.
        let loser = txn_manager.begin();
        heap.update(&loser, updated, b"lost-update").unwrap();
        heap.first_page_id()
    })?;

    let (_buffer_pool, heap, losers) = recover(&crashed)?;
    assert_eq!(losers.len(), 1);

    // The committed update and delete stand; the in-flight update rolls
    // back to the committed image.
    let rows: Vec<Vec<u8>> = heap.scan()?.into_iter().map(|(_, bytes)| bytes).collect();
    assert_eq!(rows, vec![b"replaced".to_vec()]);
    Ok(())
}

#[test]
fn test_redo_is_idempotent_on_recovered_database() -> Result<()> {
    let _serial = LOGGING_GUARD.lock();

    let crashed = run_then_crash(|txn_manager, buffer_pool, log_manager| {
        let txn = txn_manager.begin();
        let heap = TableHeap::new(
            buffer_pool.clone(),
            Some(log_manager.clone()),
            &txn,
        )
        .unwrap();
        heap.insert(&txn, b"row-a").unwrap();
        heap.insert(&txn, b"row-b").unwrap();
        txn_manager.commit(&txn).unwrap();
        heap.first_page_id()
    })?;

    // First recovery materializes the pages.
    let (buffer_pool, heap, losers) = recover(&crashed)?;
    assert!(losers.is_empty());
    assert_eq!(heap.scan()?.len(), 2);
    buffer_pool.flush_all_pages()?;
    drop(heap);
    drop(buffer_pool);

    // A second pass over the same log must not duplicate anything: every
    // page already carries an LSN at or past each record.
    let (_buffer_pool, heap, _losers) = recover(&crashed)?;
    let rows: Vec<Vec<u8>> = heap.scan()?.into_iter().map(|(_, bytes)| bytes).collect();
    assert_eq!(rows, vec![b"row-a".to_vec(), b"row-b".to_vec()]);
    Ok(())
}
