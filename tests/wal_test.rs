use std::sync::Arc;
use anyhow::Result;

mod common;
use common::create_logged_buffer_pool;

use stratumdb::storage::heap::TableHeap;
use stratumdb::transaction::TransactionManager;

#[test]
fn test_eviction_forces_log_flush_first() -> Result<()> {
    // Small pool so the dirty heap page gets evicted while its log records
    // are still only in the log buffer.
    let (buffer_pool, log_manager, _disk, _file) = create_logged_buffer_pool(3)?;
    log_manager.run_flush_thread();

    let txn_manager = TransactionManager::new(buffer_pool.clone(), Some(log_manager.clone()), None);
    let txn = txn_manager.begin();
    let heap = TableHeap::new(buffer_pool.clone(), Some(log_manager.clone()), &txn)?;
    let rid = heap.insert(&txn, b"write-ahead")?;

    let page_lsn = {
        let page_ptr = buffer_pool.fetch_page(rid.page_id)?;
        let lsn = page_ptr.read().lsn;
        buffer_pool.unpin_page(rid.page_id, false)?;
        lsn
    };
    assert!(page_lsn > 0);

    // Fill the pool with fresh pages to force the heap page out.
    let mut pinned = Vec::new();
    for _ in 0..3 {
        let (_, page_id) = buffer_pool.new_page()?;
        pinned.push(page_id);
    }
    assert!(!buffer_pool.is_resident(rid.page_id));

    // The write-ahead rule: the log reached disk before the page did.
    assert!(log_manager.persistent_lsn() >= page_lsn);

    for page_id in pinned {
        buffer_pool.unpin_page(page_id, false)?;
    }
    log_manager.stop_flush_thread();
    Ok(())
}

#[test]
fn test_commit_is_durable_before_returning() -> Result<()> {
    let (buffer_pool, log_manager, disk_manager, _file) = create_logged_buffer_pool(8)?;
    log_manager.run_flush_thread();

    let txn_manager = TransactionManager::new(buffer_pool.clone(), Some(log_manager.clone()), None);
    let txn = txn_manager.begin();
    let heap = TableHeap::new(buffer_pool.clone(), Some(log_manager.clone()), &txn)?;
    heap.insert(&txn, b"group-committed")?;
    txn_manager.commit(&txn)?;

    // Every record of the transaction, commit included, is on disk.
    assert!(log_manager.persistent_lsn() >= txn.prev_lsn());
    assert!(disk_manager.log_size()? > 0);

    log_manager.stop_flush_thread();
    Ok(())
}

#[test]
fn test_tuple_flow_through_heap() -> Result<()> {
    let (buffer_pool, log_manager, _disk, _file) = create_logged_buffer_pool(8)?;
    log_manager.run_flush_thread();

    let txn_manager = TransactionManager::new(buffer_pool.clone(), Some(log_manager.clone()), None);
    let txn = txn_manager.begin();
    let heap = TableHeap::new(buffer_pool.clone(), Some(log_manager.clone()), &txn)?;

    let a = heap.insert(&txn, b"alpha")?;
    let b = heap.insert(&txn, b"beta")?;
    heap.update(&txn, a, b"alpha-2")?;
    heap.mark_delete(&txn, b)?;

    assert_eq!(heap.get(a)?.as_deref(), Some(&b"alpha-2"[..]));
    assert_eq!(heap.get(b)?, None);

    heap.rollback_delete(&txn, b)?;
    assert_eq!(heap.get(b)?.as_deref(), Some(&b"beta"[..]));

    txn_manager.commit(&txn)?;
    log_manager.stop_flush_thread();
    Ok(())
}
