use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stratumdb::common::types::Rid;
use stratumdb::transaction::lock_manager::LockManager;
use stratumdb::transaction::transaction::{Transaction, TransactionState};

fn resource() -> Rid {
    Rid::new(5, 1)
}

#[test]
fn test_wait_die_scenario() {
    // txn 1 holds EXCLUSIVE on R; txn 2 (younger) requesting shared dies;
    // txn 0 (older) blocks and wakes once R is unlocked.
    let lock_manager = Arc::new(LockManager::new(true));
    let txn1 = Arc::new(Transaction::new(1));
    let txn2 = Arc::new(Transaction::new(2));
    let txn0 = Arc::new(Transaction::new(0));

    assert!(lock_manager.lock_exclusive(&txn1, resource()));

    assert!(!lock_manager.lock_shared(&txn2, resource()));
    assert_eq!(txn2.state(), TransactionState::Aborted);

    let waiter = {
        let lock_manager = lock_manager.clone();
        let txn0 = txn0.clone();
        thread::spawn(move || lock_manager.lock_shared(&txn0, resource()))
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(txn0.state(), TransactionState::Growing);

    txn1.set_state(TransactionState::Committed);
    assert!(lock_manager.unlock(&txn1, resource()));

    assert!(waiter.join().unwrap());
    assert!(txn0.holds_shared(&resource()));
}

#[test]
fn test_exclusive_waiters_granted_in_fifo_order() {
    let lock_manager = Arc::new(LockManager::new(true));
    let holder = Arc::new(Transaction::new(10));
    assert!(lock_manager.lock_exclusive(&holder, resource()));

    // Two older transactions queue behind the holder.
    let txn5 = Arc::new(Transaction::new(5));
    let txn3 = Arc::new(Transaction::new(3));

    let first = {
        let lock_manager = lock_manager.clone();
        let txn5 = txn5.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&txn5, resource()))
    };
    thread::sleep(Duration::from_millis(50));
    let second = {
        let lock_manager = lock_manager.clone();
        let txn3 = txn3.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&txn3, resource()))
    };
    thread::sleep(Duration::from_millis(50));

    holder.set_state(TransactionState::Committed);
    assert!(lock_manager.unlock(&holder, resource()));
    assert!(first.join().unwrap());
    assert!(txn5.holds_exclusive(&resource()));

    // txn3 is still waiting behind txn5.
    assert!(!txn3.holds_exclusive(&resource()));
    txn5.set_state(TransactionState::Committed);
    assert!(lock_manager.unlock(&txn5, resource()));
    assert!(second.join().unwrap());
    assert!(txn3.holds_exclusive(&resource()));

    txn3.set_state(TransactionState::Committed);
    assert!(lock_manager.unlock(&txn3, resource()));
    assert_eq!(lock_manager.lock_count(), 0);
}

#[test]
fn test_shared_holders_block_younger_exclusive() {
    let lock_manager = LockManager::new(true);
    let txn1 = Transaction::new(1);
    let txn2 = Transaction::new(2);
    let txn3 = Transaction::new(3);

    assert!(lock_manager.lock_shared(&txn1, resource()));
    assert!(lock_manager.lock_shared(&txn2, resource()));

    // Wait-die threshold is the largest granted id, so txn 3 dies.
    assert!(!lock_manager.lock_exclusive(&txn3, resource()));
    assert_eq!(txn3.state(), TransactionState::Aborted);
}

#[test]
fn test_upgrade_then_unlock_under_strict_2pl() {
    let lock_manager = LockManager::new(true);
    let txn = Transaction::new(4);

    assert!(lock_manager.lock_shared(&txn, resource()));
    assert!(lock_manager.lock_upgrade(&txn, resource()));
    assert!(txn.holds_exclusive(&resource()));

    // Still growing: strict 2PL refuses the release until commit.
    assert!(!lock_manager.unlock(&txn, resource()));
    txn.set_state(TransactionState::Committed);
    assert!(lock_manager.unlock(&txn, resource()));
    assert_eq!(lock_manager.lock_count(), 0);
}
