// Export public modules
pub mod common;
pub mod storage;
pub mod index;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::buffer::BufferPoolManager;
pub use storage::buffer::BufferPoolError;
pub use storage::disk::DiskManager;
pub use storage::hash::ExtendibleHashTable;
pub use storage::heap::TableHeap;
pub use index::btree::BPlusTree;
pub use transaction::lock_manager::LockManager;
pub use transaction::wal::log_manager::LogManager;
pub use transaction::wal::recovery::LogRecovery;
pub use transaction::TransactionManager;
