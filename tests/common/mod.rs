use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use stratumdb::storage::buffer::BufferPoolManager;
use stratumdb::storage::disk::DiskManager;
use stratumdb::transaction::wal::log_manager::{LogConfig, LogManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<NamedTempFile> {
    Ok(NamedTempFile::new()?)
}

// Create a buffer pool manager over a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, Arc<DiskManager>, NamedTempFile)> {
    let file = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk_manager.clone(), None));
    Ok((buffer_pool, disk_manager, file))
}

// Create a buffer pool wired to a log manager, for WAL and recovery tests
#[allow(dead_code)]
pub fn create_logged_buffer_pool(
    pool_size: usize,
) -> Result<(
    Arc<BufferPoolManager>,
    Arc<LogManager>,
    Arc<DiskManager>,
    NamedTempFile,
)> {
    let file = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);
    let log_manager = Arc::new(LogManager::new(disk_manager.clone(), LogConfig::default())?);
    let buffer_pool = Arc::new(BufferPoolManager::new(
        pool_size,
        disk_manager.clone(),
        Some(log_manager.clone()),
    ));
    Ok((buffer_pool, log_manager, disk_manager, file))
}
