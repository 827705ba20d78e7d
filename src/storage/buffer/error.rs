use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Page {0} not found in buffer pool")]
    PageNotFound(PageId),

    #[error("Buffer pool exhausted: all frames are pinned")]
    PoolExhausted,

    #[error("Page {0} is pinned and cannot be deleted")]
    PagePinned(PageId),

    #[error("Page {0} is not pinned")]
    PageNotPinned(PageId),

    #[error("Invalid page ID")]
    InvalidPageId,

    #[error("Disk error: {0}")]
    DiskError(#[from] DiskManagerError),
}

/// Result type for buffer pool operations
pub type Result<T> = std::result::Result<T, BufferPoolError>;
