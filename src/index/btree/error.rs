use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Index name '{0}' exceeds the header page record size")]
    NameTooLong(String),
}

/// Result type for B+ tree operations
pub type Result<T> = std::result::Result<T, BTreeError>;
