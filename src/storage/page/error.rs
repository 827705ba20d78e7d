use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Not enough space in page")]
    InsufficientSpace,
    #[error("Record not found")]
    RecordNotFound,
    #[error("Invalid slot number")]
    InvalidSlot,
    #[error("Record is already deleted")]
    AlreadyDeleted,
    #[error("Record is not marked for deletion")]
    NotMarked,
}
