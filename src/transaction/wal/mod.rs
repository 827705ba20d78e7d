// Write-ahead logging: record format, group-commit log manager, recovery.

pub mod log_record;
pub mod log_manager;
pub mod recovery;

use std::sync::atomic::{AtomicBool, Ordering};

pub use log_record::{LogRecord, LogRecordType, LogPayload, LogRecordError};
pub use log_manager::{LogManager, LogConfig};
pub use recovery::LogRecovery;

/// Process-wide logging switch. Set by `LogManager::run_flush_thread`,
/// cleared by `LogManager::stop_flush_thread`; recovery clears it for the
/// duration of redo/undo so replayed mutations are not re-logged.
static ENABLE_LOGGING: AtomicBool = AtomicBool::new(false);

pub fn logging_enabled() -> bool {
    ENABLE_LOGGING.load(Ordering::Acquire)
}

pub(crate) fn set_logging_enabled(enabled: bool) {
    ENABLE_LOGGING.store(enabled, Ordering::Release);
}
