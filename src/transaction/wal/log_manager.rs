use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use log::{debug, error};

use crate::common::types::{Lsn, INVALID_LSN};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::transaction::wal::log_record::{LogRecord, LogRecordType};
use crate::transaction::wal::set_logging_enabled;

/// Error type for log manager operations
#[derive(Error, Debug)]
pub enum LogError {
    #[error("Disk error: {0}")]
    Disk(#[from] DiskManagerError),
}

/// Result type for log manager operations
pub type Result<T> = std::result::Result<T, LogError>;

/// Default in-memory log buffer capacity.
pub const LOG_BUFFER_SIZE: usize = 32 * 1024;

/// How long the background flusher sleeps between unforced flushes.
pub const LOG_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the log manager
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Capacity of each of the two log buffers, in bytes.
    pub buffer_size: usize,

    /// Flush interval of the background thread.
    pub flush_timeout: Duration,

    /// Force a flush after every COMMIT or ABORT record.
    pub force_sync_on_commit: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            buffer_size: LOG_BUFFER_SIZE,
            flush_timeout: LOG_TIMEOUT,
            force_sync_on_commit: true,
        }
    }
}

/// One of the two swappable log buffers.
struct BufferSegment {
    data: Vec<u8>,
    len: usize,
    max_lsn: Lsn,
}

impl BufferSegment {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            len: 0,
            max_lsn: INVALID_LSN,
        }
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn has_space(&self, additional: usize) -> bool {
        self.len + additional <= self.data.len()
    }

    fn append(&mut self, bytes: &[u8], lsn: Lsn) {
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        self.max_lsn = self.max_lsn.max(lsn);
    }

    fn reset(&mut self) {
        self.len = 0;
        self.max_lsn = INVALID_LSN;
    }
}

/// The flush-side buffer plus the flusher's handshake state.
struct FlushState {
    segment: BufferSegment,
    requested: bool,
    /// Incremented after every completed flush round; waiters key off it.
    generation: u64,
}

/// Write-ahead log manager: assigns LSNs, buffers serialized records and
/// group-commits them to disk from a background flush thread.
///
/// Two buffers alternate roles: records append into `append_buffer` while
/// the flusher drains `flush_state.segment`; the swap happens under the
/// flush mutex. A flush is triggered by the timeout, by a full append
/// buffer, or by an explicit `flush_till_lsn`.
pub struct LogManager {
    disk_manager: Arc<DiskManager>,
    config: LogConfig,
    next_lsn: AtomicU32,
    persistent_lsn: AtomicU32,
    append_buffer: Mutex<BufferSegment>,
    flush_state: Mutex<FlushState>,
    flush_request_cv: Condvar,
    flush_done_cv: Condvar,
    running: AtomicBool,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    /// Create a log manager over `disk_manager`, resuming LSN assignment
    /// after the highest LSN already present in the log file.
    pub fn new(disk_manager: Arc<DiskManager>, config: LogConfig) -> Result<Self> {
        let max_lsn = Self::scan_max_lsn(&disk_manager, config.buffer_size)?;

        Ok(Self {
            disk_manager,
            next_lsn: AtomicU32::new(max_lsn + 1),
            persistent_lsn: AtomicU32::new(max_lsn),
            append_buffer: Mutex::new(BufferSegment::new(config.buffer_size)),
            flush_state: Mutex::new(FlushState {
                segment: BufferSegment::new(config.buffer_size),
                requested: false,
                generation: 0,
            }),
            flush_request_cv: Condvar::new(),
            flush_done_cv: Condvar::new(),
            running: AtomicBool::new(false),
            flush_thread: Mutex::new(None),
            config,
        })
    }

    /// Highest LSN recorded in the existing log file, `INVALID_LSN` when the
    /// log is empty. A record that fails to parse ends the scan (torn tail).
    fn scan_max_lsn(disk_manager: &DiskManager, buffer_size: usize) -> Result<Lsn> {
        let mut max_lsn = INVALID_LSN;
        let mut buf = vec![0u8; buffer_size];
        let mut offset = 0u64;

        loop {
            let n = disk_manager.read_log(&mut buf, offset)?;
            if n == 0 {
                break;
            }
            let mut pos = 0;
            while pos < n {
                match LogRecord::deserialize(&buf[pos..n]) {
                    Ok(record) => {
                        max_lsn = max_lsn.max(record.lsn);
                        pos += record.size as usize;
                    }
                    Err(_) => break,
                }
            }
            if pos == 0 {
                break;
            }
            offset += pos as u64;
        }

        Ok(max_lsn)
    }

    /// Append a log record, assigning its LSN. Blocks while the append
    /// buffer is full, handing the buffer to the flusher.
    pub fn append_log_record(&self, record: &mut LogRecord) -> Lsn {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        record.lsn = lsn;
        let data = record.serialize();

        if data.len() > self.config.buffer_size {
            // A record larger than the buffer bypasses it: drain what came
            // before, then write straight through.
            self.flush_till_lsn(lsn.saturating_sub(1));
            let _flush = self.flush_state.lock();
            if let Err(e) = self.disk_manager.write_log(&data) {
                error!("direct log write failed: {}", e);
            }
            self.persistent_lsn.fetch_max(lsn, Ordering::SeqCst);
            return lsn;
        }

        loop {
            {
                let mut append = self.append_buffer.lock();
                if append.has_space(data.len()) {
                    append.append(&data, lsn);
                    break;
                }
            }
            self.trigger_flush_and_wait();
        }

        if self.config.force_sync_on_commit
            && matches!(
                record.record_type,
                LogRecordType::Commit | LogRecordType::Abort
            )
        {
            self.flush_till_lsn(lsn);
        }

        lsn
    }

    /// LSN up to which the log is durable on disk.
    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }

    /// LSN the next record will receive.
    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }

    /// Block until every record with an LSN `<= lsn` is durable.
    pub fn flush_till_lsn(&self, lsn: Lsn) {
        if lsn == INVALID_LSN {
            return;
        }

        while self.persistent_lsn() < lsn {
            let mut flush = self.flush_state.lock();
            if self.persistent_lsn() >= lsn {
                return;
            }

            if self.running.load(Ordering::SeqCst) {
                let generation = flush.generation;
                flush.requested = true;
                self.flush_request_cv.notify_one();
                while flush.generation == generation && self.persistent_lsn() < lsn {
                    self.flush_done_cv.wait(&mut flush);
                }
            } else {
                // No flusher thread: flush synchronously.
                self.flush_locked(&mut flush);
            }

            // The target LSN was never appended: nothing left to wait for.
            let drained =
                flush.segment.is_empty() && self.append_buffer.lock().is_empty();
            if drained && self.persistent_lsn() < lsn {
                return;
            }
        }
    }

    /// Block until everything appended before this call is durable.
    pub fn flush_now_blocking(&self) {
        let last = self.next_lsn.load(Ordering::SeqCst).saturating_sub(1);
        self.flush_till_lsn(last);
    }

    /// Start the background flush thread and enable logging process-wide.
    pub fn run_flush_thread(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        set_logging_enabled(true);

        let this = Arc::clone(self);
        let handle = std::thread::spawn(move || this.flusher_loop());
        *self.flush_thread.lock() = Some(handle);
        debug!("log flush thread started");
    }

    /// Stop the flush thread after a final drain and disable logging.
    pub fn stop_flush_thread(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        set_logging_enabled(false);

        {
            let mut flush = self.flush_state.lock();
            flush.requested = true;
            self.flush_request_cv.notify_one();
        }
        if let Some(handle) = self.flush_thread.lock().take() {
            let _ = handle.join();
        }
        debug!("log flush thread stopped");
    }

    fn flusher_loop(&self) {
        loop {
            let mut flush = self.flush_state.lock();
            if !flush.requested && self.running.load(Ordering::SeqCst) {
                let _ = self
                    .flush_request_cv
                    .wait_for(&mut flush, self.config.flush_timeout);
            }

            let keep_running = self.running.load(Ordering::SeqCst);
            self.flush_locked(&mut flush);

            if !keep_running {
                // Second round picks up anything appended during the first.
                self.flush_locked(&mut flush);
                return;
            }
        }
    }

    /// One flush round with the flush mutex held: swap in the append buffer
    /// if the flush buffer is empty, write it out, advance `persistent_lsn`
    /// and wake waiters.
    fn flush_locked(&self, flush: &mut FlushState) {
        {
            let mut append = self.append_buffer.lock();
            if flush.segment.is_empty() && !append.is_empty() {
                std::mem::swap(&mut flush.segment, &mut *append);
                append.reset();
            }
        }

        if !flush.segment.is_empty() {
            let max_lsn = flush.segment.max_lsn;
            match self
                .disk_manager
                .write_log(&flush.segment.data[..flush.segment.len])
            {
                Ok(()) => {
                    self.persistent_lsn.fetch_max(max_lsn, Ordering::SeqCst);
                    flush.segment.reset();
                }
                Err(e) => error!("log flush failed: {}", e),
            }
        }

        flush.requested = false;
        flush.generation += 1;
        self.flush_done_cv.notify_all();
    }

    fn trigger_flush_and_wait(&self) {
        let mut flush = self.flush_state.lock();
        if self.running.load(Ordering::SeqCst) {
            let generation = flush.generation;
            flush.requested = true;
            self.flush_request_cv.notify_one();
            while flush.generation == generation {
                self.flush_done_cv.wait(&mut flush);
            }
        } else {
            self.flush_locked(&mut flush);
        }
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            self.stop_flush_thread();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Rid;
    use tempfile::NamedTempFile;

    fn test_log_manager() -> (Arc<LogManager>, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        let manager = Arc::new(LogManager::new(disk, LogConfig::default()).unwrap());
        (manager, file)
    }

    #[test]
    fn test_lsns_are_sequential() {
        let (manager, _file) = test_log_manager();

        let mut begin = LogRecord::new_begin(1);
        let lsn1 = manager.append_log_record(&mut begin);
        let mut insert = LogRecord::new_insert(1, lsn1, Rid::new(2, 0), vec![1, 2]);
        let lsn2 = manager.append_log_record(&mut insert);

        assert_eq!(lsn1, 1);
        assert_eq!(lsn2, lsn1 + 1);
        assert_eq!(begin.lsn, lsn1);
    }

    #[test]
    fn test_flush_now_blocking_persists_records() {
        let (manager, file) = test_log_manager();

        let mut begin = LogRecord::new_begin(7);
        let lsn = manager.append_log_record(&mut begin);
        assert!(manager.persistent_lsn() < lsn);

        manager.flush_now_blocking();
        assert!(manager.persistent_lsn() >= lsn);

        // The record parses back from the log file.
        let disk = DiskManager::new(file.path()).unwrap();
        let mut buf = vec![0u8; 1024];
        let n = disk.read_log(&mut buf, 0).unwrap();
        let parsed = LogRecord::deserialize(&buf[..n]).unwrap();
        assert_eq!(parsed.lsn, lsn);
        assert_eq!(parsed.txn_id, 7);
        assert_eq!(parsed.record_type, LogRecordType::Begin);
    }

    #[test]
    fn test_flush_with_empty_buffers_is_identity() {
        let (manager, _file) = test_log_manager();
        manager.flush_now_blocking();
        manager.flush_now_blocking();
        assert_eq!(manager.persistent_lsn(), INVALID_LSN);
    }

    #[test]
    fn test_flush_thread_drains_on_stop() {
        let (manager, file) = test_log_manager();

        manager.run_flush_thread();
        assert!(crate::transaction::wal::logging_enabled());

        let mut begin = LogRecord::new_begin(3);
        let lsn = manager.append_log_record(&mut begin);

        manager.stop_flush_thread();
        assert!(!crate::transaction::wal::logging_enabled());
        assert!(manager.persistent_lsn() >= lsn);

        let disk = DiskManager::new(file.path()).unwrap();
        assert!(disk.log_size().unwrap() > 0);
    }

    #[test]
    fn test_reopen_resumes_lsn_sequence() {
        let file = NamedTempFile::new().unwrap();
        let last_lsn = {
            let disk = Arc::new(DiskManager::new(file.path()).unwrap());
            let manager = Arc::new(LogManager::new(disk, LogConfig::default()).unwrap());
            let mut begin = LogRecord::new_begin(1);
            manager.append_log_record(&mut begin);
            let mut commit = LogRecord::new_commit(1, begin.lsn);
            let lsn = manager.append_log_record(&mut commit);
            manager.flush_now_blocking();
            lsn
        };

        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        let manager = Arc::new(LogManager::new(disk, LogConfig::default()).unwrap());
        let mut begin = LogRecord::new_begin(2);
        let lsn = manager.append_log_record(&mut begin);
        assert_eq!(lsn, last_lsn + 1);
    }

    #[test]
    fn test_buffer_full_forces_flush() {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        let config = LogConfig {
            buffer_size: 256,
            flush_timeout: Duration::from_millis(50),
            force_sync_on_commit: false,
        };
        let manager = Arc::new(LogManager::new(disk.clone(), config).unwrap());

        // Each record is 40 bytes; 20 of them overflow a 256-byte buffer
        // several times over, forcing synchronous flushes.
        for i in 0..20 {
            let mut record = LogRecord::new_insert(1, i, Rid::new(2, i), vec![0u8; 8]);
            manager.append_log_record(&mut record);
        }
        manager.flush_now_blocking();
        assert_eq!(manager.persistent_lsn(), 20);
        assert_eq!(disk.log_size().unwrap(), 20 * 40);
    }
}
