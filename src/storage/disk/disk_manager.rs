use std::fs::{File, OpenOptions};
use std::io::{Read, Write, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, PAGE_SIZE, INVALID_PAGE_ID};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual disk I/O: fixed-size pages in
/// the database file and the append-only log file next to it.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    free_pages: Mutex<Vec<PageId>>,
}

impl DiskManager {
    /// Open (or create) the database file at `db_path` and its log file at
    /// `<db_path>.log`. A fresh database file is extended by one page so the
    /// header page exists before any allocation.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path.as_ref())?;

        let mut log_path = PathBuf::from(db_path.as_ref());
        let mut name = log_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".log");
        log_path.set_file_name(name);
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)?;

        let manager = Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            free_pages: Mutex::new(Vec::new()),
        };

        // Reserve the header page so allocate_page never hands out page 1.
        {
            let mut file = manager.db_file.lock();
            if file.metadata()?.len() == 0 {
                file.write_all(&[0u8; PAGE_SIZE])?;
                file.flush()?;
            }
        }

        Ok(manager)
    }

    /// Read a page from disk. Reading past the end of the file yields a
    /// zeroed page (the page has been allocated but never written).
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);

        {
            let mut file = self.db_file.lock();
            let file_size = file.metadata()?.len();

            if offset >= file_size {
                page.data.fill(0);
                page.page_id = page_id;
                page.lsn = 0;
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut page.data)?;
        }

        page.page_id = page_id;
        page.lsn = page.lsn_in_data();

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = Self::page_offset(page.page_id);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Allocate a new page id, reusing a previously deallocated one when
    /// possible, otherwise extending the file by a zeroed page.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return Ok(page_id);
        }

        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();
        let new_page_id = (file_size / PAGE_SIZE as u64) as PageId + 1;

        file.seek(SeekFrom::End(0))?;
        file.write_all(&[0u8; PAGE_SIZE])?;
        file.flush()?;

        Ok(new_page_id)
    }

    /// Return a page id to the allocator for reuse.
    pub fn deallocate_page(&self, page_id: PageId) {
        if page_id != INVALID_PAGE_ID {
            self.free_pages.lock().push(page_id);
        }
    }

    /// Append a chunk of serialized log records to the log file and sync it.
    pub fn write_log(&self, data: &[u8]) -> Result<(), DiskManagerError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut file = self.log_file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes of the log file starting at `offset`.
    /// Returns the number of bytes read; 0 means the offset is at or past
    /// the end of the log.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<usize, DiskManagerError> {
        let mut file = self.log_file.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(0);
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = ((file_size - offset) as usize).min(buf.len());
        file.read_exact(&mut buf[..available])?;
        Ok(available)
    }

    /// Size of the log file in bytes.
    pub fn log_size(&self) -> Result<u64, DiskManagerError> {
        Ok(self.log_file.lock().metadata()?.len())
    }

    /// Calculate the offset of a page in the file. Page ids are 1-based.
    fn page_offset(page_id: PageId) -> u64 {
        (page_id as u64 - 1) * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_page_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let page_id = disk.allocate_page().unwrap();
        assert!(page_id > 1, "header page must stay reserved");

        let mut page = Page::new(page_id);
        page.data[100] = 0xAB;
        disk.write_page(&page).unwrap();

        let mut read_back = Page::new(0);
        disk.read_page(page_id, &mut read_back).unwrap();
        assert_eq!(read_back.page_id, page_id);
        assert_eq!(read_back.data[100], 0xAB);
    }

    #[test]
    fn test_read_past_eof_zero_fills() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut page = Page::new(0);
        page.data.fill(0xFF);
        disk.read_page(42, &mut page).unwrap();
        assert_eq!(page.page_id, 42);
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_deallocated_page_is_reused() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let a = disk.allocate_page().unwrap();
        disk.deallocate_page(a);
        let b = disk.allocate_page().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_log_append_and_read() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        disk.write_log(b"hello").unwrap();
        disk.write_log(b" world").unwrap();

        let mut buf = [0u8; 64];
        let n = disk.read_log(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"hello world");

        let n = disk.read_log(&mut buf, 6).unwrap();
        assert_eq!(&buf[..n], b"world");

        assert_eq!(disk.read_log(&mut buf, 100).unwrap(), 0);
    }
}
