use std::collections::VecDeque;
use std::sync::Arc;
use parking_lot::Mutex;
use log::debug;

use crate::common::types::{Frame, FrameId, Page, PageId, PagePtr, FramePtr, INVALID_PAGE_ID};
use crate::storage::disk::DiskManager;
use crate::storage::hash::ExtendibleHashTable;
use crate::storage::buffer::error::{BufferPoolError, Result};
use crate::storage::buffer::replacer::LruReplacer;
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::logging_enabled;

/// Bucket capacity for the page table.
const PAGE_TABLE_BUCKET_SIZE: usize = 16;

/// BufferPoolManager caches disk pages in a fixed set of frames, pins them
/// for callers and evicts unpinned pages through the LRU replacer.
///
/// The page table is an extendible hash from page id to frame index. Frames
/// are handed out from the free list first, then by evicting a replacer
/// victim; pinned frames are never evicted.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FramePtr>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    free_list: Mutex<VecDeque<FrameId>>,
    replacer: LruReplacer<FrameId>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
    /// Serializes whole buffer pool operations.
    latch: Mutex<()>,
}

impl BufferPoolManager {
    /// Create a buffer pool over `disk_manager`. With a log manager attached
    /// every dirty write honors the WAL rule: log records up to the page's
    /// LSN are forced to disk before the page is.
    pub fn new(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = i as FrameId;
            let page = Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(parking_lot::RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            free_list: Mutex::new(free_list),
            replacer: LruReplacer::new(),
            disk_manager,
            log_manager,
            latch: Mutex::new(()),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Fetch a page, pinning it. The caller must balance every fetch with
    /// exactly one `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId);
        }

        let _guard = self.latch.lock();

        // Already resident: pin it and withdraw it from eviction.
        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id as usize];
            let mut frame_guard = frame.write();
            if frame_guard.pin_count == 0 {
                self.replacer.erase(frame_id);
            }
            frame_guard.pin_count += 1;
            return Ok(frame_guard.page.clone());
        }

        // Not resident: claim a frame and read the page from disk.
        let frame_id = self.allocate_frame()?;
        let frame = &self.frames[frame_id as usize];
        {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                self.disk_manager.read_page(page_id, &mut page_guard)?;
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
        }

        self.page_table.insert(page_id, frame_id);

        let frame_guard = frame.read();
        Ok(frame_guard.page.clone())
    }

    /// Create a brand-new page, pinned. Returns the page and its id.
    pub fn new_page(&self) -> Result<(PagePtr, PageId)> {
        let _guard = self.latch.lock();

        let frame_id = self.allocate_frame()?;
        let page_id = self.disk_manager.allocate_page()?;

        let frame = &self.frames[frame_id as usize];
        {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                *page_guard = Page::new(page_id);
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
        }

        self.page_table.insert(page_id, frame_id);

        let frame_guard = frame.read();
        Ok((frame_guard.page.clone(), page_id))
    }

    /// Release one pin on a page, OR-ing in the dirty flag. When the pin
    /// count drops to zero the frame becomes an eviction candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId);
        }

        let _guard = self.latch.lock();

        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();

        if frame_guard.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        frame_guard.pin_count -= 1;
        if is_dirty {
            frame_guard.is_dirty = true;
        }
        if frame_guard.pin_count == 0 {
            self.replacer.insert(frame_id);
        }

        Ok(())
    }

    /// Write a resident page through to disk and clear its dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId);
        }

        let _guard = self.latch.lock();

        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        self.flush_frame(frame_id)
    }

    /// Flush every resident page to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _guard = self.latch.lock();

        for frame_id in 0..self.pool_size as FrameId {
            let page_id = {
                let frame_guard = self.frames[frame_id as usize].read();
                let page_guard = frame_guard.page.read();
                page_guard.page_id
            };
            if page_id != INVALID_PAGE_ID {
                self.flush_frame(frame_id)?;
            }
        }

        Ok(())
    }

    /// Drop a page from the pool and deallocate it on disk. Fails if the
    /// page is currently pinned; deleting a non-resident page only touches
    /// the disk allocator.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId);
        }

        let _guard = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id as usize];
            let mut frame_guard = frame.write();

            if frame_guard.pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }

            self.page_table.remove(&page_id);
            {
                let mut page_guard = frame_guard.page.write();
                *page_guard = Page::new(INVALID_PAGE_ID);
            }
            frame_guard.is_dirty = false;
            drop(frame_guard);

            self.replacer.erase(frame_id);
            self.free_list.lock().push_back(frame_id);
        }

        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// True when the page currently occupies a frame.
    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.page_table.find(&page_id).is_some()
    }

    /// Current pin count of a resident page (diagnostics and tests).
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let frame_id = self.page_table.find(&page_id)?;
        Some(self.frames[frame_id as usize].read().pin_count)
    }

    /// Claim a frame for reuse: free list first, then an eviction victim
    /// (written back if dirty, unmapped from the page table).
    fn allocate_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop_front() {
            return Ok(frame_id);
        }

        let victim_id = self.replacer.victim().ok_or(BufferPoolError::PoolExhausted)?;
        let frame = &self.frames[victim_id as usize];

        let (is_dirty, old_page_id, page_copy) = {
            let frame_guard = frame.read();
            let page_guard = frame_guard.page.read();
            (
                frame_guard.is_dirty,
                page_guard.page_id,
                if frame_guard.is_dirty {
                    Some(page_guard.clone())
                } else {
                    None
                },
            )
        };

        if let Some(page) = page_copy {
            debug!("evicting dirty page {} from frame {}", old_page_id, victim_id);
            self.write_page_with_wal_check(&page)?;
            frame.write().is_dirty = false;
        }

        if old_page_id != INVALID_PAGE_ID {
            self.page_table.remove(&old_page_id);
        }

        Ok(victim_id)
    }

    fn flush_frame(&self, frame_id: FrameId) -> Result<()> {
        let frame = &self.frames[frame_id as usize];
        let page_copy = {
            let frame_guard = frame.read();
            let page = frame_guard.page.read().clone();
            page
        };

        self.write_page_with_wal_check(&page_copy)?;
        frame.write().is_dirty = false;
        Ok(())
    }

    /// The write-ahead rule: a dirty page whose LSN runs ahead of the
    /// durable log must not reach disk before the log does.
    fn write_page_with_wal_check(&self, page: &Page) -> Result<()> {
        if let Some(log_manager) = &self.log_manager {
            if logging_enabled() && page.lsn > log_manager.persistent_lsn() {
                log_manager.flush_till_lsn(page.lsn);
            }
        }
        self.disk_manager.write_page(page)?;
        Ok(())
    }
}
