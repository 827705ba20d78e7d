use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::header::RecordPageHeader;
use crate::storage::page::layout::{Slot, DELETE_MARK, RECORD_HEADER_SIZE, SLOT_SIZE};

/// Slotted-page operations over opaque byte records.
///
/// Record bytes are packed upward from the header; the slot array grows
/// downward from the end of the page. Deletion is three-state: a mark that
/// can be rolled back, and a physical apply that empties the slot. Freed
/// bytes are not compacted.
pub struct PageManager;

impl Default for PageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PageManager {
    pub fn new() -> Self {
        Self
    }

    /// Initialize a fresh record page.
    pub fn init_page(&self, page: &mut Page) {
        let header = RecordPageHeader::new();
        page.data[0..RECORD_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        page.lsn = 0;
    }

    pub fn get_header(&self, page: &Page) -> RecordPageHeader {
        RecordPageHeader::from_bytes(&page.data[0..RECORD_HEADER_SIZE])
    }

    pub fn set_header(&self, page: &mut Page, header: &RecordPageHeader) {
        page.data[0..RECORD_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    pub fn next_page_id(&self, page: &Page) -> PageId {
        self.get_header(page).next_page_id
    }

    pub fn set_next_page_id(&self, page: &mut Page, next: PageId) {
        let mut header = self.get_header(page);
        header.next_page_id = next;
        self.set_header(page, &header);
    }

    pub fn set_prev_page_id(&self, page: &mut Page, prev: PageId) {
        let mut header = self.get_header(page);
        header.prev_page_id = prev;
        self.set_header(page, &header);
    }

    /// Append a record, returning its slot number.
    pub fn insert_record(&self, page: &mut Page, data: &[u8]) -> Result<u32, PageError> {
        let mut header = self.get_header(page);

        let slot_array_end = PAGE_SIZE - SLOT_SIZE * header.slot_count as usize;
        let needed = data.len() + SLOT_SIZE;
        let available = slot_array_end.saturating_sub(header.free_space_offset as usize);
        if available < needed {
            return Err(PageError::InsufficientSpace);
        }

        let offset = header.free_space_offset;
        page.data[offset as usize..offset as usize + data.len()].copy_from_slice(data);

        let slot = Slot {
            offset,
            length: data.len() as u32,
        };
        let slot_no = header.slot_count;
        let slot_pos = Self::slot_position(slot_no);
        page.data[slot_pos..slot_pos + SLOT_SIZE].copy_from_slice(&slot.to_bytes());

        header.free_space_offset += data.len() as u32;
        header.slot_count += 1;
        self.set_header(page, &header);

        Ok(slot_no)
    }

    /// Read a live record. Marked or emptied slots report `RecordNotFound`.
    pub fn get_record(&self, page: &Page, slot_no: u32) -> Result<Vec<u8>, PageError> {
        let slot = self.slot(page, slot_no)?;
        if slot.is_empty() || slot.is_marked() {
            return Err(PageError::RecordNotFound);
        }
        Ok(self.record_bytes(page, slot))
    }

    /// Read a record's bytes whether or not it is marked for deletion. Used
    /// for before-images.
    pub fn get_record_raw(&self, page: &Page, slot_no: u32) -> Result<Vec<u8>, PageError> {
        let slot = self.slot(page, slot_no)?;
        if slot.is_empty() {
            return Err(PageError::RecordNotFound);
        }
        Ok(self.record_bytes(page, slot))
    }

    /// Tombstone a record. The bytes stay in place so the mark can be
    /// rolled back.
    pub fn mark_delete(&self, page: &mut Page, slot_no: u32) -> Result<(), PageError> {
        let mut slot = self.slot(page, slot_no)?;
        if slot.is_empty() {
            return Err(PageError::RecordNotFound);
        }
        if slot.is_marked() {
            return Err(PageError::AlreadyDeleted);
        }
        slot.length |= DELETE_MARK;
        self.write_slot(page, slot_no, slot);
        Ok(())
    }

    /// Clear a delete mark set by `mark_delete`.
    pub fn rollback_delete(&self, page: &mut Page, slot_no: u32) -> Result<(), PageError> {
        let mut slot = self.slot(page, slot_no)?;
        if slot.is_empty() {
            return Err(PageError::RecordNotFound);
        }
        if !slot.is_marked() {
            return Err(PageError::NotMarked);
        }
        slot.length &= !DELETE_MARK;
        self.write_slot(page, slot_no, slot);
        Ok(())
    }

    /// Physically remove a record. The slot stays allocated but empty; the
    /// bytes are reclaimed by compaction, not here.
    pub fn apply_delete(&self, page: &mut Page, slot_no: u32) -> Result<(), PageError> {
        let slot = self.slot(page, slot_no)?;
        if slot.is_empty() {
            return Err(PageError::RecordNotFound);
        }
        self.write_slot(page, slot_no, Slot { offset: 0, length: 0 });
        Ok(())
    }

    /// Replace a record's bytes in place, relocating within the page when
    /// the new image is larger.
    pub fn update_record(
        &self,
        page: &mut Page,
        slot_no: u32,
        data: &[u8],
    ) -> Result<(), PageError> {
        let mut slot = self.slot(page, slot_no)?;
        if slot.is_empty() || slot.is_marked() {
            return Err(PageError::RecordNotFound);
        }

        if data.len() <= slot.len() {
            let start = slot.offset as usize;
            page.data[start..start + data.len()].copy_from_slice(data);
            slot.length = data.len() as u32;
            self.write_slot(page, slot_no, slot);
            return Ok(());
        }

        let mut header = self.get_header(page);
        let slot_array_end = PAGE_SIZE - SLOT_SIZE * header.slot_count as usize;
        let available = slot_array_end.saturating_sub(header.free_space_offset as usize);
        if available < data.len() {
            return Err(PageError::InsufficientSpace);
        }

        let offset = header.free_space_offset;
        page.data[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        header.free_space_offset += data.len() as u32;
        self.set_header(page, &header);

        self.write_slot(
            page,
            slot_no,
            Slot {
                offset,
                length: data.len() as u32,
            },
        );
        Ok(())
    }

    pub fn slot_count(&self, page: &Page) -> u32 {
        self.get_header(page).slot_count
    }

    fn slot(&self, page: &Page, slot_no: u32) -> Result<Slot, PageError> {
        let header = self.get_header(page);
        if slot_no >= header.slot_count {
            return Err(PageError::InvalidSlot);
        }
        let pos = Self::slot_position(slot_no);
        Ok(Slot::from_bytes(&page.data[pos..pos + SLOT_SIZE]))
    }

    fn write_slot(&self, page: &mut Page, slot_no: u32, slot: Slot) {
        let pos = Self::slot_position(slot_no);
        page.data[pos..pos + SLOT_SIZE].copy_from_slice(&slot.to_bytes());
    }

    fn slot_position(slot_no: u32) -> usize {
        PAGE_SIZE - SLOT_SIZE * (slot_no as usize + 1)
    }

    fn record_bytes(&self, page: &Page, slot: Slot) -> Vec<u8> {
        let start = slot.offset as usize;
        page.data[start..start + slot.len()].to_vec()
    }
}
