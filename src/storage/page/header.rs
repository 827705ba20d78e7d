use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, PageType, Lsn, INVALID_PAGE_ID};
use crate::storage::page::layout::RECORD_HEADER_SIZE;

/// Header of a slotted record page.
///
/// Layout (24 bytes): page_type, lsn, prev_page_id, next_page_id,
/// slot_count, free_space_offset.
#[derive(Debug, Clone, Copy)]
pub struct RecordPageHeader {
    pub lsn: Lsn,
    pub prev_page_id: PageId,
    pub next_page_id: PageId,
    pub slot_count: u32,
    pub free_space_offset: u32,
}

impl Default for RecordPageHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordPageHeader {
    pub fn new() -> Self {
        Self {
            lsn: 0,
            prev_page_id: INVALID_PAGE_ID,
            next_page_id: INVALID_PAGE_ID,
            slot_count: 0,
            free_space_offset: RECORD_HEADER_SIZE as u32,
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut bytes = [0u8; RECORD_HEADER_SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], PageType::Record as u32);
        LittleEndian::write_u32(&mut bytes[4..8], self.lsn);
        LittleEndian::write_u32(&mut bytes[8..12], self.prev_page_id);
        LittleEndian::write_u32(&mut bytes[12..16], self.next_page_id);
        LittleEndian::write_u32(&mut bytes[16..20], self.slot_count);
        LittleEndian::write_u32(&mut bytes[20..24], self.free_space_offset);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            lsn: LittleEndian::read_u32(&bytes[4..8]),
            prev_page_id: LittleEndian::read_u32(&bytes[8..12]),
            next_page_id: LittleEndian::read_u32(&bytes[12..16]),
            slot_count: LittleEndian::read_u32(&bytes[16..20]),
            free_space_offset: LittleEndian::read_u32(&bytes[20..24]),
        }
    }
}
