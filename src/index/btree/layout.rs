use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, PageId, PageType, Rid};

/// Common header shared by leaf and internal pages (24 bytes):
/// page_type, lsn, size, max_size, parent_page_id, page_id.
pub const BTREE_HEADER_SIZE: usize = 24;

/// Leaf pages additionally store `next_page_id` right after the header.
pub const LEAF_HEADER_SIZE: usize = BTREE_HEADER_SIZE + 4;

const OFFSET_PAGE_TYPE: usize = 0;
const OFFSET_LSN: usize = 4;
const OFFSET_SIZE: usize = 8;
const OFFSET_MAX_SIZE: usize = 12;
const OFFSET_PARENT: usize = 16;
const OFFSET_PAGE_ID: usize = 20;
const OFFSET_NEXT_PAGE_ID: usize = 24;

/// Fixed-width byte codec for keys and values stored in index pages.
///
/// Entries are packed contiguously after the page header, so every encoded
/// key and value occupies exactly `SIZE` bytes.
pub trait PageCodec: Sized {
    const SIZE: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

impl PageCodec for u32 {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl PageCodec for u64 {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

impl PageCodec for i64 {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl PageCodec for Rid {
    const SIZE: usize = Rid::ENCODED_SIZE;

    fn encode(&self, buf: &mut [u8]) {
        buf[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Rid::from_le_bytes(buf)
    }
}

// Header accessors over raw page bytes.

pub fn page_type(data: &[u8]) -> PageType {
    PageType::from_u32(LittleEndian::read_u32(&data[OFFSET_PAGE_TYPE..]))
}

pub fn set_page_type(data: &mut [u8], page_type: PageType) {
    LittleEndian::write_u32(&mut data[OFFSET_PAGE_TYPE..], page_type as u32);
}

pub fn is_leaf(data: &[u8]) -> bool {
    page_type(data) == PageType::BTreeLeaf
}

pub fn lsn(data: &[u8]) -> Lsn {
    LittleEndian::read_u32(&data[OFFSET_LSN..])
}

pub fn set_lsn(data: &mut [u8], lsn: Lsn) {
    LittleEndian::write_u32(&mut data[OFFSET_LSN..], lsn);
}

pub fn size(data: &[u8]) -> u32 {
    LittleEndian::read_u32(&data[OFFSET_SIZE..])
}

pub fn set_size(data: &mut [u8], size: u32) {
    LittleEndian::write_u32(&mut data[OFFSET_SIZE..], size);
}

pub fn max_size(data: &[u8]) -> u32 {
    LittleEndian::read_u32(&data[OFFSET_MAX_SIZE..])
}

pub fn set_max_size(data: &mut [u8], max_size: u32) {
    LittleEndian::write_u32(&mut data[OFFSET_MAX_SIZE..], max_size);
}

/// Underflow threshold: a non-root node must hold at least
/// `ceil(max_size / 2)` entries.
pub fn min_size(data: &[u8]) -> u32 {
    max_size(data).div_ceil(2)
}

pub fn parent_page_id(data: &[u8]) -> PageId {
    LittleEndian::read_u32(&data[OFFSET_PARENT..])
}

pub fn set_parent_page_id(data: &mut [u8], parent: PageId) {
    LittleEndian::write_u32(&mut data[OFFSET_PARENT..], parent);
}

pub fn page_id(data: &[u8]) -> PageId {
    LittleEndian::read_u32(&data[OFFSET_PAGE_ID..])
}

pub fn set_page_id(data: &mut [u8], page_id: PageId) {
    LittleEndian::write_u32(&mut data[OFFSET_PAGE_ID..], page_id);
}

pub fn next_page_id(data: &[u8]) -> PageId {
    LittleEndian::read_u32(&data[OFFSET_NEXT_PAGE_ID..])
}

pub fn set_next_page_id(data: &mut [u8], next: PageId) {
    LittleEndian::write_u32(&mut data[OFFSET_NEXT_PAGE_ID..], next);
}
