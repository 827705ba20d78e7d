use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Sentinel for "no page". Page ids are allocated starting from 1.
pub const INVALID_PAGE_ID: PageId = 0;

/// The root-tracking header page is the first page of every database file.
pub const HEADER_PAGE_ID: PageId = 1;

/// Transaction ID type
pub type TxnId = u32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// LSN (Log Sequence Number) type
pub type Lsn = u32;

/// Sentinel for "no log record". LSNs are assigned starting from 1.
pub const INVALID_LSN: Lsn = 0;

/// Record ID: identifies a tuple by its page and slot number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    /// Size of a RID on the wire (page id + slot, both little-endian u32).
    pub const ENCODED_SIZE: usize = 8;

    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn to_le_bytes(self) -> [u8; Self::ENCODED_SIZE] {
        let mut buf = [0u8; Self::ENCODED_SIZE];
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
        buf
    }

    pub fn from_le_bytes(buf: &[u8]) -> Self {
        Self {
            page_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// Byte offset of the on-page LSN. Every typed page layout stores its type
/// word at byte 0 and its LSN at byte 4, so the buffer pool can mirror the
/// persistent LSN into `Page::lsn` without knowing the page kind.
pub const PAGE_LSN_OFFSET: usize = 4;

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: INVALID_LSN,
        }
    }

    /// Read the LSN stored in the page bytes.
    pub fn lsn_in_data(&self) -> Lsn {
        Lsn::from_le_bytes([
            self.data[PAGE_LSN_OFFSET],
            self.data[PAGE_LSN_OFFSET + 1],
            self.data[PAGE_LSN_OFFSET + 2],
            self.data[PAGE_LSN_OFFSET + 3],
        ])
    }

    /// Stamp the page with a new LSN, both in the metadata and in the bytes
    /// that reach disk.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.lsn = lsn;
        self.data[PAGE_LSN_OFFSET..PAGE_LSN_OFFSET + 4].copy_from_slice(&lsn.to_le_bytes());
    }
}

/// Smart pointer to a page
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame structure
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

/// Smart pointer to a frame
pub type FramePtr = Arc<RwLock<Frame>>;

/// On-page type tags. Bytes 0..4 of every initialized page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PageType {
    Invalid = 0,
    BTreeLeaf = 1,
    BTreeInternal = 2,
    Record = 3,
    Header = 4,
}

impl PageType {
    pub fn from_u32(raw: u32) -> Self {
        match raw {
            1 => PageType::BTreeLeaf,
            2 => PageType::BTreeInternal,
            3 => PageType::Record,
            4 => PageType::Header,
            _ => PageType::Invalid,
        }
    }
}
