use byteorder::{ByteOrder, LittleEndian};

/// Record page header size: page_type, lsn, prev/next page id, slot count,
/// free space offset at four bytes each.
pub const RECORD_HEADER_SIZE: usize = 24;

/// Slot entry size: 4 bytes offset + 4 bytes length.
pub const SLOT_SIZE: usize = 8;

/// High bit of the slot length marks a tuple as deleted (tombstone) without
/// removing its bytes, so the deletion can still be rolled back.
pub const DELETE_MARK: u32 = 1 << 31;

/// A slot array entry. Record bytes grow downward from the header; the slot
/// array grows upward from the page end. `offset == 0` means the slot has
/// been physically emptied.
#[derive(Debug, Clone, Copy)]
pub struct Slot {
    pub offset: u32,
    pub length: u32,
}

impl Slot {
    pub fn to_bytes(self) -> [u8; SLOT_SIZE] {
        let mut bytes = [0u8; SLOT_SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], self.offset);
        LittleEndian::write_u32(&mut bytes[4..8], self.length);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            offset: LittleEndian::read_u32(&bytes[0..4]),
            length: LittleEndian::read_u32(&bytes[4..8]),
        }
    }

    pub fn is_marked(self) -> bool {
        self.length & DELETE_MARK != 0
    }

    pub fn is_empty(self) -> bool {
        self.offset == 0
    }

    pub fn len(self) -> usize {
        (self.length & !DELETE_MARK) as usize
    }
}
