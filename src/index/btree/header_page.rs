use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, PageType};

/// Root-tracking header page: a flat list of `(index_name, root_page_id)`
/// records so every named index can find its root after a restart.
///
/// Layout: page_type, lsn, record_count; then 36-byte records of a
/// NUL-padded 32-byte name followed by the root page id.
pub struct HeaderPage;

const OFFSET_RECORD_COUNT: usize = 8;
const RECORDS_START: usize = 12;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

pub const MAX_NAME_LEN: usize = NAME_SIZE;

impl HeaderPage {
    pub fn init(data: &mut [u8]) {
        LittleEndian::write_u32(&mut data[0..4], PageType::Header as u32);
        LittleEndian::write_u32(&mut data[4..8], 0);
        LittleEndian::write_u32(&mut data[OFFSET_RECORD_COUNT..], 0);
    }

    pub fn is_initialized(data: &[u8]) -> bool {
        PageType::from_u32(LittleEndian::read_u32(&data[0..4])) == PageType::Header
    }

    pub fn record_count(data: &[u8]) -> u32 {
        LittleEndian::read_u32(&data[OFFSET_RECORD_COUNT..])
    }

    /// Root page id recorded under `name`.
    pub fn get_record(data: &[u8], name: &str) -> Option<PageId> {
        let index = Self::find_record(data, name)?;
        let offset = Self::record_offset(index) + NAME_SIZE;
        Some(LittleEndian::read_u32(&data[offset..]))
    }

    /// Add a `(name, root_page_id)` record. Fails on a duplicate name or a
    /// full page.
    pub fn insert_record(data: &mut [u8], name: &str, root_page_id: PageId) -> bool {
        if name.len() > NAME_SIZE || Self::find_record(data, name).is_some() {
            return false;
        }
        let count = Self::record_count(data);
        let offset = Self::record_offset(count);
        if offset + RECORD_SIZE > data.len() {
            return false;
        }

        data[offset..offset + NAME_SIZE].fill(0);
        data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(&mut data[offset + NAME_SIZE..], root_page_id);
        LittleEndian::write_u32(&mut data[OFFSET_RECORD_COUNT..], count + 1);
        true
    }

    /// Overwrite the root page id recorded under `name`.
    pub fn update_record(data: &mut [u8], name: &str, root_page_id: PageId) -> bool {
        match Self::find_record(data, name) {
            Some(index) => {
                let offset = Self::record_offset(index) + NAME_SIZE;
                LittleEndian::write_u32(&mut data[offset..], root_page_id);
                true
            }
            None => false,
        }
    }

    fn record_offset(index: u32) -> usize {
        RECORDS_START + index as usize * RECORD_SIZE
    }

    fn find_record(data: &[u8], name: &str) -> Option<u32> {
        if name.len() > NAME_SIZE {
            return None;
        }
        let mut padded = [0u8; NAME_SIZE];
        padded[..name.len()].copy_from_slice(name.as_bytes());

        (0..Self::record_count(data)).find(|&i| {
            let offset = Self::record_offset(i);
            data[offset..offset + NAME_SIZE] == padded
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::PAGE_SIZE;

    #[test]
    fn test_insert_get_update() {
        let mut data = vec![0u8; PAGE_SIZE];
        HeaderPage::init(&mut data);

        assert_eq!(HeaderPage::get_record(&data, "orders_pk"), None);
        assert!(HeaderPage::insert_record(&mut data, "orders_pk", 7));
        assert!(HeaderPage::insert_record(&mut data, "users_pk", 9));
        assert_eq!(HeaderPage::get_record(&data, "orders_pk"), Some(7));
        assert_eq!(HeaderPage::get_record(&data, "users_pk"), Some(9));

        // Duplicate insert is rejected; update succeeds.
        assert!(!HeaderPage::insert_record(&mut data, "orders_pk", 8));
        assert!(HeaderPage::update_record(&mut data, "orders_pk", 8));
        assert_eq!(HeaderPage::get_record(&data, "orders_pk"), Some(8));

        assert!(!HeaderPage::update_record(&mut data, "missing", 1));
        assert_eq!(HeaderPage::record_count(&data), 2);
    }

    #[test]
    fn test_overlong_name_rejected() {
        let mut data = vec![0u8; PAGE_SIZE];
        HeaderPage::init(&mut data);
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(!HeaderPage::insert_record(&mut data, &long, 1));
    }
}
