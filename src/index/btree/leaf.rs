use std::marker::PhantomData;

use crate::common::types::{PageId, PageType, PAGE_SIZE, INVALID_PAGE_ID};
use crate::index::btree::layout::{self, PageCodec, LEAF_HEADER_SIZE};

/// Byte-level operations on a leaf page.
///
/// Layout: the common header plus `next_page_id`, then `size` entries of
/// `K::SIZE + V::SIZE` bytes packed from `LEAF_HEADER_SIZE`. Keys are kept
/// sorted and unique.
pub struct LeafPage<K, V> {
    _marker: PhantomData<(K, V)>,
}

impl<K, V> LeafPage<K, V>
where
    K: PageCodec + Ord + Clone,
    V: PageCodec + Clone,
{
    pub fn entry_size() -> usize {
        K::SIZE + V::SIZE
    }

    /// Entries a page can physically hold.
    pub fn capacity() -> u32 {
        ((PAGE_SIZE - LEAF_HEADER_SIZE) / Self::entry_size()) as u32
    }

    /// Default `max_size`: one below capacity, so a split is triggered by
    /// `size > max_size` while the overflowing entry still fits in bytes.
    pub fn default_max_size() -> u32 {
        Self::capacity() - 1
    }

    pub fn init(data: &mut [u8], page_id: PageId, parent_id: PageId, max_size: u32) {
        layout::set_page_type(data, PageType::BTreeLeaf);
        layout::set_lsn(data, 0);
        layout::set_size(data, 0);
        layout::set_max_size(data, max_size);
        layout::set_parent_page_id(data, parent_id);
        layout::set_page_id(data, page_id);
        layout::set_next_page_id(data, INVALID_PAGE_ID);
    }

    fn entry_offset(index: u32) -> usize {
        LEAF_HEADER_SIZE + index as usize * Self::entry_size()
    }

    pub fn key_at(data: &[u8], index: u32) -> K {
        K::decode(&data[Self::entry_offset(index)..])
    }

    pub fn value_at(data: &[u8], index: u32) -> V {
        V::decode(&data[Self::entry_offset(index) + K::SIZE..])
    }

    fn write_entry(data: &mut [u8], index: u32, key: &K, value: &V) {
        let offset = Self::entry_offset(index);
        key.encode(&mut data[offset..]);
        value.encode(&mut data[offset + K::SIZE..]);
    }

    fn copy_entry(data: &mut [u8], from: u32, to: u32) {
        let src = Self::entry_offset(from);
        let dst = Self::entry_offset(to);
        data.copy_within(src..src + Self::entry_size(), dst);
    }

    /// First index whose key is `>= key`; `size` when every key is smaller.
    pub fn key_index(data: &[u8], key: &K) -> u32 {
        let size = layout::size(data);
        let mut lo = 0;
        let mut hi = size;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if Self::key_at(data, mid) < *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Exact-match lookup.
    pub fn lookup(data: &[u8], key: &K) -> Option<V> {
        let index = Self::key_index(data, key);
        if index < layout::size(data) && Self::key_at(data, index) == *key {
            Some(Self::value_at(data, index))
        } else {
            None
        }
    }

    /// Insert keeping entries sorted. Returns the new size, or `None` when
    /// the key already exists.
    pub fn insert(data: &mut [u8], key: &K, value: &V) -> Option<u32> {
        let size = layout::size(data);
        let index = Self::key_index(data, key);
        if index < size && Self::key_at(data, index) == *key {
            return None;
        }

        let mut i = size;
        while i > index {
            Self::copy_entry(data, i - 1, i);
            i -= 1;
        }
        Self::write_entry(data, index, key, value);
        layout::set_size(data, size + 1);
        Some(size + 1)
    }

    /// Remove a key, compacting the array. Returns the new size, or `None`
    /// when the key is absent.
    pub fn remove(data: &mut [u8], key: &K) -> Option<u32> {
        let size = layout::size(data);
        let index = Self::key_index(data, key);
        if index >= size || Self::key_at(data, index) != *key {
            return None;
        }

        for i in index..size - 1 {
            Self::copy_entry(data, i + 1, i);
        }
        layout::set_size(data, size - 1);
        Some(size - 1)
    }

    /// Split: move the upper half of `data`'s entries to the fresh page
    /// `recipient` and link it into the leaf chain. The separator to push
    /// up is the recipient's first key.
    pub fn move_half_to(data: &mut [u8], recipient: &mut [u8]) -> K {
        let size = layout::size(data);
        let keep = size / 2;
        let moved = size - keep;

        let src = Self::entry_offset(keep);
        let end = Self::entry_offset(size);
        recipient[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + (end - src)]
            .copy_from_slice(&data[src..end]);

        layout::set_size(data, keep);
        layout::set_size(recipient, moved);
        layout::set_next_page_id(recipient, layout::next_page_id(data));
        layout::set_next_page_id(data, layout::page_id(recipient));

        Self::key_at(recipient, 0)
    }

    /// Merge: append all of `data`'s entries to `recipient` (its left
    /// sibling) and unlink `data` from the chain.
    pub fn move_all_to(data: &mut [u8], recipient: &mut [u8]) {
        let size = layout::size(data);
        let recipient_size = layout::size(recipient);

        let src = Self::entry_offset(0);
        let end = Self::entry_offset(size);
        let dst = Self::entry_offset(recipient_size);
        recipient[dst..dst + (end - src)].copy_from_slice(&data[src..end]);

        layout::set_size(recipient, recipient_size + size);
        layout::set_size(data, 0);
        layout::set_next_page_id(recipient, layout::next_page_id(data));
    }

    /// Redistribution from the right sibling: move `data`'s first entry to
    /// the end of `recipient`. Returns `data`'s new first key (the parent's
    /// fresh separator).
    pub fn move_first_to_end_of(data: &mut [u8], recipient: &mut [u8]) -> K {
        let size = layout::size(data);
        let recipient_size = layout::size(recipient);

        let key = Self::key_at(data, 0);
        let value = Self::value_at(data, 0);
        Self::write_entry(recipient, recipient_size, &key, &value);
        layout::set_size(recipient, recipient_size + 1);

        for i in 0..size - 1 {
            Self::copy_entry(data, i + 1, i);
        }
        layout::set_size(data, size - 1);

        Self::key_at(data, 0)
    }

    /// Redistribution from the left sibling: move `data`'s last entry to
    /// the front of `recipient`. Returns the moved key (the parent's fresh
    /// separator for `recipient`).
    pub fn move_last_to_front_of(data: &mut [u8], recipient: &mut [u8]) -> K {
        let size = layout::size(data);
        let recipient_size = layout::size(recipient);

        let key = Self::key_at(data, size - 1);
        let value = Self::value_at(data, size - 1);

        let mut i = recipient_size;
        while i > 0 {
            Self::copy_entry(recipient, i - 1, i);
            i -= 1;
        }
        Self::write_entry(recipient, 0, &key, &value);
        layout::set_size(recipient, recipient_size + 1);
        layout::set_size(data, size - 1);

        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Rid;

    type Leaf = LeafPage<u64, Rid>;

    fn fresh(page_id: PageId) -> Vec<u8> {
        let mut data = vec![0u8; PAGE_SIZE];
        Leaf::init(&mut data, page_id, INVALID_PAGE_ID, 6);
        data
    }

    #[test]
    fn test_sorted_insert_and_lookup() {
        let mut data = fresh(2);

        assert_eq!(Leaf::insert(&mut data, &30, &Rid::new(1, 30)), Some(1));
        assert_eq!(Leaf::insert(&mut data, &10, &Rid::new(1, 10)), Some(2));
        assert_eq!(Leaf::insert(&mut data, &20, &Rid::new(1, 20)), Some(3));
        // Duplicate key is rejected.
        assert_eq!(Leaf::insert(&mut data, &20, &Rid::new(9, 9)), None);

        assert_eq!(Leaf::key_at(&data, 0), 10);
        assert_eq!(Leaf::key_at(&data, 1), 20);
        assert_eq!(Leaf::key_at(&data, 2), 30);
        assert_eq!(Leaf::lookup(&data, &20), Some(Rid::new(1, 20)));
        assert_eq!(Leaf::lookup(&data, &25), None);
    }

    #[test]
    fn test_remove_compacts() {
        let mut data = fresh(2);
        for k in [1u64, 2, 3, 4] {
            Leaf::insert(&mut data, &k, &Rid::new(1, k as u32));
        }

        assert_eq!(Leaf::remove(&mut data, &2), Some(3));
        assert_eq!(Leaf::remove(&mut data, &2), None);
        assert_eq!(Leaf::key_at(&data, 0), 1);
        assert_eq!(Leaf::key_at(&data, 1), 3);
        assert_eq!(Leaf::key_at(&data, 2), 4);
    }

    #[test]
    fn test_move_half_links_chain() {
        let mut left = fresh(2);
        let mut right = fresh(3);
        layout::set_next_page_id(&mut left, 9);

        for k in 1u64..=5 {
            Leaf::insert(&mut left, &k, &Rid::new(1, k as u32));
        }

        let separator = Leaf::move_half_to(&mut left, &mut right);
        assert_eq!(separator, 3);
        assert_eq!(layout::size(&left), 2);
        assert_eq!(layout::size(&right), 3);
        assert_eq!(layout::next_page_id(&left), 3);
        assert_eq!(layout::next_page_id(&right), 9);
        assert_eq!(Leaf::key_at(&right, 0), 3);
        assert_eq!(Leaf::key_at(&right, 2), 5);
    }

    #[test]
    fn test_redistribution_moves() {
        let mut left = fresh(2);
        let mut right = fresh(3);
        for k in [1u64, 2, 3] {
            Leaf::insert(&mut left, &k, &Rid::new(1, k as u32));
        }
        for k in [10u64, 11] {
            Leaf::insert(&mut right, &k, &Rid::new(1, k as u32));
        }

        // Left lends its last to right.
        let sep = Leaf::move_last_to_front_of(&mut left, &mut right);
        assert_eq!(sep, 3);
        assert_eq!(layout::size(&left), 2);
        assert_eq!(Leaf::key_at(&right, 0), 3);

        // Right lends its first back.
        let sep = Leaf::move_first_to_end_of(&mut right, &mut left);
        assert_eq!(sep, 10);
        assert_eq!(Leaf::key_at(&left, 2), 3);
        assert_eq!(layout::size(&right), 2);
    }

    #[test]
    fn test_merge_concatenates() {
        let mut left = fresh(2);
        let mut right = fresh(3);
        layout::set_next_page_id(&mut left, 3);
        layout::set_next_page_id(&mut right, 7);

        for k in [1u64, 2] {
            Leaf::insert(&mut left, &k, &Rid::new(1, k as u32));
        }
        for k in [5u64, 6] {
            Leaf::insert(&mut right, &k, &Rid::new(1, k as u32));
        }

        Leaf::move_all_to(&mut right, &mut left);
        assert_eq!(layout::size(&left), 4);
        assert_eq!(layout::size(&right), 0);
        assert_eq!(layout::next_page_id(&left), 7);
        assert_eq!(Leaf::key_at(&left, 3), 6);
    }
}
