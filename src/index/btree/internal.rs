use std::marker::PhantomData;

use crate::common::types::{PageId, PageType, PAGE_SIZE};
use crate::index::btree::layout::{self, PageCodec, BTREE_HEADER_SIZE};

/// Byte-level operations on an internal page.
///
/// Entries of `K::SIZE + 4` bytes pack from the common header: entry `i`
/// holds `(key_i, child_i)` where `size` counts entries and `key_0` is
/// invalid and never consulted. For `i >= 1`, keys in `child_{i-1}`'s
/// subtree are `< key_i` and keys in `child_i`'s subtree are `>= key_i`.
pub struct InternalPage<K> {
    _marker: PhantomData<K>,
}

impl<K> InternalPage<K>
where
    K: PageCodec + Ord + Clone,
{
    pub fn entry_size() -> usize {
        K::SIZE + 4
    }

    pub fn capacity() -> u32 {
        ((PAGE_SIZE - BTREE_HEADER_SIZE) / Self::entry_size()) as u32
    }

    /// Default `max_size`: below capacity and forced even.
    pub fn default_max_size() -> u32 {
        (Self::capacity() - 1) & !1
    }

    pub fn init(data: &mut [u8], page_id: PageId, parent_id: PageId, max_size: u32) {
        layout::set_page_type(data, PageType::BTreeInternal);
        layout::set_lsn(data, 0);
        layout::set_size(data, 0);
        layout::set_max_size(data, max_size);
        layout::set_parent_page_id(data, parent_id);
        layout::set_page_id(data, page_id);
    }

    fn entry_offset(index: u32) -> usize {
        BTREE_HEADER_SIZE + index as usize * Self::entry_size()
    }

    pub fn key_at(data: &[u8], index: u32) -> K {
        K::decode(&data[Self::entry_offset(index)..])
    }

    pub fn set_key_at(data: &mut [u8], index: u32, key: &K) {
        key.encode(&mut data[Self::entry_offset(index)..]);
    }

    pub fn child_at(data: &[u8], index: u32) -> PageId {
        PageId::decode(&data[Self::entry_offset(index) + K::SIZE..])
    }

    pub fn set_child_at(data: &mut [u8], index: u32, child: PageId) {
        child.encode(&mut data[Self::entry_offset(index) + K::SIZE..]);
    }

    fn copy_entry(data: &mut [u8], from: u32, to: u32) {
        let src = Self::entry_offset(from);
        let dst = Self::entry_offset(to);
        data.copy_within(src..src + Self::entry_size(), dst);
    }

    /// Index of the entry whose child is `page_id`.
    pub fn value_index(data: &[u8], page_id: PageId) -> Option<u32> {
        (0..layout::size(data)).find(|&i| Self::child_at(data, i) == page_id)
    }

    /// Child to descend into for `key`: the child left of the first
    /// separator greater than `key`.
    pub fn lookup(data: &[u8], key: &K) -> PageId {
        let size = layout::size(data);
        let mut lo = 1;
        let mut hi = size;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if Self::key_at(data, mid) <= *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Self::child_at(data, lo - 1)
    }

    pub fn children(data: &[u8]) -> Vec<PageId> {
        (0..layout::size(data))
            .map(|i| Self::child_at(data, i))
            .collect()
    }

    /// Fill a fresh root after the old root split.
    pub fn populate_new_root(data: &mut [u8], left: PageId, key: &K, right: PageId) {
        Self::set_child_at(data, 0, left);
        Self::set_key_at(data, 1, key);
        Self::set_child_at(data, 1, right);
        layout::set_size(data, 2);
    }

    /// Insert `(key, new_child)` immediately after the entry whose child is
    /// `old_child`. Returns the new size.
    pub fn insert_node_after(
        data: &mut [u8],
        old_child: PageId,
        key: &K,
        new_child: PageId,
    ) -> u32 {
        let size = layout::size(data);
        let old_index = match Self::value_index(data, old_child) {
            Some(index) => index,
            None => size.saturating_sub(1),
        };

        let mut i = size;
        while i > old_index + 1 {
            Self::copy_entry(data, i - 1, i);
            i -= 1;
        }
        Self::set_key_at(data, old_index + 1, key);
        Self::set_child_at(data, old_index + 1, new_child);
        layout::set_size(data, size + 1);
        size + 1
    }

    /// Remove the entry at `index`, compacting the array.
    pub fn remove_at(data: &mut [u8], index: u32) {
        let size = layout::size(data);
        for i in index..size - 1 {
            Self::copy_entry(data, i + 1, i);
        }
        layout::set_size(data, size - 1);
    }

    /// Split: keep the lower half here, promote the middle key, and move
    /// the upper half into the fresh page `recipient` (whose entry 0
    /// inherits the promoted key's child). Returns the promoted key and the
    /// page ids of the moved children, which the caller must reparent.
    pub fn move_half_to(data: &mut [u8], recipient: &mut [u8]) -> (K, Vec<PageId>) {
        let size = layout::size(data);
        let keep = size / 2;
        let promoted = Self::key_at(data, keep);

        let src = Self::entry_offset(keep);
        let end = Self::entry_offset(size);
        let dst = Self::entry_offset(0);
        recipient[dst..dst + (end - src)].copy_from_slice(&data[src..end]);

        layout::set_size(recipient, size - keep);
        layout::set_size(data, keep);

        (promoted, Self::children(recipient))
    }

    /// Merge: append all entries to `recipient` (the left sibling), pulling
    /// the parent's separator down as the key over this page's first child.
    /// Returns the moved children.
    pub fn move_all_to(data: &mut [u8], recipient: &mut [u8], separator: &K) -> Vec<PageId> {
        let size = layout::size(data);
        let recipient_size = layout::size(recipient);
        let moved = Self::children(data);

        for i in 0..size {
            let key = if i == 0 {
                separator.clone()
            } else {
                Self::key_at(data, i)
            };
            Self::set_key_at(recipient, recipient_size + i, &key);
            Self::set_child_at(recipient, recipient_size + i, Self::child_at(data, i));
        }
        layout::set_size(recipient, recipient_size + size);
        layout::set_size(data, 0);

        moved
    }

    /// Redistribution from the right sibling: this page's first child moves
    /// to the end of `recipient` under the parent's separator. Returns the
    /// fresh separator and the moved child.
    pub fn move_first_to_end_of(
        data: &mut [u8],
        recipient: &mut [u8],
        separator: &K,
    ) -> (K, PageId) {
        let recipient_size = layout::size(recipient);
        let moved_child = Self::child_at(data, 0);

        Self::set_key_at(recipient, recipient_size, separator);
        Self::set_child_at(recipient, recipient_size, moved_child);
        layout::set_size(recipient, recipient_size + 1);

        let new_separator = Self::key_at(data, 1);
        Self::remove_at(data, 0);

        (new_separator, moved_child)
    }

    /// Redistribution from the left sibling: this page's last child moves
    /// to the front of `recipient`; the parent's separator drops onto
    /// `recipient`'s previously-first child. Returns the fresh separator
    /// and the moved child.
    pub fn move_last_to_front_of(
        data: &mut [u8],
        recipient: &mut [u8],
        separator: &K,
    ) -> (K, PageId) {
        let size = layout::size(data);
        let recipient_size = layout::size(recipient);

        let moved_child = Self::child_at(data, size - 1);
        let new_separator = Self::key_at(data, size - 1);

        let mut i = recipient_size;
        while i > 0 {
            Self::copy_entry(recipient, i - 1, i);
            i -= 1;
        }
        Self::set_child_at(recipient, 0, moved_child);
        Self::set_key_at(recipient, 1, separator);
        layout::set_size(recipient, recipient_size + 1);
        layout::set_size(data, size - 1);

        (new_separator, moved_child)
    }
}
