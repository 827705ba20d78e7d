use std::marker::PhantomData;
use std::sync::Arc;

use crate::common::types::{PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::index::btree::layout::{self, PageCodec};
use crate::index::btree::leaf::LeafPage;

/// Forward iterator over the leaf chain.
///
/// The current leaf is fetched once and stays pinned while its entries are
/// served; the pin is released only when the iterator advances to
/// `next_page_id` (or is dropped), so every traversed leaf is unpinned
/// exactly once per fetch. The iterator ends when a leaf is exhausted and
/// its `next_page_id` is invalid.
pub struct TreeIterator<K, V> {
    buffer_pool: Arc<BufferPoolManager>,
    current_page_id: PageId,
    /// The pinned current leaf; `None` between leaves and at the end.
    current_leaf: Option<PagePtr>,
    index: u32,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> TreeIterator<K, V> {
    pub(crate) fn new(buffer_pool: Arc<BufferPoolManager>, page_id: PageId, index: u32) -> Self {
        Self {
            buffer_pool,
            current_page_id: page_id,
            current_leaf: None,
            index,
            _marker: PhantomData,
        }
    }

    pub(crate) fn end(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self::new(buffer_pool, INVALID_PAGE_ID, 0)
    }

    pub fn is_end(&self) -> bool {
        self.current_page_id == INVALID_PAGE_ID
    }

    /// Unpin the held leaf, if any.
    fn release_current(&mut self) {
        if self.current_leaf.take().is_some() {
            let _ = self.buffer_pool.unpin_page(self.current_page_id, false);
        }
    }
}

impl<K, V> Iterator for TreeIterator<K, V>
where
    K: PageCodec + Ord + Clone,
    V: PageCodec + Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            if self.current_page_id == INVALID_PAGE_ID {
                return None;
            }

            // Pin the leaf on first touch; it stays pinned until the
            // iterator moves past it.
            let page_ptr = match &self.current_leaf {
                Some(page_ptr) => page_ptr.clone(),
                None => match self.buffer_pool.fetch_page(self.current_page_id) {
                    Ok(page_ptr) => {
                        self.current_leaf = Some(page_ptr.clone());
                        page_ptr
                    }
                    Err(_) => {
                        self.current_page_id = INVALID_PAGE_ID;
                        return None;
                    }
                },
            };

            let (entry, next_page_id) = {
                let page = page_ptr.read();
                let size = layout::size(&page.data);
                let entry = if self.index < size {
                    Some((
                        LeafPage::<K, V>::key_at(&page.data, self.index),
                        LeafPage::<K, V>::value_at(&page.data, self.index),
                    ))
                } else {
                    None
                };
                (entry, layout::next_page_id(&page.data))
            };

            match entry {
                Some(entry) => {
                    self.index += 1;
                    return Some(entry);
                }
                None => {
                    // Exhausted leaf (or positioned past the last key):
                    // drop its pin and advance along the chain.
                    self.release_current();
                    self.current_page_id = next_page_id;
                    self.index = 0;
                }
            }
        }
    }
}

impl<K, V> Drop for TreeIterator<K, V> {
    fn drop(&mut self) {
        self.release_current();
    }
}
