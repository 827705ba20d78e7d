use std::marker::PhantomData;
use std::sync::Arc;
use parking_lot::RwLock;

use crate::common::types::{PageId, PagePtr, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::index::btree::error::{BTreeError, Result};
use crate::index::btree::header_page::{HeaderPage, MAX_NAME_LEN};
use crate::index::btree::internal::InternalPage;
use crate::index::btree::iterator::TreeIterator;
use crate::index::btree::layout::{self, PageCodec};
use crate::index::btree::leaf::LeafPage;

/// Disk-backed B+ tree index over fixed-width keys and values.
///
/// All page access goes through the buffer pool; every fetch is balanced by
/// exactly one unpin. The root page id is registered under the index name
/// on the header page and re-read on open, so an index survives restarts.
///
/// Structural operations serialize on the root latch; finer-grained
/// latching is not attempted.
pub struct BPlusTree<K, V> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: RwLock<PageId>,
    leaf_max_size: u32,
    internal_max_size: u32,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> BPlusTree<K, V>
where
    K: PageCodec + Ord + Clone,
    V: PageCodec + Clone,
{
    /// Open (or create) the index named `name`, with page capacities
    /// derived from the key and value widths.
    pub fn new(name: impl Into<String>, buffer_pool: Arc<BufferPoolManager>) -> Result<Self> {
        let leaf_max = LeafPage::<K, V>::default_max_size();
        let internal_max = InternalPage::<K>::default_max_size();
        Self::with_capacities(name, buffer_pool, leaf_max, internal_max)
    }

    /// Open (or create) the index with explicit node capacities. Small
    /// capacities force early splits, which tests rely on.
    pub fn with_capacities(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let index_name = name.into();
        if index_name.len() > MAX_NAME_LEN {
            return Err(BTreeError::NameTooLong(index_name));
        }

        let header_ptr = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id = {
            let mut page = header_ptr.write();
            if !HeaderPage::is_initialized(&page.data) {
                HeaderPage::init(&mut page.data);
            }
            HeaderPage::get_record(&page.data, &index_name).unwrap_or(INVALID_PAGE_ID)
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: RwLock::new(root_page_id),
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup.
    pub fn get_value(&self, key: &K) -> Result<Option<V>> {
        let root = *self.root_page_id.read();
        if root == INVALID_PAGE_ID {
            return Ok(None);
        }

        let (leaf_ptr, leaf_id) = self.find_leaf(root, key)?;
        let value = {
            let page = leaf_ptr.read();
            LeafPage::<K, V>::lookup(&page.data, key)
        };
        self.buffer_pool.unpin_page(leaf_id, false)?;
        Ok(value)
    }

    /// Insert a unique key. Returns false when the key already exists.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool> {
        let mut root_guard = self.root_page_id.write();

        if *root_guard == INVALID_PAGE_ID {
            self.start_new_tree(&mut root_guard, key, value)?;
            return Ok(true);
        }

        let (leaf_ptr, leaf_id) = self.find_leaf(*root_guard, key)?;
        let outcome = {
            let mut page = leaf_ptr.write();
            LeafPage::<K, V>::insert(&mut page.data, key, value).map(|new_size| {
                (
                    new_size > layout::max_size(&page.data),
                    layout::parent_page_id(&page.data),
                )
            })
        };

        let (overflow, parent_id) = match outcome {
            None => {
                self.buffer_pool.unpin_page(leaf_id, false)?;
                return Ok(false);
            }
            Some(state) => state,
        };

        if overflow {
            self.split_leaf(&mut root_guard, &leaf_ptr, leaf_id, parent_id)?;
        }
        self.buffer_pool.unpin_page(leaf_id, true)?;
        Ok(true)
    }

    /// Delete a key, rebalancing underfull nodes. Returns false when the
    /// key is absent.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let mut root_guard = self.root_page_id.write();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(false);
        }

        let (leaf_ptr, leaf_id) = self.find_leaf(*root_guard, key)?;
        let outcome = {
            let mut page = leaf_ptr.write();
            LeafPage::<K, V>::remove(&mut page.data, key)
                .map(|new_size| (new_size, layout::min_size(&page.data)))
        };

        let (new_size, min_size) = match outcome {
            None => {
                self.buffer_pool.unpin_page(leaf_id, false)?;
                return Ok(false);
            }
            Some(state) => state,
        };

        let is_root = leaf_id == *root_guard;
        let underflow = if is_root {
            new_size == 0
        } else {
            new_size < min_size
        };

        if underflow {
            self.coalesce_or_redistribute(&mut root_guard, leaf_ptr, leaf_id)?;
        } else {
            self.buffer_pool.unpin_page(leaf_id, true)?;
        }
        Ok(true)
    }

    /// Iterator over the whole tree in key order.
    pub fn iter(&self) -> Result<TreeIterator<K, V>> {
        let root = *self.root_page_id.read();
        if root == INVALID_PAGE_ID {
            return Ok(TreeIterator::end(self.buffer_pool.clone()));
        }

        let mut page_id = root;
        loop {
            let page_ptr = self.buffer_pool.fetch_page(page_id)?;
            let next = {
                let page = page_ptr.read();
                if layout::is_leaf(&page.data) {
                    None
                } else {
                    Some(InternalPage::<K>::child_at(&page.data, 0))
                }
            };
            self.buffer_pool.unpin_page(page_id, false)?;
            match next {
                None => return Ok(TreeIterator::new(self.buffer_pool.clone(), page_id, 0)),
                Some(child) => page_id = child,
            }
        }
    }

    /// Iterator positioned at the first key `>= key`.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K, V>> {
        let root = *self.root_page_id.read();
        if root == INVALID_PAGE_ID {
            return Ok(TreeIterator::end(self.buffer_pool.clone()));
        }

        let (leaf_ptr, leaf_id) = self.find_leaf(root, key)?;
        let index = {
            let page = leaf_ptr.read();
            LeafPage::<K, V>::key_index(&page.data, key)
        };
        self.buffer_pool.unpin_page(leaf_id, false)?;
        Ok(TreeIterator::new(self.buffer_pool.clone(), leaf_id, index))
    }

    /// Descend to the leaf that owns `key`. The returned page is pinned.
    fn find_leaf(&self, root: PageId, key: &K) -> Result<(PagePtr, PageId)> {
        let mut page_id = root;
        loop {
            let page_ptr = self.buffer_pool.fetch_page(page_id)?;
            let next = {
                let page = page_ptr.read();
                if layout::is_leaf(&page.data) {
                    None
                } else {
                    Some(InternalPage::<K>::lookup(&page.data, key))
                }
            };
            match next {
                None => return Ok((page_ptr, page_id)),
                Some(child) => {
                    self.buffer_pool.unpin_page(page_id, false)?;
                    page_id = child;
                }
            }
        }
    }

    fn start_new_tree(&self, root: &mut PageId, key: &K, value: &V) -> Result<()> {
        let (page_ptr, page_id) = self.buffer_pool.new_page()?;
        {
            let mut page = page_ptr.write();
            LeafPage::<K, V>::init(&mut page.data, page_id, INVALID_PAGE_ID, self.leaf_max_size);
            LeafPage::<K, V>::insert(&mut page.data, key, value);
        }
        *root = page_id;
        self.update_root_page_id(page_id, true)?;
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }

    /// Split an overflowing leaf and push the separator into the parent.
    fn split_leaf(
        &self,
        root: &mut PageId,
        leaf_ptr: &PagePtr,
        leaf_id: PageId,
        parent_id: PageId,
    ) -> Result<()> {
        let (sibling_ptr, sibling_id) = self.buffer_pool.new_page()?;
        let separator = {
            let mut leaf = leaf_ptr.write();
            let mut sibling = sibling_ptr.write();
            LeafPage::<K, V>::init(&mut sibling.data, sibling_id, parent_id, self.leaf_max_size);
            LeafPage::<K, V>::move_half_to(&mut leaf.data, &mut sibling.data)
        };

        self.insert_into_parent(root, leaf_id, separator, sibling_id, parent_id)?;
        self.buffer_pool.unpin_page(sibling_id, true)?;
        Ok(())
    }

    /// Register `(key, new_id)` in the parent of `old_id`, growing a new
    /// root or splitting the parent as needed.
    fn insert_into_parent(
        &self,
        root: &mut PageId,
        old_id: PageId,
        key: K,
        new_id: PageId,
        parent_id: PageId,
    ) -> Result<()> {
        if parent_id == INVALID_PAGE_ID {
            // The old node was the root: grow the tree by one level.
            let (root_ptr, new_root_id) = self.buffer_pool.new_page()?;
            {
                let mut page = root_ptr.write();
                InternalPage::<K>::init(
                    &mut page.data,
                    new_root_id,
                    INVALID_PAGE_ID,
                    self.internal_max_size,
                );
                InternalPage::<K>::populate_new_root(&mut page.data, old_id, &key, new_id);
            }
            self.buffer_pool.unpin_page(new_root_id, true)?;

            self.set_parent(old_id, new_root_id)?;
            self.set_parent(new_id, new_root_id)?;

            *root = new_root_id;
            self.update_root_page_id(new_root_id, false)?;
            return Ok(());
        }

        let parent_ptr = self.buffer_pool.fetch_page(parent_id)?;
        let (overflow, grandparent_id) = {
            let mut page = parent_ptr.write();
            let new_size =
                InternalPage::<K>::insert_node_after(&mut page.data, old_id, &key, new_id);
            (
                new_size > layout::max_size(&page.data),
                layout::parent_page_id(&page.data),
            )
        };

        if overflow {
            let (sibling_ptr, sibling_id) = self.buffer_pool.new_page()?;
            let (promoted, moved_children) = {
                let mut parent = parent_ptr.write();
                let mut sibling = sibling_ptr.write();
                InternalPage::<K>::init(
                    &mut sibling.data,
                    sibling_id,
                    grandparent_id,
                    self.internal_max_size,
                );
                InternalPage::<K>::move_half_to(&mut parent.data, &mut sibling.data)
            };
            for child in moved_children {
                self.set_parent(child, sibling_id)?;
            }

            self.insert_into_parent(root, parent_id, promoted, sibling_id, grandparent_id)?;
            self.buffer_pool.unpin_page(sibling_id, true)?;
        }

        self.buffer_pool.unpin_page(parent_id, true)?;
        Ok(())
    }

    /// Fix an underfull node: borrow from a sibling when one can spare an
    /// entry, otherwise merge right-into-left and recurse on the parent.
    /// Consumes the caller's pin on `node_ptr`.
    fn coalesce_or_redistribute(
        &self,
        root: &mut PageId,
        node_ptr: PagePtr,
        node_id: PageId,
    ) -> Result<()> {
        if node_id == *root {
            return self.adjust_root(root, node_ptr, node_id);
        }

        let (is_leaf, parent_id) = {
            let page = node_ptr.read();
            (
                layout::is_leaf(&page.data),
                layout::parent_page_id(&page.data),
            )
        };

        let parent_ptr = self.buffer_pool.fetch_page(parent_id)?;
        let (node_index, parent_size) = {
            let page = parent_ptr.read();
            (
                InternalPage::<K>::value_index(&page.data, node_id).unwrap_or(0),
                layout::size(&page.data),
            )
        };

        // Redistribution, preferring the left sibling.
        if node_index > 0 {
            let left_id = {
                let page = parent_ptr.read();
                InternalPage::<K>::child_at(&page.data, node_index - 1)
            };
            let left_ptr = self.buffer_pool.fetch_page(left_id)?;
            let can_spare = {
                let page = left_ptr.read();
                layout::size(&page.data) > layout::min_size(&page.data)
            };
            if can_spare {
                let moved_child = {
                    let mut left = left_ptr.write();
                    let mut node = node_ptr.write();
                    let mut parent = parent_ptr.write();
                    if is_leaf {
                        let separator = LeafPage::<K, V>::move_last_to_front_of(
                            &mut left.data,
                            &mut node.data,
                        );
                        InternalPage::<K>::set_key_at(&mut parent.data, node_index, &separator);
                        None
                    } else {
                        let old_separator =
                            InternalPage::<K>::key_at(&parent.data, node_index);
                        let (new_separator, moved) = InternalPage::<K>::move_last_to_front_of(
                            &mut left.data,
                            &mut node.data,
                            &old_separator,
                        );
                        InternalPage::<K>::set_key_at(&mut parent.data, node_index, &new_separator);
                        Some(moved)
                    }
                };
                if let Some(child) = moved_child {
                    self.set_parent(child, node_id)?;
                }
                self.buffer_pool.unpin_page(left_id, true)?;
                self.buffer_pool.unpin_page(node_id, true)?;
                self.buffer_pool.unpin_page(parent_id, true)?;
                return Ok(());
            }
            self.buffer_pool.unpin_page(left_id, false)?;
        }

        if node_index + 1 < parent_size {
            let right_id = {
                let page = parent_ptr.read();
                InternalPage::<K>::child_at(&page.data, node_index + 1)
            };
            let right_ptr = self.buffer_pool.fetch_page(right_id)?;
            let can_spare = {
                let page = right_ptr.read();
                layout::size(&page.data) > layout::min_size(&page.data)
            };
            if can_spare {
                let moved_child = {
                    let mut right = right_ptr.write();
                    let mut node = node_ptr.write();
                    let mut parent = parent_ptr.write();
                    if is_leaf {
                        let separator = LeafPage::<K, V>::move_first_to_end_of(
                            &mut right.data,
                            &mut node.data,
                        );
                        InternalPage::<K>::set_key_at(&mut parent.data, node_index + 1, &separator);
                        None
                    } else {
                        let old_separator =
                            InternalPage::<K>::key_at(&parent.data, node_index + 1);
                        let (new_separator, moved) = InternalPage::<K>::move_first_to_end_of(
                            &mut right.data,
                            &mut node.data,
                            &old_separator,
                        );
                        InternalPage::<K>::set_key_at(
                            &mut parent.data,
                            node_index + 1,
                            &new_separator,
                        );
                        Some(moved)
                    }
                };
                if let Some(child) = moved_child {
                    self.set_parent(child, node_id)?;
                }
                self.buffer_pool.unpin_page(right_id, true)?;
                self.buffer_pool.unpin_page(node_id, true)?;
                self.buffer_pool.unpin_page(parent_id, true)?;
                return Ok(());
            }
            self.buffer_pool.unpin_page(right_id, false)?;
        }

        // Coalesce right-into-left: merge the node into its left sibling,
        // or, for the leftmost child, the right sibling into the node.
        if node_index > 0 {
            let left_id = {
                let page = parent_ptr.read();
                InternalPage::<K>::child_at(&page.data, node_index - 1)
            };
            let left_ptr = self.buffer_pool.fetch_page(left_id)?;
            let moved_children = {
                let mut left = left_ptr.write();
                let mut node = node_ptr.write();
                let mut parent = parent_ptr.write();
                let moved = if is_leaf {
                    LeafPage::<K, V>::move_all_to(&mut node.data, &mut left.data);
                    Vec::new()
                } else {
                    let separator = InternalPage::<K>::key_at(&parent.data, node_index);
                    InternalPage::<K>::move_all_to(&mut node.data, &mut left.data, &separator)
                };
                InternalPage::<K>::remove_at(&mut parent.data, node_index);
                moved
            };
            for child in moved_children {
                self.set_parent(child, left_id)?;
            }
            self.buffer_pool.unpin_page(left_id, true)?;
            self.buffer_pool.unpin_page(node_id, true)?;
            self.buffer_pool.delete_page(node_id)?;
        } else {
            let right_id = {
                let page = parent_ptr.read();
                InternalPage::<K>::child_at(&page.data, node_index + 1)
            };
            let right_ptr = self.buffer_pool.fetch_page(right_id)?;
            let moved_children = {
                let mut node = node_ptr.write();
                let mut right = right_ptr.write();
                let mut parent = parent_ptr.write();
                let moved = if is_leaf {
                    LeafPage::<K, V>::move_all_to(&mut right.data, &mut node.data);
                    Vec::new()
                } else {
                    let separator = InternalPage::<K>::key_at(&parent.data, node_index + 1);
                    InternalPage::<K>::move_all_to(&mut right.data, &mut node.data, &separator)
                };
                InternalPage::<K>::remove_at(&mut parent.data, node_index + 1);
                moved
            };
            for child in moved_children {
                self.set_parent(child, node_id)?;
            }
            self.buffer_pool.unpin_page(node_id, true)?;
            self.buffer_pool.unpin_page(right_id, true)?;
            self.buffer_pool.delete_page(right_id)?;
        }

        // The parent lost a separator and may now underflow itself.
        let parent_size = {
            let page = parent_ptr.read();
            layout::size(&page.data)
        };
        let parent_underflow = if parent_id == *root {
            parent_size == 1
        } else {
            let page = parent_ptr.read();
            parent_size < layout::min_size(&page.data)
        };

        if parent_underflow {
            self.coalesce_or_redistribute(root, parent_ptr, parent_id)?;
        } else {
            self.buffer_pool.unpin_page(parent_id, true)?;
        }
        Ok(())
    }

    /// Shrink the tree at the root: an empty root leaf empties the tree; a
    /// root with a single child hands the root role to that child.
    /// Consumes the caller's pin on `node_ptr`.
    fn adjust_root(&self, root: &mut PageId, node_ptr: PagePtr, node_id: PageId) -> Result<()> {
        let (is_leaf, size, first_child) = {
            let page = node_ptr.read();
            let is_leaf = layout::is_leaf(&page.data);
            let size = layout::size(&page.data);
            let first_child = if is_leaf {
                INVALID_PAGE_ID
            } else {
                InternalPage::<K>::child_at(&page.data, 0)
            };
            (is_leaf, size, first_child)
        };

        if is_leaf {
            self.buffer_pool.unpin_page(node_id, true)?;
            if size == 0 {
                *root = INVALID_PAGE_ID;
                self.update_root_page_id(INVALID_PAGE_ID, false)?;
                self.buffer_pool.delete_page(node_id)?;
            }
            return Ok(());
        }

        if size == 1 {
            self.buffer_pool.unpin_page(node_id, true)?;
            self.set_parent(first_child, INVALID_PAGE_ID)?;
            *root = first_child;
            self.update_root_page_id(first_child, false)?;
            self.buffer_pool.delete_page(node_id)?;
        } else {
            self.buffer_pool.unpin_page(node_id, true)?;
        }
        Ok(())
    }

    fn set_parent(&self, page_id: PageId, parent_id: PageId) -> Result<()> {
        let page_ptr = self.buffer_pool.fetch_page(page_id)?;
        {
            let mut page = page_ptr.write();
            layout::set_parent_page_id(&mut page.data, parent_id);
        }
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }

    /// Record the current root under the index name on the header page.
    /// Called on every root change; `insert_record` registers a new index.
    fn update_root_page_id(&self, root: PageId, insert_record: bool) -> Result<()> {
        let header_ptr = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut page = header_ptr.write();
            if insert_record {
                if !HeaderPage::insert_record(&mut page.data, &self.index_name, root) {
                    HeaderPage::update_record(&mut page.data, &self.index_name, root);
                }
            } else if !HeaderPage::update_record(&mut page.data, &self.index_name, root) {
                HeaderPage::insert_record(&mut page.data, &self.index_name, root);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }
}
