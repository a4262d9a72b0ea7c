use std::collections::VecDeque;

use log::trace;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::storage::buffer::WritePageGuard;
use crate::storage::page::btree_page::{self, BTreePageType};
use crate::storage::page::key::GenericKey;
use crate::storage::page::{HeaderPage, InternalPage, LeafPage};

use super::base::{can_redistribute, BPlusTree};

/// Split state passed up the write set: the separator key and page id of the
/// sibling the child just created.
struct SplitContext<const W: usize> {
    new_key: GenericKey<W>,
    new_page_id: PageId,
    root_page_id: PageId,
}

impl<const W: usize> BPlusTree<W> {
    /// Insert a key/value pair. Returns `false` if the key already exists;
    /// the first insert wins.
    ///
    /// Fast path: read-latched descent, write latch only on the leaf. When
    /// the leaf has no room, redescend pessimistically and split.
    pub fn insert(&self, key: &GenericKey<W>, rid: Rid) -> Result<bool, BTreeError> {
        let mut guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let (mut next_page_id, mut depth) = {
            let header = HeaderPage::new(&*guard);
            (header.root_page_id(), header.tree_depth())
        };
        while depth > 1 {
            guard = self.bpm.fetch_page_read(next_page_id)?;
            next_page_id = InternalPage::<_, W>::new(&*guard).child_for(key);
            depth -= 1;
        }
        let mut leaf_guard = self.bpm.fetch_page_write(next_page_id)?;
        drop(guard);

        {
            let leaf = LeafPage::<_, W>::new(&*leaf_guard);
            if leaf.contains(key) {
                return Ok(false);
            }
        }
        {
            let mut leaf = LeafPage::<_, W>::new(&mut *leaf_guard);
            if leaf.size() + 1 < leaf.max_size() {
                leaf.insert(key, rid);
                return Ok(true);
            }
        }

        drop(leaf_guard);
        self.split_insert(key, rid)
    }

    /// Pessimistic insert path: write-latch from the header down, keeping
    /// only the ancestors that might split, then walk the write set leaf to
    /// root splitting as needed.
    fn split_insert(&self, key: &GenericKey<W>, rid: Rid) -> Result<bool, BTreeError> {
        let mut write_set: VecDeque<WritePageGuard<'_>> = VecDeque::new();
        write_set.push_front(self.bpm.fetch_page_write(self.header_page_id)?);
        let root_page_id = {
            let front = write_set.front().expect("header guard");
            HeaderPage::new(&**front).root_page_id()
        };
        write_set.push_front(self.bpm.fetch_page_write(root_page_id)?);

        loop {
            let (is_full, child) = {
                let front = write_set.front().expect("descent guard");
                if btree_page::page_type(&**front) == BTreePageType::Leaf {
                    break;
                }
                let page = InternalPage::<_, W>::new(&**front);
                (page.is_full(), page.child_for(key))
            };
            if !is_full {
                // Safe ancestor: everything above it cannot be touched.
                write_set.truncate(1);
            }
            write_set.push_front(self.bpm.fetch_page_write(child)?);
        }

        {
            let front = write_set.front().expect("leaf guard");
            let leaf = LeafPage::<_, W>::new(&**front);
            if leaf.contains(key) {
                return Ok(false);
            }
        }
        {
            let front = write_set.front_mut().expect("leaf guard");
            let mut leaf = LeafPage::<_, W>::new(&mut **front);
            leaf.insert(key, rid);
            if !leaf.is_full() {
                return Ok(true);
            }
        }

        let mut ctx = SplitContext {
            new_key: GenericKey::default(),
            new_page_id: INVALID_PAGE_ID,
            root_page_id,
        };
        while let Some(mut guard) = write_set.pop_front() {
            let done = if guard.page_id() == self.header_page_id {
                self.split_header(&mut guard, &ctx)?
            } else if btree_page::page_type(&*guard) == BTreePageType::Leaf {
                self.split_leaf(&mut guard, &mut write_set, &mut ctx)?
            } else {
                self.split_internal(&mut guard, &mut write_set, &mut ctx)?
            };
            if done {
                break;
            }
        }
        Ok(true)
    }

    /// The root split: a new internal root adopts the old root and the new
    /// sibling, and the tree grows one level.
    fn split_header(
        &self,
        guard: &mut WritePageGuard<'_>,
        ctx: &SplitContext<W>,
    ) -> Result<bool, BTreeError> {
        let mut new_root_guard = self.bpm.new_page()?;
        let new_root_id = new_root_guard.page_id();

        let old_root_id;
        {
            let mut header = HeaderPage::new(&mut **guard);
            old_root_id = header.root_page_id();
            header.set_root_page_id(new_root_id);
            let depth = header.tree_depth();
            header.set_tree_depth(depth + 1);
        }
        {
            let mut bytes = new_root_guard.write();
            let mut new_root = InternalPage::<_, W>::new(&mut *bytes);
            new_root.init(self.internal_max_size);
            new_root.set_child_at(0, old_root_id);
            new_root.set_entry_at(1, &ctx.new_key, ctx.new_page_id);
        }
        trace!("root split: new root {}", new_root_id);
        Ok(true)
    }

    /// Handle the pending separator in an internal page: absorb it, shed
    /// load onto a sibling, or split and propagate.
    fn split_internal(
        &self,
        guard: &mut WritePageGuard<'_>,
        write_set: &mut VecDeque<WritePageGuard<'_>>,
        ctx: &mut SplitContext<W>,
    ) -> Result<bool, BTreeError> {
        {
            let mut page = InternalPage::<_, W>::new(&mut **guard);
            if !page.is_full() {
                page.insert(&ctx.new_key, ctx.new_page_id);
                return Ok(true);
            }
        }

        let is_root = guard.page_id() == ctx.root_page_id;
        if !is_root && self.try_redistribute_internal_for_insert(guard, write_set, ctx)? {
            return Ok(true);
        }

        // Split: left keeps min_size slots, the rest move right; the pending
        // entry lands on whichever side its position dictates.
        let mut new_guard = self.bpm.new_page()?;
        let new_page_id = new_guard.page_id();
        {
            let mut bytes = new_guard.write();
            let mut new_page = InternalPage::<_, W>::new(&mut *bytes);
            new_page.init(self.internal_max_size);
            new_page.set_size(0);

            let mut page = InternalPage::<_, W>::new(&mut **guard);
            let mid = page.min_size() as usize;
            let size = page.size() as usize;
            let pos = page.upper_bound(&ctx.new_key);
            if pos < mid {
                page.move_range(&mut new_page, mid - 1, size, 0);
                page.insert(&ctx.new_key, ctx.new_page_id);
            } else {
                page.move_range(&mut new_page, mid, size, 0);
                new_page.insert_from_zero(&ctx.new_key, ctx.new_page_id);
            }
            ctx.new_key = new_page.key_at(0);
            ctx.new_page_id = new_page_id;
        }
        trace!("internal split: page {} -> {}", guard.page_id(), new_page_id);
        Ok(false)
    }

    /// Handle a full leaf: shed load onto a sibling or split it.
    fn split_leaf(
        &self,
        guard: &mut WritePageGuard<'_>,
        write_set: &mut VecDeque<WritePageGuard<'_>>,
        ctx: &mut SplitContext<W>,
    ) -> Result<bool, BTreeError> {
        let is_root = guard.page_id() == ctx.root_page_id;
        if !is_root && self.try_redistribute_leaf_for_insert(guard, write_set)? {
            return Ok(true);
        }

        let mut new_guard = self.bpm.new_page()?;
        let new_page_id = new_guard.page_id();
        {
            let mut bytes = new_guard.write();
            let mut new_leaf = LeafPage::<_, W>::new(&mut *bytes);
            new_leaf.init(self.leaf_max_size);

            let mut leaf = LeafPage::<_, W>::new(&mut **guard);
            let min = leaf.min_size() as usize;
            let size = leaf.size() as usize;
            leaf.move_range(&mut new_leaf, min, size, 0);
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(new_page_id);
            ctx.new_key = new_leaf.key_at(0);
            ctx.new_page_id = new_page_id;
        }
        trace!("leaf split: page {} -> {}", guard.page_id(), new_page_id);
        Ok(false)
    }

    /// Try to rebalance a full leaf with a sibling instead of splitting.
    /// Returns true when the overflow was absorbed.
    fn try_redistribute_leaf_for_insert(
        &self,
        guard: &mut WritePageGuard<'_>,
        write_set: &mut VecDeque<WritePageGuard<'_>>,
    ) -> Result<bool, BTreeError> {
        let (index, left_id, right_id) = {
            let parent_guard = write_set.front().expect("leaf parent guard");
            let parent = InternalPage::<_, W>::new(&**parent_guard);
            let first_key = LeafPage::<_, W>::new(&**guard).key_at(0);
            let index = parent.upper_bound(&first_key) - 1;
            let left_id = (index > 0).then(|| parent.child_at(index - 1));
            let right_id =
                (index + 1 < parent.size() as usize).then(|| parent.child_at(index + 1));
            (index, left_id, right_id)
        };

        if let Some(left_id) = left_id {
            let mut left_guard = self.bpm.fetch_page_write(left_id)?;
            let (left_size, size, min, max) = {
                let left = LeafPage::<_, W>::new(&*left_guard);
                let leaf = LeafPage::<_, W>::new(&**guard);
                (left.size(), leaf.size(), leaf.min_size(), leaf.max_size())
            };
            if can_redistribute(left_size, size, min, max) {
                let shift = ((left_size + size) / 2 - left_size) as usize;
                {
                    let mut left = LeafPage::<_, W>::new(&mut *left_guard);
                    let mut leaf = LeafPage::<_, W>::new(&mut **guard);
                    leaf.move_range(&mut left, 0, shift, left_size as usize);
                }
                let new_first = LeafPage::<_, W>::new(&**guard).key_at(0);
                let parent_guard = write_set.front_mut().expect("leaf parent guard");
                let mut parent = InternalPage::<_, W>::new(&mut **parent_guard);
                parent.set_key_at(index, &new_first);
                return Ok(true);
            }
        }

        if let Some(right_id) = right_id {
            let mut right_guard = self.bpm.fetch_page_write(right_id)?;
            let (right_size, size, min, max) = {
                let right = LeafPage::<_, W>::new(&*right_guard);
                let leaf = LeafPage::<_, W>::new(&**guard);
                (right.size(), leaf.size(), leaf.min_size(), leaf.max_size())
            };
            if can_redistribute(size, right_size, min, max) {
                let shift = ((size + right_size) / 2 - right_size) as usize;
                {
                    let mut right = LeafPage::<_, W>::new(&mut *right_guard);
                    let mut leaf = LeafPage::<_, W>::new(&mut **guard);
                    let size = leaf.size() as usize;
                    leaf.move_range(&mut right, size - shift, size, 0);
                }
                let new_first = LeafPage::<_, W>::new(&*right_guard).key_at(0);
                let parent_guard = write_set.front_mut().expect("leaf parent guard");
                let mut parent = InternalPage::<_, W>::new(&mut **parent_guard);
                parent.set_key_at(index + 1, &new_first);
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Same for a full internal page carrying the pending separator: after
    /// rebalancing, the pending entry is inserted on the side it sorts into.
    fn try_redistribute_internal_for_insert(
        &self,
        guard: &mut WritePageGuard<'_>,
        write_set: &mut VecDeque<WritePageGuard<'_>>,
        ctx: &SplitContext<W>,
    ) -> Result<bool, BTreeError> {
        let (index, left_id, right_id) = {
            let parent_guard = write_set.front().expect("internal parent guard");
            let parent = InternalPage::<_, W>::new(&**parent_guard);
            let first_key = InternalPage::<_, W>::new(&**guard).key_at(0);
            let index = parent.upper_bound(&first_key) - 1;
            let left_id = (index > 0).then(|| parent.child_at(index - 1));
            let right_id =
                (index + 1 < parent.size() as usize).then(|| parent.child_at(index + 1));
            (index, left_id, right_id)
        };

        if let Some(left_id) = left_id {
            let mut left_guard = self.bpm.fetch_page_write(left_id)?;
            let (left_size, size, min, max) = {
                let left = InternalPage::<_, W>::new(&*left_guard);
                let page = InternalPage::<_, W>::new(&**guard);
                (left.size(), page.size(), page.min_size(), page.max_size())
            };
            if can_redistribute(left_size, size, min, max) {
                let shift = ((left_size + size) / 2 - left_size) as usize;
                // This page's reserved slot 0 becomes a live slot on the
                // left sibling; its key is the parent's old separator.
                let old_separator = {
                    let parent_guard = write_set.front().expect("internal parent guard");
                    InternalPage::<_, W>::new(&**parent_guard).key_at(index)
                };
                {
                    let mut left = InternalPage::<_, W>::new(&mut *left_guard);
                    let mut page = InternalPage::<_, W>::new(&mut **guard);
                    page.move_range(&mut left, 0, shift, left_size as usize);
                    left.set_key_at(left_size as usize, &old_separator);
                    if ctx.new_key < page.key_at(0) {
                        left.insert(&ctx.new_key, ctx.new_page_id);
                    } else {
                        page.insert_from_zero(&ctx.new_key, ctx.new_page_id);
                    }
                }
                let new_first = InternalPage::<_, W>::new(&**guard).key_at(0);
                let parent_guard = write_set.front_mut().expect("internal parent guard");
                let mut parent = InternalPage::<_, W>::new(&mut **parent_guard);
                parent.set_key_at(index, &new_first);
                return Ok(true);
            }
        }

        if let Some(right_id) = right_id {
            let mut right_guard = self.bpm.fetch_page_write(right_id)?;
            let (right_size, size, min, max) = {
                let right = InternalPage::<_, W>::new(&*right_guard);
                let page = InternalPage::<_, W>::new(&**guard);
                (right.size(), page.size(), page.min_size(), page.max_size())
            };
            if can_redistribute(size, right_size, min, max) {
                let shift = ((size + right_size) / 2 - right_size) as usize;
                // The right sibling's reserved slot 0 shifts into a live
                // slot; its key is the parent's old separator.
                let old_separator = {
                    let parent_guard = write_set.front().expect("internal parent guard");
                    InternalPage::<_, W>::new(&**parent_guard).key_at(index + 1)
                };
                {
                    let mut right = InternalPage::<_, W>::new(&mut *right_guard);
                    let mut page = InternalPage::<_, W>::new(&mut **guard);
                    let size = page.size() as usize;
                    page.move_range(&mut right, size - shift, size, 0);
                    right.set_key_at(shift, &old_separator);
                    if ctx.new_key < right.key_at(0) {
                        page.insert(&ctx.new_key, ctx.new_page_id);
                    } else {
                        right.insert_from_zero(&ctx.new_key, ctx.new_page_id);
                    }
                }
                let new_first = InternalPage::<_, W>::new(&*right_guard).key_at(0);
                let parent_guard = write_set.front_mut().expect("internal parent guard");
                let mut parent = InternalPage::<_, W>::new(&mut **parent_guard);
                parent.set_key_at(index + 1, &new_first);
                return Ok(true);
            }
        }

        Ok(false)
    }
}
