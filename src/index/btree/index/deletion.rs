use std::collections::VecDeque;

use log::trace;

use crate::common::types::PageId;
use crate::index::btree::error::BTreeError;
use crate::storage::buffer::WritePageGuard;
use crate::storage::page::btree_page::{self, BTreePageType};
use crate::storage::page::key::GenericKey;
use crate::storage::page::{HeaderPage, InternalPage, LeafPage};

use super::base::{can_redistribute, BPlusTree};

/// Merge state passed up the write set: the separator to remove from the
/// parent after a child pair merged.
struct MergeContext<const W: usize> {
    delete_key: GenericKey<W>,
    root_page_id: PageId,
}

impl<const W: usize> BPlusTree<W> {
    /// Remove a key. Absent keys are a silent no-op.
    ///
    /// Fast path: read-latched descent, write latch only on the leaf. When
    /// the leaf would underflow, redescend pessimistically and rebalance.
    pub fn remove(&self, key: &GenericKey<W>) -> Result<(), BTreeError> {
        let mut guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let (root_page_id, mut depth) = {
            let header = HeaderPage::new(&*guard);
            (header.root_page_id(), header.tree_depth())
        };
        let mut next_page_id = root_page_id;
        while depth > 1 {
            guard = self.bpm.fetch_page_read(next_page_id)?;
            next_page_id = InternalPage::<_, W>::new(&*guard).child_for(key);
            depth -= 1;
        }
        let mut leaf_guard = self.bpm.fetch_page_write(next_page_id)?;
        drop(guard);

        let removable = {
            let leaf = LeafPage::<_, W>::new(&*leaf_guard);
            if !leaf.contains(key) {
                return Ok(());
            }
            leaf.over_half_full() || leaf_guard.page_id() == root_page_id
        };
        if removable {
            let mut leaf = LeafPage::<_, W>::new(&mut *leaf_guard);
            leaf.remove(key);
            return Ok(());
        }

        drop(leaf_guard);
        self.merge_remove(key)
    }

    /// Pessimistic remove path: write-latch from the header down, keeping
    /// ancestors that might underflow, then walk the write set leaf to root
    /// redistributing or merging.
    fn merge_remove(&self, key: &GenericKey<W>) -> Result<(), BTreeError> {
        let mut write_set: VecDeque<WritePageGuard<'_>> = VecDeque::new();
        write_set.push_front(self.bpm.fetch_page_write(self.header_page_id)?);
        let root_page_id = {
            let front = write_set.front().expect("header guard");
            HeaderPage::new(&**front).root_page_id()
        };
        write_set.push_front(self.bpm.fetch_page_write(root_page_id)?);

        loop {
            let (over_half_full, child) = {
                let front = write_set.front().expect("descent guard");
                if btree_page::page_type(&**front) == BTreePageType::Leaf {
                    break;
                }
                let page = InternalPage::<_, W>::new(&**front);
                (page.over_half_full(), page.child_for(key))
            };
            if over_half_full {
                // Safe ancestor: no underflow can reach past it.
                write_set.truncate(1);
            }
            write_set.push_front(self.bpm.fetch_page_write(child)?);
        }

        {
            let front = write_set.front().expect("leaf guard");
            let leaf = LeafPage::<_, W>::new(&**front);
            if !leaf.contains(key) {
                return Ok(());
            }
        }
        let leaf_ok = {
            let front = write_set.front_mut().expect("leaf guard");
            let is_root = front.page_id() == root_page_id;
            let mut leaf = LeafPage::<_, W>::new(&mut **front);
            leaf.remove(key);
            !leaf.under_half_full() || is_root
        };
        if leaf_ok {
            return Ok(());
        }

        let mut ctx = MergeContext {
            delete_key: GenericKey::default(),
            root_page_id,
        };
        let mut dead_pages: Vec<PageId> = Vec::new();
        while let Some(mut guard) = write_set.pop_front() {
            let done = if btree_page::page_type(&*guard) == BTreePageType::Leaf {
                self.merge_leaf(&mut guard, &mut write_set, &mut ctx, &mut dead_pages)?
            } else {
                self.merge_internal(&mut guard, &mut write_set, &mut ctx, &mut dead_pages)?
            };
            if done {
                break;
            }
        }
        drop(write_set);

        // Pages emptied by a merge are unreachable once the guards drop. A
        // concurrent scan may still pin one; its id just is not recycled.
        for page_id in dead_pages {
            let _ = self.bpm.delete_page(page_id);
        }
        Ok(())
    }

    /// Rebalance an underflowed leaf against a sibling, merging when
    /// neither sibling can spare entries.
    fn merge_leaf(
        &self,
        guard: &mut WritePageGuard<'_>,
        write_set: &mut VecDeque<WritePageGuard<'_>>,
        ctx: &mut MergeContext<W>,
        dead_pages: &mut Vec<PageId>,
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

        if let Some(right_id) = right_id {
            let mut right_guard = self.bpm.fetch_page_write(right_id)?;
            let (right_size, size, min, max) = {
                let right = LeafPage::<_, W>::new(&*right_guard);
                let leaf = LeafPage::<_, W>::new(&**guard);
                (right.size(), leaf.size(), leaf.min_size(), leaf.max_size())
            };
            if can_redistribute(size, right_size, min, max) {
                let shift = ((size + right_size) / 2 - size) as usize;
                {
                    let mut right = LeafPage::<_, W>::new(&mut *right_guard);
                    let mut leaf = LeafPage::<_, W>::new(&mut **guard);
                    right.move_range(&mut leaf, 0, shift, size as usize);
                }
                let new_first = LeafPage::<_, W>::new(&*right_guard).key_at(0);
                let parent_guard = write_set.front_mut().expect("leaf parent guard");
                let mut parent = InternalPage::<_, W>::new(&mut **parent_guard);
                parent.set_key_at(index + 1, &new_first);
                return Ok(true);
            }
        }

        if let Some(left_id) = left_id {
            let mut left_guard = self.bpm.fetch_page_write(left_id)?;
            let (left_size, size, min, max) = {
                let left = LeafPage::<_, W>::new(&*left_guard);
                let leaf = LeafPage::<_, W>::new(&**guard);
                (left.size(), leaf.size(), leaf.min_size(), leaf.max_size())
            };
            if can_redistribute(left_size, size, min, max) {
                let shift = ((left_size + size) / 2 - size) as usize;
                {
                    let mut left = LeafPage::<_, W>::new(&mut *left_guard);
                    let mut leaf = LeafPage::<_, W>::new(&mut **guard);
                    left.move_range(&mut leaf, left_size as usize - shift, left_size as usize, 0);
                }
                let new_first = LeafPage::<_, W>::new(&**guard).key_at(0);
                let parent_guard = write_set.front_mut().expect("leaf parent guard");
                let mut parent = InternalPage::<_, W>::new(&mut **parent_guard);
                parent.set_key_at(index, &new_first);
                return Ok(true);
            }
        }

        // Merge: fold the right page of the pair into the left one and drop
        // its separator from the parent.
        if let Some(right_id) = right_id {
            let mut right_guard = self.bpm.fetch_page_write(right_id)?;
            let mut right = LeafPage::<_, W>::new(&mut *right_guard);
            let mut leaf = LeafPage::<_, W>::new(&mut **guard);
            ctx.delete_key = right.key_at(0);
            let right_size = right.size() as usize;
            let leaf_size = leaf.size() as usize;
            right.move_range(&mut leaf, 0, right_size, leaf_size);
            let next = right.next_page_id();
            leaf.set_next_page_id(next);
            dead_pages.push(right_id);
            trace!("leaf merge: page {} absorbed {}", guard.page_id(), right_id);
        } else if let Some(left_id) = left_id {
            let mut left_guard = self.bpm.fetch_page_write(left_id)?;
            let mut left = LeafPage::<_, W>::new(&mut *left_guard);
            let mut leaf = LeafPage::<_, W>::new(&mut **guard);
            ctx.delete_key = leaf.key_at(0);
            let leaf_size = leaf.size() as usize;
            let left_size = left.size() as usize;
            leaf.move_range(&mut left, 0, leaf_size, left_size);
            let next = leaf.next_page_id();
            left.set_next_page_id(next);
            dead_pages.push(guard.page_id());
            trace!("leaf merge: page {} absorbed {}", left_id, guard.page_id());
        }
        Ok(false)
    }

    /// Drop the merged child's separator, then rebalance or merge this page
    /// if that made it underflow; shrink the tree at the root.
    fn merge_internal(
        &self,
        guard: &mut WritePageGuard<'_>,
        write_set: &mut VecDeque<WritePageGuard<'_>>,
        ctx: &mut MergeContext<W>,
        dead_pages: &mut Vec<PageId>,
    ) -> Result<bool, BTreeError> {
        {
            let mut page = InternalPage::<_, W>::new(&mut **guard);
            page.remove(&ctx.delete_key);
            if !page.under_half_full() {
                return Ok(true);
            }
        }

        if guard.page_id() == ctx.root_page_id {
            let (size, only_child) = {
                let page = InternalPage::<_, W>::new(&**guard);
                (page.size(), page.child_at(0))
            };
            if size > 1 {
                return Ok(true);
            }
            // Root shrank to one child: that child becomes the root.
            let header_guard = write_set.front_mut().expect("header guard");
            let mut header = HeaderPage::new(&mut **header_guard);
            header.set_root_page_id(only_child);
            let depth = header.tree_depth();
            header.set_tree_depth(depth - 1);
            dead_pages.push(guard.page_id());
            trace!("root collapse: new root {}", only_child);
            return Ok(true);
        }

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

        if let Some(right_id) = right_id {
            let mut right_guard = self.bpm.fetch_page_write(right_id)?;
            let (right_size, size, min, max) = {
                let right = InternalPage::<_, W>::new(&*right_guard);
                let page = InternalPage::<_, W>::new(&**guard);
                (right.size(), page.size(), page.min_size(), page.max_size())
            };
            if can_redistribute(size, right_size, min, max) {
                let shift = ((size + right_size) / 2 - size) as usize;
                // The right sibling's reserved slot 0 lands in a live slot
                // on this page; its key is the parent's old separator.
                let old_separator = {
                    let parent_guard = write_set.front().expect("internal parent guard");
                    InternalPage::<_, W>::new(&**parent_guard).key_at(index + 1)
                };
                {
                    let mut right = InternalPage::<_, W>::new(&mut *right_guard);
                    let mut page = InternalPage::<_, W>::new(&mut **guard);
                    right.move_range(&mut page, 0, shift, size as usize);
                    page.set_key_at(size as usize, &old_separator);
                }
                let new_first = InternalPage::<_, W>::new(&*right_guard).key_at(0);
                let parent_guard = write_set.front_mut().expect("internal parent guard");
                let mut parent = InternalPage::<_, W>::new(&mut **parent_guard);
                parent.set_key_at(index + 1, &new_first);
                return Ok(true);
            }
        }

        if let Some(left_id) = left_id {
            let mut left_guard = self.bpm.fetch_page_write(left_id)?;
            let (left_size, size, min, max) = {
                let left = InternalPage::<_, W>::new(&*left_guard);
                let page = InternalPage::<_, W>::new(&**guard);
                (left.size(), page.size(), page.min_size(), page.max_size())
            };
            if can_redistribute(left_size, size, min, max) {
                let shift = ((left_size + size) / 2 - size) as usize;
                // This page's reserved slot 0 shifts into a live slot; its
                // key is the parent's old separator.
                let old_separator = {
                    let parent_guard = write_set.front().expect("internal parent guard");
                    InternalPage::<_, W>::new(&**parent_guard).key_at(index)
                };
                {
                    let mut left = InternalPage::<_, W>::new(&mut *left_guard);
                    let mut page = InternalPage::<_, W>::new(&mut **guard);
                    left.move_range(&mut page, left_size as usize - shift, left_size as usize, 0);
                    page.set_key_at(shift, &old_separator);
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
            // The junction slot inherits the parent's old separator for the
            // right sibling, which is also the key to drop from the parent.
            let old_separator = {
                let parent_guard = write_set.front().expect("internal parent guard");
                InternalPage::<_, W>::new(&**parent_guard).key_at(index + 1)
            };
            let mut right = InternalPage::<_, W>::new(&mut *right_guard);
            let mut page = InternalPage::<_, W>::new(&mut **guard);
            ctx.delete_key = old_separator;
            let right_size = right.size() as usize;
            let size = page.size() as usize;
            right.move_range(&mut page, 0, right_size, size);
            page.set_key_at(size, &old_separator);
            dead_pages.push(right_id);
            trace!("internal merge: page {} absorbed {}", guard.page_id(), right_id);
        } else if let Some(left_id) = left_id {
            let mut left_guard = self.bpm.fetch_page_write(left_id)?;
            let old_separator = {
                let parent_guard = write_set.front().expect("internal parent guard");
                InternalPage::<_, W>::new(&**parent_guard).key_at(index)
            };
            let mut left = InternalPage::<_, W>::new(&mut *left_guard);
            let mut page = InternalPage::<_, W>::new(&mut **guard);
            ctx.delete_key = old_separator;
            let size = page.size() as usize;
            let left_size = left.size() as usize;
            page.move_range(&mut left, 0, size, left_size);
            left.set_key_at(left_size, &old_separator);
            dead_pages.push(guard.page_id());
            trace!("internal merge: page {} absorbed {}", left_id, guard.page_id());
        }
        Ok(false)
    }
}
