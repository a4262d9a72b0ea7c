use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::storage::buffer::{BufferPoolManager, ReadPageGuard};
use crate::storage::page::btree_page::{self, BTreePageType};
use crate::storage::page::key::GenericKey;
use crate::storage::page::{HeaderPage, InternalPage, LeafPage};

use super::base::BPlusTree;

/// Forward iterator over the leaf chain.
///
/// Holds the current leaf's read guard; the next leaf's guard is acquired
/// before the current one is released. Iteration is not safe against
/// concurrent structural modification of sibling leaves: a merge walking
/// right-to-left through the same parent can deadlock with it, so scan
/// either without concurrent writers or accept that risk.
pub struct TreeIterator<'a, const W: usize> {
    bpm: &'a BufferPoolManager,
    guard: Option<ReadPageGuard<'a>>,
    index: usize,
}

impl<'a, const W: usize> TreeIterator<'a, W> {
    pub(super) fn new(bpm: &'a BufferPoolManager, guard: ReadPageGuard<'a>, index: usize) -> Self {
        Self {
            bpm,
            guard: Some(guard),
            index,
        }
    }

    /// True once the iterator has run off the end of the leaf chain.
    pub fn is_end(&self) -> bool {
        self.guard.is_none()
    }
}

impl<const W: usize> Iterator for TreeIterator<'_, W> {
    type Item = Result<(GenericKey<W>, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let guard = self.guard.as_ref()?;
            let leaf = LeafPage::<_, W>::new(&**guard);
            if self.index < leaf.size() as usize {
                let item = (leaf.key_at(self.index), leaf.rid_at(self.index));
                self.index += 1;
                return Some(Ok(item));
            }
            let next_page_id = leaf.next_page_id();
            if next_page_id == INVALID_PAGE_ID {
                self.guard = None;
                return None;
            }
            // Latch the next leaf before releasing the current one.
            match self.bpm.fetch_page_read(next_page_id) {
                Ok(next_guard) => {
                    self.guard = Some(next_guard);
                    self.index = 0;
                }
                Err(e) => {
                    self.guard = None;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

impl<const W: usize> BPlusTree<W> {
    /// Iterate from the smallest key.
    pub fn iter(&self) -> Result<TreeIterator<'_, W>, BTreeError> {
        let mut guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let mut next_page_id = HeaderPage::new(&*guard).root_page_id();
        loop {
            guard = self.bpm.fetch_page_read(next_page_id)?;
            if btree_page::page_type(&*guard) == BTreePageType::Leaf {
                break;
            }
            next_page_id = InternalPage::<_, W>::new(&*guard).child_at(0);
        }
        Ok(TreeIterator::new(self.bpm.as_ref(), guard, 0))
    }

    /// Iterate from the first key not less than `key`.
    pub fn iter_from(&self, key: &GenericKey<W>) -> Result<TreeIterator<'_, W>, BTreeError> {
        let mut guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let mut next_page_id = HeaderPage::new(&*guard).root_page_id();
        loop {
            guard = self.bpm.fetch_page_read(next_page_id)?;
            if btree_page::page_type(&*guard) == BTreePageType::Leaf {
                break;
            }
            next_page_id = InternalPage::<_, W>::new(&*guard).child_for(key);
        }
        let index = LeafPage::<_, W>::new(&*guard).lower_bound(key);
        Ok(TreeIterator::new(self.bpm.as_ref(), guard, index))
    }

    /// Collect every record ID with a key in `[start, end]`.
    pub fn range_scan(
        &self,
        start: &GenericKey<W>,
        end: &GenericKey<W>,
    ) -> Result<Vec<Rid>, BTreeError> {
        if start > end {
            return Ok(Vec::new());
        }
        let mut result = Vec::new();
        for item in self.iter_from(start)? {
            let (key, rid) = item?;
            if key > *end {
                break;
            }
            result.push(rid);
        }
        Ok(result)
    }
}
