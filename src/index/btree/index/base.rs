use std::sync::Arc;

use crate::common::types::{PageId, Rid};
use crate::index::btree::error::BTreeError;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{HeaderPage, InternalPage, LeafPage};
use crate::storage::page::key::GenericKey;

/// Concurrent B+ tree index over buffer-pool pages.
///
/// Keys are unique, `W` bytes wide; values are record IDs. Readers descend
/// with latch crabbing (child read latch acquired before the parent's is
/// released); writers first try an optimistic descent that only write-latches
/// the target leaf and fall back to a pessimistic redescent holding a write
/// set of guards from the deepest unsafe ancestor down.
pub struct BPlusTree<const W: usize> {
    pub(super) bpm: Arc<BufferPoolManager>,
    pub(super) header_page_id: PageId,
    pub(super) leaf_max_size: i32,
    pub(super) internal_max_size: i32,
}

impl<const W: usize> BPlusTree<W> {
    /// Create a fresh tree: a header page pointing at an empty root leaf.
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: i32,
        internal_max_size: i32,
    ) -> Result<Self, BTreeError> {
        assert!(
            (4..=LeafPage::<&[u8], W>::capacity() as i32).contains(&leaf_max_size),
            "leaf_max_size out of range"
        );
        assert!(
            (3..=InternalPage::<&[u8], W>::capacity() as i32).contains(&internal_max_size),
            "internal_max_size out of range"
        );

        let mut header_guard = bpm.new_page()?;
        let header_page_id = header_guard.page_id();
        let mut leaf_guard = bpm.new_page()?;
        let root_page_id = leaf_guard.page_id();

        {
            let mut bytes = header_guard.write();
            let mut header = HeaderPage::new(&mut *bytes);
            header.init(root_page_id, 1);
        }
        {
            let mut bytes = leaf_guard.write();
            let mut leaf = LeafPage::<_, W>::new(&mut *bytes);
            leaf.init(leaf_max_size);
        }
        drop(leaf_guard);
        drop(header_guard);

        Ok(Self {
            bpm,
            header_page_id,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    pub fn root_page_id(&self) -> Result<PageId, BTreeError> {
        let guard = self.bpm.fetch_page_read(self.header_page_id)?;
        Ok(HeaderPage::new(&*guard).root_page_id())
    }

    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        let guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let (root_page_id, depth) = {
            let header = HeaderPage::new(&*guard);
            (header.root_page_id(), header.tree_depth())
        };
        if depth > 1 {
            return Ok(false);
        }
        let root_guard = self.bpm.fetch_page_read(root_page_id)?;
        Ok(LeafPage::<_, W>::new(&*root_guard).size() == 0)
    }

    /// Walk the whole tree and panic on any structural violation: page
    /// types, in-page key ordering, half-full bounds on non-root pages and
    /// the leaf sibling chain. Meant for tests; takes no precautions
    /// against concurrent writers.
    pub fn check_integrity(&self) -> Result<(), BTreeError> {
        let (root_page_id, depth) = {
            let guard = self.bpm.fetch_page_read(self.header_page_id)?;
            let header = HeaderPage::new(&*guard);
            (header.root_page_id(), header.tree_depth())
        };
        assert!(depth >= 1, "tree depth must be positive");

        let mut leaves = Vec::new();
        self.check_page(root_page_id, depth, true, &mut leaves)?;

        // The collected tree-order leaves must agree with the sibling chain.
        for pair in leaves.windows(2) {
            let guard = self.bpm.fetch_page_read(pair[0])?;
            let leaf = LeafPage::<_, W>::new(&*guard);
            assert_eq!(
                leaf.next_page_id(),
                pair[1],
                "leaf chain does not match tree order"
            );
        }
        if let Some(&last) = leaves.last() {
            let guard = self.bpm.fetch_page_read(last)?;
            let leaf = LeafPage::<_, W>::new(&*guard);
            assert_eq!(
                leaf.next_page_id(),
                crate::common::types::INVALID_PAGE_ID,
                "last leaf must terminate the chain"
            );
        }
        Ok(())
    }

    fn check_page(
        &self,
        page_id: PageId,
        level: i32,
        is_root: bool,
        leaves: &mut Vec<PageId>,
    ) -> Result<(), BTreeError> {
        use crate::storage::page::btree_page::{self, BTreePageType};

        let guard = self.bpm.fetch_page_read(page_id)?;
        if level == 1 {
            assert_eq!(
                btree_page::page_type(&*guard),
                BTreePageType::Leaf,
                "page {} should be a leaf",
                page_id
            );
            let leaf = LeafPage::<_, W>::new(&*guard);
            let size = leaf.size();
            assert!(size <= leaf.max_size() - 1, "leaf {} overfull", page_id);
            if !is_root {
                assert!(size >= leaf.min_size(), "leaf {} underfull", page_id);
            }
            for i in 1..size as usize {
                assert!(
                    leaf.key_at(i - 1) < leaf.key_at(i),
                    "leaf {} keys out of order",
                    page_id
                );
            }
            leaves.push(page_id);
            return Ok(());
        }

        assert_eq!(
            btree_page::page_type(&*guard),
            BTreePageType::Internal,
            "page {} should be internal",
            page_id
        );
        let children: Vec<PageId> = {
            let page = InternalPage::<_, W>::new(&*guard);
            let size = page.size();
            assert!(size <= page.max_size(), "internal {} overfull", page_id);
            if is_root {
                assert!(size >= 2, "internal root {} must have two children", page_id);
            } else {
                assert!(size >= page.min_size(), "internal {} underfull", page_id);
            }
            for i in 2..size as usize {
                assert!(
                    page.key_at(i - 1) < page.key_at(i),
                    "internal {} keys out of order",
                    page_id
                );
            }
            (0..size as usize).map(|i| page.child_at(i)).collect()
        };
        for child in children {
            self.check_page(child, level - 1, false, leaves)?;
        }
        Ok(())
    }

    /// Point lookup. Crabs read latches from the header down to the leaf.
    pub fn get(&self, key: &GenericKey<W>) -> Result<Option<Rid>, BTreeError> {
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
        guard = self.bpm.fetch_page_read(next_page_id)?;
        Ok(LeafPage::<_, W>::new(&*guard).get(key))
    }
}

/// Sibling redistribution is worthwhile when the combined load can make both
/// pages at least half full without packing them close to capacity again.
pub(super) fn can_redistribute(left_size: i32, right_size: i32, min_size: i32, max_size: i32) -> bool {
    let combined = left_size + right_size;
    combined >= min_size * 2 && combined < max_size * 2 * 95 / 100
}
