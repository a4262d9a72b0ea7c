use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::PageId;

const ROOT_PAGE_ID_OFFSET: usize = 0;
const TREE_DEPTH_OFFSET: usize = 4;

/// View over the B+ tree header page: `(root_page_id: i32, tree_depth: i32)`.
///
/// The header page is the stable entry point of a tree; the root page id
/// behind it changes on root splits and collapses.
pub struct HeaderPage<T> {
    data: T,
}

impl<T: AsRef<[u8]>> HeaderPage<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }

    pub fn root_page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.data.as_ref()[ROOT_PAGE_ID_OFFSET..])
    }

    pub fn tree_depth(&self) -> i32 {
        LittleEndian::read_i32(&self.data.as_ref()[TREE_DEPTH_OFFSET..])
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> HeaderPage<T> {
    pub fn init(&mut self, root_page_id: PageId, tree_depth: i32) {
        self.set_root_page_id(root_page_id);
        self.set_tree_depth(tree_depth);
    }

    pub fn set_root_page_id(&mut self, root_page_id: PageId) {
        LittleEndian::write_i32(&mut self.data.as_mut()[ROOT_PAGE_ID_OFFSET..], root_page_id);
    }

    pub fn set_tree_depth(&mut self, tree_depth: i32) {
        LittleEndian::write_i32(&mut self.data.as_mut()[TREE_DEPTH_OFFSET..], tree_depth);
    }
}
