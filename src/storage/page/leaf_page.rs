use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::page::btree_page::{self, BTreePageType};
use crate::storage::page::key::GenericKey;

const NEXT_PAGE_ID_OFFSET: usize = 12;
const LEAF_HEADER_SIZE: usize = 16;

/// View over a B+ tree leaf page.
///
/// Layout: the common 12-byte header, `next_page_id: i32`, then a packed
/// array of `(key: [u8; W], rid: i64)` entries sorted by key. Leaves chain
/// into a singly linked list in ascending key order.
pub struct LeafPage<T, const W: usize> {
    data: T,
}

impl<T, const W: usize> LeafPage<T, W> {
    const ENTRY_SIZE: usize = W + 8;

    /// Largest entry count this page size can hold.
    pub fn capacity() -> usize {
        (PAGE_SIZE - LEAF_HEADER_SIZE) / Self::ENTRY_SIZE
    }

    pub fn new(data: T) -> Self {
        Self { data }
    }

    fn entry_offset(index: usize) -> usize {
        LEAF_HEADER_SIZE + index * Self::ENTRY_SIZE
    }
}

impl<T: AsRef<[u8]>, const W: usize> LeafPage<T, W> {
    pub fn size(&self) -> i32 {
        btree_page::size(self.data.as_ref())
    }

    pub fn max_size(&self) -> i32 {
        btree_page::max_size(self.data.as_ref())
    }

    pub fn min_size(&self) -> i32 {
        self.max_size() / 2
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.max_size()
    }

    pub fn over_half_full(&self) -> bool {
        self.size() > self.min_size()
    }

    pub fn under_half_full(&self) -> bool {
        self.size() < self.min_size()
    }

    pub fn next_page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.data.as_ref()[NEXT_PAGE_ID_OFFSET..])
    }

    pub fn key_at(&self, index: usize) -> GenericKey<W> {
        let offset = Self::entry_offset(index);
        GenericKey::from_bytes(&self.data.as_ref()[offset..offset + W])
    }

    pub fn rid_at(&self, index: usize) -> Rid {
        let offset = Self::entry_offset(index) + W;
        Rid::from_i64(LittleEndian::read_i64(&self.data.as_ref()[offset..]))
    }

    /// First index whose key is not less than `key`.
    pub fn lower_bound(&self, key: &GenericKey<W>) -> usize {
        let mut left = 0usize;
        let mut right = self.size() as usize;
        while left < right {
            let mid = (left + right) / 2;
            if self.key_at(mid) < *key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        left
    }

    pub fn contains(&self, key: &GenericKey<W>) -> bool {
        let index = self.lower_bound(key);
        index < self.size() as usize && self.key_at(index) == *key
    }

    pub fn get(&self, key: &GenericKey<W>) -> Option<Rid> {
        let index = self.lower_bound(key);
        if index == self.size() as usize || self.key_at(index) != *key {
            return None;
        }
        Some(self.rid_at(index))
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>, const W: usize> LeafPage<T, W> {
    pub fn init(&mut self, max_size: i32) {
        debug_assert!(max_size as usize <= Self::capacity());
        let data = self.data.as_mut();
        btree_page::set_page_type(data, BTreePageType::Leaf);
        btree_page::set_size(data, 0);
        btree_page::set_max_size(data, max_size);
        self.set_next_page_id(INVALID_PAGE_ID);
    }

    pub fn set_size(&mut self, size: i32) {
        btree_page::set_size(self.data.as_mut(), size);
    }

    pub fn set_next_page_id(&mut self, next_page_id: PageId) {
        LittleEndian::write_i32(&mut self.data.as_mut()[NEXT_PAGE_ID_OFFSET..], next_page_id);
    }

    pub fn set_entry_at(&mut self, index: usize, key: &GenericKey<W>, rid: Rid) {
        let offset = Self::entry_offset(index);
        let data = self.data.as_mut();
        data[offset..offset + W].copy_from_slice(key.as_bytes());
        LittleEndian::write_i64(&mut data[offset + W..], rid.to_i64());
    }

    /// Insert a new entry, shifting the tail right. The caller has already
    /// rejected duplicates.
    pub fn insert(&mut self, key: &GenericKey<W>, rid: Rid) {
        let index = self.lower_bound(key);
        let size = self.size() as usize;
        if index < size {
            let from = Self::entry_offset(index);
            let to = Self::entry_offset(size);
            self.data.as_mut().copy_within(from..to, from + Self::ENTRY_SIZE);
        }
        self.set_entry_at(index, key, rid);
        self.set_size(size as i32 + 1);
    }

    /// Remove the entry with the given key, shifting the tail left. The
    /// caller has already checked the key is present.
    pub fn remove(&mut self, key: &GenericKey<W>) {
        let index = self.lower_bound(key);
        let size = self.size() as usize;
        if index + 1 < size {
            let from = Self::entry_offset(index + 1);
            let to = Self::entry_offset(size);
            self.data.as_mut().copy_within(from..to, Self::entry_offset(index));
        }
        self.set_size(size as i32 - 1);
    }

    /// Move entries `[start, end)` of this page into `dest` at
    /// `dest_start`, shifting the tails of both pages and updating both
    /// sizes. The single bulk primitive behind splits, merges and
    /// redistribution.
    pub fn move_range<U: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        dest: &mut LeafPage<U, W>,
        start: usize,
        end: usize,
        dest_start: usize,
    ) {
        let count = end - start;
        if count == 0 {
            return;
        }
        let src_size = self.size() as usize;
        let dest_size = dest.size() as usize;

        // Make room in the destination.
        if dest_start < dest_size {
            let from = Self::entry_offset(dest_start);
            let to = Self::entry_offset(dest_size);
            dest.data
                .as_mut()
                .copy_within(from..to, from + count * Self::ENTRY_SIZE);
        }

        let src_from = Self::entry_offset(start);
        let src_to = Self::entry_offset(end);
        let dest_from = Self::entry_offset(dest_start);
        dest.data.as_mut()[dest_from..dest_from + count * Self::ENTRY_SIZE]
            .copy_from_slice(&self.data.as_ref()[src_from..src_to]);

        // Close the gap in the source.
        if end < src_size {
            let from = Self::entry_offset(end);
            let to = Self::entry_offset(src_size);
            self.data.as_mut().copy_within(from..to, src_from);
        }

        self.set_size((src_size - count) as i32);
        dest.set_size((dest_size + count) as i32);
    }
}
