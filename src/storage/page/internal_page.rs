use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, PAGE_SIZE};
use crate::storage::page::btree_page::{self, BTreePageType, COMMON_HEADER_SIZE};
use crate::storage::page::key::GenericKey;

/// View over a B+ tree internal page.
///
/// Layout: the common 12-byte header, then a packed array of
/// `(key: [u8; W], child: i32)` entries. Slot 0's key is reserved; `size`
/// counts children, so a page with `size` slots separates them with
/// `size - 1` live keys. `key_at(i)` for `i >= 1` is the smallest key
/// reachable through `child_at(i)`.
pub struct InternalPage<T, const W: usize> {
    data: T,
}

impl<T, const W: usize> InternalPage<T, W> {
    const ENTRY_SIZE: usize = W + 4;

    /// Largest child count this page size can hold.
    pub fn capacity() -> usize {
        (PAGE_SIZE - COMMON_HEADER_SIZE) / Self::ENTRY_SIZE
    }

    pub fn new(data: T) -> Self {
        Self { data }
    }

    fn entry_offset(index: usize) -> usize {
        COMMON_HEADER_SIZE + index * Self::ENTRY_SIZE
    }
}

impl<T: AsRef<[u8]>, const W: usize> InternalPage<T, W> {
    pub fn is_leaf(&self) -> bool {
        btree_page::page_type(self.data.as_ref()) == BTreePageType::Leaf
    }

    pub fn size(&self) -> i32 {
        btree_page::size(self.data.as_ref())
    }

    pub fn max_size(&self) -> i32 {
        btree_page::max_size(self.data.as_ref())
    }

    pub fn min_size(&self) -> i32 {
        (self.max_size() + 1) / 2
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

    pub fn key_at(&self, index: usize) -> GenericKey<W> {
        let offset = Self::entry_offset(index);
        GenericKey::from_bytes(&self.data.as_ref()[offset..offset + W])
    }

    pub fn child_at(&self, index: usize) -> PageId {
        let offset = Self::entry_offset(index) + W;
        LittleEndian::read_i32(&self.data.as_ref()[offset..])
    }

    /// First index in `[1, size)` whose key is strictly greater than `key`.
    pub fn upper_bound(&self, key: &GenericKey<W>) -> usize {
        let mut left = 1usize;
        let mut right = self.size() as usize;
        while left < right {
            let mid = (left + right) / 2;
            if self.key_at(mid) <= *key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        left
    }

    /// The child to descend into for `key`: the slot before its successor.
    pub fn child_for(&self, key: &GenericKey<W>) -> PageId {
        self.child_at(self.upper_bound(key) - 1)
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>, const W: usize> InternalPage<T, W> {
    /// Initialize as an internal page with one (empty) child slot.
    pub fn init(&mut self, max_size: i32) {
        debug_assert!(max_size as usize <= Self::capacity());
        let data = self.data.as_mut();
        btree_page::set_page_type(data, BTreePageType::Internal);
        btree_page::set_size(data, 1);
        btree_page::set_max_size(data, max_size);
    }

    pub fn set_size(&mut self, size: i32) {
        btree_page::set_size(self.data.as_mut(), size);
    }

    pub fn set_key_at(&mut self, index: usize, key: &GenericKey<W>) {
        let offset = Self::entry_offset(index);
        self.data.as_mut()[offset..offset + W].copy_from_slice(key.as_bytes());
        self.bump_size_to(index + 1);
    }

    pub fn set_child_at(&mut self, index: usize, child: PageId) {
        let offset = Self::entry_offset(index) + W;
        LittleEndian::write_i32(&mut self.data.as_mut()[offset..], child);
        self.bump_size_to(index + 1);
    }

    pub fn set_entry_at(&mut self, index: usize, key: &GenericKey<W>, child: PageId) {
        let offset = Self::entry_offset(index);
        let data = self.data.as_mut();
        data[offset..offset + W].copy_from_slice(key.as_bytes());
        LittleEndian::write_i32(&mut data[offset + W..], child);
        self.bump_size_to(index + 1);
    }

    /// Insert `(key, child)` at the key's successor position, shifting the
    /// tail right. Never places at slot 0.
    pub fn insert(&mut self, key: &GenericKey<W>, child: PageId) {
        let index = self.upper_bound(key);
        self.insert_at(index, key, child);
    }

    /// Insert treating slot 0's key as live, so the new entry may land at
    /// slot 0. Used while splitting, when the right sibling's slot-0 key is
    /// the key about to be promoted.
    pub fn insert_from_zero(&mut self, key: &GenericKey<W>, child: PageId) {
        let mut left = 0usize;
        let mut right = self.size() as usize;
        while left < right {
            let mid = (left + right) / 2;
            if self.key_at(mid) <= *key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        self.insert_at(left, key, child);
    }

    fn insert_at(&mut self, index: usize, key: &GenericKey<W>, child: PageId) {
        let size = self.size() as usize;
        if index < size {
            let from = Self::entry_offset(index);
            let to = Self::entry_offset(size);
            self.data.as_mut().copy_within(from..to, from + Self::ENTRY_SIZE);
        }
        let offset = Self::entry_offset(index);
        let data = self.data.as_mut();
        data[offset..offset + W].copy_from_slice(key.as_bytes());
        LittleEndian::write_i32(&mut data[offset + W..], child);
        self.set_size(size as i32 + 1);
    }

    /// Remove the slot the key routes to, shifting the tail left.
    pub fn remove(&mut self, key: &GenericKey<W>) {
        let index = self.upper_bound(key) - 1;
        self.remove_at(index);
    }

    pub fn remove_at(&mut self, index: usize) {
        let size = self.size() as usize;
        if index + 1 < size {
            let from = Self::entry_offset(index + 1);
            let to = Self::entry_offset(size);
            self.data.as_mut().copy_within(from..to, Self::entry_offset(index));
        }
        self.set_size(size as i32 - 1);
    }

    /// Move slots `[start, end)` of this page into `dest` at `dest_start`,
    /// shifting the tails of both pages and updating both sizes.
    pub fn move_range<U: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        dest: &mut InternalPage<U, W>,
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

        if end < src_size {
            let from = Self::entry_offset(end);
            let to = Self::entry_offset(src_size);
            self.data.as_mut().copy_within(from..to, src_from);
        }

        self.set_size((src_size - count) as i32);
        dest.set_size((dest_size + count) as i32);
    }

    fn bump_size_to(&mut self, size: usize) {
        if self.size() < size as i32 {
            self.set_size(size as i32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: i64) -> GenericKey<8> {
        GenericKey::from_i64(v)
    }

    #[test]
    fn test_new_root_shape() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut page = InternalPage::<_, 8>::new(&mut buf[..]);
        page.init(4);
        assert_eq!(page.size(), 1);
        page.set_child_at(0, 10);
        page.set_entry_at(1, &key(50), 11);
        assert_eq!(page.size(), 2);
        assert_eq!(page.child_for(&key(10)), 10);
        assert_eq!(page.child_for(&key(50)), 11);
        assert_eq!(page.child_for(&key(99)), 11);
    }

    #[test]
    fn test_upper_bound_ignores_slot_zero() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut page = InternalPage::<_, 8>::new(&mut buf[..]);
        page.init(8);
        page.set_child_at(0, 1);
        page.set_entry_at(1, &key(10), 2);
        page.set_entry_at(2, &key(20), 3);
        page.set_entry_at(3, &key(30), 4);
        assert_eq!(page.upper_bound(&key(5)), 1);
        assert_eq!(page.upper_bound(&key(10)), 2);
        assert_eq!(page.upper_bound(&key(25)), 3);
        assert_eq!(page.upper_bound(&key(99)), 4);
    }

    #[test]
    fn test_insert_and_remove() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut page = InternalPage::<_, 8>::new(&mut buf[..]);
        page.init(8);
        page.set_child_at(0, 1);
        page.insert(&key(20), 3);
        page.insert(&key(10), 2);
        page.insert(&key(30), 4);
        assert_eq!(page.size(), 4);
        assert_eq!(page.child_for(&key(15)), 2);
        page.remove(&key(20));
        assert_eq!(page.size(), 3);
        assert_eq!(page.child_for(&key(25)), 2);
        assert_eq!(page.child_for(&key(35)), 4);
    }

    #[test]
    fn test_move_range_keeps_children() {
        let mut left_buf = [0u8; PAGE_SIZE];
        let mut right_buf = [0u8; PAGE_SIZE];
        let mut left = InternalPage::<_, 8>::new(&mut left_buf[..]);
        let mut right = InternalPage::<_, 8>::new(&mut right_buf[..]);
        left.init(8);
        right.init(8);
        right.set_size(0);
        left.set_child_at(0, 1);
        for (i, v) in [10i64, 20, 30, 40, 50].iter().enumerate() {
            left.set_entry_at(i + 1, &key(*v), (i + 2) as PageId);
        }
        assert_eq!(left.size(), 6);
        left.move_range(&mut right, 3, 6, 0);
        assert_eq!(left.size(), 3);
        assert_eq!(right.size(), 3);
        assert_eq!(right.key_at(0).to_i64(), 30);
        assert_eq!(right.child_at(0), 4);
        assert_eq!(right.child_at(2), 6);
    }
}
