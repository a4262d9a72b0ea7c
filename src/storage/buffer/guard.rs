//! RAII guards for page access.
//!
//! A guard owns one pin on a buffer pool frame and releases it on drop:
//!
//! - [`PageGuard`] - pin only; locks the page content on demand
//! - [`ReadPageGuard`] - pin plus the frame's read latch (shared)
//! - [`WritePageGuard`] - pin plus the frame's write latch (exclusive)
//!
//! Guards are movable (transferring the pin) but not clonable.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::types::{FrameId, PageId, PAGE_SIZE};

use super::manager::BufferPoolManager;

/// Guard holding a pin on a page without a content latch.
///
/// `read()`/`write()` take the frame latch for the duration of the returned
/// lock guard; `write()` marks the page dirty. `into_read()`/`into_write()`
/// trade the guard for a latched flavor without releasing the pin.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    dirty: bool,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, frame_id: FrameId, page_id: PageId) -> Self {
        Self {
            bpm,
            frame_id,
            page_id,
            dirty: false,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Lock the page content for reading.
    pub fn read(&self) -> RwLockReadGuard<'a, [u8; PAGE_SIZE]> {
        self.bpm.frame_data(self.frame_id).read()
    }

    /// Lock the page content for writing and mark the page dirty.
    pub fn write(&mut self) -> RwLockWriteGuard<'a, [u8; PAGE_SIZE]> {
        self.dirty = true;
        self.bpm.frame_data(self.frame_id).write()
    }

    /// Convert into a read guard, acquiring the frame's read latch.
    pub fn into_read(self) -> ReadPageGuard<'a> {
        let this = ManuallyDrop::new(self);
        let lock = this.bpm.frame_data(this.frame_id).read();
        ReadPageGuard {
            bpm: this.bpm,
            frame_id: this.frame_id,
            page_id: this.page_id,
            lock: Some(lock),
        }
    }

    /// Convert into a write guard, acquiring the frame's write latch.
    pub fn into_write(self) -> WritePageGuard<'a> {
        let this = ManuallyDrop::new(self);
        let lock = this.bpm.frame_data(this.frame_id).write();
        WritePageGuard {
            bpm: this.bpm,
            frame_id: this.frame_id,
            page_id: this.page_id,
            lock: Some(lock),
        }
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_frame(self.frame_id, self.dirty);
    }
}

/// Guard holding a pin and the frame's read latch.
///
/// Multiple read guards may cover the same page simultaneously. Derefs to
/// the raw page bytes.
pub struct ReadPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    lock: Option<RwLockReadGuard<'a, [u8; PAGE_SIZE]>>,
}

impl ReadPageGuard<'_> {
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for ReadPageGuard<'_> {
    type Target = [u8; PAGE_SIZE];

    #[inline]
    fn deref(&self) -> &[u8; PAGE_SIZE] {
        self.lock.as_deref().expect("latch released before drop")
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Latch first, pin second.
        self.lock.take();
        self.bpm.unpin_frame(self.frame_id, false);
    }
}

/// Guard holding a pin and the frame's write latch.
///
/// The page is unconditionally marked dirty when the guard drops.
pub struct WritePageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    lock: Option<RwLockWriteGuard<'a, [u8; PAGE_SIZE]>>,
}

impl WritePageGuard<'_> {
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for WritePageGuard<'_> {
    type Target = [u8; PAGE_SIZE];

    #[inline]
    fn deref(&self) -> &[u8; PAGE_SIZE] {
        self.lock.as_deref().expect("latch released before drop")
    }
}

impl DerefMut for WritePageGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.lock.as_deref_mut().expect("latch released before drop")
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.lock.take();
        self.bpm.unpin_frame(self.frame_id, true);
    }
}
