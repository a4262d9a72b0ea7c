use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::guard::{PageGuard, ReadPageGuard, WritePageGuard};
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// One slot of the frame array. The content latch doubles as the page's
/// reader/writer latch for index operations.
struct Frame {
    data: RwLock<[u8; PAGE_SIZE]>,
}

/// Per-frame metadata, only touched under the pool latch.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

/// Everything the coarse pool latch protects: the page table, the free
/// list and the frame metadata.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    metas: Vec<FrameMeta>,
}

/// A page evicted from a frame that still needs its bytes written back.
struct Victim {
    page_id: PageId,
    is_dirty: bool,
}

/// BufferPoolManager caches disk pages in a bounded frame array and brokers
/// access through pinned, latchable page guards.
///
/// The pool latch covers the page table, free list, pin counts and the
/// replacer; it is never held across disk I/O. Frame content latches are
/// acquired after it is released, except on the install path where the
/// loading thread takes the content latch first so racing fetchers of the
/// same page block until the bytes are in place.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<Frame>,
    state: Mutex<PoolState>,
    replacer: LruKReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, replacer_k, disk_manager))
    }

    pub fn with_disk_manager(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut metas = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for frame_id in 0..pool_size {
            frames.push(Frame {
                data: RwLock::new([0; PAGE_SIZE]),
            });
            metas.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                metas,
            }),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Number of frames the replacer could currently evict.
    pub fn evictable_count(&self) -> usize {
        self.replacer.size()
    }

    /// Allocate a fresh page and pin it into a frame.
    ///
    /// The frame is zeroed; the previous occupant is written back first if
    /// it was dirty. Fails with [`BufferPoolError::BufferPoolFull`] when
    /// every frame is pinned.
    pub fn new_page(&self) -> Result<PageGuard<'_>, BufferPoolError> {
        let page_id = self.disk_manager.allocate_page()?;

        let (frame_id, victim, data_lock) = {
            let mut state = self.state.lock();
            let (frame_id, victim) = match self.acquire_frame(&mut state) {
                Ok(pair) => pair,
                Err(e) => {
                    self.disk_manager.deallocate_page(page_id);
                    return Err(e);
                }
            };
            self.install_frame(&mut state, frame_id, page_id);
            // Dirty from birth: the zeroed image must reach disk even if
            // the page is evicted untouched, or a reused page id would
            // resurrect stale bytes.
            state.metas[frame_id].is_dirty = true;
            // Take the content latch before dropping the pool latch so a
            // racing fetcher of this page id blocks until the zeroing is
            // done.
            let data_lock = self.frames[frame_id].data.write();
            (frame_id, victim, data_lock)
        };

        let mut data = data_lock;
        self.write_back(&victim, &data)?;
        data.fill(0);
        drop(data);

        Ok(PageGuard::new(self, frame_id, page_id))
    }

    /// Fetch a page, pinning it; loads it from disk when not resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidOperation(format!(
                "cannot fetch invalid page ID {}",
                page_id
            )));
        }

        let (frame_id, victim, data_lock) = {
            let mut state = self.state.lock();

            if let Some(&frame_id) = state.page_table.get(&page_id) {
                let meta = &mut state.metas[frame_id];
                if meta.pin_count == 0 {
                    self.replacer.set_evictable(frame_id, false);
                }
                meta.pin_count += 1;
                self.replacer.record_access(frame_id);
                return Ok(PageGuard::new(self, frame_id, page_id));
            }

            let (frame_id, victim) = self.acquire_frame(&mut state)?;
            self.install_frame(&mut state, frame_id, page_id);
            let data_lock = self.frames[frame_id].data.write();
            (frame_id, victim, data_lock)
        };

        let mut data = data_lock;
        self.write_back(&victim, &data)?;
        self.disk_manager.read_page(page_id, &mut data)?;
        drop(data);

        Ok(PageGuard::new(self, frame_id, page_id))
    }

    /// Fetch a page and take its read latch.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>, BufferPoolError> {
        Ok(self.fetch_page(page_id)?.into_read())
    }

    /// Fetch a page and take its write latch.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>, BufferPoolError> {
        Ok(self.fetch_page(page_id)?.into_write())
    }

    /// Unpin a page, optionally marking it dirty.
    ///
    /// Returns `false` if the page is not resident or its pin count was
    /// already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let meta = &mut state.metas[frame_id];
        if meta.pin_count == 0 {
            return false;
        }
        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write a resident page's bytes to disk unconditionally and clear its
    /// dirty bit.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let frame_id = {
            let mut state = self.state.lock();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                return Err(BufferPoolError::PageNotFound(page_id));
            };
            // Self-pin so the frame cannot be repurposed mid-flush.
            let meta = &mut state.metas[frame_id];
            if meta.pin_count == 0 {
                self.replacer.set_evictable(frame_id, false);
            }
            meta.pin_count += 1;
            frame_id
        };

        let result = {
            let data = self.frames[frame_id].data.read();
            self.disk_manager.write_page(page_id, &data)
        };

        let mut state = self.state.lock();
        let meta = &mut state.metas[frame_id];
        if result.is_ok() {
            meta.is_dirty = false;
        }
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        result.map_err(Into::into)
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let page_ids: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            match self.flush_page(page_id) {
                Ok(()) => {}
                // Evicted between the snapshot and the flush; nothing to do.
                Err(BufferPoolError::PageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drop a page from the pool and deallocate its ID.
    ///
    /// Succeeds trivially when the page is not resident; fails with
    /// [`BufferPoolError::PagePinned`] when it is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        {
            let mut state = self.state.lock();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                self.disk_manager.deallocate_page(page_id);
                return Ok(());
            };
            let meta = &mut state.metas[frame_id];
            if meta.pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }
            meta.page_id = INVALID_PAGE_ID;
            meta.is_dirty = false;
            state.page_table.remove(&page_id);
            self.replacer.remove(frame_id);
            state.free_list.push_back(frame_id);
        }
        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// Borrow a frame's content latch. Used by the guards.
    pub(crate) fn frame_data(&self, frame_id: FrameId) -> &RwLock<[u8; PAGE_SIZE]> {
        &self.frames[frame_id].data
    }

    /// Guard-drop path: decrement the pin and hand the frame to the
    /// replacer when it reaches zero.
    pub(crate) fn unpin_frame(&self, frame_id: FrameId, is_dirty: bool) {
        let mut state = self.state.lock();
        let meta = &mut state.metas[frame_id];
        debug_assert!(meta.pin_count > 0, "unpin of unpinned frame {}", frame_id);
        if meta.pin_count == 0 {
            return;
        }
        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
    }

    /// Find a frame for a new occupant: free list first, then the replacer.
    /// Returns the frame plus whatever page has to be written back.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<(FrameId, Victim), BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok((
                frame_id,
                Victim {
                    page_id: INVALID_PAGE_ID,
                    is_dirty: false,
                },
            ));
        }

        let frame_id = self
            .replacer
            .evict()
            .ok_or(BufferPoolError::BufferPoolFull)?;
        let meta = &state.metas[frame_id];
        let victim = Victim {
            page_id: meta.page_id,
            is_dirty: meta.is_dirty,
        };
        if victim.page_id != INVALID_PAGE_ID {
            state.page_table.remove(&victim.page_id);
        }
        Ok((frame_id, victim))
    }

    /// Register `page_id` in `frame_id` with a single pin.
    fn install_frame(&self, state: &mut PoolState, frame_id: FrameId, page_id: PageId) {
        let meta = &mut state.metas[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
    }

    /// Write an evicted page's bytes back to disk if it left dirty.
    fn write_back(&self, victim: &Victim, data: &[u8; PAGE_SIZE]) -> Result<(), BufferPoolError> {
        if victim.is_dirty && victim.page_id != INVALID_PAGE_ID {
            debug!("writing back evicted page {}", victim.page_id);
            self.disk_manager.write_page(victim.page_id, data)?;
        }
        Ok(())
    }
}
