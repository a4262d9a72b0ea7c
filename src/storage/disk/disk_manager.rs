use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual disk I/O: a single database
/// file addressed in `PAGE_SIZE` units, page `id` at byte offset
/// `id * PAGE_SIZE`.
///
/// Allocation is lazy: `allocate_page` only hands out an ID, the file grows
/// when the page is first written. Deallocated IDs are reused.
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicI32,
    free_pages: Mutex<Vec<PageId>>,
}

impl DiskManager {
    /// Open (or create) the database file at the given path.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let file_size = file.metadata()?.len();
        let next_page_id = (file_size as usize / PAGE_SIZE) as PageId;

        Ok(Self {
            db_file: Mutex::new(file),
            next_page_id: AtomicI32::new(next_page_id),
            free_pages: Mutex::new(Vec::new()),
        })
    }

    /// Read a page from disk into the provided buffer.
    ///
    /// Pages past the end of the file have never been written; the buffer is
    /// zero-filled for those.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset as u64 >= file_size {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Write a page to disk.
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(())
    }

    /// Hand out a fresh page ID, reusing a deallocated one when available.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return Ok(page_id);
        }
        Ok(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Return a page ID to the allocator for reuse.
    pub fn deallocate_page(&self, page_id: PageId) {
        if page_id != INVALID_PAGE_ID {
            self.free_pages.lock().push(page_id);
        }
    }

    /// Sync the database file to stable storage.
    pub fn shutdown(&self) -> Result<(), DiskManagerError> {
        self.db_file.lock().sync_all()?;
        Ok(())
    }

    fn page_offset(&self, page_id: PageId) -> usize {
        page_id as usize * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_allocate_is_dense() {
        let file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(file.path()).unwrap();
        assert_eq!(dm.allocate_page().unwrap(), 0);
        assert_eq!(dm.allocate_page().unwrap(), 1);
        assert_eq!(dm.allocate_page().unwrap(), 2);
    }

    #[test]
    fn test_deallocate_reuses_id() {
        let file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(file.path()).unwrap();
        let a = dm.allocate_page().unwrap();
        let _b = dm.allocate_page().unwrap();
        dm.deallocate_page(a);
        assert_eq!(dm.allocate_page().unwrap(), a);
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(file.path()).unwrap();
        let page_id = dm.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        dm.write_page(page_id, &data).unwrap();

        let mut readback = [0xffu8; PAGE_SIZE];
        dm.read_page(page_id, &mut readback).unwrap();
        assert_eq!(readback, data);
    }

    #[test]
    fn test_read_unwritten_page_is_zeroed() {
        let file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(file.path()).unwrap();
        let page_id = dm.allocate_page().unwrap();

        let mut buf = [0xffu8; PAGE_SIZE];
        dm.read_page(page_id, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_page_id_rejected() {
        let file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(file.path()).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        assert!(dm.read_page(INVALID_PAGE_ID, &mut buf).is_err());
        assert!(dm.write_page(INVALID_PAGE_ID, &buf).is_err());
    }
}
