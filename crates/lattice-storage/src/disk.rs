//! Disk manager for page-level file I/O.

use lattice_buffer::DiskDevice;
use lattice_common::error::{LatticeError, Result};
use lattice_common::page::{PageId, PAGE_SIZE};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Path to the database file.
    pub db_path: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./lattice.db"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages of a single database file.
///
/// Page N lives at byte offset N * PAGE_SIZE. Page ids are allocated
/// monotonically starting at 1; page 0 is reserved for the index header
/// page. Pages that have been allocated but never written read back as
/// zeroes. Deallocated ids are never reused.
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicI32,
    fsync_enabled: bool,
}

impl DiskManager {
    /// Opens (or creates) the database file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.db_path)?;

        let file_size = file.metadata()?.len();
        let pages_on_disk = (file_size / PAGE_SIZE as u64) as i32;
        // Page 0 is the header page, so allocation starts at 1 even for
        // a brand-new file.
        let next_page_id = pages_on_disk.max(1);

        Ok(Self {
            db_file: Mutex::new(file),
            next_page_id: AtomicI32::new(next_page_id),
            fsync_enabled: config.fsync_enabled,
        })
    }

    /// Reads a page from disk into the buffer.
    ///
    /// A page beyond the end of the file reads as zeroes.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(LatticeError::PageNotFound(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(LatticeError::PageNotFound(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        if self.fsync_enabled {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Allocates a new page id.
    pub fn allocate_page(&self) -> PageId {
        PageId(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns a page to the manager.
    ///
    /// The allocator is monotonic, so freed ids are simply retired.
    pub fn deallocate_page(&self, page_id: PageId) {
        log::trace!("deallocated {}", page_id);
    }

    /// Returns the id the next allocation will produce.
    pub fn next_page_id(&self) -> PageId {
        PageId(self.next_page_id.load(Ordering::SeqCst))
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }
}

impl DiskDevice for DiskManager {
    fn allocate_page(&self) -> Result<PageId> {
        Ok(DiskManager::allocate_page(self))
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        DiskManager::deallocate_page(self, page_id);
        Ok(())
    }

    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        DiskManager::read_page(self, page_id, buf)
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        DiskManager::write_page(self, page_id, buf)
    }
}
