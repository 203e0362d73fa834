//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{LruReplacer, Replacer};
use lattice_common::error::{LatticeError, Result};
use lattice_common::page::{PageId, PAGE_SIZE};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use sysinfo::System;

/// Interface the buffer pool requires from the block device layer.
///
/// Page ids are allocated monotonically starting at 1; page 0 is
/// reserved for the index header page and is never handed out.
pub trait DiskDevice: Send + Sync {
    /// Allocates a new page and returns its id.
    fn allocate_page(&self) -> Result<PageId>;

    /// Returns a page to the device. Freed ids are not reused.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;

    /// Reads a page into the buffer. Pages never written read as zeroes.
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Writes a page to the device.
    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()>;
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub pool_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { pool_size: 1024 }
    }
}

impl BufferPoolConfig {
    /// Sizes the pool to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames to ensure useful caching even on low-memory
    /// systems.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let pool_size = (target_bytes / PAGE_SIZE).max(1_000);

        Self { pool_size }
    }
}

/// State guarded by the pool's single internal mutex: the page table,
/// the free list, the replacer, and pin/dirty metadata transitions.
struct PoolInner {
    /// Page id to frame id mapping.
    page_table: HashMap<PageId, FrameId>,
    /// Frame ids not holding any page. Drained before eviction.
    free_list: VecDeque<FrameId>,
    /// LRU over unpinned frames.
    replacer: LruReplacer,
    /// Evicted dirty pages whose write-back has not yet landed on disk.
    /// A fetch of one of these ids must wait for the write to complete
    /// before re-reading, or it would observe stale bytes.
    flushing: HashMap<PageId, Arc<Box<[u8; PAGE_SIZE]>>>,
}

/// Buffer pool manager.
///
/// Maps page ids to a bounded set of in-memory frames with:
/// - Pin counting for concurrent access
/// - LRU replacement of unpinned frames
/// - Dirty tracking with write-back on eviction
///
/// Disk I/O for a dirty eviction happens outside the pool mutex: the
/// victim's bytes are copied out under the mutex and written after it is
/// released, while the incoming page is loaded under the frame's write
/// latch so concurrent fetchers of the same page block until the bytes
/// are in place.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<Arc<BufferFrame>>,
    disk: Arc<dyn DiskDevice>,
    inner: Mutex<PoolInner>,
}

impl BufferPoolManager {
    /// Creates a new buffer pool over the given disk device.
    pub fn new(config: BufferPoolConfig, disk: Arc<dyn DiskDevice>) -> Self {
        let pool_size = config.pool_size;
        let frames: Vec<_> = (0..pool_size)
            .map(|i| Arc::new(BufferFrame::new(FrameId(i as u32))))
            .collect();
        let free_list: VecDeque<_> = (0..pool_size).map(|i| FrameId(i as u32)).collect();

        Self {
            pool_size,
            frames,
            disk,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                replacer: LruReplacer::new(pool_size),
                flushing: HashMap::new(),
            }),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Checks if a page is resident in the pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().page_table.contains_key(&page_id)
    }

    /// Fetches a page, reading it from disk if it is not resident.
    ///
    /// The returned frame is pinned; the caller must pair this call with
    /// exactly one [`unpin_page`](Self::unpin_page).
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<BufferFrame>> {
        if !page_id.is_valid() {
            return Err(LatticeError::PageNotFound(page_id));
        }
        self.load_page(page_id, true)
    }

    /// Allocates a fresh zeroed page.
    ///
    /// The returned frame is pinned; the caller must pair this call with
    /// exactly one [`unpin_page`](Self::unpin_page).
    pub fn new_page(&self) -> Result<(PageId, Arc<BufferFrame>)> {
        let page_id = self.disk.allocate_page()?;
        let frame = self.load_page(page_id, false)?;
        Ok((page_id, frame))
    }

    /// Drops one pin on a page, ORing the dirty flag into the frame.
    ///
    /// Returns true iff the page was resident.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            inner.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes a dirty page back to disk and clears its dirty flag.
    ///
    /// Idempotent; does not require the page to be unpinned. Returns
    /// true iff the page was resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        // Take a pool-internal pin so the frame cannot be evicted while
        // we write outside the mutex.
        let (frame, frame_id) = {
            let inner = self.inner.lock();
            match inner.page_table.get(&page_id) {
                None => return Ok(false),
                Some(&frame_id) => {
                    let frame = Arc::clone(&self.frames[frame_id.0 as usize]);
                    frame.pin();
                    inner.replacer.pin(frame_id);
                    (frame, frame_id)
                }
            }
        };

        let result = if frame.is_dirty() {
            let guard = frame.latch_read();
            let written = self.disk.write_page(page_id, &guard);
            if written.is_ok() {
                frame.set_dirty(false);
            }
            written
        } else {
            Ok(())
        };

        let inner = self.inner.lock();
        if frame.unpin() == 0 {
            inner.replacer.unpin(frame_id);
        }
        result.map(|_| true)
    }

    /// Flushes every resident page.
    pub fn flush_all(&self) -> Result<()> {
        let page_ids: Vec<PageId> = self.inner.lock().page_table.keys().copied().collect();
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Removes a page from the pool and returns its frame to the free
    /// list.
    ///
    /// Returns Ok(true) if the page is gone (including the vacuous case
    /// where it was not resident), Ok(false) if it is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.is_pinned() {
            return Ok(false);
        }
        self.disk.deallocate_page(page_id)?;
        inner.page_table.remove(&page_id);
        inner.replacer.pin(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);
        Ok(true)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;
        for &frame_id in inner.page_table.values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }
        BufferPoolStats {
            total_frames: self.pool_size,
            free_frames: inner.free_list.len(),
            used_frames: inner.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }

    /// Brings a page into a frame, either from disk or freshly zeroed.
    fn load_page(&self, page_id: PageId, read_from_disk: bool) -> Result<Arc<BufferFrame>> {
        loop {
            let mut inner = self.inner.lock();

            if let Some(&frame_id) = inner.page_table.get(&page_id) {
                let frame = &self.frames[frame_id.0 as usize];
                frame.pin();
                inner.replacer.pin(frame_id);
                return Ok(Arc::clone(frame));
            }
            if inner.flushing.contains_key(&page_id) {
                // A write-back of this page is in flight; wait for it to
                // land before re-reading from disk.
                drop(inner);
                std::thread::yield_now();
                continue;
            }

            let (frame_id, writeback) = self.acquire_frame(&mut inner)?;
            let frame = Arc::clone(&self.frames[frame_id.0 as usize]);
            frame.set_page_id(page_id);
            frame.set_dirty(false);
            frame.pin();
            inner.page_table.insert(page_id, frame_id);
            // Take the write latch while the mapping is still private to
            // this thread: a concurrent fetcher that finds the mapping
            // after the mutex drops will block on the latch until the
            // bytes are in place.
            let mut guard = frame.latch_write();
            drop(inner);

            if let Some((old_page_id, data)) = writeback {
                let written = self.disk.write_page(old_page_id, &data);
                self.inner.lock().flushing.remove(&old_page_id);
                if let Err(e) = written {
                    drop(guard);
                    self.abort_load(page_id, frame_id);
                    return Err(e);
                }
            }

            let loaded = if read_from_disk {
                self.disk.read_page(page_id, &mut guard)
            } else {
                guard.fill(0);
                Ok(())
            };
            drop(guard);
            if let Err(e) = loaded {
                self.abort_load(page_id, frame_id);
                return Err(e);
            }
            return Ok(frame);
        }
    }

    /// Picks a frame for reuse: free list first, then LRU eviction.
    ///
    /// A dirty victim's bytes are copied out and parked in `flushing`;
    /// the caller writes them to disk after the mutex is released.
    fn acquire_frame(
        &self,
        inner: &mut PoolInner,
    ) -> Result<(FrameId, Option<(PageId, Arc<Box<[u8; PAGE_SIZE]>>)>)> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok((frame_id, None));
        }

        let frame_id = inner.replacer.victim().ok_or(LatticeError::BufferPoolFull)?;
        let frame = &self.frames[frame_id.0 as usize];
        debug_assert!(!frame.is_pinned(), "replacer returned a pinned frame");

        let old_page_id = frame.page_id();
        let mut writeback = None;
        if old_page_id.is_valid() {
            inner.page_table.remove(&old_page_id);
            if frame.is_dirty() {
                log::debug!("evicting dirty {} from {}", old_page_id, frame_id);
                let data = Arc::new(frame.snapshot());
                inner.flushing.insert(old_page_id, Arc::clone(&data));
                writeback = Some((old_page_id, data));
            }
        }
        Ok((frame_id, writeback))
    }

    /// Rolls back a failed page load.
    fn abort_load(&self, page_id: PageId, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        inner.page_table.remove(&page_id);
        let frame = &self.frames[frame_id.0 as usize];
        if frame.unpin() == 0 {
            // Nobody else raced onto the half-loaded page; the frame
            // can be recycled. Otherwise it stays orphaned until the
            // racing pins drain, which only happens after a disk error.
            frame.set_page_id(PageId::INVALID);
            inner.free_list.push_back(frame_id);
        }
    }
}

impl std::fmt::Debug for BufferPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("BufferPoolManager")
            .field("pool_size", &self.pool_size)
            .field("used_frames", &stats.used_frames)
            .field("free_frames", &stats.free_frames)
            .finish()
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}
