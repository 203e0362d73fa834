//! Operation context for tree descents.
//!
//! Every tree operation threads one of these through its descent. The
//! context owns the tree-latch guard and every page latch + pin the
//! operation has accumulated, so releasing in a single sweep (crabbing)
//! and cleaning up on every exit path are both mechanical.

use lattice_buffer::{BufferPoolManager, PageReadGuard, PageWriteGuard};
use lattice_common::page::PageId;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;
use std::collections::{HashSet, VecDeque};

/// Guard over the tree-wide root latch, read mode.
pub(crate) type RootReadGuard = ArcRwLockReadGuard<RawRwLock, PageId>;
/// Guard over the tree-wide root latch, write mode.
pub(crate) type RootWriteGuard = ArcRwLockWriteGuard<RawRwLock, PageId>;

/// The tree latch as held by an operation.
pub(crate) enum RootLatch {
    Read(RootReadGuard),
    Write(RootWriteGuard),
}

/// A page latch as held by an operation.
pub(crate) enum PageLatch {
    Read(PageReadGuard),
    Write(PageWriteGuard),
}

/// A page the operation holds latched and pinned.
pub(crate) struct LatchedPage {
    pub id: PageId,
    latch: PageLatch,
}

impl LatchedPage {
    pub fn read(id: PageId, guard: PageReadGuard) -> Self {
        Self {
            id,
            latch: PageLatch::Read(guard),
        }
    }

    pub fn write(id: PageId, guard: PageWriteGuard) -> Self {
        Self {
            id,
            latch: PageLatch::Write(guard),
        }
    }

    pub fn data(&self) -> &[u8] {
        match &self.latch {
            PageLatch::Read(guard) => &guard[..],
            PageLatch::Write(guard) => &guard[..],
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.latch {
            PageLatch::Write(guard) => &mut guard[..],
            // An operation only ever mutates pages it latched for write;
            // reaching this is a protocol violation, which is fatal.
            PageLatch::Read(_) => panic!("write access to {} through a read latch", self.id),
        }
    }

    pub fn is_write_latched(&self) -> bool {
        matches!(self.latch, PageLatch::Write(_))
    }
}

/// Latches, pins, and deferred deletes accumulated by one operation.
pub(crate) struct OpContext {
    /// The tree latch, while held.
    root_latch: Option<RootLatch>,
    /// Latched + pinned pages in descent order, oldest first. Released
    /// in a single sweep and unpinned clean.
    pub page_set: VecDeque<LatchedPage>,
    /// Pages the operation modified: unlatched and unpinned dirty at
    /// cleanup.
    pub release_set: Vec<LatchedPage>,
    /// Pages to deallocate after all latches and pins are gone.
    pub deleted: HashSet<PageId>,
}

impl OpContext {
    pub fn new() -> Self {
        Self {
            root_latch: None,
            page_set: VecDeque::new(),
            release_set: Vec::new(),
            deleted: HashSet::new(),
        }
    }

    pub fn set_root_latch(&mut self, latch: RootLatch) {
        debug_assert!(self.root_latch.is_none());
        self.root_latch = Some(latch);
    }

    pub fn release_root_latch(&mut self) {
        self.root_latch = None;
    }

    /// Current root page id, read through the held tree latch.
    pub fn root(&self) -> PageId {
        match &self.root_latch {
            Some(RootLatch::Read(guard)) => **guard,
            Some(RootLatch::Write(guard)) => **guard,
            None => panic!("root read without holding the tree latch"),
        }
    }

    /// Mutable root pointer; requires the tree latch in write mode.
    pub fn root_mut(&mut self) -> &mut PageId {
        match &mut self.root_latch {
            Some(RootLatch::Write(guard)) => &mut *guard,
            _ => panic!("root change without holding the tree latch for write"),
        }
    }

    pub fn push_page(&mut self, page: LatchedPage) {
        self.page_set.push_back(page);
    }

    /// Deepest page still held from the descent.
    pub fn current(&self) -> Option<&LatchedPage> {
        self.page_set.back()
    }

    /// Pops the deepest held page for structural work.
    pub fn pop_current(&mut self) -> Option<LatchedPage> {
        self.page_set.pop_back()
    }

    /// Single-sweep release of everything held from the descent: the
    /// tree latch and every page in the page set (unpinned clean).
    pub fn release_ancestors(&mut self, bpm: &BufferPoolManager) {
        self.root_latch = None;
        while let Some(page) = self.page_set.pop_front() {
            let id = page.id;
            drop(page);
            bpm.unpin_page(id, false);
        }
    }

    /// Finds a page this operation already holds write-latched.
    ///
    /// Used when re-parenting moved children: a child the operation
    /// itself holds must be written through the held guard, not
    /// re-latched.
    pub fn find_write_latched_mut(&mut self, id: PageId) -> Option<&mut LatchedPage> {
        self.release_set
            .iter_mut()
            .chain(self.page_set.iter_mut())
            .find(|page| page.id == id && page.is_write_latched())
    }

    /// Releases everything and performs deferred deletes. Invoked on
    /// every exit path.
    pub fn cleanup(&mut self, bpm: &BufferPoolManager) {
        self.root_latch = None;
        while let Some(page) = self.page_set.pop_front() {
            let id = page.id;
            drop(page);
            bpm.unpin_page(id, false);
        }
        for page in self.release_set.drain(..) {
            let id = page.id;
            drop(page);
            bpm.unpin_page(id, true);
        }
        for page_id in self.deleted.drain() {
            match bpm.delete_page(page_id) {
                Ok(true) => {}
                Ok(false) => log::debug!("deferred delete of {} skipped: still pinned", page_id),
                Err(e) => log::warn!("deferred delete of {} failed: {}", page_id, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_buffer::{BufferPoolConfig, DiskDevice};
    use lattice_common::error::Result;
    use lattice_common::page::PAGE_SIZE;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    struct MemDisk {
        pages: Mutex<HashMap<PageId, Box<[u8; PAGE_SIZE]>>>,
        next_page_id: AtomicI32,
    }

    impl MemDisk {
        fn new() -> Self {
            Self {
                pages: Mutex::new(HashMap::new()),
                next_page_id: AtomicI32::new(1),
            }
        }
    }

    impl DiskDevice for MemDisk {
        fn allocate_page(&self) -> Result<PageId> {
            Ok(PageId(self.next_page_id.fetch_add(1, Ordering::SeqCst)))
        }

        fn deallocate_page(&self, _page_id: PageId) -> Result<()> {
            Ok(())
        }

        fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
            match self.pages.lock().get(&page_id) {
                Some(data) => buf.copy_from_slice(&data[..]),
                None => buf.fill(0),
            }
            Ok(())
        }

        fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
            self.pages.lock().insert(page_id, Box::new(*buf));
            Ok(())
        }
    }

    fn test_pool() -> BufferPoolManager {
        BufferPoolManager::new(BufferPoolConfig { pool_size: 8 }, Arc::new(MemDisk::new()))
    }

    #[test]
    fn test_cleanup_unpins_page_set_clean() {
        let bpm = test_pool();
        let (page_id, frame) = bpm.new_page().unwrap();
        let guard = frame.latch_read();

        let mut ctx = OpContext::new();
        ctx.push_page(LatchedPage::read(page_id, guard));
        ctx.cleanup(&bpm);

        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_cleanup_unpins_release_set_dirty() {
        let bpm = test_pool();
        let (page_id, frame) = bpm.new_page().unwrap();
        let guard = frame.latch_write();

        let mut ctx = OpContext::new();
        ctx.release_set.push(LatchedPage::write(page_id, guard));
        ctx.cleanup(&bpm);

        assert_eq!(frame.pin_count(), 0);
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_cleanup_performs_deferred_deletes() {
        let bpm = test_pool();
        let (page_id, frame) = bpm.new_page().unwrap();
        let guard = frame.latch_write();

        let mut ctx = OpContext::new();
        ctx.release_set.push(LatchedPage::write(page_id, guard));
        ctx.deleted.insert(page_id);
        ctx.cleanup(&bpm);

        assert!(!bpm.contains(page_id));
    }

    #[test]
    fn test_release_ancestors_keeps_release_set() {
        let bpm = test_pool();
        let (p1, f1) = bpm.new_page().unwrap();
        let (p2, f2) = bpm.new_page().unwrap();

        let mut ctx = OpContext::new();
        ctx.push_page(LatchedPage::read(p1, f1.latch_read()));
        ctx.release_set.push(LatchedPage::write(p2, f2.latch_write()));

        ctx.release_ancestors(&bpm);
        assert_eq!(f1.pin_count(), 0);
        assert_eq!(f2.pin_count(), 1); // untouched by the sweep

        ctx.cleanup(&bpm);
        assert_eq!(f2.pin_count(), 0);
    }

    #[test]
    fn test_find_write_latched() {
        let bpm = test_pool();
        let (p1, f1) = bpm.new_page().unwrap();
        let (p2, f2) = bpm.new_page().unwrap();

        let mut ctx = OpContext::new();
        ctx.push_page(LatchedPage::read(p1, f1.latch_read()));
        ctx.release_set.push(LatchedPage::write(p2, f2.latch_write()));

        // Read-latched pages are not candidates for in-place writes
        assert!(ctx.find_write_latched_mut(p1).is_none());
        assert!(ctx.find_write_latched_mut(p2).is_some());
        assert!(ctx.find_write_latched_mut(PageId(99)).is_none());

        ctx.cleanup(&bpm);
    }
}
