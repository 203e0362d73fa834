//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Selects a victim frame for eviction and removes it.
    ///
    /// Returns None if no frames are evictable.
    fn victim(&self) -> Option<FrameId>;

    /// Removes a frame from the evictable set. Idempotent.
    fn pin(&self, frame_id: FrameId);

    /// Marks a frame evictable at the most-recently-used position,
    /// refreshing its recency if it is already present.
    fn unpin(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// LRU replacement policy.
///
/// Backed by a linked hash map: a doubly linked list of frame ids in
/// recency order plus a frame id -> list position mapping, giving O(1)
/// victim selection, pin, and unpin. The front of the list is the least
/// recently used frame; the back is the most recently used. An internal
/// mutex protects both structures as one unit.
pub struct LruReplacer {
    /// Number of frames this replacer may track.
    num_frames: usize,
    /// Evictable frames, front = LRU, back = MRU.
    inner: Mutex<LinkedHashMap<FrameId, ()>>,
}

impl LruReplacer {
    /// Creates a new LRU replacer for the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            inner: Mutex::new(LinkedHashMap::with_capacity(num_frames)),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for LruReplacer {
    fn victim(&self) -> Option<FrameId> {
        self.inner.lock().pop_front().map(|(frame_id, _)| frame_id)
    }

    fn pin(&self, frame_id: FrameId) {
        if (frame_id.0 as usize) >= self.num_frames {
            return;
        }
        self.inner.lock().remove(&frame_id);
    }

    fn unpin(&self, frame_id: FrameId) {
        if (frame_id.0 as usize) >= self.num_frames {
            return;
        }
        let mut inner = self.inner.lock();
        // Remove first so re-insertion lands at the MRU end.
        inner.remove(&frame_id);
        inner.insert(frame_id, ());
    }

    fn size(&self) -> usize {
        self.inner.lock().len()
    }
}
