//! Ordered forward iteration over the tree's leaf chain.

use super::page::LeafRef;
use bytes::Bytes;
use lattice_buffer::{BufferPoolManager, PageReadGuard};
use lattice_common::error::Result;
use lattice_common::page::PageId;
use lattice_common::types::Rid;
use std::sync::Arc;

/// Forward iterator yielding `(key, rid)` pairs in strictly increasing
/// key order.
///
/// The iterator holds a pin and a read latch on its current leaf.
/// Advancing off a leaf releases that hold *before* the next leaf is
/// fetched and latched, so an iterator never holds two leaves at once.
/// A buffer pool exhausted during the hop surfaces as an `Err` item.
pub struct TreeIterator {
    bpm: Arc<BufferPoolManager>,
    key_size: usize,
    current: Option<(PageId, PageReadGuard)>,
    index: usize,
}

impl TreeIterator {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        key_size: usize,
        page_id: PageId,
        guard: PageReadGuard,
        index: usize,
    ) -> Self {
        Self {
            bpm,
            key_size,
            current: Some((page_id, guard)),
            index,
        }
    }

    /// An iterator that is already at the end.
    pub(crate) fn exhausted(bpm: Arc<BufferPoolManager>, key_size: usize) -> Self {
        Self {
            bpm,
            key_size,
            current: None,
            index: 0,
        }
    }
}

impl Iterator for TreeIterator {
    type Item = Result<(Bytes, Rid)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (page_id, guard) = self.current.take()?;

            let size = LeafRef::new(&guard[..], self.key_size).size() as usize;
            if self.index < size {
                let leaf = LeafRef::new(&guard[..], self.key_size);
                let (key, rid) = leaf.item_at(self.index);
                let item = (Bytes::copy_from_slice(key), rid);
                self.index += 1;
                self.current = Some((page_id, guard));
                return Some(Ok(item));
            }

            // Off the end of this leaf: release it, then hop to the
            // next one.
            let next = LeafRef::new(&guard[..], self.key_size).next_page_id();
            drop(guard);
            self.bpm.unpin_page(page_id, false);
            if !next.is_valid() {
                return None;
            }
            match self.bpm.fetch_page(next) {
                Ok(frame) => {
                    let guard = frame.latch_read();
                    self.index = 0;
                    self.current = Some((next, guard));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl Drop for TreeIterator {
    fn drop(&mut self) {
        if let Some((page_id, guard)) = self.current.take() {
            drop(guard);
            self.bpm.unpin_page(page_id, false);
        }
    }
}
