//! Concurrent B+ tree operations.
//!
//! All three public operations descend from the root under the crabbing
//! discipline:
//!
//! - `get` is purely optimistic: interior pages are read-latched
//!   hand-over-hand and the tree latch is dropped once the root page is
//!   latched.
//! - `insert`/`remove` first run an optimistic descent that write-
//!   latches only the leaf. If the leaf turns out unsafe (a split or
//!   underflow could cascade), everything is released and the descent
//!   restarts pessimistically under the write tree latch, write-latching
//!   every visited page and releasing all ancestors in a single sweep
//!   whenever the just-latched child is safe.
//!
//! Structural modifications (split, coalesce, redistribute, root
//! changes) run entirely under the latches retained by the pessimistic
//! descent.

use super::context::{LatchedPage, OpContext, RootLatch};
use super::header::HeaderMut;
use super::iterator::TreeIterator;
use super::page::{
    self, InternalMut, InternalRef, LeafMut, LeafRef, TreePage, LEAF_HEADER_SIZE, TREE_HEADER_SIZE,
};
use super::KeyComparator;
use bytes::Bytes;
use lattice_buffer::{BufferPoolManager, PageReadGuard};
use lattice_common::error::{LatticeError, Result};
use lattice_common::page::{PageId, PAGE_SIZE};
use lattice_common::types::Rid;
use parking_lot::RwLock;
use std::sync::Arc;

/// What an operation intends to do to the leaf it is descending to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessMode {
    Read,
    Insert,
    Remove,
}

/// Where an iterator descent should land.
#[derive(Clone, Copy)]
enum SeekTo<'a> {
    First,
    Key(&'a [u8]),
}

/// A clustered, order-preserving B+ tree index mapping fixed-size keys
/// to record ids.
///
/// The empty tree is represented by `root == PageId::HEADER`; every
/// root change is mirrored into the header page record for this index's
/// name.
///
/// An operation pins at most one root-to-leaf path plus one sibling
/// plus one freshly allocated page, so the buffer pool must hold at
/// least `tree_height + 3` frames.
pub struct BPlusTree {
    name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: KeyComparator,
    key_size: usize,
    leaf_max_size: u32,
    internal_max_size: u32,
    /// The tree-wide latch. The guarded value is the root page id:
    /// observing or changing it requires holding this latch.
    root: Arc<RwLock<PageId>>,
}

impl BPlusTree {
    /// Creates a tree handle. The tree starts empty.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: KeyComparator,
        key_size: usize,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Self {
        assert!(key_size > 0, "key size must be positive");
        assert!(
            leaf_max_size >= 2 && internal_max_size >= 3,
            "page capacities too small for a B+ tree"
        );
        assert!(
            LEAF_HEADER_SIZE + (leaf_max_size as usize + 1) * (key_size + Rid::SIZE) <= PAGE_SIZE,
            "leaf_max_size {} with key size {} does not fit a page",
            leaf_max_size,
            key_size
        );
        assert!(
            TREE_HEADER_SIZE + (internal_max_size as usize + 1) * (key_size + 4) <= PAGE_SIZE,
            "internal_max_size {} with key size {} does not fit a page",
            internal_max_size,
            key_size
        );
        Self {
            name: name.into(),
            bpm,
            comparator,
            key_size,
            leaf_max_size,
            internal_max_size,
            root: Arc::new(RwLock::new(PageId::HEADER)),
        }
    }

    /// This index's name, as registered in the header page.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fixed key size in bytes.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// True if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        *self.root.read() == PageId::HEADER
    }

    /// Current root page id (HEADER when empty).
    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<Rid>> {
        self.check_key(key)?;
        let mut ctx = OpContext::new();
        let result = self.get_inner(key, &mut ctx);
        ctx.cleanup(&self.bpm);
        result
    }

    /// Inserts a key/rid pair. Returns false (leaving the tree
    /// unchanged) when the key is already present.
    pub fn insert(&self, key: &[u8], rid: Rid) -> Result<bool> {
        self.check_key(key)?;
        let mut ctx = OpContext::new();
        let result = self.insert_inner(key, rid, &mut ctx);
        ctx.cleanup(&self.bpm);
        result
    }

    /// Removes a key. Returns false when the key is absent.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        let mut ctx = OpContext::new();
        let result = self.remove_inner(key, &mut ctx);
        ctx.cleanup(&self.bpm);
        result
    }

    /// Ordered forward iterator over the whole tree.
    pub fn iter(&self) -> Result<TreeIterator> {
        match self.descend_for_iter(SeekTo::First)? {
            None => Ok(TreeIterator::exhausted(
                Arc::clone(&self.bpm),
                self.key_size,
            )),
            Some((page_id, guard)) => Ok(TreeIterator::new(
                Arc::clone(&self.bpm),
                self.key_size,
                page_id,
                guard,
                0,
            )),
        }
    }

    /// Ordered forward iterator starting at an existing key.
    ///
    /// Fails with [`LatticeError::KeyNotFound`] when the exact key is
    /// absent.
    pub fn iter_from(&self, key: &[u8]) -> Result<TreeIterator> {
        self.check_key(key)?;
        match self.descend_for_iter(SeekTo::Key(key))? {
            None => Err(LatticeError::KeyNotFound),
            Some((page_id, guard)) => {
                let position =
                    LeafRef::new(&guard[..], self.key_size).position_of(key, &*self.comparator);
                match position {
                    Some(index) => Ok(TreeIterator::new(
                        Arc::clone(&self.bpm),
                        self.key_size,
                        page_id,
                        guard,
                        index,
                    )),
                    None => {
                        drop(guard);
                        self.bpm.unpin_page(page_id, false);
                        Err(LatticeError::KeyNotFound)
                    }
                }
            }
        }
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size {
            return Err(LatticeError::KeySizeMismatch {
                expected: self.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }

    // =====================================================================
    // Descent
    // =====================================================================

    /// Optimistic descent: interior pages read-latched hand-over-hand,
    /// the leaf latched according to `mode`. Returns false on an empty
    /// tree (with nothing held).
    fn find_leaf_optimistic(
        &self,
        key: &[u8],
        mode: AccessMode,
        ctx: &mut OpContext,
    ) -> Result<bool> {
        let root_guard = self.root.read_arc();
        ctx.set_root_latch(RootLatch::Read(root_guard));
        let mut current = ctx.root();
        if current == PageId::HEADER {
            ctx.release_root_latch();
            return Ok(false);
        }
        loop {
            let frame = self.bpm.fetch_page(current)?;
            let read_guard = frame.latch_read();
            let is_leaf = TreePage::new(&read_guard[..]).is_leaf();
            if is_leaf && mode != AccessMode::Read {
                // Writers take the leaf exclusively. Re-latching is
                // safe: the parent (or tree) latch is still held, so
                // this page cannot change type or be deleted in the
                // gap.
                drop(read_guard);
                let write_guard = frame.latch_write();
                ctx.release_ancestors(&self.bpm);
                ctx.push_page(LatchedPage::write(current, write_guard));
                return Ok(true);
            }
            let next = if is_leaf {
                None
            } else {
                Some(InternalRef::new(&read_guard[..], self.key_size).lookup(key, &*self.comparator))
            };
            ctx.release_ancestors(&self.bpm);
            ctx.push_page(LatchedPage::read(current, read_guard));
            match next {
                None => return Ok(true),
                Some(child) => current = child,
            }
        }
    }

    /// Pessimistic descent under the write tree latch, write-latching
    /// every visited page. Ancestors (and the tree latch) are released
    /// in a single sweep whenever the just-latched child is safe for
    /// `mode`. Returns false on an empty tree, keeping the tree latch
    /// so an insert can start a new tree under it.
    fn find_leaf_pessimistic(
        &self,
        key: &[u8],
        mode: AccessMode,
        ctx: &mut OpContext,
    ) -> Result<bool> {
        let root_guard = self.root.write_arc();
        ctx.set_root_latch(RootLatch::Write(root_guard));
        let mut current = ctx.root();
        if current == PageId::HEADER {
            return Ok(false);
        }
        loop {
            let frame = self.bpm.fetch_page(current)?;
            let guard = frame.latch_write();
            let (is_leaf, is_safe) = {
                let view = TreePage::new(&guard[..]);
                let is_safe = match mode {
                    AccessMode::Insert => view.is_safe_to_insert(),
                    AccessMode::Remove => view.is_safe_to_remove(),
                    AccessMode::Read => true,
                };
                (view.is_leaf(), is_safe)
            };
            if is_safe {
                // This page absorbs any structural change, so every
                // ancestor can go.
                ctx.release_ancestors(&self.bpm);
            }
            let next = if is_leaf {
                None
            } else {
                Some(InternalRef::new(&guard[..], self.key_size).lookup(key, &*self.comparator))
            };
            ctx.push_page(LatchedPage::write(current, guard));
            match next {
                None => return Ok(true),
                Some(child) => current = child,
            }
        }
    }

    fn get_inner(&self, key: &[u8], ctx: &mut OpContext) -> Result<Option<Rid>> {
        if !self.find_leaf_optimistic(key, AccessMode::Read, ctx)? {
            return Ok(None);
        }
        Ok(ctx
            .current()
            .and_then(|leaf| LeafRef::new(leaf.data(), self.key_size).lookup(key, &*self.comparator)))
    }

    // =====================================================================
    // Insertion
    // =====================================================================

    fn insert_inner(&self, key: &[u8], rid: Rid, ctx: &mut OpContext) -> Result<bool> {
        let mut have_leaf = self.find_leaf_optimistic(key, AccessMode::Insert, ctx)?;
        let leaf_safe = have_leaf
            && match ctx.current() {
                Some(leaf) => TreePage::new(leaf.data()).is_safe_to_insert(),
                None => false,
            };
        if !leaf_safe {
            ctx.release_ancestors(&self.bpm);
            have_leaf = self.find_leaf_pessimistic(key, AccessMode::Insert, ctx)?;
        }
        if !have_leaf {
            self.start_new_tree(key, rid, ctx)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, rid, ctx)
    }

    /// Builds a single-leaf tree under the held write tree latch.
    fn start_new_tree(&self, key: &[u8], rid: Rid, ctx: &mut OpContext) -> Result<()> {
        debug_assert_eq!(ctx.root(), PageId::HEADER);
        let (page_id, frame) = self.bpm.new_page()?;
        let inserted = {
            let mut guard = frame.latch_write();
            let mut leaf = LeafMut::new(&mut guard[..], self.key_size);
            leaf.init(page_id, PageId::HEADER, self.leaf_max_size);
            leaf.insert(key, rid, &*self.comparator).map(|_| ())
        };
        self.bpm.unpin_page(page_id, true);
        inserted?;
        *ctx.root_mut() = page_id;
        log::debug!("index {}: started new tree at {}", self.name, page_id);
        self.update_root_page_id(page_id)
    }

    /// Inserts into the latched leaf at the back of the page set,
    /// splitting upward as needed.
    fn insert_into_leaf(&self, key: &[u8], rid: Rid, ctx: &mut OpContext) -> Result<bool> {
        let mut leaf = ctx.pop_current().ok_or_else(|| {
            LatticeError::Corrupted("insert descent retained no leaf".to_string())
        })?;

        let inserted = LeafMut::new(leaf.data_mut(), self.key_size).insert(key, rid, &*self.comparator);
        let new_size = match inserted {
            Ok(new_size) => new_size,
            Err(LatticeError::DuplicateKey) => {
                ctx.release_set.push(leaf);
                return Ok(false);
            }
            Err(e) => {
                ctx.release_set.push(leaf);
                return Err(e);
            }
        };
        if new_size <= self.leaf_max_size {
            ctx.release_set.push(leaf);
            return Ok(true);
        }

        // Transiently overfull: split under the latches already held.
        let (sibling_id, sibling_frame) = match self.bpm.new_page() {
            Ok(allocated) => allocated,
            Err(e) => {
                ctx.release_set.push(leaf);
                return Err(e);
            }
        };
        log::debug!("splitting leaf {} into {}", leaf.id, sibling_id);
        let mut sibling_guard = sibling_frame.latch_write();
        let parent_id = TreePage::new(leaf.data()).parent_page_id();
        let leaf_is_root = parent_id == PageId::HEADER;
        {
            let mut sibling_view = LeafMut::new(&mut sibling_guard[..], self.key_size);
            sibling_view.init(sibling_id, parent_id, self.leaf_max_size);
            let mut leaf_view = LeafMut::new(leaf.data_mut(), self.key_size);
            let old_next = leaf_view.as_ref().next_page_id();
            leaf_view.move_half_to(&mut sibling_view);
            sibling_view.set_next_page_id(old_next);
            leaf_view.set_next_page_id(sibling_id);
        }
        let separator =
            Bytes::copy_from_slice(LeafRef::new(&sibling_guard[..], self.key_size).key_at(0));
        let sibling = LatchedPage::write(sibling_id, sibling_guard);

        if leaf_is_root {
            self.new_root_page(leaf, sibling, separator, ctx)?;
        } else {
            let leaf_id = leaf.id;
            ctx.release_set.push(leaf);
            ctx.release_set.push(sibling);
            self.insert_into_parent(leaf_id, separator, sibling_id, ctx)?;
        }
        Ok(true)
    }

    /// Registers a freshly split-off sibling in the parent, splitting
    /// the parent recursively when it overflows in turn.
    fn insert_into_parent(
        &self,
        old_id: PageId,
        separator: Bytes,
        new_id: PageId,
        ctx: &mut OpContext,
    ) -> Result<()> {
        let mut parent = ctx.pop_current().ok_or_else(|| {
            LatticeError::Corrupted(format!("split of {} retained no latched parent", old_id))
        })?;

        let inserted = InternalMut::new(parent.data_mut(), self.key_size)
            .insert_node_after(old_id, &separator, new_id);
        let new_size = match inserted {
            Ok(new_size) => new_size,
            Err(e) => {
                ctx.release_set.push(parent);
                return Err(e);
            }
        };
        if new_size <= self.internal_max_size {
            ctx.release_set.push(parent);
            return Ok(());
        }

        let (sibling_id, sibling_frame) = match self.bpm.new_page() {
            Ok(allocated) => allocated,
            Err(e) => {
                ctx.release_set.push(parent);
                return Err(e);
            }
        };
        log::debug!("splitting internal {} into {}", parent.id, sibling_id);
        let mut sibling_guard = sibling_frame.latch_write();
        let parent_parent_id = TreePage::new(parent.data()).parent_page_id();
        let parent_is_root = parent_parent_id == PageId::HEADER;
        let moved = {
            let mut sibling_view = InternalMut::new(&mut sibling_guard[..], self.key_size);
            sibling_view.init(sibling_id, parent_parent_id, self.internal_max_size);
            let mut parent_view = InternalMut::new(parent.data_mut(), self.key_size);
            parent_view.move_half_to(&mut sibling_view)
        };
        let separator_up =
            Bytes::copy_from_slice(InternalRef::new(&sibling_guard[..], self.key_size).key_at(0));
        let sibling = LatchedPage::write(sibling_id, sibling_guard);

        // Moved children adopt the sibling. Some of them (the pages
        // split one level below) are held by this very operation.
        for child in moved {
            if let Err(e) = self.reparent(ctx, child, sibling_id) {
                ctx.release_set.push(parent);
                ctx.release_set.push(sibling);
                return Err(e);
            }
        }

        if parent_is_root {
            self.new_root_page(parent, sibling, separator_up, ctx)
        } else {
            let parent_id = parent.id;
            ctx.release_set.push(parent);
            ctx.release_set.push(sibling);
            self.insert_into_parent(parent_id, separator_up, sibling_id, ctx)
        }
    }

    /// Replaces the root with a fresh internal page over the two halves
    /// of a root split. Runs under the write tree latch.
    fn new_root_page(
        &self,
        mut left: LatchedPage,
        mut right: LatchedPage,
        separator: Bytes,
        ctx: &mut OpContext,
    ) -> Result<()> {
        let (root_id, root_frame) = match self.bpm.new_page() {
            Ok(allocated) => allocated,
            Err(e) => {
                ctx.release_set.push(left);
                ctx.release_set.push(right);
                return Err(e);
            }
        };
        let mut root_guard = root_frame.latch_write();
        {
            let mut root_view = InternalMut::new(&mut root_guard[..], self.key_size);
            root_view.init(root_id, PageId::HEADER, self.internal_max_size);
            root_view.populate_new_root(left.id, &separator, right.id);
        }
        page::set_parent_page_id(left.data_mut(), root_id);
        page::set_parent_page_id(right.data_mut(), root_id);
        *ctx.root_mut() = root_id;
        ctx.release_set.push(left);
        ctx.release_set.push(right);
        ctx.release_set.push(LatchedPage::write(root_id, root_guard));
        log::debug!("index {}: new root {}", self.name, root_id);
        self.update_root_page_id(root_id)
    }

    // =====================================================================
    // Removal
    // =====================================================================

    fn remove_inner(&self, key: &[u8], ctx: &mut OpContext) -> Result<bool> {
        if !self.find_leaf_optimistic(key, AccessMode::Remove, ctx)? {
            return Ok(false);
        }
        let leaf_safe = match ctx.current() {
            Some(leaf) => TreePage::new(leaf.data()).is_safe_to_remove(),
            None => false,
        };
        if !leaf_safe {
            ctx.release_ancestors(&self.bpm);
            if !self.find_leaf_pessimistic(key, AccessMode::Remove, ctx)? {
                return Ok(false);
            }
        }

        let mut leaf = ctx.pop_current().ok_or_else(|| {
            LatticeError::Corrupted("remove descent retained no leaf".to_string())
        })?;
        let removed = LeafMut::new(leaf.data_mut(), self.key_size).remove(key, &*self.comparator);
        let new_size = match removed {
            Some(new_size) => new_size,
            None => {
                ctx.release_set.push(leaf);
                return Ok(false);
            }
        };
        if new_size >= TreePage::new(leaf.data()).min_size() {
            ctx.release_set.push(leaf);
            return Ok(true);
        }
        self.coalesce_or_redistribute(leaf, ctx)?;
        Ok(true)
    }

    /// Fixes an underflowed page by merging with or borrowing from a
    /// sibling, recursing into the parent when the merge underflows it
    /// in turn.
    fn coalesce_or_redistribute(&self, node: LatchedPage, ctx: &mut OpContext) -> Result<()> {
        if TreePage::new(node.data()).is_root() {
            return self.adjust_root(node, ctx);
        }

        let parent = ctx.pop_current().ok_or_else(|| {
            LatticeError::Corrupted(format!("underflowed {} retained no latched parent", node.id))
        })?;
        let (current_index, sibling_id) = {
            let parent_view = InternalRef::new(parent.data(), self.key_size);
            let current_index = parent_view.value_index(node.id).ok_or_else(|| {
                LatticeError::Corrupted(format!("{} not referenced by parent {}", node.id, parent.id))
            })?;
            // Left-biased sibling choice: the left neighbor, except for
            // the leftmost child which pairs with its right neighbor.
            let sibling_index = if current_index == 0 { 1 } else { current_index - 1 };
            (current_index, parent_view.child_at(sibling_index))
        };

        // The sibling was not latched during the descent.
        let sibling_frame = match self.bpm.fetch_page(sibling_id) {
            Ok(frame) => frame,
            Err(e) => {
                ctx.release_set.push(node);
                ctx.release_set.push(parent);
                return Err(e);
            }
        };
        let sibling = LatchedPage::write(sibling_id, sibling_frame.latch_write());

        let node_view = TreePage::new(node.data());
        let is_leaf = node_view.is_leaf();
        let fits_in_one = node_view.size() + TreePage::new(sibling.data()).size()
            <= node_view.max_size();
        if fits_in_one {
            self.coalesce(node, sibling, parent, current_index, is_leaf, ctx)
        } else {
            self.redistribute(node, sibling, parent, current_index, is_leaf, ctx)
        }
    }

    /// Merges the right page of a sibling pair into the left and drops
    /// the right page.
    fn coalesce(
        &self,
        node: LatchedPage,
        sibling: LatchedPage,
        mut parent: LatchedPage,
        current_index: usize,
        is_leaf: bool,
        ctx: &mut OpContext,
    ) -> Result<()> {
        let (mut left, mut right, right_index) = if current_index == 0 {
            (node, sibling, 1)
        } else {
            (sibling, node, current_index)
        };
        log::debug!("coalescing {} into {}", right.id, left.id);

        if is_leaf {
            let mut left_view = LeafMut::new(left.data_mut(), self.key_size);
            let mut right_view = LeafMut::new(right.data_mut(), self.key_size);
            right_view.move_all_to(&mut left_view);
        } else {
            let middle_key = Bytes::copy_from_slice(
                InternalRef::new(parent.data(), self.key_size).key_at(right_index),
            );
            let moved = {
                let mut left_view = InternalMut::new(left.data_mut(), self.key_size);
                let mut right_view = InternalMut::new(right.data_mut(), self.key_size);
                right_view.move_all_to(&mut left_view, &middle_key)
            };
            let left_id = left.id;
            for child in moved {
                if let Err(e) = self.reparent(ctx, child, left_id) {
                    ctx.release_set.push(left);
                    ctx.release_set.push(right);
                    ctx.release_set.push(parent);
                    return Err(e);
                }
            }
        }

        InternalMut::new(parent.data_mut(), self.key_size).remove_at(right_index);
        ctx.deleted.insert(right.id);
        ctx.release_set.push(left);
        ctx.release_set.push(right);

        let parent_view = TreePage::new(parent.data());
        if parent_view.size() < parent_view.min_size() {
            self.coalesce_or_redistribute(parent, ctx)
        } else {
            ctx.release_set.push(parent);
            Ok(())
        }
    }

    /// Moves one entry from the sibling into the underflowed page and
    /// refreshes the parent separator.
    fn redistribute(
        &self,
        mut node: LatchedPage,
        mut sibling: LatchedPage,
        mut parent: LatchedPage,
        current_index: usize,
        is_leaf: bool,
        ctx: &mut OpContext,
    ) -> Result<()> {
        log::debug!("redistributing between {} and {}", node.id, sibling.id);
        if is_leaf {
            if current_index == 0 {
                // Sibling is the right neighbor: it lends its first
                // entry, and the separator becomes its new first key.
                {
                    let mut sibling_view = LeafMut::new(sibling.data_mut(), self.key_size);
                    let mut node_view = LeafMut::new(node.data_mut(), self.key_size);
                    sibling_view.move_first_to_end_of(&mut node_view);
                }
                let new_separator =
                    Bytes::copy_from_slice(LeafRef::new(sibling.data(), self.key_size).key_at(0));
                InternalMut::new(parent.data_mut(), self.key_size).set_key_at(1, &new_separator);
            } else {
                // Sibling is the left neighbor: it lends its last
                // entry, and the separator becomes this page's new
                // first key.
                {
                    let mut sibling_view = LeafMut::new(sibling.data_mut(), self.key_size);
                    let mut node_view = LeafMut::new(node.data_mut(), self.key_size);
                    sibling_view.move_last_to_front_of(&mut node_view);
                }
                let new_separator =
                    Bytes::copy_from_slice(LeafRef::new(node.data(), self.key_size).key_at(0));
                InternalMut::new(parent.data_mut(), self.key_size)
                    .set_key_at(current_index, &new_separator);
            }
        } else {
            let separator_index = if current_index == 0 { 1 } else { current_index };
            let middle_key = Bytes::copy_from_slice(
                InternalRef::new(parent.data(), self.key_size).key_at(separator_index),
            );
            let (new_separator, moved_child) = {
                let mut sibling_view = InternalMut::new(sibling.data_mut(), self.key_size);
                let mut node_view = InternalMut::new(node.data_mut(), self.key_size);
                if current_index == 0 {
                    sibling_view.move_first_to_end_of(&mut node_view, &middle_key)
                } else {
                    sibling_view.move_last_to_front_of(&mut node_view, &middle_key)
                }
            };
            InternalMut::new(parent.data_mut(), self.key_size)
                .set_key_at(separator_index, &new_separator);
            let node_id = node.id;
            if let Err(e) = self.reparent(ctx, moved_child, node_id) {
                ctx.release_set.push(node);
                ctx.release_set.push(sibling);
                ctx.release_set.push(parent);
                return Err(e);
            }
        }

        ctx.release_set.push(node);
        ctx.release_set.push(sibling);
        ctx.release_set.push(parent);
        Ok(())
    }

    /// Handles underflow at the root: an emptied leaf root ends the
    /// tree, an internal root with a single child hands the root role
    /// to that child. Runs under the write tree latch.
    fn adjust_root(&self, mut node: LatchedPage, ctx: &mut OpContext) -> Result<()> {
        if TreePage::new(node.data()).is_leaf() {
            debug_assert_eq!(TreePage::new(node.data()).size(), 0);
            *ctx.root_mut() = PageId::HEADER;
            log::debug!("index {}: tree emptied, root {} dropped", self.name, node.id);
        } else {
            debug_assert_eq!(TreePage::new(node.data()).size(), 1);
            let child =
                InternalMut::new(node.data_mut(), self.key_size).remove_and_return_only_child();
            if let Err(e) = self.reparent(ctx, child, PageId::HEADER) {
                ctx.release_set.push(node);
                return Err(e);
            }
            *ctx.root_mut() = child;
            log::debug!("index {}: root collapsed into {}", self.name, child);
        }
        let new_root = ctx.root();
        ctx.deleted.insert(node.id);
        ctx.release_set.push(node);
        self.update_root_page_id(new_root)
    }

    // =====================================================================
    // Shared plumbing
    // =====================================================================

    /// Stamps a new parent id into a child page.
    ///
    /// A child this operation already holds write-latched (a page split
    /// or merged one level below) is written through the held guard;
    /// anything else is fetched, briefly write-latched, flushed, and
    /// unpinned dirty so the rewrite is durable before the structural
    /// latches are released.
    fn reparent(&self, ctx: &mut OpContext, child: PageId, new_parent: PageId) -> Result<()> {
        if let Some(held) = ctx.find_write_latched_mut(child) {
            page::set_parent_page_id(held.data_mut(), new_parent);
            return Ok(());
        }
        let frame = self.bpm.fetch_page(child)?;
        {
            let mut guard = frame.latch_write();
            page::set_parent_page_id(&mut guard[..], new_parent);
        }
        let flushed = self.bpm.flush_page(child);
        self.bpm.unpin_page(child, true);
        flushed.map(|_| ())
    }

    /// Mirrors a root change into this index's header page record.
    /// Callers hold the write tree latch, which serializes header
    /// updates for this index.
    fn update_root_page_id(&self, root_id: PageId) -> Result<()> {
        let frame = self.bpm.fetch_page(PageId::HEADER)?;
        let updated = {
            let mut guard = frame.latch_write();
            HeaderMut::new(&mut guard[..]).upsert(&self.name, root_id)
        };
        self.bpm.unpin_page(PageId::HEADER, true);
        updated
    }

    /// Hand-over-hand read descent for iterators; the tree latch is
    /// dropped after the first hop. Returns the latched, pinned leaf,
    /// or None on an empty tree.
    fn descend_for_iter(&self, target: SeekTo<'_>) -> Result<Option<(PageId, PageReadGuard)>> {
        let root_guard = self.root.read_arc();
        let mut current = *root_guard;
        if current == PageId::HEADER {
            return Ok(None);
        }
        let mut tree_latch = Some(root_guard);
        let mut previous: Option<(PageId, PageReadGuard)> = None;
        loop {
            let frame = match self.bpm.fetch_page(current) {
                Ok(frame) => frame,
                Err(e) => {
                    if let Some((id, guard)) = previous.take() {
                        drop(guard);
                        self.bpm.unpin_page(id, false);
                    }
                    return Err(e);
                }
            };
            let guard = frame.latch_read();
            let next = if TreePage::new(&guard[..]).is_leaf() {
                None
            } else {
                let view = InternalRef::new(&guard[..], self.key_size);
                Some(match target {
                    SeekTo::First => view.child_at(0),
                    SeekTo::Key(key) => view.lookup(key, &*self.comparator),
                })
            };
            // The previous hold (or the tree latch on the first hop) is
            // released only after the child is latched.
            if let Some(latch) = tree_latch.take() {
                drop(latch);
            }
            if let Some((id, guard)) = previous.take() {
                drop(guard);
                self.bpm.unpin_page(id, false);
            }
            match next {
                None => return Ok(Some((current, guard))),
                Some(child) => {
                    previous = Some((current, guard));
                    current = child;
                }
            }
        }
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("name", &self.name)
            .field("key_size", &self.key_size)
            .field("leaf_max_size", &self.leaf_max_size)
            .field("internal_max_size", &self.internal_max_size)
            .field("root", &self.root_page_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::default_comparator;
    use crate::disk::{DiskManager, DiskManagerConfig};
    use lattice_buffer::BufferPoolConfig;
    use tempfile::tempdir;

    const KEY_SIZE: usize = 8;

    fn key(v: u64) -> [u8; 8] {
        v.to_be_bytes()
    }

    fn rid(v: u64) -> Rid {
        Rid::new(PageId(v as i32), v as u32)
    }

    fn test_tree(
        leaf_max: u32,
        internal_max: u32,
        pool_size: usize,
    ) -> (BPlusTree, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                db_path: dir.path().join("tree.db"),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let bpm = Arc::new(BufferPoolManager::new(
            BufferPoolConfig { pool_size },
            disk,
        ));
        let tree = BPlusTree::new(
            "test_index",
            bpm,
            default_comparator(),
            KEY_SIZE,
            leaf_max,
            internal_max,
        );
        (tree, dir)
    }

    fn collect_keys(tree: &BPlusTree) -> Vec<u64> {
        tree.iter()
            .unwrap()
            .map(|item| {
                let (k, _) = item.unwrap();
                u64::from_be_bytes([k[0], k[1], k[2], k[3], k[4], k[5], k[6], k[7]])
            })
            .collect()
    }

    #[test]
    fn test_empty_tree() {
        let (tree, _dir) = test_tree(5, 5, 16);

        assert!(tree.is_empty());
        assert_eq!(tree.root_page_id(), PageId::HEADER);
        assert_eq!(tree.get(&key(42)).unwrap(), None);
        assert!(!tree.remove(&key(42)).unwrap());
        assert!(tree.is_empty());
        assert_eq!(collect_keys(&tree), Vec::<u64>::new());
    }

    #[test]
    fn test_insert_and_get_single() {
        let (tree, _dir) = test_tree(5, 5, 16);

        assert!(tree.insert(&key(1), rid(1)).unwrap());
        assert!(!tree.is_empty());
        assert_eq!(tree.get(&key(1)).unwrap(), Some(rid(1)));
        assert_eq!(tree.get(&key(2)).unwrap(), None);
    }

    #[test]
    fn test_insert_duplicate_keeps_first_value() {
        let (tree, _dir) = test_tree(5, 5, 16);

        assert!(tree.insert(&key(1), rid(10)).unwrap());
        assert!(!tree.insert(&key(1), rid(20)).unwrap());
        assert_eq!(tree.get(&key(1)).unwrap(), Some(rid(10)));
    }

    #[test]
    fn test_key_size_checked() {
        let (tree, _dir) = test_tree(5, 5, 16);
        let short = [0u8; 4];
        assert!(matches!(
            tree.insert(&short, rid(1)),
            Err(LatticeError::KeySizeMismatch { .. })
        ));
        assert!(tree.get(&short).is_err());
        assert!(tree.remove(&short).is_err());
    }

    #[test]
    fn test_sequential_inserts_split_leaves() {
        let (tree, _dir) = test_tree(5, 5, 16);

        for v in 1..=10u64 {
            assert!(tree.insert(&key(v), rid(v)).unwrap(), "insert {}", v);
        }
        // The root moved off the first leaf
        assert_ne!(tree.root_page_id(), PageId::HEADER);
        for v in 1..=10u64 {
            assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)), "get {}", v);
        }
        assert_eq!(collect_keys(&tree), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_reverse_inserts() {
        let (tree, _dir) = test_tree(5, 5, 16);

        for v in (1..=50u64).rev() {
            assert!(tree.insert(&key(v), rid(v)).unwrap());
        }
        assert_eq!(collect_keys(&tree), (1..=50).collect::<Vec<_>>());
    }

    #[test]
    fn test_multi_level_split() {
        let (tree, _dir) = test_tree(3, 3, 32);

        for v in 1..=100u64 {
            assert!(tree.insert(&key(v), rid(v)).unwrap());
        }
        for v in 1..=100u64 {
            assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
        }
        assert_eq!(collect_keys(&tree), (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn test_remove_with_coalesce_to_empty() {
        let (tree, _dir) = test_tree(5, 5, 16);

        for v in 1..=10u64 {
            tree.insert(&key(v), rid(v)).unwrap();
        }
        for v in 1..=10u64 {
            assert!(tree.remove(&key(v)).unwrap(), "remove {}", v);
        }
        assert!(tree.is_empty());
        assert_eq!(tree.root_page_id(), PageId::HEADER);
        // And the tree is usable again afterwards
        assert!(tree.insert(&key(7), rid(7)).unwrap());
        assert_eq!(tree.get(&key(7)).unwrap(), Some(rid(7)));
    }

    #[test]
    fn test_remove_missing_key() {
        let (tree, _dir) = test_tree(5, 5, 16);

        tree.insert(&key(1), rid(1)).unwrap();
        assert!(!tree.remove(&key(2)).unwrap());
        assert_eq!(tree.get(&key(1)).unwrap(), Some(rid(1)));
    }

    #[test]
    fn test_scan_from_first_key_after_sequential_fill() {
        let (tree, _dir) = test_tree(5, 5, 16);

        for v in 1..=10u64 {
            tree.insert(&key(v), rid(v)).unwrap();
        }
        let from_one: Vec<u64> = tree
            .iter_from(&key(1))
            .unwrap()
            .map(|item| {
                let (k, _) = item.unwrap();
                u64::from_be_bytes(k[..8].try_into().unwrap())
            })
            .collect();
        assert_eq!(from_one, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_scan_from_survivor_after_removals() {
        let (tree, _dir) = test_tree(5, 5, 16);

        for v in 1..=10u64 {
            tree.insert(&key(v), rid(v)).unwrap();
        }
        for v in [1u64, 4, 3, 5, 6] {
            assert!(tree.remove(&key(v)).unwrap(), "remove {}", v);
        }
        let from_two: Vec<u64> = tree
            .iter_from(&key(2))
            .unwrap()
            .map(|item| {
                let (k, _) = item.unwrap();
                u64::from_be_bytes(k[..8].try_into().unwrap())
            })
            .collect();
        assert_eq!(from_two, vec![2, 7, 8, 9, 10]);
    }

    #[test]
    fn test_iter_from_missing_key_fails() {
        let (tree, _dir) = test_tree(5, 5, 16);

        for v in [1u64, 3, 5] {
            tree.insert(&key(v), rid(v)).unwrap();
        }
        assert!(matches!(
            tree.iter_from(&key(2)),
            Err(LatticeError::KeyNotFound)
        ));
        // Empty tree behaves the same
        let (empty, _dir2) = test_tree(5, 5, 16);
        assert!(matches!(
            empty.iter_from(&key(1)),
            Err(LatticeError::KeyNotFound)
        ));
    }

    #[test]
    fn test_random_insert_remove_matches_model() {
        use rand::seq::SliceRandom;
        use rand::Rng;

        let (tree, _dir) = test_tree(5, 5, 32);
        let mut rng = rand::thread_rng();
        let mut keys: Vec<u64> = (1..=200).collect();
        keys.shuffle(&mut rng);

        for &v in &keys {
            assert!(tree.insert(&key(v), rid(v)).unwrap());
        }

        let mut alive: Vec<u64> = keys.clone();
        for _ in 0..120 {
            let idx = rng.gen_range(0..alive.len());
            let v = alive.swap_remove(idx);
            assert!(tree.remove(&key(v)).unwrap(), "remove {}", v);
        }

        alive.sort_unstable();
        assert_eq!(collect_keys(&tree), alive);
        for &v in &alive {
            assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
        }
    }

    #[test]
    fn test_pins_released_after_operations() {
        let (tree, _dir) = test_tree(3, 3, 16);

        for v in 1..=60u64 {
            tree.insert(&key(v), rid(v)).unwrap();
        }
        for v in 1..=30u64 {
            tree.remove(&key(v)).unwrap();
        }
        let _ = collect_keys(&tree);

        // After the operations complete nothing should be left pinned.
        let stats = tree.bpm.stats();
        assert_eq!(stats.pinned_frames, 0);
    }

    #[test]
    fn test_root_registered_in_header_page() {
        let (tree, _dir) = test_tree(5, 5, 16);

        tree.insert(&key(1), rid(1)).unwrap();
        let root = tree.root_page_id();

        let frame = tree.bpm.fetch_page(PageId::HEADER).unwrap();
        let recorded = {
            let guard = frame.latch_read();
            crate::btree::HeaderRef::new(&guard[..])
                .get_root_id("test_index")
                .unwrap()
        };
        tree.bpm.unpin_page(PageId::HEADER, false);
        assert_eq!(recorded, Some(root));
    }
}
