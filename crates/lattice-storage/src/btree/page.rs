//! B+ tree page layouts (common header, leaf, and internal nodes).
//!
//! All multi-byte fields are little-endian. Every tree page begins with
//! a 24-byte common header:
//!
//! ```text
//! +-----------------------+ 0
//! | page_type: u32        |
//! +-----------------------+ 4
//! | lsn: u32 (reserved)   |
//! +-----------------------+ 8
//! | size: u32             |
//! +-----------------------+ 12
//! | max_size: u32         |
//! +-----------------------+ 16
//! | parent_page_id: i32   |
//! +-----------------------+ 20
//! | page_id: i32          |
//! +-----------------------+ 24
//! ```
//!
//! A leaf page adds `next_page_id: i32` at offset 24 and stores
//! `(key, rid)` slots from offset 28. An internal page stores
//! `(key, child_page_id)` slots directly from offset 24; slot 0's key
//! bytes are invalid and its child is the leftmost subtree.
//!
//! The views here are scoped to a latch guard: readers borrow `&[u8]`
//! from a read guard, writers borrow `&mut [u8]` from a write guard.

use bytes::Bytes;
use lattice_common::error::{LatticeError, Result};
use lattice_common::page::{PageId, PAGE_SIZE};
use lattice_common::types::Rid;
use std::cmp::Ordering;

const PAGE_TYPE_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;
const MAX_SIZE_OFFSET: usize = 12;
const PARENT_OFFSET: usize = 16;
const PAGE_ID_OFFSET: usize = 20;

/// Size of the common tree page header in bytes.
pub const TREE_HEADER_SIZE: usize = 24;

const NEXT_PAGE_OFFSET: usize = 24;

/// Size of the leaf page header (common header + next pointer).
pub const LEAF_HEADER_SIZE: usize = 28;

/// Discriminates the two tree page variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TreePageType {
    /// Never-initialized page.
    Invalid = 0,
    /// Interior node holding separator keys and child pointers.
    Internal = 1,
    /// Leaf node holding keys and record ids.
    Leaf = 2,
}

impl TreePageType {
    fn from_u32(value: u32) -> TreePageType {
        match value {
            1 => TreePageType::Internal,
            2 => TreePageType::Leaf,
            _ => TreePageType::Invalid,
        }
    }
}

/// Largest leaf fanout for a given key size, keeping one slot spare for
/// the transient overfull state that precedes a split.
pub fn leaf_capacity(key_size: usize) -> u32 {
    ((PAGE_SIZE - LEAF_HEADER_SIZE) / (key_size + Rid::SIZE) - 1) as u32
}

/// Largest internal fanout for a given key size, keeping one slot spare
/// for the transient overfull state that precedes a split.
pub fn internal_capacity(key_size: usize) -> u32 {
    ((PAGE_SIZE - TREE_HEADER_SIZE) / (key_size + 4) - 1) as u32
}

#[inline]
fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn read_page_id(data: &[u8], offset: usize) -> PageId {
    PageId::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
fn write_page_id(data: &mut [u8], offset: usize, page_id: PageId) {
    data[offset..offset + 4].copy_from_slice(&page_id.to_le_bytes());
}

/// Stamps a new parent id into a page's common header.
///
/// Used directly by the tree when re-parenting children it already
/// holds write-latched.
pub(crate) fn set_parent_page_id(data: &mut [u8], parent: PageId) {
    write_page_id(data, PARENT_OFFSET, parent);
}

fn set_size(data: &mut [u8], size: u32) {
    write_u32(data, SIZE_OFFSET, size);
}

fn init_header(
    data: &mut [u8],
    page_type: TreePageType,
    page_id: PageId,
    parent: PageId,
    max_size: u32,
) {
    write_u32(data, PAGE_TYPE_OFFSET, page_type as u32);
    write_u32(data, LSN_OFFSET, 0);
    write_u32(data, SIZE_OFFSET, 0);
    write_u32(data, MAX_SIZE_OFFSET, max_size);
    write_page_id(data, PARENT_OFFSET, parent);
    write_page_id(data, PAGE_ID_OFFSET, page_id);
}

/// Read-only view of the common tree page header.
#[derive(Clone, Copy)]
pub struct TreePage<'a> {
    data: &'a [u8],
}

impl<'a> TreePage<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn page_type(&self) -> TreePageType {
        TreePageType::from_u32(read_u32(self.data, PAGE_TYPE_OFFSET))
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type() == TreePageType::Leaf
    }

    /// Current number of entries.
    pub fn size(&self) -> u32 {
        read_u32(self.data, SIZE_OFFSET)
    }

    /// Capacity. A size of `max_size + 1` is transiently legal between
    /// an insert and the split performed under the same latches.
    pub fn max_size(&self) -> u32 {
        read_u32(self.data, MAX_SIZE_OFFSET)
    }

    pub fn parent_page_id(&self) -> PageId {
        read_page_id(self.data, PARENT_OFFSET)
    }

    pub fn page_id(&self) -> PageId {
        read_page_id(self.data, PAGE_ID_OFFSET)
    }

    /// The root is the page whose parent is the header page.
    pub fn is_root(&self) -> bool {
        self.parent_page_id() == PageId::HEADER
    }

    /// Minimum legal occupancy. The root is exempt: a leaf root may
    /// hold a single entry, an internal root two children.
    pub fn min_size(&self) -> u32 {
        if self.is_root() {
            if self.is_leaf() {
                1
            } else {
                2
            }
        } else {
            (self.max_size() + 1) / 2
        }
    }

    /// True if an insert into this page cannot overflow it.
    pub fn is_safe_to_insert(&self) -> bool {
        self.size() + 1 <= self.max_size()
    }

    /// True if a removal from this page cannot underflow it.
    pub fn is_safe_to_remove(&self) -> bool {
        self.size() >= self.min_size() + 1
    }
}

/// Read-only view of a leaf page.
#[derive(Clone, Copy)]
pub struct LeafRef<'a> {
    data: &'a [u8],
    key_size: usize,
}

impl<'a> LeafRef<'a> {
    pub fn new(data: &'a [u8], key_size: usize) -> Self {
        Self { data, key_size }
    }

    #[inline]
    fn slot_offset(&self, index: usize) -> usize {
        LEAF_HEADER_SIZE + index * (self.key_size + Rid::SIZE)
    }

    pub fn size(&self) -> u32 {
        read_u32(self.data, SIZE_OFFSET)
    }

    pub fn next_page_id(&self) -> PageId {
        read_page_id(self.data, NEXT_PAGE_OFFSET)
    }

    pub fn key_at(&self, index: usize) -> &'a [u8] {
        let offset = self.slot_offset(index);
        &self.data[offset..offset + self.key_size]
    }

    pub fn rid_at(&self, index: usize) -> Rid {
        let offset = self.slot_offset(index) + self.key_size;
        Rid::from_bytes(&self.data[offset..offset + Rid::SIZE])
    }

    pub fn item_at(&self, index: usize) -> (&'a [u8], Rid) {
        (self.key_at(index), self.rid_at(index))
    }

    /// First index whose key is >= the given key; `size` if none.
    pub fn key_index<C>(&self, key: &[u8], cmp: &C) -> usize
    where
        C: Fn(&[u8], &[u8]) -> Ordering + ?Sized,
    {
        let mut low = 0i64;
        let mut high = self.size() as i64 - 1;
        let mut result = self.size() as usize;
        while low <= high {
            let mid = low + (high - low) / 2;
            match cmp(self.key_at(mid as usize), key) {
                Ordering::Less => low = mid + 1,
                Ordering::Equal => return mid as usize,
                Ordering::Greater => {
                    result = mid as usize;
                    high = mid - 1;
                }
            }
        }
        result
    }

    /// Slot index of an exact key match.
    pub fn position_of<C>(&self, key: &[u8], cmp: &C) -> Option<usize>
    where
        C: Fn(&[u8], &[u8]) -> Ordering + ?Sized,
    {
        let mut low = 0i64;
        let mut high = self.size() as i64 - 1;
        while low <= high {
            let mid = low + (high - low) / 2;
            match cmp(self.key_at(mid as usize), key) {
                Ordering::Less => low = mid + 1,
                Ordering::Equal => return Some(mid as usize),
                Ordering::Greater => high = mid - 1,
            }
        }
        None
    }

    /// Point lookup.
    pub fn lookup<C>(&self, key: &[u8], cmp: &C) -> Option<Rid>
    where
        C: Fn(&[u8], &[u8]) -> Ordering + ?Sized,
    {
        self.position_of(key, cmp).map(|i| self.rid_at(i))
    }
}

/// Mutable view of a leaf page.
pub struct LeafMut<'a> {
    data: &'a mut [u8],
    key_size: usize,
}

impl<'a> LeafMut<'a> {
    pub fn new(data: &'a mut [u8], key_size: usize) -> Self {
        Self { data, key_size }
    }

    pub fn as_ref(&self) -> LeafRef<'_> {
        LeafRef::new(self.data, self.key_size)
    }

    #[inline]
    fn slot_size(&self) -> usize {
        self.key_size + Rid::SIZE
    }

    #[inline]
    fn slot_offset(&self, index: usize) -> usize {
        LEAF_HEADER_SIZE + index * self.slot_size()
    }

    /// Initializes a fresh leaf page.
    pub fn init(&mut self, page_id: PageId, parent: PageId, max_size: u32) {
        debug_assert!(
            LEAF_HEADER_SIZE + (max_size as usize + 1) * self.slot_size() <= PAGE_SIZE,
            "leaf max_size {} does not fit a page",
            max_size
        );
        init_header(self.data, TreePageType::Leaf, page_id, parent, max_size);
        write_page_id(self.data, NEXT_PAGE_OFFSET, PageId::INVALID);
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        write_page_id(self.data, NEXT_PAGE_OFFSET, next);
    }

    fn write_slot(&mut self, index: usize, key: &[u8], rid: Rid) {
        debug_assert_eq!(key.len(), self.key_size);
        let offset = self.slot_offset(index);
        let slot_size = self.slot_size();
        self.data[offset..offset + self.key_size].copy_from_slice(key);
        self.data[offset + self.key_size..offset + slot_size]
            .copy_from_slice(&rid.to_bytes());
    }

    /// Inserts a key/rid pair in key order.
    ///
    /// Returns the new size, which may transiently be `max_size + 1`;
    /// the caller must then split. Refuses duplicates.
    pub fn insert<C>(&mut self, key: &[u8], rid: Rid, cmp: &C) -> Result<u32>
    where
        C: Fn(&[u8], &[u8]) -> Ordering + ?Sized,
    {
        let size = self.as_ref().size() as usize;
        let position = self.as_ref().key_index(key, cmp);
        if position < size && cmp(self.as_ref().key_at(position), key) == Ordering::Equal {
            return Err(LatticeError::DuplicateKey);
        }
        let slot = self.slot_size();
        let start = self.slot_offset(position);
        let end = self.slot_offset(size);
        self.data.copy_within(start..end, start + slot);
        self.write_slot(position, key, rid);
        set_size(self.data, size as u32 + 1);
        Ok(size as u32 + 1)
    }

    /// Removes a key. Returns the new size, or None if the key is
    /// absent.
    pub fn remove<C>(&mut self, key: &[u8], cmp: &C) -> Option<u32>
    where
        C: Fn(&[u8], &[u8]) -> Ordering + ?Sized,
    {
        let size = self.as_ref().size() as usize;
        let position = self.as_ref().position_of(key, cmp)?;
        let start = self.slot_offset(position + 1);
        let end = self.slot_offset(size);
        let dest = self.slot_offset(position);
        self.data.copy_within(start..end, dest);
        set_size(self.data, size as u32 - 1);
        Some(size as u32 - 1)
    }

    /// Moves the right ceil-half of this leaf's entries into an empty
    /// sibling. Chaining is left to the tree.
    pub fn move_half_to(&mut self, dst: &mut LeafMut<'_>) {
        let size = self.as_ref().size() as usize;
        let moved = (size + 1) / 2;
        let start = size - moved;
        let src_start = self.slot_offset(start);
        let src_end = self.slot_offset(size);
        let dst_start = dst.slot_offset(0);
        dst.data[dst_start..dst_start + (src_end - src_start)]
            .copy_from_slice(&self.data[src_start..src_end]);
        set_size(dst.data, moved as u32);
        set_size(self.data, start as u32);
    }

    /// Appends every entry onto `dst` and hands over the next pointer.
    pub fn move_all_to(&mut self, dst: &mut LeafMut<'_>) {
        let size = self.as_ref().size() as usize;
        let dst_size = dst.as_ref().size() as usize;
        let src_start = self.slot_offset(0);
        let src_end = self.slot_offset(size);
        let dst_start = dst.slot_offset(dst_size);
        dst.data[dst_start..dst_start + (src_end - src_start)]
            .copy_from_slice(&self.data[src_start..src_end]);
        dst.set_next_page_id(self.as_ref().next_page_id());
        set_size(dst.data, (dst_size + size) as u32);
        set_size(self.data, 0);
    }

    /// Moves this leaf's first entry to the end of `dst` (its left
    /// sibling).
    pub fn move_first_to_end_of(&mut self, dst: &mut LeafMut<'_>) {
        let size = self.as_ref().size() as usize;
        let dst_size = dst.as_ref().size() as usize;
        let slot = self.slot_size();
        let src = self.slot_offset(0);
        let dst_off = dst.slot_offset(dst_size);
        dst.data[dst_off..dst_off + slot].copy_from_slice(&self.data[src..src + slot]);
        set_size(dst.data, dst_size as u32 + 1);
        let shift_start = self.slot_offset(1);
        let shift_end = self.slot_offset(size);
        self.data.copy_within(shift_start..shift_end, src);
        set_size(self.data, size as u32 - 1);
    }

    /// Moves this leaf's last entry to the front of `dst` (its right
    /// sibling).
    pub fn move_last_to_front_of(&mut self, dst: &mut LeafMut<'_>) {
        let size = self.as_ref().size() as usize;
        let dst_size = dst.as_ref().size() as usize;
        let slot = self.slot_size();
        let src = self.slot_offset(size - 1);
        let shift_start = dst.slot_offset(0);
        let shift_end = dst.slot_offset(dst_size);
        dst.data.copy_within(shift_start..shift_end, shift_start + slot);
        dst.data[shift_start..shift_start + slot].copy_from_slice(&self.data[src..src + slot]);
        set_size(dst.data, dst_size as u32 + 1);
        set_size(self.data, size as u32 - 1);
    }
}

/// Read-only view of an internal page.
#[derive(Clone, Copy)]
pub struct InternalRef<'a> {
    data: &'a [u8],
    key_size: usize,
}

impl<'a> InternalRef<'a> {
    pub fn new(data: &'a [u8], key_size: usize) -> Self {
        Self { data, key_size }
    }

    #[inline]
    fn slot_offset(&self, index: usize) -> usize {
        TREE_HEADER_SIZE + index * (self.key_size + 4)
    }

    pub fn size(&self) -> u32 {
        read_u32(self.data, SIZE_OFFSET)
    }

    /// Key bytes of a slot. Slot 0's key is invalid except in the
    /// window right after a split, when it carries the separator to
    /// push up.
    pub fn key_at(&self, index: usize) -> &'a [u8] {
        let offset = self.slot_offset(index);
        &self.data[offset..offset + self.key_size]
    }

    pub fn child_at(&self, index: usize) -> PageId {
        read_page_id(self.data, self.slot_offset(index) + self.key_size)
    }

    /// Child pointer to follow for the given key: the child of the
    /// largest slot in 1..size whose key is <= the key, or slot 0's
    /// child when no such slot exists.
    pub fn lookup<C>(&self, key: &[u8], cmp: &C) -> PageId
    where
        C: Fn(&[u8], &[u8]) -> Ordering + ?Sized,
    {
        let mut result = self.child_at(0);
        let mut low = 1i64;
        let mut high = self.size() as i64 - 1;
        while low <= high {
            let mid = low + (high - low) / 2;
            match cmp(self.key_at(mid as usize), key) {
                Ordering::Less => {
                    result = self.child_at(mid as usize);
                    low = mid + 1;
                }
                Ordering::Equal => {
                    result = self.child_at(mid as usize);
                    break;
                }
                Ordering::Greater => high = mid - 1,
            }
        }
        result
    }

    /// Slot index holding the given child pointer.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size() as usize).find(|&i| self.child_at(i) == child)
    }

    fn children(&self, from: usize, to: usize) -> Vec<PageId> {
        (from..to).map(|i| self.child_at(i)).collect()
    }
}

/// Mutable view of an internal page.
pub struct InternalMut<'a> {
    data: &'a mut [u8],
    key_size: usize,
}

impl<'a> InternalMut<'a> {
    pub fn new(data: &'a mut [u8], key_size: usize) -> Self {
        Self { data, key_size }
    }

    pub fn as_ref(&self) -> InternalRef<'_> {
        InternalRef::new(self.data, self.key_size)
    }

    #[inline]
    fn slot_size(&self) -> usize {
        self.key_size + 4
    }

    #[inline]
    fn slot_offset(&self, index: usize) -> usize {
        TREE_HEADER_SIZE + index * self.slot_size()
    }

    /// Initializes a fresh internal page.
    pub fn init(&mut self, page_id: PageId, parent: PageId, max_size: u32) {
        debug_assert!(
            TREE_HEADER_SIZE + (max_size as usize + 1) * self.slot_size() <= PAGE_SIZE,
            "internal max_size {} does not fit a page",
            max_size
        );
        init_header(self.data, TreePageType::Internal, page_id, parent, max_size);
    }

    fn write_slot(&mut self, index: usize, key: &[u8], child: PageId) {
        debug_assert_eq!(key.len(), self.key_size);
        let offset = self.slot_offset(index);
        self.data[offset..offset + self.key_size].copy_from_slice(key);
        write_page_id(self.data, offset + self.key_size, child);
    }

    fn write_key(&mut self, index: usize, key: &[u8]) {
        debug_assert_eq!(key.len(), self.key_size);
        let offset = self.slot_offset(index);
        self.data[offset..offset + self.key_size].copy_from_slice(key);
    }

    /// Replaces the separator key at a slot. Slot 0 holds no key.
    pub fn set_key_at(&mut self, index: usize, key: &[u8]) {
        debug_assert!(index >= 1 && index < self.as_ref().size() as usize);
        self.write_key(index, key);
    }

    /// Turns an empty page into a root with two children.
    pub fn populate_new_root(&mut self, left: PageId, key: &[u8], right: PageId) {
        debug_assert_eq!(self.as_ref().size(), 0);
        let offset = self.slot_offset(0);
        self.data[offset..offset + self.key_size].fill(0);
        write_page_id(self.data, offset + self.key_size, left);
        self.write_slot(1, key, right);
        set_size(self.data, 2);
    }

    /// Inserts `(key, new_child)` immediately after the slot holding
    /// `old_child`. Returns the new size, which may transiently be
    /// `max_size + 1`; the caller must then split.
    pub fn insert_node_after(
        &mut self,
        old_child: PageId,
        key: &[u8],
        new_child: PageId,
    ) -> Result<u32> {
        let index = self.as_ref().value_index(old_child).ok_or_else(|| {
            LatticeError::Corrupted(format!(
                "child {} not present in internal {}",
                old_child,
                TreePage::new(self.data).page_id()
            ))
        })?;
        let size = self.as_ref().size() as usize;
        let slot = self.slot_size();
        let start = self.slot_offset(index + 1);
        let end = self.slot_offset(size);
        self.data.copy_within(start..end, start + slot);
        self.write_slot(index + 1, key, new_child);
        set_size(self.data, size as u32 + 1);
        Ok(size as u32 + 1)
    }

    /// Removes the slot at `index`, keeping the remainder contiguous.
    pub fn remove_at(&mut self, index: usize) {
        let size = self.as_ref().size() as usize;
        debug_assert!(index < size);
        let start = self.slot_offset(index + 1);
        let end = self.slot_offset(size);
        let dest = self.slot_offset(index);
        self.data.copy_within(start..end, dest);
        set_size(self.data, size as u32 - 1);
    }

    /// Collapses a single-child root, returning the surviving child.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        debug_assert_eq!(self.as_ref().size(), 1);
        let child = self.as_ref().child_at(0);
        set_size(self.data, 0);
        child
    }

    /// Moves the right ceil-half of the slots into an empty sibling.
    ///
    /// The sibling's slot 0 receives the junction entry whose key is
    /// the separator to push up. Returns the moved children; the caller
    /// re-parents them to the sibling.
    pub fn move_half_to(&mut self, dst: &mut InternalMut<'_>) -> Vec<PageId> {
        let size = self.as_ref().size() as usize;
        let moved = (size + 1) / 2;
        let start = size - moved;
        let src_start = self.slot_offset(start);
        let src_end = self.slot_offset(size);
        let dst_start = dst.slot_offset(0);
        dst.data[dst_start..dst_start + (src_end - src_start)]
            .copy_from_slice(&self.data[src_start..src_end]);
        set_size(dst.data, moved as u32);
        set_size(self.data, start as u32);
        dst.as_ref().children(0, moved)
    }

    /// Appends every slot onto `dst`, stamping the parent separator
    /// into the junction. Returns the moved children; the caller
    /// re-parents them to `dst`.
    pub fn move_all_to(&mut self, dst: &mut InternalMut<'_>, middle_key: &[u8]) -> Vec<PageId> {
        // The separator from the parent labels the boundary between
        // dst's last child and our leftmost child.
        self.write_key(0, middle_key);
        let size = self.as_ref().size() as usize;
        let dst_size = dst.as_ref().size() as usize;
        let src_start = self.slot_offset(0);
        let src_end = self.slot_offset(size);
        let dst_start = dst.slot_offset(dst_size);
        dst.data[dst_start..dst_start + (src_end - src_start)]
            .copy_from_slice(&self.data[src_start..src_end]);
        set_size(dst.data, (dst_size + size) as u32);
        set_size(self.data, 0);
        dst.as_ref().children(dst_size, dst_size + size)
    }

    /// Rotates this page's first entry to the end of `dst` (its left
    /// sibling). The parent separator comes down to label the moved
    /// child; the returned key replaces it in the parent.
    pub fn move_first_to_end_of(
        &mut self,
        dst: &mut InternalMut<'_>,
        middle_key: &[u8],
    ) -> (Bytes, PageId) {
        let size = self.as_ref().size() as usize;
        debug_assert!(size >= 2);
        let moved_child = self.as_ref().child_at(0);
        let new_separator = Bytes::copy_from_slice(self.as_ref().key_at(1));

        let dst_size = dst.as_ref().size() as usize;
        dst.write_slot(dst_size, middle_key, moved_child);
        set_size(dst.data, dst_size as u32 + 1);

        let start = self.slot_offset(1);
        let end = self.slot_offset(size);
        let dest = self.slot_offset(0);
        self.data.copy_within(start..end, dest);
        set_size(self.data, size as u32 - 1);
        (new_separator, moved_child)
    }

    /// Rotates this page's last entry to the front of `dst` (its right
    /// sibling). The parent separator comes down to label dst's former
    /// leftmost child; the returned key replaces it in the parent.
    pub fn move_last_to_front_of(
        &mut self,
        dst: &mut InternalMut<'_>,
        middle_key: &[u8],
    ) -> (Bytes, PageId) {
        let size = self.as_ref().size() as usize;
        debug_assert!(size >= 2);
        let moved_child = self.as_ref().child_at(size - 1);
        let new_separator = Bytes::copy_from_slice(self.as_ref().key_at(size - 1));

        let dst_size = dst.as_ref().size() as usize;
        let shift_start = dst.slot_offset(0);
        let shift_end = dst.slot_offset(dst_size);
        let shift_dest = dst.slot_offset(1);
        dst.data.copy_within(shift_start..shift_end, shift_dest);
        let zero_key = vec![0u8; self.key_size];
        dst.write_slot(0, &zero_key, moved_child);
        dst.write_key(1, middle_key);
        set_size(dst.data, dst_size as u32 + 1);

        set_size(self.data, size as u32 - 1);
        (new_separator, moved_child)
    }
}
