//! Storage engine for LatticeDB.
//!
//! This crate provides:
//! - Disk manager for page-level file I/O
//! - A clustered, order-preserving B+ tree index over the buffer pool,
//!   with latch-crabbing concurrency control

mod btree;
mod disk;

pub use btree::{
    compare_keys, default_comparator, leaf_capacity, internal_capacity, BPlusTree, HeaderMut,
    HeaderRef, InternalMut, InternalRef, KeyComparator, LeafMut, LeafRef, TreeIterator, TreePage,
    TreePageType, LEAF_HEADER_SIZE, TREE_HEADER_SIZE,
};
pub use disk::{DiskManager, DiskManagerConfig};
