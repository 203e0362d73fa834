//! Buffer pool management for LatticeDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable page count
//! - LRU eviction policy for cache management
//! - Pin counting for concurrent access
//! - Dirty page tracking for write-back
//! - Per-frame reader/writer latches, disjoint from the pool mutex

mod frame;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId, PageReadGuard, PageWriteGuard};
pub use pool::{BufferPoolConfig, BufferPoolManager, BufferPoolStats, DiskDevice};
pub use replacer::{LruReplacer, Replacer};
