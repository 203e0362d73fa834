//! Disk-backed B+ tree index with latch-crabbing concurrency control.
//!
//! The tree maps fixed-size keys to record ids and lives entirely in
//! paginated form on top of the buffer pool:
//!
//! - `page` defines the bit-exact leaf/internal page layouts and the
//!   typed, latch-scoped views over raw frame bytes
//! - `header` is the directory page at page id 0 mapping index names to
//!   root page ids
//! - `context` carries the latches and pins an operation accumulates
//!   during its descent
//! - `tree` implements point lookup, insert, and remove with the
//!   optimistic/pessimistic crabbing protocol
//! - `iterator` is the ordered forward scan

mod context;
mod header;
mod iterator;
mod page;
mod tree;

pub use header::{HeaderMut, HeaderRef, MAX_NAME_LEN};
pub use iterator::TreeIterator;
pub use page::{
    internal_capacity, leaf_capacity, InternalMut, InternalRef, LeafMut, LeafRef, TreePage,
    TreePageType, LEAF_HEADER_SIZE, TREE_HEADER_SIZE,
};
pub use tree::BPlusTree;

use std::cmp::Ordering;
use std::sync::Arc;

/// Opaque key comparator. The tree never parses keys; all ordering
/// decisions go through one of these.
pub type KeyComparator = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// Byte-wise key comparison with a u64 prefix fast path for 8+ byte
/// keys (big-endian prefixes preserve sort order).
#[inline]
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    if a.len() >= 8 && b.len() >= 8 {
        let a_prefix = u64::from_be_bytes([a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7]]);
        let b_prefix = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        if a_prefix != b_prefix {
            return a_prefix.cmp(&b_prefix);
        }
        if a.len() == 8 && b.len() == 8 {
            return Ordering::Equal;
        }
    }
    a.cmp(b)
}

/// The default comparator: plain byte order.
pub fn default_comparator() -> KeyComparator {
    Arc::new(compare_keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_keys_byte_order() {
        assert_eq!(compare_keys(b"abc", b"abd"), Ordering::Less);
        assert_eq!(compare_keys(b"abc", b"abc"), Ordering::Equal);
        assert_eq!(compare_keys(b"abd", b"abc"), Ordering::Greater);
    }

    #[test]
    fn test_compare_keys_u64_prefix() {
        let a = 100u64.to_be_bytes();
        let b = 200u64.to_be_bytes();
        assert_eq!(compare_keys(&a, &b), Ordering::Less);
        assert_eq!(compare_keys(&b, &a), Ordering::Greater);
        assert_eq!(compare_keys(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_compare_keys_prefix_tie_breaks_on_suffix() {
        let a = [0, 0, 0, 0, 0, 0, 0, 1, 5];
        let b = [0, 0, 0, 0, 0, 0, 0, 1, 9];
        assert_eq!(compare_keys(&a, &b), Ordering::Less);
    }
}
