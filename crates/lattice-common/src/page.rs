//! Page identifiers and size constants for LatticeDB storage.

use serde::{Deserialize, Serialize};

/// Size of a page in bytes (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Unique identifier for a page in the database file.
///
/// Page ids are 32-bit signed integers. Id 0 is reserved for the header
/// page; the disk manager hands out data page ids starting at 1. The
/// value -1 marks "no page".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    /// Sentinel for "no page".
    pub const INVALID: PageId = PageId(-1);

    /// The header page. Also doubles as the "no parent" marker in tree
    /// page headers and as the empty-tree root sentinel.
    pub const HEADER: PageId = PageId(0);

    /// Returns true if this id refers to an actual page.
    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    /// Serializes the id to its 4-byte on-disk form.
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Deserializes the id from its 4-byte on-disk form.
    pub fn from_le_bytes(buf: [u8; 4]) -> Self {
        Self(i32::from_le_bytes(buf))
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constant() {
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_page_id_validity() {
        assert!(PageId(1).is_valid());
        assert!(PageId::HEADER.is_valid());
        assert!(!PageId::INVALID.is_valid());
        assert!(!PageId(-7).is_valid());
    }

    #[test]
    fn test_page_id_sentinels() {
        assert_eq!(PageId::INVALID, PageId(-1));
        assert_eq!(PageId::HEADER, PageId(0));
        assert_ne!(PageId::INVALID, PageId::HEADER);
    }

    #[test]
    fn test_page_id_bytes_roundtrip() {
        for id in [PageId(0), PageId(1), PageId(-1), PageId(i32::MAX)] {
            assert_eq!(PageId::from_le_bytes(id.to_le_bytes()), id);
        }
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId(42).to_string(), "page:42");
        assert_eq!(PageId::INVALID.to_string(), "page:-1");
    }

    #[test]
    fn test_page_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PageId(1));
        set.insert(PageId(2));
        set.insert(PageId(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId(500);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
