//! Header page: the index directory at page id 0.
//!
//! Layout: record count (u32) followed by fixed-width records of a
//! NUL-padded index name and the index's root page id. The page is
//! always re-acquired through the buffer pool, never cached.

use lattice_common::error::{LatticeError, Result};
use lattice_common::page::{PageId, PAGE_SIZE};

/// Maximum index name length in bytes.
pub const MAX_NAME_LEN: usize = 32;

const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const RECORD_SIZE: usize = MAX_NAME_LEN + 4;

/// Number of records the header page can hold.
const CAPACITY: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

fn pad_name(name: &str) -> Result<[u8; MAX_NAME_LEN]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_NAME_LEN {
        return Err(LatticeError::Corrupted(format!(
            "index name must be 1..={} bytes, got {}",
            MAX_NAME_LEN,
            bytes.len()
        )));
    }
    let mut padded = [0u8; MAX_NAME_LEN];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

/// Read-only view of the header page.
#[derive(Clone, Copy)]
pub struct HeaderRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Number of registered indexes.
    pub fn record_count(&self) -> u32 {
        u32::from_le_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }

    fn record_offset(index: usize) -> usize {
        RECORDS_OFFSET + index * RECORD_SIZE
    }

    fn find(&self, padded: &[u8; MAX_NAME_LEN]) -> Option<usize> {
        (0..self.record_count() as usize).find(|&i| {
            let offset = Self::record_offset(i);
            &self.data[offset..offset + MAX_NAME_LEN] == padded
        })
    }

    /// Root page id registered for an index, if any.
    pub fn get_root_id(&self, name: &str) -> Result<Option<PageId>> {
        let padded = pad_name(name)?;
        Ok(self.find(&padded).map(|i| {
            let offset = Self::record_offset(i) + MAX_NAME_LEN;
            PageId::from_le_bytes([
                self.data[offset],
                self.data[offset + 1],
                self.data[offset + 2],
                self.data[offset + 3],
            ])
        }))
    }
}

/// Mutable view of the header page.
pub struct HeaderMut<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn as_ref(&self) -> HeaderRef<'_> {
        HeaderRef::new(self.data)
    }

    fn write_record(&mut self, index: usize, padded: &[u8; MAX_NAME_LEN], root: PageId) {
        let offset = HeaderRef::record_offset(index);
        self.data[offset..offset + MAX_NAME_LEN].copy_from_slice(padded);
        self.data[offset + MAX_NAME_LEN..offset + RECORD_SIZE]
            .copy_from_slice(&root.to_le_bytes());
    }

    /// Registers a new index. Returns false when the name is already
    /// present (the record is left untouched).
    pub fn insert_record(&mut self, name: &str, root: PageId) -> Result<bool> {
        let padded = pad_name(name)?;
        if self.as_ref().find(&padded).is_some() {
            return Ok(false);
        }
        let count = self.as_ref().record_count() as usize;
        if count >= CAPACITY {
            return Err(LatticeError::HeaderPageFull);
        }
        self.write_record(count, &padded, root);
        self.data[COUNT_OFFSET..COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32 + 1).to_le_bytes());
        Ok(true)
    }

    /// Updates an existing record. Returns false when the name is
    /// unknown.
    pub fn update_record(&mut self, name: &str, root: PageId) -> Result<bool> {
        let padded = pad_name(name)?;
        match self.as_ref().find(&padded) {
            Some(i) => {
                self.write_record(i, &padded, root);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Inserts or updates a record. Called on every root change.
    pub fn upsert(&mut self, name: &str, root: PageId) -> Result<()> {
        if !self.update_record(name, root)? {
            self.insert_record(name, root)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_empty_page() {
        let buf = [0u8; PAGE_SIZE];
        let header = HeaderRef::new(&buf[..]);
        assert_eq!(header.record_count(), 0);
        assert_eq!(header.get_root_id("orders_pk").unwrap(), None);
    }

    #[test]
    fn test_header_insert_and_get() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderMut::new(&mut buf[..]);

        assert!(header.insert_record("orders_pk", PageId(3)).unwrap());
        assert!(header.insert_record("users_pk", PageId(9)).unwrap());
        assert_eq!(header.as_ref().record_count(), 2);

        assert_eq!(
            header.as_ref().get_root_id("orders_pk").unwrap(),
            Some(PageId(3))
        );
        assert_eq!(
            header.as_ref().get_root_id("users_pk").unwrap(),
            Some(PageId(9))
        );
        assert_eq!(header.as_ref().get_root_id("missing").unwrap(), None);
    }

    #[test]
    fn test_header_insert_existing_refused() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderMut::new(&mut buf[..]);

        assert!(header.insert_record("orders_pk", PageId(3)).unwrap());
        assert!(!header.insert_record("orders_pk", PageId(5)).unwrap());
        assert_eq!(
            header.as_ref().get_root_id("orders_pk").unwrap(),
            Some(PageId(3))
        );
    }

    #[test]
    fn test_header_update_record() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderMut::new(&mut buf[..]);

        assert!(!header.update_record("orders_pk", PageId(5)).unwrap());
        header.insert_record("orders_pk", PageId(3)).unwrap();
        assert!(header.update_record("orders_pk", PageId(5)).unwrap());
        assert_eq!(
            header.as_ref().get_root_id("orders_pk").unwrap(),
            Some(PageId(5))
        );
    }

    #[test]
    fn test_header_upsert() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderMut::new(&mut buf[..]);

        header.upsert("orders_pk", PageId(3)).unwrap();
        header.upsert("orders_pk", PageId(7)).unwrap();
        assert_eq!(header.as_ref().record_count(), 1);
        assert_eq!(
            header.as_ref().get_root_id("orders_pk").unwrap(),
            Some(PageId(7))
        );
    }

    #[test]
    fn test_header_name_too_long() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderMut::new(&mut buf[..]);
        let long_name = "x".repeat(MAX_NAME_LEN + 1);
        assert!(header.insert_record(&long_name, PageId(1)).is_err());
    }

    #[test]
    fn test_header_capacity_limit() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderMut::new(&mut buf[..]);

        for i in 0..CAPACITY {
            assert!(header
                .insert_record(&format!("index_{}", i), PageId(i as i32 + 1))
                .unwrap());
        }
        let overflow = header.insert_record("one_too_many", PageId(999));
        assert!(matches!(overflow, Err(LatticeError::HeaderPageFull)));
    }
}
