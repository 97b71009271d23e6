//! Fixed-width index entry codecs.
//!
//! Leaf entries are 14 bytes (`key: i64, page: u32, slot: u16`), internal
//! entries 12 bytes (`min_key: i64, child: u32`). Both are stored as ordinary
//! slotted-page tuples; a page's role (leaf vs internal) follows from the
//! tree's height during traversal, not from on-page tagging.

use crate::bytes::{get_i64, get_u16, get_u32, put_i64, put_u16, put_u32};
use crate::error::{Result, TablaError};
use crate::pager::PageId;
use crate::storage::Tid;

/// Encoded size of a leaf entry.
pub const LEAF_ENTRY_SIZE: usize = 14;
/// Encoded size of an internal entry.
pub const INTERNAL_ENTRY_SIZE: usize = 12;

/// One `(key, tid)` pair in a leaf page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafEntry {
    /// Index key.
    pub key: i64,
    /// Heap tuple the key maps to.
    pub tid: Tid,
}

impl LeafEntry {
    /// Serializes the entry.
    pub fn encode(&self) -> [u8; LEAF_ENTRY_SIZE] {
        let mut buf = [0u8; LEAF_ENTRY_SIZE];
        put_i64(&mut buf, 0, self.key);
        put_u32(&mut buf, 8, self.tid.page_id);
        put_u16(&mut buf, 12, self.tid.slot);
        buf
    }

    /// Deserializes an entry, requiring the exact encoded size.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != LEAF_ENTRY_SIZE {
            return Err(TablaError::Corruption(format!(
                "leaf entry of {} bytes, expected {LEAF_ENTRY_SIZE}",
                buf.len()
            )));
        }
        Ok(Self {
            key: get_i64(buf, 0),
            tid: Tid::new(get_u32(buf, 8), get_u16(buf, 12)),
        })
    }

    /// Sort key: `(key, page, slot)` keeps duplicates in tuple-id order.
    pub fn sort_key(&self) -> (i64, PageId, u16) {
        (self.key, self.tid.page_id, self.tid.slot)
    }
}

/// One `(min_key, child)` pair in an internal page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalEntry {
    /// Smallest key reachable through `child`.
    pub min_key: i64,
    /// Child page id.
    pub child: PageId,
}

impl InternalEntry {
    /// Serializes the entry.
    pub fn encode(&self) -> [u8; INTERNAL_ENTRY_SIZE] {
        let mut buf = [0u8; INTERNAL_ENTRY_SIZE];
        put_i64(&mut buf, 0, self.min_key);
        put_u32(&mut buf, 8, self.child);
        buf
    }

    /// Deserializes an entry, requiring the exact encoded size.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != INTERNAL_ENTRY_SIZE {
            return Err(TablaError::Corruption(format!(
                "internal entry of {} bytes, expected {INTERNAL_ENTRY_SIZE}",
                buf.len()
            )));
        }
        Ok(Self {
            min_key: get_i64(buf, 0),
            child: get_u32(buf, 8),
        })
    }
}
