//! Overflow chains for values too large to store inline.
//!
//! Each relation owns a dedicated overflow file. Page 0 is a meta page
//! holding the free-list head and the allocation horizon; every other page
//! is either a data page `(next: u32, used: u16, payload)` or sits on the
//! free list `(next_free: u32, 0: u16, …)`. Freed chains are recycled before
//! the file grows.
//!
//! The store performs raw page I/O against its file set instead of going
//! through the buffer pool: overflow pages are not slotted, are read at most
//! once per value, and the meta page must hit disk at the end of every
//! mutation anyway.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::bytes::{get_u16, get_u32, put_u16, put_u32};
use crate::error::{Result, TablaError};
use crate::io::FileSet;
use crate::pager::{disk, PageId};
use crate::storage::page::PAGE_SIZE;

const DATA_HEADER: usize = 6;
const META_PAGE: PageId = 0;

/// Payload bytes one overflow page can carry.
pub const OVERFLOW_PAYLOAD_MAX: usize = PAGE_SIZE - DATA_HEADER;

/// Handle to a stored overflow value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowRef {
    /// First page of the chain; always `>= 1`.
    pub first_page_id: PageId,
    /// Total value length in bytes.
    pub length: u32,
}

/// Counters describing overflow activity since the store was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverflowStats {
    /// Pages taken from the end of the file.
    pub pages_allocated: u64,
    /// Pages reused from the free list.
    pub pages_recycled: u64,
    /// Pages pushed onto the free list.
    pub pages_freed: u64,
    /// Total payload bytes written.
    pub bytes_written: u64,
    /// Total payload bytes read.
    pub bytes_read: u64,
}

/// Linked-list store for oversized byte strings.
pub struct OverflowStore {
    fs: Arc<dyn FileSet>,
    free_head: PageId,
    next_alloc: PageId,
    fsync_meta: bool,
    stats: OverflowStats,
}

impl OverflowStore {
    /// Opens (or initializes) the overflow store of `fs`, fsyncing the meta
    /// page after every mutation.
    pub fn open(fs: Arc<dyn FileSet>) -> Result<Self> {
        Self::open_with_options(fs, true)
    }

    /// Opens the store with explicit control over meta-page fsync.
    pub fn open_with_options(fs: Arc<dyn FileSet>, fsync_meta: bool) -> Result<Self> {
        let mut meta = vec![0u8; PAGE_SIZE];
        disk::read_page(fs.as_ref(), META_PAGE, &mut meta)?;
        let free_head = get_u32(&meta, 0);
        let stored_next = get_u32(&meta, 4);
        // A torn meta write can understate the horizon; re-deriving it from
        // the file length can only leak pages, never double-allocate.
        let on_disk = disk::count_pages(fs.as_ref())?;
        let next_alloc = stored_next.max(on_disk).max(1);
        Ok(Self {
            fs,
            free_head,
            next_alloc,
            fsync_meta,
            stats: OverflowStats::default(),
        })
    }

    /// Current counters.
    pub fn stats(&self) -> OverflowStats {
        self.stats
    }

    fn write_meta(&self) -> Result<()> {
        let mut meta = vec![0u8; PAGE_SIZE];
        put_u32(&mut meta, 0, self.free_head);
        put_u32(&mut meta, 4, self.next_alloc);
        disk::write_page(self.fs.as_ref(), META_PAGE, &meta)?;
        if self.fsync_meta {
            self.fs.open_segment(0)?.sync_all()?;
        }
        Ok(())
    }

    fn allocate(&mut self) -> Result<PageId> {
        if self.free_head != 0 {
            let page_id = self.free_head;
            if page_id >= self.next_alloc {
                return Err(TablaError::Corruption(format!(
                    "free list head {page_id} beyond allocation horizon {}",
                    self.next_alloc
                )));
            }
            let mut buf = vec![0u8; PAGE_SIZE];
            disk::read_page(self.fs.as_ref(), page_id, &mut buf)?;
            self.free_head = get_u32(&buf, 0);
            self.stats.pages_recycled += 1;
            return Ok(page_id);
        }
        let page_id = self.next_alloc;
        self.next_alloc += 1;
        self.stats.pages_allocated += 1;
        Ok(page_id)
    }

    /// Stores `value` in a fresh chain and returns its reference.
    pub fn write(&mut self, value: &[u8]) -> Result<OverflowRef> {
        if value.is_empty() {
            return Err(TablaError::InvalidArgument(
                "empty overflow value".into(),
            ));
        }
        let n_pages = value.len().div_ceil(OVERFLOW_PAYLOAD_MAX);
        let mut pages = Vec::with_capacity(n_pages);
        for _ in 0..n_pages {
            pages.push(self.allocate()?);
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        for (i, &page_id) in pages.iter().enumerate() {
            let start = i * OVERFLOW_PAYLOAD_MAX;
            let end = (start + OVERFLOW_PAYLOAD_MAX).min(value.len());
            let chunk = &value[start..end];
            let next = pages.get(i + 1).copied().unwrap_or(0);
            buf.fill(0);
            put_u32(&mut buf, 0, next);
            put_u16(&mut buf, 4, chunk.len() as u16);
            buf[DATA_HEADER..DATA_HEADER + chunk.len()].copy_from_slice(chunk);
            disk::write_page(self.fs.as_ref(), page_id, &buf)?;
        }
        self.write_meta()?;
        self.stats.bytes_written += value.len() as u64;
        trace!(pages = n_pages, len = value.len(), "overflow.write");
        Ok(OverflowRef {
            first_page_id: pages[0],
            length: value.len() as u32,
        })
    }

    fn check_ref(r: OverflowRef) -> Result<()> {
        if r.length == 0 {
            return Err(TablaError::InvalidArgument(
                "zero-length overflow reference".into(),
            ));
        }
        if r.first_page_id < 1 {
            return Err(TablaError::InvalidArgument(
                "overflow reference points at the meta page".into(),
            ));
        }
        Ok(())
    }

    fn page_budget(length: u32) -> usize {
        (length as usize).div_ceil(OVERFLOW_PAYLOAD_MAX) + 4
    }

    /// Reads a chain back into one contiguous buffer.
    pub fn read(&mut self, r: OverflowRef) -> Result<Vec<u8>> {
        Self::check_ref(r)?;
        let mut out = Vec::with_capacity(r.length as usize);
        let mut remaining = r.length as usize;
        let budget = Self::page_budget(r.length);
        let mut current = r.first_page_id;
        let mut visited = 0usize;
        let mut buf = vec![0u8; PAGE_SIZE];
        while remaining > 0 {
            if current == 0 {
                return Err(TablaError::Corruption(format!(
                    "overflow chain of {} truncated with {remaining} bytes missing",
                    self.fs.describe()
                )));
            }
            if visited >= budget {
                return Err(TablaError::Corruption(
                    "overflow chain longer than its reference allows".into(),
                ));
            }
            disk::read_page(self.fs.as_ref(), current, &mut buf)?;
            let next = get_u32(&buf, 0);
            let mut used = get_u16(&buf, 4) as usize;
            if used > OVERFLOW_PAYLOAD_MAX {
                warn!(page = current, used, "overflow used count exceeds capacity; clamping");
                used = OVERFLOW_PAYLOAD_MAX;
            }
            if used > remaining {
                warn!(
                    page = current,
                    used, remaining, "overflow used count exceeds remaining length; clamping"
                );
                used = remaining;
            }
            out.extend_from_slice(&buf[DATA_HEADER..DATA_HEADER + used]);
            remaining -= used;
            current = next;
            visited += 1;
        }
        self.stats.bytes_read += r.length as u64;
        trace!(pages = visited, len = r.length, "overflow.read");
        Ok(out)
    }

    /// Returns a chain's pages to the free list.
    pub fn free(&mut self, r: OverflowRef) -> Result<()> {
        Self::check_ref(r)?;
        let budget = Self::page_budget(r.length);
        let mut current = r.first_page_id;
        let mut visited = 0usize;
        let mut buf = vec![0u8; PAGE_SIZE];
        while current != 0 {
            if visited >= budget {
                return Err(TablaError::Corruption(
                    "overflow chain longer than its reference allows".into(),
                ));
            }
            disk::read_page(self.fs.as_ref(), current, &mut buf)?;
            let next = get_u32(&buf, 0);
            // interior pages already link to their successor; the tail is
            // spliced onto the old free list
            let next_free = if next == 0 { self.free_head } else { next };
            put_u32(&mut buf, 0, next_free);
            put_u16(&mut buf, 4, 0);
            disk::write_page(self.fs.as_ref(), current, &buf)?;
            current = next;
            visited += 1;
        }
        self.free_head = r.first_page_id;
        self.write_meta()?;
        self.stats.pages_freed += visited as u64;
        trace!(pages = visited, "overflow.free");
        Ok(())
    }
}
