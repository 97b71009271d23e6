//! Stateless storage manager: page-granular I/O over a segmented file set.
//!
//! Logical page ids map onto 1 GiB segment files: page `p` lives in segment
//! `p / PAGES_PER_SEGMENT` at byte offset `(p % PAGES_PER_SEGMENT) * PAGE_SIZE`.
//! All callers are expected to serialize through the buffer pool; these
//! functions hold no state of their own.

use crate::error::{Result, TablaError};
use crate::io::FileSet;
use crate::pager::PageId;
use crate::storage::page::{SlottedPage, HEADER_SIZE, PAGE_SIZE};

/// Segment rollover size.
pub const SEGMENT_SIZE: u64 = 1 << 30;
/// Pages per segment file.
pub const PAGES_PER_SEGMENT: u64 = SEGMENT_SIZE / PAGE_SIZE as u64;

/// Maps a page id to its segment number and byte offset within the segment.
pub fn locate(page_id: PageId) -> (u32, u64) {
    let page = u64::from(page_id);
    let segment = (page / PAGES_PER_SEGMENT) as u32;
    let offset = (page % PAGES_PER_SEGMENT) * PAGE_SIZE as u64;
    (segment, offset)
}

fn check_buffer(len: usize) -> Result<()> {
    if len != PAGE_SIZE {
        return Err(TablaError::InvalidArgument(format!(
            "page buffer must be {PAGE_SIZE} bytes, got {len}"
        )));
    }
    Ok(())
}

/// Reads one page into `dst`, zero-filling anything past end-of-file. Pages
/// that were never written read back as all zeroes rather than failing.
pub fn read_page(fs: &dyn FileSet, page_id: PageId, dst: &mut [u8]) -> Result<()> {
    check_buffer(dst.len())?;
    let (segment, offset) = locate(page_id);
    let io = fs.open_segment(segment)?;
    let read = io.read_at(offset, dst)?;
    if read < dst.len() {
        dst[read..].fill(0);
    }
    Ok(())
}

/// Writes one page at its computed offset.
pub fn write_page(fs: &dyn FileSet, page_id: PageId, src: &[u8]) -> Result<()> {
    check_buffer(src.len())?;
    let (segment, offset) = locate(page_id);
    let io = fs.open_segment(segment)?;
    io.write_at(offset, src)
}

/// Reads one page and, if its header region is entirely zero (never
/// initialized), formats it in memory as an empty slotted page carrying
/// `page_id`. The page is not written back; the caller's dirty tracking
/// decides that.
pub fn load_page(fs: &dyn FileSet, page_id: PageId, dst: &mut [u8]) -> Result<()> {
    read_page(fs, page_id, dst)?;
    if dst[..HEADER_SIZE].iter().all(|&b| b == 0) {
        SlottedPage::format(dst, page_id)?;
    } else {
        let stored = {
            let page = SlottedPage::from_bytes(dst)?;
            page.page_id()
        };
        if stored != page_id {
            return Err(TablaError::Corruption(format!(
                "page {page_id} of {} carries header id {stored}",
                fs.describe()
            )));
        }
    }
    Ok(())
}

/// Counts whole pages across the segment files, stopping at the first
/// missing segment.
pub fn count_pages(fs: &dyn FileSet) -> Result<u32> {
    let mut total: u64 = 0;
    let mut segment = 0u32;
    while let Some(len) = fs.segment_len(segment)? {
        total += len / PAGE_SIZE as u64;
        segment += 1;
    }
    Ok(total as u32)
}
