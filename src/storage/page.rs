//! Slotted page layout.
//!
//! A page is a fixed 8192-byte buffer: a 24-byte header, a slot directory
//! growing up from the header, a tuple heap growing down from the reserved
//! trailer, and an 8-byte trailer holding the (currently unused) page LSN.
//!
//! ```text
//! +--------+-----------------+ .. free .. +-------------+---------+
//! | header | slot directory ->            <- tuple heap | trailer |
//! +--------+-----------------+------------+-------------+---------+
//! 0        24               lower        upper        special   8192
//! ```
//!
//! Each 6-byte slot stores `offset(u16) length(u16) flags(u16)`. A `Moved`
//! slot keeps the target slot index in its offset field so a row can grow
//! within its page without changing its tuple id.

use crate::bytes::{get_u16, get_u32, put_u16, put_u32};
use crate::error::{Result, TablaError};
use crate::pager::PageId;

/// Fixed page size for every relation in the engine.
pub const PAGE_SIZE: usize = 8192;
/// Bytes reserved at the front of each page for the header.
pub const HEADER_SIZE: usize = 24;
/// Bytes per slot directory entry.
pub const SLOT_SIZE: usize = 6;
/// Bytes reserved at the tail of each page for the page LSN.
pub const PAGE_TRAILER_SIZE: usize = 8;
/// Largest payload `insert_tuple` accepts.
pub const MAX_TUPLE_SIZE: usize = PAGE_SIZE - HEADER_SIZE - SLOT_SIZE;

const FLAGS_OFFSET: usize = 0;
const PAGE_ID_OFFSET: usize = 2;
const LOWER_OFFSET: usize = 6;
const UPPER_OFFSET: usize = 8;
const SPECIAL_OFFSET: usize = 10;

const SPECIAL: usize = PAGE_SIZE - PAGE_TRAILER_SIZE;

/// State of a slot directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SlotFlag {
    /// Live tuple.
    Normal = 0,
    /// Tombstone; the slot index is never reused.
    Deleted = 1,
    /// Redirect; the offset field holds the target slot index.
    Moved = 2,
}

impl SlotFlag {
    fn from_u16(value: u16) -> Result<Self> {
        match value {
            0 => Ok(SlotFlag::Normal),
            1 => Ok(SlotFlag::Deleted),
            2 => Ok(SlotFlag::Moved),
            other => Err(TablaError::Corruption(format!(
                "unknown slot flag {other}"
            ))),
        }
    }
}

/// Mutable view over one page buffer.
///
/// Wrapping validates the header invariants; every operation afterwards may
/// assume `HEADER_SIZE <= lower <= upper <= special`.
#[derive(Debug)]
pub struct SlottedPage<'a> {
    buf: &'a mut [u8],
}

impl<'a> SlottedPage<'a> {
    /// Initializes `buf` as an empty page with the given id, clearing any
    /// previous contents.
    pub fn format(buf: &mut [u8], page_id: PageId) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            return Err(TablaError::InvalidArgument(format!(
                "page buffer must be {PAGE_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        buf.fill(0);
        put_u16(buf, FLAGS_OFFSET, 0);
        put_u32(buf, PAGE_ID_OFFSET, page_id);
        put_u16(buf, LOWER_OFFSET, HEADER_SIZE as u16);
        put_u16(buf, UPPER_OFFSET, SPECIAL as u16);
        put_u16(buf, SPECIAL_OFFSET, SPECIAL as u16);
        Ok(())
    }

    /// Wraps an already-formatted page, validating the header.
    pub fn from_bytes(buf: &'a mut [u8]) -> Result<Self> {
        if buf.len() != PAGE_SIZE {
            return Err(TablaError::InvalidArgument(format!(
                "page buffer must be {PAGE_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        let lower = get_u16(buf, LOWER_OFFSET) as usize;
        let upper = get_u16(buf, UPPER_OFFSET) as usize;
        let special = get_u16(buf, SPECIAL_OFFSET) as usize;
        if special != SPECIAL {
            return Err(TablaError::Corruption(format!(
                "page special pointer {special} != {SPECIAL}"
            )));
        }
        if lower < HEADER_SIZE || lower > upper || upper > special {
            return Err(TablaError::Corruption(format!(
                "page pointers out of order: lower={lower} upper={upper} special={special}"
            )));
        }
        if (lower - HEADER_SIZE) % SLOT_SIZE != 0 {
            return Err(TablaError::Corruption(
                "slot directory length not a multiple of the slot size".into(),
            ));
        }
        Ok(Self { buf })
    }

    /// Re-initializes the page in place. Used by index node rewrites.
    pub fn reset(&mut self, page_id: PageId) {
        Self::format(self.buf, page_id).expect("buffer length already validated");
    }

    /// The page id recorded in the header.
    pub fn page_id(&self) -> PageId {
        get_u32(self.buf, PAGE_ID_OFFSET)
    }

    fn lower(&self) -> usize {
        get_u16(self.buf, LOWER_OFFSET) as usize
    }

    fn upper(&self) -> usize {
        get_u16(self.buf, UPPER_OFFSET) as usize
    }

    /// Number of slots ever allocated in this page; never decreases.
    pub fn slot_count(&self) -> u16 {
        ((self.lower() - HEADER_SIZE) / SLOT_SIZE) as u16
    }

    /// Bytes available between the slot directory and the tuple heap.
    pub fn free_space(&self) -> usize {
        self.upper() - self.lower()
    }

    fn slot(&self, index: u16) -> Result<(u16, u16, SlotFlag)> {
        if index >= self.slot_count() {
            return Err(TablaError::NotFound("slot"));
        }
        let base = HEADER_SIZE + index as usize * SLOT_SIZE;
        let offset = get_u16(self.buf, base);
        let length = get_u16(self.buf, base + 2);
        let flag = SlotFlag::from_u16(get_u16(self.buf, base + 4))?;
        Ok((offset, length, flag))
    }

    fn set_slot(&mut self, index: u16, offset: u16, length: u16, flag: SlotFlag) {
        let base = HEADER_SIZE + index as usize * SLOT_SIZE;
        put_u16(self.buf, base, offset);
        put_u16(self.buf, base + 2, length);
        put_u16(self.buf, base + 4, flag as u16);
    }

    fn check_normal_bounds(&self, offset: u16, length: u16) -> Result<()> {
        let (offset, length) = (offset as usize, length as usize);
        if offset == 0 || length == 0 {
            return Err(TablaError::Corruption(
                "live slot with zero offset or length".into(),
            ));
        }
        if offset < self.upper() || offset + length > SPECIAL {
            return Err(TablaError::Corruption(format!(
                "slot payload [{offset}, {}) outside tuple heap [{}, {SPECIAL})",
                offset + length,
                self.upper()
            )));
        }
        Ok(())
    }

    /// Follows `Moved` redirects from `index` to the terminal live slot,
    /// returning `(slot, offset, length)`. Bounded by the slot count so a
    /// redirect cycle is reported as corruption instead of looping.
    fn resolve(&self, index: u16) -> Result<(u16, u16, u16)> {
        let mut current = index;
        for _ in 0..=self.slot_count() {
            let (offset, length, flag) = self.slot(current)?;
            match flag {
                SlotFlag::Normal => {
                    self.check_normal_bounds(offset, length)?;
                    return Ok((current, offset, length));
                }
                SlotFlag::Deleted => return Err(TablaError::NotFound("slot")),
                SlotFlag::Moved => {
                    if length != 0 || offset >= self.slot_count() {
                        return Err(TablaError::Corruption(format!(
                            "redirect slot {current} points at invalid slot {offset}"
                        )));
                    }
                    current = offset;
                }
            }
        }
        Err(TablaError::Corruption(format!(
            "redirect cycle starting at slot {index}"
        )))
    }

    /// Appends a tuple, returning its slot index.
    pub fn insert_tuple(&mut self, payload: &[u8]) -> Result<u16> {
        if payload.is_empty() {
            return Err(TablaError::InvalidArgument(
                "empty tuple payload".into(),
            ));
        }
        if payload.len() > MAX_TUPLE_SIZE {
            return Err(TablaError::TupleTooLarge(payload.len()));
        }
        if self.free_space() < payload.len() + SLOT_SIZE {
            return Err(TablaError::PageFull);
        }
        let new_upper = self.upper() - payload.len();
        self.buf[new_upper..new_upper + payload.len()].copy_from_slice(payload);
        let index = self.slot_count();
        let new_lower = self.lower() + SLOT_SIZE;
        put_u16(self.buf, LOWER_OFFSET, new_lower as u16);
        put_u16(self.buf, UPPER_OFFSET, new_upper as u16);
        self.set_slot(index, new_upper as u16, payload.len() as u16, SlotFlag::Normal);
        Ok(index)
    }

    /// Reads a tuple, following redirects. Deleted and out-of-range slots
    /// yield `NotFound`.
    pub fn read_tuple(&self, index: u16) -> Result<&[u8]> {
        let (_, offset, length) = self.resolve(index)?;
        Ok(&self.buf[offset as usize..offset as usize + length as usize])
    }

    /// Replaces a tuple's payload, preserving the caller's slot index.
    ///
    /// A payload no longer than the current one is overwritten in place; a
    /// larger one is inserted as a fresh tuple and the old slot becomes a
    /// redirect to it.
    pub fn update_tuple(&mut self, index: u16, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(TablaError::InvalidArgument(
                "empty tuple payload".into(),
            ));
        }
        let (target, offset, length) = self.resolve(index)?;
        if payload.len() <= length as usize {
            let offset = offset as usize;
            self.buf[offset..offset + payload.len()].copy_from_slice(payload);
            self.set_slot(target, offset as u16, payload.len() as u16, SlotFlag::Normal);
            return Ok(());
        }
        let fresh = self.insert_tuple(payload)?;
        self.set_slot(target, fresh, 0, SlotFlag::Moved);
        Ok(())
    }

    /// Tombstones a tuple. Every slot along a redirect chain is tombstoned
    /// so a later scan cannot resurrect the payload under another slot.
    pub fn delete_tuple(&mut self, index: u16) -> Result<()> {
        // Validate the whole chain before mutating anything.
        let (terminal, _, _) = self.resolve(index)?;
        let mut current = index;
        loop {
            let (offset, _, _) = self.slot(current)?;
            self.set_slot(current, 0, 0, SlotFlag::Deleted);
            if current == terminal {
                return Ok(());
            }
            current = offset;
        }
    }

    /// True only for `Normal` slots whose payload bounds are valid. Used by
    /// the heap scanner; out-of-range indexes are simply not live.
    pub fn is_live(&self, index: u16) -> Result<bool> {
        if index >= self.slot_count() {
            return Ok(false);
        }
        let (offset, length, flag) = self.slot(index)?;
        if flag != SlotFlag::Normal {
            return Ok(false);
        }
        self.check_normal_bounds(offset, length)?;
        Ok(true)
    }

    /// Compact per-slot description for logs and test failure output.
    pub fn debug_slots(&self) -> String {
        let mut out = String::new();
        for index in 0..self.slot_count() {
            let line = match self.slot(index) {
                Ok((offset, length, SlotFlag::Normal)) => {
                    let start = offset as usize;
                    let preview_len = (length as usize).min(8);
                    let preview = hex::encode(&self.buf[start..start + preview_len]);
                    format!("{index}: normal off={offset} len={length} 0x{preview}")
                }
                Ok((offset, _, SlotFlag::Moved)) => format!("{index}: moved -> {offset}"),
                Ok((_, _, SlotFlag::Deleted)) => format!("{index}: deleted"),
                Err(err) => format!("{index}: <{err}>"),
            };
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}
