//! Heap tables: row-level operations over a relation's page sequence.
//!
//! A table is an ordered run of pages `[0, page_count)` in one file set.
//! Inserts append to the last page and allocate a fresh one when it is full;
//! a row's identity is its [`Tid`] and survives in-page growth through slot
//! redirects. Index maintenance on update/delete is the caller's concern.

use tracing::{debug, trace};

use crate::error::{Result, TablaError};
use crate::pager::{PageId, PoolView};
use crate::storage::overflow::OverflowStore;
use crate::storage::page::{SlottedPage, HEADER_SIZE, PAGE_SIZE, PAGE_TRAILER_SIZE, SLOT_SIZE};
use crate::storage::row::{decode_row, encode_row, Schema, Value};
use crate::storage::Tid;

/// Largest encoded row that fits an empty page together with its slot.
const MAX_ROW_BYTES: usize = PAGE_SIZE - HEADER_SIZE - PAGE_TRAILER_SIZE - SLOT_SIZE;

/// Callback invoked whenever the table's page count changes, so the catalog
/// sidecar can mirror it.
pub type PageCountHook = Box<dyn FnMut(u32) -> Result<()> + Send>;

/// Row storage for one relation.
pub struct Table {
    name: String,
    schema: Schema,
    view: PoolView,
    overflow: OverflowStore,
    page_count: u32,
    hook: Option<PageCountHook>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("page_count", &self.page_count)
            .finish()
    }
}

impl Table {
    /// Assembles a table handle over an existing page sequence. `page_count`
    /// must match what the catalog recorded (0 for a fresh table).
    pub fn new(
        name: impl Into<String>,
        schema: Schema,
        view: PoolView,
        overflow: OverflowStore,
        page_count: u32,
        hook: Option<PageCountHook>,
    ) -> Self {
        Self {
            name: name.into(),
            schema,
            view,
            overflow,
            page_count,
            hook,
        }
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The row schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Pages currently allocated to the table.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// The table's overflow store.
    pub fn overflow(&mut self) -> &mut OverflowStore {
        &mut self.overflow
    }

    fn set_page_count(&mut self, count: u32) -> Result<()> {
        self.page_count = count;
        if let Some(hook) = &mut self.hook {
            hook(count)?;
        }
        Ok(())
    }

    /// Inserts a row and returns its tuple id.
    pub fn insert(&mut self, values: &[Value]) -> Result<Tid> {
        let payload = encode_row(&self.schema, values)?;
        if payload.len() > MAX_ROW_BYTES {
            return Err(TablaError::TupleTooLarge(payload.len()));
        }
        let mut target: PageId = if self.page_count == 0 {
            // lazy allocation: the first insert brings page 0 into being
            self.set_page_count(1)?;
            0
        } else {
            self.page_count - 1
        };
        loop {
            let guard = self.view.get_page(target)?;
            let inserted = {
                let mut data = guard.data_mut();
                let mut page = SlottedPage::from_bytes(&mut data[..])?;
                page.insert_tuple(&payload)
            };
            match inserted {
                Ok(slot) => {
                    guard.mark_dirty();
                    trace!(table = %self.name, page = target, slot, "heap.insert");
                    return Ok(Tid::new(target, slot));
                }
                Err(TablaError::PageFull) => {
                    drop(guard);
                    target = self.page_count;
                    self.set_page_count(self.page_count + 1)?;
                    debug!(table = %self.name, page = target, "heap.grow");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fetches a row by tuple id.
    pub fn get(&self, tid: Tid) -> Result<Vec<Value>> {
        if tid.page_id >= self.page_count {
            return Err(TablaError::NotFound("row"));
        }
        let guard = self.view.get_page(tid.page_id)?;
        let mut data = guard.data_mut();
        let page = SlottedPage::from_bytes(&mut data[..])?;
        let payload = page.read_tuple(tid.slot)?;
        decode_row(&self.schema, payload)
    }

    /// Replaces a row in place, keeping its tuple id. The indexes that
    /// reference the row are not touched.
    pub fn update(&mut self, tid: Tid, values: &[Value]) -> Result<()> {
        let payload = encode_row(&self.schema, values)?;
        if tid.page_id >= self.page_count {
            return Err(TablaError::NotFound("row"));
        }
        let guard = self.view.get_page(tid.page_id)?;
        let updated = {
            let mut data = guard.data_mut();
            let mut page = SlottedPage::from_bytes(&mut data[..])?;
            page.update_tuple(tid.slot, &payload)
        };
        match updated {
            Ok(()) => {
                guard.mark_dirty();
                trace!(table = %self.name, tid = %tid, "heap.update");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Tombstones a row. Stale index entries pointing at the tuple id are
    /// the reader's problem, per the executor contract.
    pub fn delete(&mut self, tid: Tid) -> Result<()> {
        if tid.page_id >= self.page_count {
            return Err(TablaError::NotFound("row"));
        }
        let guard = self.view.get_page(tid.page_id)?;
        let deleted = {
            let mut data = guard.data_mut();
            let mut page = SlottedPage::from_bytes(&mut data[..])?;
            page.delete_tuple(tid.slot)
        };
        match deleted {
            Ok(()) => {
                guard.mark_dirty();
                trace!(table = %self.name, tid = %tid, "heap.delete");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Visits every live row in page order. Errors from the callback or
    /// from a slot declared live abort the scan.
    pub fn scan<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Tid, Vec<Value>) -> Result<()>,
    {
        for page_id in 0..self.page_count {
            let guard = self.view.get_page(page_id)?;
            let mut data = guard.data_mut();
            let page = SlottedPage::from_bytes(&mut data[..])?;
            for slot in 0..page.slot_count() {
                if !page.is_live(slot)? {
                    continue;
                }
                let payload = page.read_tuple(slot)?;
                let row = decode_row(&self.schema, payload)?;
                f(Tid::new(page_id, slot), row)?;
            }
        }
        Ok(())
    }
}
