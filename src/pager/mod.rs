//! Shared buffer pool over segmented page files.
//!
//! One [`BufferPool`] caches pages for every relation in a database. Frames
//! are keyed by `(file set id, page id)`; a pin guard returned by
//! [`BufferPool::get_page`] keeps its frame resident until dropped and
//! records whether the caller mutated the page. Replacement is CLOCK by
//! default, behind the [`clock::Replacer`] trait.

/// Eviction policy trait and the CLOCK implementation.
pub mod clock;

/// Stateless page-granular I/O against a file set.
pub mod disk;

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use crate::error::{Result, TablaError};
use crate::io::FileSet;
use crate::storage::page::PAGE_SIZE;
use clock::{ClockReplacer, Replacer};

/// Logical page identifier within one relation's file set.
pub type PageId = u32;

/// Default number of frames in a pool.
pub const DEFAULT_POOL_PAGES: usize = 128;

struct Frame {
    fs: Option<Arc<dyn FileSet>>,
    page_id: PageId,
    buf: Arc<RwLock<Box<[u8]>>>,
    dirty: bool,
    pin_count: u32,
}

impl Frame {
    fn new() -> Self {
        Self {
            fs: None,
            page_id: 0,
            buf: Arc::new(RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice())),
            dirty: false,
            pin_count: 0,
        }
    }
}

/// Point-in-time counters describing pool behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Page requests served from a resident frame.
    pub hits: u64,
    /// Page requests that had to read from disk.
    pub misses: u64,
    /// Frames recycled to make room.
    pub evictions: u64,
    /// Pages written back by explicit flushes.
    pub flushes: u64,
    /// Total frames.
    pub capacity: usize,
    /// Frames currently holding a page.
    pub cached: usize,
}

struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<(u64, PageId), usize>,
    by_fs: HashMap<u64, HashSet<PageId>>,
    free: Vec<usize>,
    replacer: ClockReplacer,
    stats: PoolStats,
}

/// Shared page cache with pin/unpin reference counting and CLOCK eviction.
pub struct BufferPool {
    state: Mutex<PoolState>,
    capacity: usize,
}

impl BufferPool {
    /// Creates a pool with `capacity` frames.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TablaError::InvalidArgument(
                "pool capacity must be greater than zero".into(),
            ));
        }
        Ok(Self {
            state: Mutex::new(PoolState {
                frames: (0..capacity).map(|_| Frame::new()).collect(),
                page_table: HashMap::new(),
                by_fs: HashMap::new(),
                free: (0..capacity).rev().collect(),
                replacer: ClockReplacer::new(capacity),
                stats: PoolStats::default(),
            }),
            capacity,
        })
    }

    /// Number of frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pins `page_id` of `fs`, reading it from disk on a miss. A page that
    /// was never written materializes as a freshly formatted slotted page.
    pub fn get_page(&self, fs: &Arc<dyn FileSet>, page_id: PageId) -> Result<PageGuard<'_>> {
        let mut state = self.state.lock();
        let st = &mut *state;
        let key = (fs.id(), page_id);

        if let Some(&index) = st.page_table.get(&key) {
            let (buf, first_pin) = {
                let frame = &mut st.frames[index];
                frame.pin_count += 1;
                (Arc::clone(&frame.buf), frame.pin_count == 1)
            };
            if first_pin {
                st.replacer.set_evictable(index, false);
            }
            st.replacer.touch(index);
            st.stats.hits += 1;
            return Ok(PageGuard {
                pool: self,
                fs_id: key.0,
                page_id,
                buf,
                dirty: Cell::new(false),
            });
        }

        st.stats.misses += 1;
        let index = match st.free.pop() {
            Some(index) => index,
            None => Self::evict_locked(st)?,
        };

        {
            let frame = &st.frames[index];
            let mut buf = frame.buf.write();
            if let Err(err) = disk::load_page(fs.as_ref(), page_id, &mut buf[..]) {
                drop(buf);
                st.free.push(index);
                return Err(err);
            }
        }

        let buf = {
            let frame = &mut st.frames[index];
            frame.fs = Some(Arc::clone(fs));
            frame.page_id = page_id;
            frame.dirty = false;
            frame.pin_count = 1;
            Arc::clone(&frame.buf)
        };
        st.page_table.insert(key, index);
        st.by_fs.entry(key.0).or_default().insert(page_id);
        st.replacer.touch(index);
        trace!(fs = key.0, page_id, frame = index, "pool.load");
        Ok(PageGuard {
            pool: self,
            fs_id: key.0,
            page_id,
            buf,
            dirty: Cell::new(false),
        })
    }

    /// Picks a victim, writing it back first if dirty. On write-back failure
    /// the victim is restored as evictable so the pool stays usable.
    fn evict_locked(st: &mut PoolState) -> Result<usize> {
        let victim = st.replacer.evict().ok_or(TablaError::NoFreeFrame)?;
        let (fs, page_id, dirty, buf) = {
            let frame = &st.frames[victim];
            let fs = frame.fs.clone().ok_or_else(|| {
                TablaError::Corruption("replacer returned an unoccupied frame".into())
            })?;
            (fs, frame.page_id, frame.dirty, Arc::clone(&frame.buf))
        };

        if dirty {
            let data = buf.read();
            if let Err(err) = disk::write_page(fs.as_ref(), page_id, &data[..]) {
                drop(data);
                st.replacer.touch(victim);
                st.replacer.set_evictable(victim, true);
                return Err(err);
            }
        }

        let frame = &mut st.frames[victim];
        frame.fs = None;
        frame.dirty = false;
        frame.pin_count = 0;
        st.page_table.remove(&(fs.id(), page_id));
        if let Some(pages) = st.by_fs.get_mut(&fs.id()) {
            pages.remove(&page_id);
            if pages.is_empty() {
                st.by_fs.remove(&fs.id());
            }
        }
        st.stats.evictions += 1;
        trace!(fs = fs.id(), page_id, frame = victim, dirty, "pool.evict");
        Ok(victim)
    }

    fn unpin(&self, fs_id: u64, page_id: PageId, dirty: bool) {
        let mut state = self.state.lock();
        let st = &mut *state;
        // Unknown pages are ignored: the frame may have been dropped with
        // its file set while a stale guard was still alive.
        let Some(&index) = st.page_table.get(&(fs_id, page_id)) else {
            return;
        };
        let became_unpinned = {
            let frame = &mut st.frames[index];
            if dirty {
                frame.dirty = true;
            }
            if frame.pin_count > 0 {
                frame.pin_count -= 1;
                frame.pin_count == 0
            } else {
                false
            }
        };
        if became_unpinned {
            st.replacer.set_evictable(index, true);
        }
    }

    fn flush_frames(st: &mut PoolState, fs_filter: Option<u64>) -> Result<()> {
        for index in 0..st.frames.len() {
            let (fs, page_id, buf) = {
                let frame = &st.frames[index];
                let Some(fs) = frame.fs.clone() else { continue };
                if !frame.dirty {
                    continue;
                }
                if let Some(want) = fs_filter {
                    if fs.id() != want {
                        continue;
                    }
                }
                (fs, frame.page_id, Arc::clone(&frame.buf))
            };
            {
                let data = buf.read();
                disk::write_page(fs.as_ref(), page_id, &data[..])?;
            }
            st.frames[index].dirty = false;
            st.stats.flushes += 1;
        }
        Ok(())
    }

    /// Writes back every dirty frame and clears its dirty bit.
    pub fn flush_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::flush_frames(&mut state, None)
    }

    /// Writes back every dirty frame belonging to one file set.
    pub fn flush_file_set(&self, fs_id: u64) -> Result<()> {
        let mut state = self.state.lock();
        Self::flush_frames(&mut state, Some(fs_id))
    }

    /// Discards every frame belonging to one file set without writing back.
    /// Fails if any of those frames is still pinned.
    pub fn drop_file_set(&self, fs_id: u64) -> Result<()> {
        let mut state = self.state.lock();
        let st = &mut *state;
        let Some(pages) = st.by_fs.remove(&fs_id) else {
            return Ok(());
        };
        let indexes: Vec<usize> = pages
            .iter()
            .filter_map(|page_id| st.page_table.get(&(fs_id, *page_id)).copied())
            .collect();
        if let Some(&pinned) = indexes.iter().find(|&&i| st.frames[i].pin_count > 0) {
            // put the enumeration back; nothing was dropped
            st.by_fs.insert(fs_id, pages);
            return Err(TablaError::InvalidArgument(format!(
                "cannot drop file set {fs_id}: page {} is pinned",
                st.frames[pinned].page_id
            )));
        }
        for &index in &indexes {
            let frame = &mut st.frames[index];
            st.page_table.remove(&(fs_id, frame.page_id));
            frame.fs = None;
            frame.dirty = false;
            frame.pin_count = 0;
            st.replacer.remove(index);
            st.free.push(index);
        }
        trace!(fs = fs_id, frames = indexes.len(), "pool.drop_file_set");
        Ok(())
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            capacity: self.capacity,
            cached: state.page_table.len(),
            ..state.stats
        }
    }
}

/// A pinned page. The pin is released when the guard drops; mutating callers
/// must call [`PageGuard::mark_dirty`] before that so the pool knows to
/// write the frame back.
pub struct PageGuard<'p> {
    pool: &'p BufferPool,
    fs_id: u64,
    page_id: PageId,
    buf: Arc<RwLock<Box<[u8]>>>,
    dirty: Cell<bool>,
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("fs_id", &self.fs_id)
            .field("page_id", &self.page_id)
            .field("dirty", &self.dirty.get())
            .finish()
    }
}

impl PageGuard<'_> {
    /// The pinned page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Read access to the page bytes.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.buf.read()
    }

    /// Write access to the page bytes. Does not mark the page dirty by
    /// itself.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.buf.write()
    }

    /// Records that the page was mutated; the unpin on drop carries it.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin(self.fs_id, self.page_id, self.dirty.get());
    }
}

/// A relation-scoped handle on the shared pool, so heap tables and index
/// code can fetch pages without naming their file set on every call.
#[derive(Clone)]
pub struct PoolView {
    pool: Arc<BufferPool>,
    fs: Arc<dyn FileSet>,
}

impl PoolView {
    /// Binds `fs` to `pool`.
    pub fn new(pool: Arc<BufferPool>, fs: Arc<dyn FileSet>) -> Self {
        Self { pool, fs }
    }

    /// Pins a page of the bound file set.
    pub fn get_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        self.pool.get_page(&self.fs, page_id)
    }

    /// Flushes only the bound file set's dirty frames.
    pub fn flush(&self) -> Result<()> {
        self.pool.flush_file_set(self.fs.id())
    }

    /// The bound file set.
    pub fn file_set(&self) -> &Arc<dyn FileSet> {
        &self.fs
    }

    /// The shared pool.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}
