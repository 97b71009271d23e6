//! Persistent B+Tree mapping 64-bit integer keys to heap tuple ids.
//!
//! The tree lives in its own file set of ordinary slotted pages: leaf pages
//! hold sorted 14-byte `(key, tid)` entries, internal pages hold sorted
//! 12-byte `(min_key, child)` entries. Leaves are rebuilt in place on
//! insert; internal nodes are rebuilt copy-on-write onto fresh pages, which
//! trades some leaked pages for simple reasoning about partially-flushed
//! states. Root id, height, and the allocation horizon live in a JSON
//! sidecar rewritten after every structural change.
//!
//! Inserts must arrive with non-decreasing keys; the tree remembers the last
//! key it accepted and rejects anything smaller. Entries for deleted heap
//! rows are not cleaned up here — readers re-check heap visibility.

/// Leaf and internal entry codecs.
pub mod entry;

/// JSON sidecar for root/height/next page id.
pub mod meta;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, TablaError};
use crate::io::DiskFileSet;
use crate::pager::{disk, PageId, PoolView};
use crate::storage::page::{SlottedPage, HEADER_SIZE, PAGE_SIZE, SLOT_SIZE};
use crate::storage::Tid;
use entry::{InternalEntry, LeafEntry, INTERNAL_ENTRY_SIZE, LEAF_ENTRY_SIZE};
use meta::TreeMeta;

/// Entries a leaf page can hold.
pub const LEAF_MAX_ENTRIES: usize = (PAGE_SIZE - HEADER_SIZE) / (SLOT_SIZE + LEAF_ENTRY_SIZE);
/// Entries an internal page can hold.
pub const INTERNAL_MAX_ENTRIES: usize =
    (PAGE_SIZE - HEADER_SIZE) / (SLOT_SIZE + INTERNAL_ENTRY_SIZE);

/// Sidecar file suffix appended to the index file base name.
pub const TREE_META_SUFFIX: &str = ".btree.meta.json";

struct SplitOutcome {
    /// Page now holding the descended subtree (may differ from the input
    /// page for copy-on-write internal rebuilds).
    left: PageId,
    /// `(min key of right sibling, right sibling)` when the node split.
    split: Option<(i64, PageId)>,
}

/// A persistent secondary index handle.
pub struct BTreeIndex {
    view: PoolView,
    meta_path: Option<PathBuf>,
    meta: TreeMeta,
    last_key: Option<i64>,
    fsync_meta: bool,
}

impl std::fmt::Debug for BTreeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeIndex")
            .field("meta_path", &self.meta_path)
            .field("meta", &self.meta)
            .field("last_key", &self.last_key)
            .field("fsync_meta", &self.fsync_meta)
            .finish()
    }
}

impl BTreeIndex {
    /// Creates a fresh tree: an empty leaf root at page 0. The sidecar write
    /// is best-effort here; the first insert persists it authoritatively.
    pub fn create(view: PoolView, meta_path: Option<PathBuf>) -> Result<Self> {
        let tree = Self {
            view,
            meta_path,
            meta: TreeMeta::fresh(),
            last_key: None,
            fsync_meta: true,
        };
        if let Err(err) = tree.persist_meta() {
            warn!(error = %err, "btree.create sidecar write failed");
        }
        Ok(tree)
    }

    /// Opens an existing tree, reconciling the allocation horizon with the
    /// actual on-disk page count in case the sidecar lags behind the data.
    pub fn open(view: PoolView, meta_path: Option<PathBuf>) -> Result<Self> {
        let mut meta = match &meta_path {
            Some(path) => TreeMeta::load(path)?.unwrap_or_else(TreeMeta::fresh),
            None => TreeMeta::fresh(),
        };
        let on_disk = disk::count_pages(view.file_set().as_ref())?;
        meta.next_page_id = meta.next_page_id.max(on_disk).max(1);
        Ok(Self {
            view,
            meta_path,
            meta,
            last_key: None,
            fsync_meta: true,
        })
    }

    /// Controls whether sidecar writes fsync before renaming.
    pub fn set_fsync_meta(&mut self, fsync: bool) {
        self.fsync_meta = fsync;
    }

    /// Current root page id.
    pub fn root(&self) -> PageId {
        self.meta.root
    }

    /// Current height; 1 means the root is a leaf.
    pub fn height(&self) -> u32 {
        self.meta.height
    }

    fn persist_meta(&self) -> Result<()> {
        if let Some(path) = &self.meta_path {
            self.meta.persist(path, self.fsync_meta)?;
        }
        Ok(())
    }

    fn allocate_page(&mut self) -> PageId {
        let page_id = self.meta.next_page_id;
        self.meta.next_page_id += 1;
        page_id
    }

    fn read_leaf(&self, page_id: PageId) -> Result<Vec<LeafEntry>> {
        let guard = self.view.get_page(page_id)?;
        let mut data = guard.data_mut();
        let page = SlottedPage::from_bytes(&mut data[..])?;
        let mut entries = Vec::with_capacity(page.slot_count() as usize);
        for slot in 0..page.slot_count() {
            entries.push(LeafEntry::decode(page.read_tuple(slot)?)?);
        }
        Ok(entries)
    }

    fn read_internal(&self, page_id: PageId) -> Result<Vec<InternalEntry>> {
        let guard = self.view.get_page(page_id)?;
        let mut data = guard.data_mut();
        let page = SlottedPage::from_bytes(&mut data[..])?;
        let mut entries = Vec::with_capacity(page.slot_count() as usize);
        for slot in 0..page.slot_count() {
            entries.push(InternalEntry::decode(page.read_tuple(slot)?)?);
        }
        Ok(entries)
    }

    fn write_leaf(&self, page_id: PageId, entries: &[LeafEntry]) -> Result<()> {
        let guard = self.view.get_page(page_id)?;
        {
            let mut data = guard.data_mut();
            let mut page = SlottedPage::from_bytes(&mut data[..])?;
            page.reset(page_id);
            for entry in entries {
                page.insert_tuple(&entry.encode())?;
            }
        }
        guard.mark_dirty();
        Ok(())
    }

    fn write_internal(&self, page_id: PageId, entries: &[InternalEntry]) -> Result<()> {
        let guard = self.view.get_page(page_id)?;
        {
            let mut data = guard.data_mut();
            let mut page = SlottedPage::from_bytes(&mut data[..])?;
            page.reset(page_id);
            for entry in entries {
                page.insert_tuple(&entry.encode())?;
            }
        }
        guard.mark_dirty();
        Ok(())
    }

    /// Index of the child to descend into for `key`: the last entry whose
    /// successor's separator is still greater than `key`.
    fn route(entries: &[InternalEntry], key: i64) -> usize {
        for i in 0..entries.len().saturating_sub(1) {
            if key < entries[i + 1].min_key {
                return i;
            }
        }
        entries.len() - 1
    }

    /// Adds `(key, tid)`. Keys must be non-decreasing across the life of
    /// this handle; duplicates are allowed.
    pub fn insert(&mut self, key: i64, tid: Tid) -> Result<()> {
        if let Some(last) = self.last_key {
            if key < last {
                return Err(TablaError::OutOfOrderKey { key, last });
            }
        }
        let height = self.meta.height;
        let root = self.meta.root;
        let outcome = self.insert_at(root, height, key, tid)?;
        self.meta.root = outcome.left;
        if let Some((right_min, right)) = outcome.split {
            let left = outcome.left;
            let left_min = self.leftmost_key(left, height)?;
            let new_root = self.allocate_page();
            self.write_internal(
                new_root,
                &[
                    InternalEntry {
                        min_key: left_min,
                        child: left,
                    },
                    InternalEntry {
                        min_key: right_min,
                        child: right,
                    },
                ],
            )?;
            self.meta.root = new_root;
            self.meta.height += 1;
            debug!(
                root = new_root,
                height = self.meta.height,
                "btree.root_split"
            );
        }
        self.last_key = Some(key);
        self.persist_meta()?;
        Ok(())
    }

    fn insert_at(&mut self, page_id: PageId, level: u32, key: i64, tid: Tid) -> Result<SplitOutcome> {
        if level == 1 {
            self.insert_into_leaf(page_id, key, tid)
        } else {
            self.insert_into_internal(page_id, level, key, tid)
        }
    }

    fn insert_into_leaf(&mut self, page_id: PageId, key: i64, tid: Tid) -> Result<SplitOutcome> {
        let mut entries = self.read_leaf(page_id)?;
        entries.push(LeafEntry { key, tid });
        entries.sort_by_key(LeafEntry::sort_key);
        if entries.len() <= LEAF_MAX_ENTRIES {
            self.write_leaf(page_id, &entries)?;
            return Ok(SplitOutcome {
                left: page_id,
                split: None,
            });
        }
        let mid = entries.len() / 2;
        let right_entries = entries.split_off(mid);
        self.write_leaf(page_id, &entries)?;
        let right = self.allocate_page();
        self.write_leaf(right, &right_entries)?;
        debug!(left = page_id, right, entries = right_entries.len(), "btree.split_leaf");
        Ok(SplitOutcome {
            left: page_id,
            split: Some((right_entries[0].key, right)),
        })
    }

    fn insert_into_internal(
        &mut self,
        page_id: PageId,
        level: u32,
        key: i64,
        tid: Tid,
    ) -> Result<SplitOutcome> {
        let mut entries = self.read_internal(page_id)?;
        if entries.is_empty() {
            return Err(TablaError::Corruption(format!(
                "internal page {page_id} has no entries"
            )));
        }
        let chosen = Self::route(&entries, key);
        let child = entries[chosen].child;
        let outcome = self.insert_at(child, level - 1, key, tid)?;
        entries[chosen].child = outcome.left;
        if let Some((right_min, right)) = outcome.split {
            entries.push(InternalEntry {
                min_key: right_min,
                child: right,
            });
        }
        entries.sort_by_key(|entry| entry.min_key);

        if entries.len() <= INTERNAL_MAX_ENTRIES {
            let rebuilt = self.allocate_page();
            self.write_internal(rebuilt, &entries)?;
            return Ok(SplitOutcome {
                left: rebuilt,
                split: None,
            });
        }
        let mid = entries.len() / 2;
        let right_entries = entries.split_off(mid);
        let new_left = self.allocate_page();
        self.write_internal(new_left, &entries)?;
        let new_right = self.allocate_page();
        self.write_internal(new_right, &right_entries)?;
        debug!(left = new_left, right = new_right, "btree.split_internal");
        Ok(SplitOutcome {
            left: new_left,
            split: Some((right_entries[0].min_key, new_right)),
        })
    }

    /// Smallest key in the subtree rooted at `page_id` (which sits `level`
    /// levels above the leaves, 1 meaning it is a leaf).
    fn leftmost_key(&self, mut page_id: PageId, mut level: u32) -> Result<i64> {
        while level > 1 {
            let entries = self.read_internal(page_id)?;
            let first = entries.first().ok_or_else(|| {
                TablaError::Corruption(format!("internal page {page_id} has no entries"))
            })?;
            page_id = first.child;
            level -= 1;
        }
        let entries = self.read_leaf(page_id)?;
        entries
            .first()
            .map(|entry| entry.key)
            .ok_or_else(|| TablaError::Corruption(format!("leaf page {page_id} is empty")))
    }

    /// All tuple ids recorded for exactly `key`.
    pub fn search_equal(&self, key: i64) -> Result<Vec<Tid>> {
        let mut level = self.meta.height;
        let mut page_id = self.meta.root;
        while level > 1 {
            let entries = self.read_internal(page_id)?;
            if entries.is_empty() {
                return Err(TablaError::Corruption(format!(
                    "internal page {page_id} has no entries"
                )));
            }
            page_id = entries[Self::route(&entries, key)].child;
            level -= 1;
        }
        let entries = self.read_leaf(page_id)?;
        let start = entries.partition_point(|entry| entry.key < key);
        Ok(entries[start..]
            .iter()
            .take_while(|entry| entry.key == key)
            .map(|entry| entry.tid)
            .collect())
    }

    /// All tuple ids whose keys fall in `[min_key, max_key]`, gathered by
    /// walking every leaf reachable from the root.
    pub fn range_scan(&self, min_key: i64, max_key: i64) -> Result<Vec<Tid>> {
        let mut out = Vec::new();
        if min_key > max_key {
            return Ok(out);
        }
        self.walk_leaves(self.meta.root, self.meta.height, &mut |entry| {
            if entry.key >= min_key && entry.key <= max_key {
                out.push(entry.tid);
            }
        })?;
        Ok(out)
    }

    /// Total number of leaf entries.
    pub fn entry_count(&self) -> Result<u64> {
        let mut count = 0u64;
        self.walk_leaves(self.meta.root, self.meta.height, &mut |_| count += 1)?;
        Ok(count)
    }

    fn walk_leaves<F>(&self, page_id: PageId, level: u32, visit: &mut F) -> Result<()>
    where
        F: FnMut(&LeafEntry),
    {
        if level == 1 {
            for entry in self.read_leaf(page_id)? {
                visit(&entry);
            }
            return Ok(());
        }
        for child in self.read_internal(page_id)? {
            self.walk_leaves(child.child, level - 1, visit)?;
        }
        Ok(())
    }

    /// Deletes an index's segment files and sidecar. Idempotent: missing
    /// files are fine.
    pub fn drop_files(fs: &DiskFileSet, meta_path: &Path) -> Result<()> {
        fs.remove_all()?;
        match std::fs::remove_file(meta_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileSet, MemFileSet};
    use crate::pager::BufferPool;
    use std::sync::Arc;

    fn mem_tree() -> BTreeIndex {
        let pool = Arc::new(BufferPool::new(64).unwrap());
        let fs: Arc<dyn FileSet> = Arc::new(MemFileSet::new());
        BTreeIndex::create(PoolView::new(pool, fs), None).unwrap()
    }

    #[test]
    fn empty_tree_finds_nothing() -> Result<()> {
        let tree = mem_tree();
        assert_eq!(tree.height(), 1);
        assert!(tree.search_equal(5)?.is_empty());
        assert!(tree.range_scan(i64::MIN, i64::MAX)?.is_empty());
        assert_eq!(tree.entry_count()?, 0);
        Ok(())
    }

    #[test]
    fn single_leaf_insert_and_search() -> Result<()> {
        let mut tree = mem_tree();
        for key in 0..100 {
            tree.insert(key, Tid::new(key as u32, 0))?;
        }
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.search_equal(42)?, vec![Tid::new(42, 0)]);
        assert!(tree.search_equal(1000)?.is_empty());
        assert_eq!(tree.entry_count()?, 100);
        Ok(())
    }

    #[test]
    fn out_of_order_insert_is_rejected() -> Result<()> {
        let mut tree = mem_tree();
        tree.insert(10, Tid::new(1, 0))?;
        match tree.insert(9, Tid::new(2, 0)) {
            Err(TablaError::OutOfOrderKey { key: 9, last: 10 }) => {}
            other => panic!("expected OutOfOrderKey, got {other:?}"),
        }
        // equal keys are fine
        tree.insert(10, Tid::new(3, 0))?;
        assert_eq!(
            tree.search_equal(10)?,
            vec![Tid::new(1, 0), Tid::new(3, 0)]
        );
        Ok(())
    }

    #[test]
    fn leaf_split_promotes_a_root() -> Result<()> {
        let mut tree = mem_tree();
        let n = (LEAF_MAX_ENTRIES + 1) as i64;
        for key in 0..n {
            tree.insert(key, Tid::new(key as u32, 0))?;
        }
        assert_eq!(tree.height(), 2, "one leaf split promotes a new root");
        for key in [0, n / 2, n - 1] {
            assert_eq!(tree.search_equal(key)?, vec![Tid::new(key as u32, 0)]);
        }
        assert_eq!(tree.entry_count()?, n as u64);
        Ok(())
    }

    #[test]
    fn multi_level_search_and_range_scan() -> Result<()> {
        let mut tree = mem_tree();
        let n = (LEAF_MAX_ENTRIES * 3) as i64;
        for key in 1..=n {
            tree.insert(key, Tid::new(key as u32, 0))?;
        }
        assert!(tree.height() > 1);
        assert_eq!(tree.search_equal(n / 2)?, vec![Tid::new((n / 2) as u32, 0)]);
        assert_eq!(tree.entry_count()?, n as u64);

        let everything = tree.range_scan(i64::MIN, i64::MAX)?;
        assert_eq!(everything.len(), n as usize, "every tid exactly once");
        let window = tree.range_scan(100, 199)?;
        assert_eq!(window.len(), 100);
        Ok(())
    }

    #[test]
    fn duplicate_keys_collect_together() -> Result<()> {
        let mut tree = mem_tree();
        tree.insert(5, Tid::new(1, 0))?;
        tree.insert(5, Tid::new(1, 1))?;
        tree.insert(5, Tid::new(2, 0))?;
        tree.insert(6, Tid::new(3, 0))?;
        let found = tree.search_equal(5)?;
        assert_eq!(
            found,
            vec![Tid::new(1, 0), Tid::new(1, 1), Tid::new(2, 0)],
            "duplicates come back in tuple-id order"
        );
        Ok(())
    }

    #[test]
    fn reopen_without_sidecar_reconciles_horizon() -> Result<()> {
        let pool = Arc::new(BufferPool::new(64).unwrap());
        let fs: Arc<dyn FileSet> = Arc::new(MemFileSet::new());
        let view = PoolView::new(Arc::clone(&pool), Arc::clone(&fs));
        {
            let mut tree = BTreeIndex::create(view.clone(), None)?;
            for key in 0..((LEAF_MAX_ENTRIES * 2) as i64) {
                tree.insert(key, Tid::new(key as u32, 0))?;
            }
            view.flush()?;
        }
        // no sidecar was written (meta_path = None): reopen must still place
        // the allocation horizon past every on-disk page
        let tree = BTreeIndex::open(view, None)?;
        let on_disk = disk::count_pages(fs.as_ref())?;
        assert!(tree.meta.next_page_id >= on_disk);
        Ok(())
    }
}
