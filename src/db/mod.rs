//! Database handle: directory layout, catalog, and table/index lifecycle.
//!
//! One [`Database`] owns a data directory with a `tables/` subdirectory and
//! a shared buffer pool. Table and index handles borrow the pool through
//! per-relation views; the database keeps a registry of the file sets it has
//! handed out so drop/rename can flush and evict the right frames before
//! touching files on disk.

/// Table metadata sidecars and naming rules.
pub mod catalog;

/// Engine tunables.
pub mod config;

pub use config::DbConfig;

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::error::{Result, TablaError};
use crate::io::{DiskFileSet, FileSet};
use crate::pager::{BufferPool, PoolView};
use crate::storage::btree::{BTreeIndex, TREE_META_SUFFIX};
use crate::storage::heap::{PageCountHook, Table};
use crate::storage::overflow::OverflowStore;
use crate::storage::row::{ColumnType, Schema};
use catalog::{IndexMeta, TableMeta, TABLE_META_SUFFIX};

/// An open database: a directory of tables sharing one buffer pool.
pub struct Database {
    cfg: DbConfig,
    tables_dir: PathBuf,
    pool: Arc<BufferPool>,
    file_sets: HashMap<String, Arc<DiskFileSet>>,
    closed: bool,
}

impl Database {
    /// Opens (creating if needed) the database under `data_dir` with
    /// default configuration.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_config(DbConfig::new(data_dir))
    }

    /// Opens the database described by `cfg`.
    pub fn open_with_config(cfg: DbConfig) -> Result<Self> {
        let tables_dir = cfg.data_dir.join("tables");
        fs::create_dir_all(&tables_dir)?;
        let pool = Arc::new(BufferPool::new(cfg.pool_pages)?);
        info!(dir = %cfg.data_dir.display(), pool_pages = cfg.pool_pages, "db.open");
        Ok(Self {
            cfg,
            tables_dir,
            pool,
            file_sets: HashMap::new(),
            closed: false,
        })
    }

    /// The shared buffer pool.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(TablaError::Closed)
        } else {
            Ok(())
        }
    }

    /// Returns the registered file set for `base`, creating the registration
    /// on first use. Reusing one `DiskFileSet` per base keeps the pool's
    /// page-table keys stable across table open/drop/rename.
    fn file_set(&mut self, base: &str) -> Arc<DiskFileSet> {
        let dir = self.tables_dir.clone();
        Arc::clone(
            self.file_sets
                .entry(base.to_string())
                .or_insert_with(|| Arc::new(DiskFileSet::new(dir, base))),
        )
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        catalog::table_meta_path(&self.tables_dir, name)
    }

    /// Creates a table and returns its handle.
    pub fn create_table(&mut self, name: &str, schema: Schema) -> Result<Table> {
        self.ensure_open()?;
        catalog::validate_identifier(name)?;
        let path = self.meta_path(name);
        if path.exists() {
            return Err(TablaError::AlreadyExists(name.to_string()));
        }
        let meta = TableMeta::new(name, schema);
        catalog::store_table_meta(&path, &meta, self.cfg.fsync_meta)?;
        info!(table = name, "catalog.create_table");
        self.table_handle(meta)
    }

    /// Opens an existing table.
    pub fn open_table(&mut self, name: &str) -> Result<Table> {
        self.ensure_open()?;
        catalog::validate_identifier(name)?;
        let meta = catalog::load_table_meta(&self.meta_path(name))?
            .ok_or(TablaError::NotFound("table"))?;
        self.table_handle(meta)
    }

    fn table_handle(&mut self, meta: TableMeta) -> Result<Table> {
        let data_fs = self.file_set(&meta.name);
        let ovf_fs = self.file_set(&catalog::overflow_file_base(&meta.name));
        let view = PoolView::new(Arc::clone(&self.pool), data_fs as Arc<dyn FileSet>);
        let overflow =
            OverflowStore::open_with_options(ovf_fs as Arc<dyn FileSet>, self.cfg.fsync_meta)?;
        let hook: PageCountHook = {
            let path = self.meta_path(&meta.name);
            let fsync = self.cfg.fsync_meta;
            Box::new(move |page_count| {
                let mut meta = catalog::load_table_meta(&path)?
                    .ok_or(TablaError::NotFound("table"))?;
                meta.page_count = page_count;
                meta.updated_at = catalog::unix_millis();
                catalog::store_table_meta(&path, &meta, fsync)
            })
        };
        Ok(Table::new(
            meta.name,
            meta.schema,
            view,
            overflow,
            meta.page_count,
            Some(hook),
        ))
    }

    /// Drops a table: evicts its cached pages, deletes its data, overflow,
    /// and index files, then removes the metadata sidecar.
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        catalog::validate_identifier(name)?;
        let path = self.meta_path(name);
        let meta =
            catalog::load_table_meta(&path)?.ok_or(TablaError::NotFound("table"))?;

        let data_fs = self.file_set(name);
        let ovf_base = catalog::overflow_file_base(name);
        let ovf_fs = self.file_set(&ovf_base);
        self.pool.drop_file_set(data_fs.id())?;
        self.pool.drop_file_set(ovf_fs.id())?;
        for index in &meta.indexes {
            let index_fs = self.file_set(&index.file_base);
            self.pool.drop_file_set(index_fs.id())?;
            BTreeIndex::drop_files(&index_fs, &index_fs.sidecar_path(TREE_META_SUFFIX))?;
            self.file_sets.remove(&index.file_base);
        }
        data_fs.remove_all()?;
        ovf_fs.remove_all()?;
        self.file_sets.remove(name);
        self.file_sets.remove(&ovf_base);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        info!(table = name, "catalog.drop_table");
        Ok(())
    }

    /// Renames a table and every file set belonging to it.
    pub fn rename_table(&mut self, old: &str, new: &str) -> Result<()> {
        self.ensure_open()?;
        catalog::validate_identifier(old)?;
        catalog::validate_identifier(new)?;
        let old_path = self.meta_path(old);
        let new_path = self.meta_path(new);
        let mut meta =
            catalog::load_table_meta(&old_path)?.ok_or(TablaError::NotFound("table"))?;
        if new_path.exists() {
            return Err(TablaError::AlreadyExists(new.to_string()));
        }

        // cached pages must not outlive the old file names
        let old_ovf = catalog::overflow_file_base(old);
        let mut bases = vec![old.to_string(), old_ovf.clone()];
        bases.extend(meta.indexes.iter().map(|index| index.file_base.clone()));
        for base in &bases {
            let fs = self.file_set(base);
            self.pool.flush_file_set(fs.id())?;
            self.pool.drop_file_set(fs.id())?;
        }

        self.file_set(old).rename_all(new)?;
        self.file_set(&old_ovf)
            .rename_all(&catalog::overflow_file_base(new))?;

        let now = catalog::unix_millis();
        for index in &mut meta.indexes {
            let fs = self.file_set(&index.file_base);
            let new_base = catalog::index_file_base(new, &index.name);
            fs.rename_all(&new_base)?;
            let old_sidecar = fs.sidecar_path(TREE_META_SUFFIX);
            let new_sidecar = self.tables_dir.join(format!("{new_base}{TREE_META_SUFFIX}"));
            match fs::rename(&old_sidecar, &new_sidecar) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            self.file_sets.remove(&index.file_base);
            index.file_base = new_base;
            index.updated_at = now;
        }
        self.file_sets.remove(old);
        self.file_sets.remove(&old_ovf);

        meta.name = new.to_string();
        meta.updated_at = now;
        catalog::store_table_meta(&new_path, &meta, self.cfg.fsync_meta)?;
        match fs::remove_file(&old_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        info!(from = old, to = new, "catalog.rename_table");
        Ok(())
    }

    /// Names of every table in the database, sorted.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.tables_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.ends_with(TREE_META_SUFFIX) {
                continue;
            }
            if let Some(name) = file_name.strip_suffix(TABLE_META_SUFFIX) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Creates a B+Tree index over an integer column and registers it in the
    /// table's metadata.
    pub fn create_btree_index(
        &mut self,
        table: &str,
        index: &str,
        key_column: &str,
    ) -> Result<BTreeIndex> {
        self.ensure_open()?;
        catalog::validate_identifier(table)?;
        catalog::validate_identifier(index)?;
        let path = self.meta_path(table);
        let mut meta =
            catalog::load_table_meta(&path)?.ok_or(TablaError::NotFound("table"))?;
        if meta.indexes.iter().any(|existing| existing.name == index) {
            return Err(TablaError::AlreadyExists(format!("{table}.{index}")));
        }
        let column = meta
            .schema
            .column_index(key_column)
            .and_then(|at| meta.schema.columns().get(at))
            .ok_or(TablaError::NotFound("key column"))?;
        if !matches!(column.ty, ColumnType::Int32 | ColumnType::Int64) {
            return Err(TablaError::InvalidArgument(format!(
                "column {key_column:?} is not an integer column"
            )));
        }

        let file_base = catalog::index_file_base(table, index);
        let fs = self.file_set(&file_base);
        let view = PoolView::new(Arc::clone(&self.pool), Arc::clone(&fs) as Arc<dyn FileSet>);
        let mut tree = BTreeIndex::create(view, Some(fs.sidecar_path(TREE_META_SUFFIX)))?;
        tree.set_fsync_meta(self.cfg.fsync_meta);

        let now = catalog::unix_millis();
        meta.indexes.push(IndexMeta {
            name: index.to_string(),
            kind: "btree".to_string(),
            key_column: key_column.to_string(),
            file_base,
            created_at: now,
            updated_at: now,
        });
        meta.updated_at = now;
        catalog::store_table_meta(&path, &meta, self.cfg.fsync_meta)?;
        info!(table, index, key_column, "catalog.create_index");
        Ok(tree)
    }

    /// Opens a registered index.
    pub fn open_btree_index(&mut self, table: &str, index: &str) -> Result<BTreeIndex> {
        self.ensure_open()?;
        catalog::validate_identifier(table)?;
        catalog::validate_identifier(index)?;
        let meta = catalog::load_table_meta(&self.meta_path(table))?
            .ok_or(TablaError::NotFound("table"))?;
        let registered = meta
            .indexes
            .iter()
            .find(|candidate| candidate.name == index)
            .ok_or(TablaError::NotFound("index"))?;
        let fs = self.file_set(&registered.file_base);
        let view = PoolView::new(Arc::clone(&self.pool), Arc::clone(&fs) as Arc<dyn FileSet>);
        let mut tree = BTreeIndex::open(view, Some(fs.sidecar_path(TREE_META_SUFFIX)))?;
        tree.set_fsync_meta(self.cfg.fsync_meta);
        Ok(tree)
    }

    /// Drops an index: evicts its pages, removes its files, and unregisters
    /// it from the table's metadata.
    pub fn drop_index(&mut self, table: &str, index: &str) -> Result<()> {
        self.ensure_open()?;
        catalog::validate_identifier(table)?;
        catalog::validate_identifier(index)?;
        let path = self.meta_path(table);
        let mut meta =
            catalog::load_table_meta(&path)?.ok_or(TablaError::NotFound("table"))?;
        let at = meta
            .indexes
            .iter()
            .position(|candidate| candidate.name == index)
            .ok_or(TablaError::NotFound("index"))?;
        let registered = meta.indexes.remove(at);

        let fs = self.file_set(&registered.file_base);
        self.pool.drop_file_set(fs.id())?;
        BTreeIndex::drop_files(&fs, &fs.sidecar_path(TREE_META_SUFFIX))?;
        self.file_sets.remove(&registered.file_base);

        meta.updated_at = catalog::unix_millis();
        catalog::store_table_meta(&path, &meta, self.cfg.fsync_meta)?;
        info!(table, index, "catalog.drop_index");
        Ok(())
    }

    /// Writes back every dirty page in the shared pool.
    pub fn flush_all_pools(&self) -> Result<()> {
        self.ensure_open()?;
        self.pool.flush_all()
    }

    /// Flushes everything and marks the handle closed; later operations
    /// fail with [`TablaError::Closed`].
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.pool.flush_all()?;
        self.closed = true;
        info!(dir = %self.cfg.data_dir.display(), "db.close");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.closed {
            // best effort: an explicit close() reports errors, drop cannot
            let _ = self.pool.flush_all();
        }
    }
}
