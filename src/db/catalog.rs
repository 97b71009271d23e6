//! Table metadata sidecars and naming rules.
//!
//! Every table owns one JSON sidecar `<name>.meta.json` in the `tables/`
//! directory recording its schema, page count, and registered indexes. The
//! catalog is the only writer of these files, and every write goes through
//! the atomic temp-file + fsync + rename pattern.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TablaError};
use crate::io::{read_json_opt, write_json_atomic};
use crate::storage::row::Schema;

/// Suffix of a table metadata sidecar.
pub const TABLE_META_SUFFIX: &str = ".meta.json";

/// One registered secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Index name, unique within its table.
    pub name: String,
    /// Index kind; only `"btree"` exists today.
    pub kind: String,
    /// Name of the indexed column.
    pub key_column: String,
    /// Base file name of the index's file set.
    pub file_base: String,
    /// Unix milliseconds of creation.
    pub created_at: u64,
    /// Unix milliseconds of the last structural change.
    pub updated_at: u64,
}

/// A table's durable description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Table name.
    pub name: String,
    /// Row schema.
    pub schema: Schema,
    /// Pages allocated to the heap.
    pub page_count: u32,
    /// Registered indexes.
    pub indexes: Vec<IndexMeta>,
    /// Unix milliseconds of creation.
    pub created_at: u64,
    /// Unix milliseconds of the last mutation.
    pub updated_at: u64,
}

impl TableMeta {
    /// Metadata for a brand-new, empty table.
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        let now = unix_millis();
        Self {
            name: name.into(),
            schema,
            page_count: 0,
            indexes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Milliseconds since the Unix epoch, saturating at zero on clock trouble.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}

/// Accepts `[A-Za-z0-9_]+` and nothing else. Rejects empty names and
/// anything smelling of path traversal.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TablaError::InvalidArgument("empty identifier".into()));
    }
    if name.contains("..") {
        return Err(TablaError::InvalidArgument(format!(
            "identifier {name:?} contains '..'"
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Err(TablaError::InvalidArgument(format!(
            "identifier {name:?} has characters outside [A-Za-z0-9_]"
        )));
    }
    Ok(())
}

/// Path of a table's metadata sidecar.
pub fn table_meta_path(tables_dir: &Path, name: &str) -> PathBuf {
    tables_dir.join(format!("{name}{TABLE_META_SUFFIX}"))
}

/// Base file name of an index file set.
pub fn index_file_base(table: &str, index: &str) -> String {
    format!("{table}__idx__{index}")
}

/// Base file name of a table's overflow file set.
pub fn overflow_file_base(table: &str) -> String {
    format!("{table}_ovf")
}

/// Loads a table sidecar; `None` when absent.
pub fn load_table_meta(path: &Path) -> Result<Option<TableMeta>> {
    read_json_opt(path)
}

/// Writes a table sidecar atomically.
pub fn store_table_meta(path: &Path, meta: &TableMeta, fsync: bool) -> Result<()> {
    write_json_atomic(path, meta, fsync)
}
