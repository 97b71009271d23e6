//! Durable tree metadata: root page, height, allocation horizon.
//!
//! Persisted as a JSON sidecar next to the index file set and rewritten
//! through the atomic temp-file + fsync + rename pattern after every
//! structure-changing operation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TablaError};
use crate::io::{read_json_opt, write_json_atomic};

/// Current sidecar format version.
pub const TREE_META_VERSION: u32 = 1;

/// The three numbers a tree needs besides its pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMeta {
    /// Sidecar format version.
    pub version: u32,
    /// Root page id.
    pub root: u32,
    /// Tree height; 1 means the root is a leaf.
    pub height: u32,
    /// Next page id to allocate.
    pub next_page_id: u32,
}

impl TreeMeta {
    /// Metadata of a brand-new tree: an empty leaf at page 0.
    pub fn fresh() -> Self {
        Self {
            version: TREE_META_VERSION,
            root: 0,
            height: 1,
            next_page_id: 1,
        }
    }

    /// Loads the sidecar; `None` means the file is absent (fresh tree).
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let Some(meta) = read_json_opt::<Self>(path)? else {
            return Ok(None);
        };
        if meta.version != TREE_META_VERSION {
            return Err(TablaError::Meta(format!(
                "unsupported tree metadata version {}",
                meta.version
            )));
        }
        if meta.height == 0 {
            return Err(TablaError::Meta("tree height of zero".into()));
        }
        Ok(Some(meta))
    }

    /// Writes the sidecar atomically.
    pub fn persist(&self, path: &Path, fsync: bool) -> Result<()> {
        write_json_atomic(path, self, fsync)
    }
}
