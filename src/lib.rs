//! # Tabla - Educational Relational Storage Engine
//!
//! Tabla is a small, embedded, page-oriented storage engine written in Rust:
//! durable heap tables over 8 KiB slotted pages, a shared buffer pool with
//! CLOCK replacement, an overflow store for oversized values, and persistent
//! B+Tree secondary indexes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tabla::{Column, ColumnType, Database, Schema, Value};
//!
//! let mut db = Database::open("my_tables")?;
//! let schema = Schema::new(vec![
//!     Column::new("id", ColumnType::Int64, false),
//!     Column::new("name", ColumnType::Text, true),
//! ])?;
//!
//! let mut users = db.create_table("users", schema)?;
//! let tid = users.insert(&[Value::Int64(1), Value::Text("alice".into())])?;
//! let row = users.get(tid)?;
//! assert_eq!(row[0], Value::Int64(1));
//!
//! db.close()?;
//! # Ok::<(), tabla::TablaError>(())
//! ```
//!
//! ## Architecture
//!
//! The engine is layered, leaves first:
//! - **Byte codec** (`bytes`): fixed-width little-endian field access.
//! - **File sets** (`io`): one relation = one base file plus 1 GiB rollover
//!   segments, behind a swappable trait (disk and in-memory).
//! - **Pager** (`pager`): the stateless storage manager, the CLOCK replacer,
//!   and the shared buffer pool handing out pinned page guards.
//! - **Storage** (`storage`): the slotted page format, the row codec, heap
//!   tables, the overflow store, and the B+Tree index.
//! - **Database** (`db`): per-directory catalog with JSON metadata sidecars
//!   and table/index lifecycle orchestration.
//!
//! Writers of the same table must serialize externally; the engine is
//! single-writer at the table level and does not include transactions.

pub mod bytes;
pub mod db;
pub mod error;
pub mod io;
pub mod logging;
pub mod pager;
pub mod storage;

// Re-export the main public API
pub use crate::db::{Database, DbConfig};
pub use crate::error::{Result, TablaError};
pub use crate::pager::{BufferPool, PageGuard, PageId, PoolStats, PoolView};
pub use crate::storage::btree::BTreeIndex;
pub use crate::storage::heap::Table;
pub use crate::storage::overflow::{OverflowRef, OverflowStore};
pub use crate::storage::row::{Column, ColumnType, Schema, Value};
pub use crate::storage::Tid;
