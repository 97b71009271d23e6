//! Crate-wide error type and result alias.

use std::io;
use thiserror::Error;

/// Convenience alias used by every fallible operation in the crate.
pub type Result<T> = std::result::Result<T, TablaError>;

/// Errors surfaced by the storage engine.
///
/// The variants map one-to-one onto the engine's failure classes: I/O,
/// corruption, missing/colliding catalog objects, bad arguments, the three
/// capacity cases (page, tuple, pool), index key ordering, and operations on
/// a closed handle.
#[derive(Debug, Error)]
pub enum TablaError {
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// On-disk state is inconsistent; always surfaced, never retried.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// A table, index, or slot that was asked for does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Create or rename collided with an existing object.
    #[error("{0} already exists")]
    AlreadyExists(String),
    /// The caller passed something the engine cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The target page cannot fit the tuple plus its slot.
    #[error("page is full")]
    PageFull,
    /// The tuple exceeds the per-page payload maximum.
    #[error("tuple of {0} bytes exceeds page capacity")]
    TupleTooLarge(usize),
    /// Every frame in the buffer pool is pinned or unevictable.
    #[error("buffer pool has no evictable frame")]
    NoFreeFrame,
    /// B+Tree inserts must arrive with non-decreasing keys.
    #[error("key {key} inserted after {last}; index requires non-decreasing keys")]
    OutOfOrderKey {
        /// The offending key.
        key: i64,
        /// The most recent key accepted by the tree.
        last: i64,
    },
    /// The database handle was closed.
    #[error("database handle is closed")]
    Closed,
    /// A metadata sidecar could not be serialized or parsed.
    #[error("metadata error: {0}")]
    Meta(String),
}
