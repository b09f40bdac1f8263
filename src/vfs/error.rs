//! Error surface of the filesystem client.
//!
//! Path-shaped variants carry the offending user path. Transport-level
//! failures from the coordination tree and the block store pass through
//! transparently so callers can still match on the concrete cause.

use crate::coord::tree::TreeError;
use crate::dlock::LockError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A file where a directory was required, or the other way around.
    #[error("unexpected node type: {0}")]
    TypeMismatch(String),

    #[error("invalid file descriptor: {0}")]
    InvalidHandle(usize),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A tree-node payload that does not decode as an inode record.
    #[error("corrupt inode record at {0}")]
    CorruptRecord(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Coord(#[from] TreeError),
}
