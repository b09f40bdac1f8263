//! VFS layer (virtual filesystem)
//!
//! Responsibilities:
//! - Validate paths and maintain the directory hierarchy as coordination
//!   tree nodes, wrapping every mutation in the distributed path lock.
//! - Manage open-file handles: descriptor table, per-handle block cache,
//!   copy-on-write writes, lazy flush-on-close, adaptive read prefetch.
//! - Glue the session together: backend discovery, replica rotation, and
//!   the membership watch loop.
//!
//! Submodules:
//! - `client`: session object exposing open/close/read/write/mkdir/remove/list
//! - `file`: open-file state and the block I/O paths
//! - `inode`: tree-node payload schema
//! - `error`: error taxonomy surfaced to callers
//! - `demo`: end-to-end walkthrough on the in-memory backends
pub mod client;
pub mod demo;
pub mod error;
pub mod file;
pub mod inode;

pub use client::{Client, ClientConfig, Fd, advertise_node, init_roots};
pub use error::FsError;
pub use file::OpenMode;
pub use inode::InodeRecord;
