//! Hierarchical coordination tree interface.
//!
//! Values carry an optimistic version; `set`/`delete` accept `ANY_VERSION`
//! to skip the check. Watches are one-shot: a `Watch` resolves at most once
//! with the first event observed on its target and must be re-armed by the
//! caller if it wants further notifications.

use async_trait::async_trait;
use bitflags::bitflags;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::oneshot;

/// Version wildcard accepted by `set` and `delete`.
pub const ANY_VERSION: i64 = -1;

bitflags! {
    /// Node creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CreateMode: u32 {
        /// Removed automatically when the creating session disconnects.
        const EPHEMERAL = 1;
        /// The service appends a monotonically increasing, zero-padded
        /// sequence number to the requested name.
        const SEQUENTIAL = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEvent {
    Created,
    Deleted,
    DataChanged,
    ChildrenChanged,
}

/// One-shot notification channel armed by the `*_watch` calls.
pub type Watch = oneshot::Receiver<TreeEvent>;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("no node: {0}")]
    NoNode(String),
    #[error("node already exists: {0}")]
    NodeExists(String),
    #[error("node has children: {0}")]
    NotEmpty(String),
    #[error("version mismatch on {0}")]
    BadVersion(String),
    #[error("session closed")]
    SessionClosed,
}

/// Client view of the coordination service. One value per node, children
/// addressed by slash-separated absolute paths, `/` always present.
#[async_trait]
pub trait CoordinationTree: Send + Sync + 'static {
    async fn exists(&self, path: &str) -> Result<bool, TreeError>;

    /// Existence probe that also arms a watch on `path`. The watch fires on
    /// the next create or delete of the node, whether or not it exists now.
    async fn exists_watch(&self, path: &str) -> Result<(bool, Watch), TreeError>;

    async fn get(&self, path: &str) -> Result<(Bytes, i64), TreeError>;

    /// Replaces the value, returning the new version. `version` must match
    /// the current one unless it is `ANY_VERSION`.
    async fn set(&self, path: &str, data: Bytes, version: i64) -> Result<i64, TreeError>;

    async fn children(&self, path: &str) -> Result<Vec<String>, TreeError>;

    /// Children listing that also arms a watch firing on the next child
    /// creation or deletion under `path`.
    async fn children_watch(&self, path: &str) -> Result<(Vec<String>, Watch), TreeError>;

    /// Creates a node and returns its actual path (which differs from the
    /// requested one when `SEQUENTIAL` is set). The parent must exist.
    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<String, TreeError>;

    /// Deletes a childless node.
    async fn delete(&self, path: &str, version: i64) -> Result<(), TreeError>;
}

/// Parent path, with `/` as its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Final path component (empty for `/`).
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Joins a child name under a base path.
pub fn join(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    }
}
