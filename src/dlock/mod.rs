//! Distributed read/write lock built from coordination-tree primitives.
//!
//! Each guarded path gets a lock directory under the lock root, keyed by the
//! SHA-256 of the guarded path so arbitrary path lengths and characters
//! never leak into the directory name. Waiters enqueue as ephemeral
//! sequential children (`r-`/`w-` prefixed) and are admitted in strict
//! sequence order: readers share, a writer excludes everyone. A crashed
//! session drops its ephemeral waiter automatically, which is what unblocks
//! everyone queued behind it.

use crate::coord::tree::{ANY_VERSION, CoordinationTree, CreateMode, TreeError, base_name};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

const READ_PREFIX: &str = "r-";
const WRITE_PREFIX: &str = "w-";

#[derive(Error, Debug)]
pub enum LockError {
    /// The lock directory contents contradict the protocol (e.g. our own
    /// waiter node is missing from the listing). Retrying cannot help.
    #[error("lock protocol violation on {path}: {reason}")]
    Protocol { path: String, reason: String },
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Hex SHA-256 of the guarded path; names the lock directory.
pub fn lock_dir_key(path: &str) -> String {
    hex::encode(Sha256::digest(path.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Waiter {
    name: String,
    writer: bool,
    seq: u64,
}

/// Parses and numerically sorts waiter names. Sequence numbers must be
/// compared as integers: the service keeps counting past any fixed digit
/// width, and raw string order breaks as soon as the width grows. Names
/// without a known prefix or numeric suffix are ignored.
fn sorted_waiters(names: &[String]) -> Vec<Waiter> {
    let mut waiters: Vec<Waiter> = names
        .iter()
        .filter_map(|name| {
            let (writer, rest) = if let Some(rest) = name.strip_prefix(WRITE_PREFIX) {
                (true, rest)
            } else if let Some(rest) = name.strip_prefix(READ_PREFIX) {
                (false, rest)
            } else {
                return None;
            };
            rest.parse::<u64>().ok().map(|seq| Waiter {
                name: name.clone(),
                writer,
                seq,
            })
        })
        .collect();
    waiters.sort_by_key(|w| w.seq);
    waiters
}

/// Factory for lock acquisitions on one guarded path.
pub struct DistLock<T: CoordinationTree> {
    tree: Arc<T>,
    guarded: String,
    dir: String,
}

impl<T: CoordinationTree> DistLock<T> {
    pub fn new(tree: Arc<T>, lock_root: &str, guarded: &str) -> Self {
        let dir = format!("{}/{}", lock_root, lock_dir_key(guarded));
        Self {
            tree,
            guarded: guarded.to_string(),
            dir,
        }
    }

    /// Creates the lock directory if it is not there yet. Called once, when
    /// the guarded path itself is created; a concurrent registration by
    /// another client counts as success.
    pub async fn register(&self) -> Result<(), TreeError> {
        if self.tree.exists(&self.dir).await? {
            return Ok(());
        }
        match self
            .tree
            .create(&self.dir, Bytes::new(), CreateMode::empty())
            .await
        {
            Ok(_) | Err(TreeError::NodeExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Shared lock: granted once no writer with a lower sequence remains.
    pub async fn acquire_read(&self) -> Result<LockGuard<T>, LockError> {
        let own = self.enqueue(READ_PREFIX).await?;
        let own_name = base_name(&own).to_string();
        loop {
            let waiters = self.list_waiters(&own).await?;
            // Highest-sequence writer queued before us, if any.
            let mut blocking = None;
            let mut found_self = false;
            for w in &waiters {
                if w.name == own_name {
                    found_self = true;
                    break;
                }
                if w.writer {
                    blocking = Some(w.name.clone());
                }
            }
            if !found_self {
                return Err(self.bail(&own, "own waiter missing from listing").await);
            }
            match blocking {
                None => return Ok(self.granted(own)),
                Some(name) => self.wait_for(&own, &name).await?,
            }
        }
    }

    /// Exclusive lock: granted once our waiter is the oldest overall.
    pub async fn acquire_write(&self) -> Result<LockGuard<T>, LockError> {
        let own = self.enqueue(WRITE_PREFIX).await?;
        let own_name = base_name(&own).to_string();
        loop {
            let waiters = self.list_waiters(&own).await?;
            if waiters[0].name == own_name {
                return Ok(self.granted(own));
            }
            let Some(pos) = waiters.iter().position(|w| w.name == own_name) else {
                return Err(self.bail(&own, "own waiter missing from listing").await);
            };
            let prev = waiters[pos - 1].name.clone();
            self.wait_for(&own, &prev).await?;
        }
    }

    async fn enqueue(&self, prefix: &str) -> Result<String, LockError> {
        let path = format!("{}/{}", self.dir, prefix);
        Ok(self
            .tree
            .create(&path, Bytes::new(), CreateMode::EPHEMERAL | CreateMode::SEQUENTIAL)
            .await?)
    }

    async fn list_waiters(&self, own: &str) -> Result<Vec<Waiter>, LockError> {
        let names = match self.tree.children(&self.dir).await {
            Ok(names) => names,
            Err(e) => {
                let _ = self.tree.delete(own, ANY_VERSION).await;
                return Err(e.into());
            }
        };
        let waiters = sorted_waiters(&names);
        if waiters.is_empty() {
            return Err(self.bail(own, "empty lock directory").await);
        }
        Ok(waiters)
    }

    /// Blocks until `name` is deleted; returns immediately if it is already
    /// gone, after which the caller re-evaluates the full listing.
    async fn wait_for(&self, own: &str, name: &str) -> Result<(), LockError> {
        let target = format!("{}/{}", self.dir, name);
        let (exists, watch) = match self.tree.exists_watch(&target).await {
            Ok(v) => v,
            Err(e) => {
                let _ = self.tree.delete(own, ANY_VERSION).await;
                return Err(e.into());
            }
        };
        if exists {
            log::debug!("lock wait on {} behind {}", self.guarded, name);
            let _ = watch.await;
        }
        Ok(())
    }

    /// Abandons the acquisition attempt, cleaning up our waiter node.
    async fn bail(&self, own: &str, reason: &str) -> LockError {
        let _ = self.tree.delete(own, ANY_VERSION).await;
        LockError::Protocol {
            path: self.guarded.clone(),
            reason: reason.to_string(),
        }
    }

    fn granted(&self, own: String) -> LockGuard<T> {
        LockGuard {
            tree: self.tree.clone(),
            guarded: self.guarded.clone(),
            node: own,
        }
    }
}

/// A held lock. Releasing deletes the waiter node; if the session
/// disconnects first, the coordination service deletes it instead.
pub struct LockGuard<T: CoordinationTree> {
    tree: Arc<T>,
    guarded: String,
    node: String,
}

impl<T: CoordinationTree> LockGuard<T> {
    pub fn guarded_path(&self) -> &str {
        &self.guarded
    }

    pub async fn release(self) -> Result<(), TreeError> {
        self.tree.delete(&self.node, ANY_VERSION).await
    }
}
