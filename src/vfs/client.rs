//! Filesystem client session.
//!
//! One `Client` per caller context: it owns the descriptor table, the
//! rotating replica set, and the registry watch task. Every namespace
//! mutation goes through the distributed path lock, which is what makes
//! create/remove/list atomic across concurrent clients.

use super::error::FsError;
use super::file::{FileHandle, IoStats, OpenMode};
use super::inode::InodeRecord;
use crate::coord::tree::{
    ANY_VERSION, CoordinationTree, CreateMode, TreeError, base_name, join, parent,
};
use crate::dlock::{DistLock, LockGuard};
use crate::store::{BlockNode, NodeAdvert, NodeConnector, ReplicaSet, StoreError};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Session-local file descriptor.
pub type Fd = usize;

/// Session configuration; loading and ownership stay with the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Fixed size of every stored block, in bytes.
    pub block_size: u64,
    /// Replica fan-out per block operation.
    pub replicas: usize,
    /// Namespace root in the coordination tree.
    pub fs_root: String,
    /// Root of the per-path lock directories.
    pub lock_root: String,
    /// Root where block store nodes advertise themselves.
    pub registry_root: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            replicas: 2,
            fs_root: "/fs".to_string(),
            lock_root: "/locks".to_string(),
            registry_root: "/nodes".to_string(),
        }
    }
}

/// Idempotently creates the three service roots. The namespace root is a
/// directory inode with a registered lock directory, like any other
/// directory; the other two roots are plain nodes.
pub async fn init_roots<T: CoordinationTree>(
    tree: &Arc<T>,
    config: &ClientConfig,
) -> Result<(), FsError> {
    for root in [&config.lock_root, &config.registry_root] {
        if !tree.exists(root).await? {
            match tree.create(root, Bytes::new(), CreateMode::empty()).await {
                Ok(_) | Err(TreeError::NodeExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    if !tree.exists(&config.fs_root).await? {
        let payload = InodeRecord::dir().encode(&config.fs_root)?;
        match tree.create(&config.fs_root, payload, CreateMode::empty()).await {
            Ok(_) | Err(TreeError::NodeExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    DistLock::new(tree.clone(), &config.lock_root, &config.fs_root)
        .register()
        .await?;
    Ok(())
}

/// Publishes a block store node under the registry root. The entry is
/// ephemeral: it disappears with the advertising session, which is what
/// drives the membership watch of every client.
pub async fn advertise_node<T: CoordinationTree>(
    tree: &Arc<T>,
    config: &ClientConfig,
    advert: &NodeAdvert,
) -> Result<(), FsError> {
    let path = join(&config.registry_root, &advert.node_id);
    let payload = advert
        .to_bytes()
        .map_err(|_| FsError::CorruptRecord(path.clone()))?;
    tree.create(&path, payload, CreateMode::EPHEMERAL).await?;
    Ok(())
}

/// Connects to every advertised node, in shuffled order, skipping entries
/// that fail to decode or dial.
async fn discover_nodes<T: CoordinationTree>(
    tree: &Arc<T>,
    connector: &Arc<dyn NodeConnector>,
    registry_root: &str,
) -> Result<Vec<Arc<dyn BlockNode>>, FsError> {
    let mut names = tree.children(registry_root).await?;
    names.shuffle(&mut rand::rng());
    let mut nodes = Vec::with_capacity(names.len());
    for name in names {
        let path = join(registry_root, &name);
        let Ok((data, _)) = tree.get(&path).await else {
            continue;
        };
        let Ok(advert) = NodeAdvert::from_bytes(&data) else {
            log::warn!("undecodable node advert at {path}");
            continue;
        };
        match connector.connect(&advert).await {
            Ok(node) => nodes.push(node),
            Err(e) => log::warn!("connect to {} failed: {e}", advert.endpoint),
        }
    }
    Ok(nodes)
}

/// Descriptor arena: slot vector plus a free-index stack. Descriptors are
/// recycled only after close fully finishes, so a concurrent open can never
/// collide with a closing handle.
struct HandleTable<T: CoordinationTree> {
    slots: Vec<Option<Arc<tokio::sync::Mutex<FileHandle<T>>>>>,
    free: Vec<Fd>,
}

impl<T: CoordinationTree> HandleTable<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, handle: FileHandle<T>) -> Fd {
        let handle = Arc::new(tokio::sync::Mutex::new(handle));
        match self.free.pop() {
            Some(fd) => {
                self.slots[fd] = Some(handle);
                fd
            }
            None => {
                self.slots.push(Some(handle));
                self.slots.len() - 1
            }
        }
    }

    fn get(&self, fd: Fd) -> Option<Arc<tokio::sync::Mutex<FileHandle<T>>>> {
        self.slots.get(fd).and_then(|slot| slot.clone())
    }

    fn take(&mut self, fd: Fd) -> Option<Arc<tokio::sync::Mutex<FileHandle<T>>>> {
        self.slots.get_mut(fd).and_then(|slot| slot.take())
    }

    fn recycle(&mut self, fd: Fd) {
        self.free.push(fd);
    }

    fn open_fds(&self) -> Vec<Fd> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(fd, slot)| slot.as_ref().map(|_| fd))
            .collect()
    }
}

pub struct Client<T: CoordinationTree> {
    tree: Arc<T>,
    config: ClientConfig,
    store: Arc<ReplicaSet>,
    stats: Arc<IoStats>,
    table: Mutex<HandleTable<T>>,
    shutdown: Arc<Notify>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: CoordinationTree> Client<T> {
    /// Discovers the advertised block store nodes and starts the membership
    /// watch. Fails unless at least `replicas` nodes are reachable.
    pub async fn connect(
        tree: Arc<T>,
        connector: Arc<dyn NodeConnector>,
        config: ClientConfig,
    ) -> Result<Self, FsError> {
        let nodes = discover_nodes(&tree, &connector, &config.registry_root).await?;
        if nodes.len() < config.replicas {
            return Err(StoreError::Unavailable(format!(
                "{} of {} required block store nodes reachable",
                nodes.len(),
                config.replicas
            ))
            .into());
        }
        let store = Arc::new(ReplicaSet::new(nodes, config.replicas));
        let shutdown = Arc::new(Notify::new());
        let watcher = tokio::spawn(watch_membership(
            tree.clone(),
            connector,
            store.clone(),
            config.registry_root.clone(),
            shutdown.clone(),
        ));
        Ok(Self {
            tree,
            config,
            store,
            stats: Arc::new(IoStats::default()),
            table: Mutex::new(HandleTable::new()),
            shutdown,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Live block store connections, as maintained by the watch loop.
    pub fn replica_count(&self) -> usize {
        self.store.len()
    }

    fn check_path(&self, path: &str, allow_root: bool) -> Result<(), FsError> {
        if path == "/" && allow_root {
            return Ok(());
        }
        if path.is_empty() || !path.starts_with('/') || path.ends_with('/') {
            return Err(FsError::InvalidPath(path.to_string()));
        }
        Ok(())
    }

    /// Maps a validated user path under the namespace root.
    fn fs_path(&self, path: &str) -> String {
        if path == "/" {
            self.config.fs_root.clone()
        } else {
            format!("{}{}", self.config.fs_root, path)
        }
    }

    fn lock_on(&self, fs_path: &str) -> DistLock<T> {
        DistLock::new(self.tree.clone(), &self.config.lock_root, fs_path)
    }

    async fn load_record(&self, fs_path: &str, path: &str) -> Result<InodeRecord, FsError> {
        match self.tree.get(fs_path).await {
            Ok((data, _)) => InodeRecord::decode(&data, path),
            Err(TreeError::NoNode(_)) => Err(FsError::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// The immediate parent must exist and be a directory.
    async fn check_parent(&self, fs_path: &str, path: &str) -> Result<(), FsError> {
        let dir = parent(fs_path);
        if !self.tree.exists(dir).await? {
            return Err(FsError::NotFound(parent(path).to_string()));
        }
        let record = self.load_record(dir, parent(path)).await?;
        if !record.is_dir {
            return Err(FsError::TypeMismatch(parent(path).to_string()));
        }
        Ok(())
    }

    /// Probes target existence under the parent's read lock, so the answer
    /// cannot interleave with a concurrent create or remove in that
    /// directory.
    async fn exists_under_parent_lock(&self, fs_path: &str) -> Result<bool, FsError> {
        let guard = self.lock_on(parent(fs_path)).acquire_read().await?;
        let exists = self.tree.exists(fs_path).await;
        release_quietly(guard).await;
        Ok(exists?)
    }

    /// Creates a namespace node under the parent's write lock: registers the
    /// new path's lock directory, takes the node's own lock, then writes the
    /// tree node. The returned guard is the node's own lock.
    async fn create_node(
        &self,
        fs_path: &str,
        path: &str,
        record: InodeRecord,
        write: bool,
    ) -> Result<LockGuard<T>, FsError> {
        let parent_guard = self.lock_on(parent(fs_path)).acquire_write().await?;
        let result = self.create_node_locked(fs_path, path, record, write).await;
        release_quietly(parent_guard).await;
        result
    }

    async fn create_node_locked(
        &self,
        fs_path: &str,
        path: &str,
        record: InodeRecord,
        write: bool,
    ) -> Result<LockGuard<T>, FsError> {
        let lock = self.lock_on(fs_path);
        lock.register().await?;
        let guard = if write {
            lock.acquire_write().await?
        } else {
            lock.acquire_read().await?
        };
        let payload = record.encode(path)?;
        match self.tree.create(fs_path, payload, CreateMode::empty()).await {
            Ok(_) => Ok(guard),
            Err(e) => {
                release_quietly(guard).await;
                match e {
                    TreeError::NodeExists(_) => Err(FsError::AlreadyExists(path.to_string())),
                    other => Err(other.into()),
                }
            }
        }
    }

    /// Opens a file, optionally creating it. The returned descriptor keeps
    /// the path's lock (write lock iff `write`) until `close`.
    pub async fn open(&self, path: &str, create: bool, write: bool) -> Result<Fd, FsError> {
        self.check_path(path, false)?;
        let fs_path = self.fs_path(path);
        self.check_parent(&fs_path, path).await?;

        let exists = self.exists_under_parent_lock(&fs_path).await?;
        if !exists && !create {
            return Err(FsError::NotFound(path.to_string()));
        }

        let mode = if write {
            OpenMode::ReadWrite
        } else {
            OpenMode::ReadOnly
        };
        let (record, guard) = if !exists {
            let record = InodeRecord::file();
            let guard = self
                .create_node(&fs_path, path, record.clone(), write)
                .await?;
            (record, guard)
        } else {
            let lock = self.lock_on(&fs_path);
            let guard = if write {
                lock.acquire_write().await?
            } else {
                lock.acquire_read().await?
            };
            match self.load_record(&fs_path, path).await {
                Err(e) => {
                    release_quietly(guard).await;
                    return Err(e);
                }
                Ok(record) if record.is_dir => {
                    release_quietly(guard).await;
                    return Err(FsError::TypeMismatch(path.to_string()));
                }
                Ok(record) => (record, guard),
            }
        };

        let handle = FileHandle::new(
            path.to_string(),
            fs_path,
            mode,
            guard,
            record,
            self.store.clone(),
            self.stats.clone(),
            self.config.block_size,
        );
        Ok(self.table.lock().unwrap().insert(handle))
    }

    /// Closes a descriptor. Write handles flush dirty blocks first and
    /// commit the record last, so the old record never points at missing
    /// blocks. The lock is released and the descriptor recycled even when
    /// the flush fails.
    pub async fn close(&self, fd: Fd) -> Result<(), FsError> {
        let handle = self
            .table
            .lock()
            .unwrap()
            .take(fd)
            .ok_or(FsError::InvalidHandle(fd))?;
        let mut handle = handle.lock().await;

        let mut result = Ok(());
        if handle.mode().writable() {
            result = async {
                let payload = handle.encode_record()?;
                handle.flush().await?;
                self.tree
                    .set(handle.fs_path(), payload, ANY_VERSION)
                    .await?;
                Ok(())
            }
            .await;
        }
        if let Some(guard) = handle.take_guard() {
            release_quietly(guard).await;
        }
        self.table.lock().unwrap().recycle(fd);
        result
    }

    /// Reads up to `size` bytes at `offset`; short or empty past EOF.
    pub async fn read(&self, fd: Fd, offset: u64, size: u64) -> Result<Bytes, FsError> {
        let handle = self
            .table
            .lock()
            .unwrap()
            .get(fd)
            .ok_or(FsError::InvalidHandle(fd))?;
        let mut handle = handle.lock().await;
        handle.read(offset, size).await
    }

    /// Writes `data` at `offset`, zero-filling any gap beyond the current
    /// end of file. Nothing is persisted before `close`.
    pub async fn write(&self, fd: Fd, offset: u64, data: &[u8]) -> Result<(), FsError> {
        let handle = self
            .table
            .lock()
            .unwrap()
            .get(fd)
            .ok_or(FsError::InvalidHandle(fd))?;
        let mut handle = handle.lock().await;
        if !handle.mode().writable() {
            return Err(FsError::PermissionDenied(handle.path().to_string()));
        }
        handle.write(offset, data).await
    }

    /// Creates a directory; the parent must already exist (non-recursive).
    pub async fn mkdir(&self, path: &str) -> Result<(), FsError> {
        self.check_path(path, false)?;
        let fs_path = self.fs_path(path);
        self.check_parent(&fs_path, path).await?;
        if self.exists_under_parent_lock(&fs_path).await? {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        let guard = self
            .create_node(&fs_path, path, InodeRecord::dir(), false)
            .await?;
        // Directories carry no persistent lock once created.
        release_quietly(guard).await;
        Ok(())
    }

    /// Removes a file or directory, directories recursively.
    pub async fn remove(&self, path: &str) -> Result<(), FsError> {
        self.check_path(path, false)?;
        let fs_path = self.fs_path(path);
        if !self.tree.exists(&fs_path).await? {
            return Err(FsError::NotFound(path.to_string()));
        }
        self.remove_node(fs_path).await
    }

    /// Depth-first removal; every node is individually write-locked, which
    /// serializes concurrent removals of overlapping subtrees. A node that
    /// vanished before we locked it counts as already removed. Block
    /// contents are left behind in the store, unreferenced.
    fn remove_node(&self, fs_path: String) -> BoxFuture<'_, Result<(), FsError>> {
        async move {
            let guard = self.lock_on(&fs_path).acquire_write().await?;
            let result = async {
                let record = match self.tree.get(&fs_path).await {
                    Err(TreeError::NoNode(_)) => return Ok(()),
                    Err(e) => return Err(e.into()),
                    Ok((data, _)) => InodeRecord::decode(&data, &fs_path)?,
                };
                if record.is_dir {
                    for child in self.tree.children(&fs_path).await? {
                        self.remove_node(join(&fs_path, &child)).await?;
                    }
                }
                self.tree.delete(&fs_path, ANY_VERSION).await?;
                Ok(())
            }
            .await;
            release_quietly(guard).await;
            result
        }
        .boxed()
    }

    /// Lists a directory's immediate child names, or the base name of a
    /// file, under a read lock.
    pub async fn list(&self, path: &str) -> Result<Vec<String>, FsError> {
        self.check_path(path, true)?;
        let fs_path = self.fs_path(path);
        if !self.tree.exists(&fs_path).await? {
            return Err(FsError::NotFound(path.to_string()));
        }
        let guard = self.lock_on(&fs_path).acquire_read().await?;
        let result = async {
            let record = self.load_record(&fs_path, path).await?;
            if record.is_dir {
                Ok(self.tree.children(&fs_path).await?)
            } else {
                Ok(vec![base_name(&fs_path).to_string()])
            }
        }
        .await;
        release_quietly(guard).await;
        result
    }

    /// Closes every open descriptor (flushing write handles) and stops the
    /// membership watch. The coordination session itself belongs to the
    /// caller; dropping it releases any remaining ephemeral nodes.
    pub async fn exit(&self) {
        let fds = self.table.lock().unwrap().open_fds();
        for fd in fds {
            if let Err(e) = self.close(fd).await {
                log::warn!("close of fd {fd} during exit failed: {e}");
            }
        }
        self.shutdown.notify_waiters();
        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            watcher.abort();
        }
    }
}

impl<T: CoordinationTree> Drop for Client<T> {
    fn drop(&mut self) {
        // The watch task holds the tree and connector; stop it even when
        // the caller forgot to exit().
        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            watcher.abort();
        }
    }
}

async fn release_quietly<T: CoordinationTree>(guard: LockGuard<T>) {
    let path = guard.guarded_path().to_string();
    if let Err(e) = guard.release().await {
        log::warn!("lock release on {path} failed: {e}");
    }
}

/// Re-lists and re-dials the registry on every membership event, swapping
/// the replica set in place. Ends when the registry becomes unreadable or
/// the session shuts down.
async fn watch_membership<T: CoordinationTree>(
    tree: Arc<T>,
    connector: Arc<dyn NodeConnector>,
    store: Arc<ReplicaSet>,
    registry_root: String,
    shutdown: Arc<Notify>,
) {
    loop {
        let watch = match tree.children_watch(&registry_root).await {
            Ok((_, watch)) => watch,
            Err(e) => {
                log::warn!("registry watch on {registry_root} lost: {e}");
                return;
            }
        };
        // Refresh after arming, not before: a membership change landing
        // between two arms is either seen by this refresh or fires the
        // watch, never lost.
        match discover_nodes(&tree, &connector, &registry_root).await {
            Ok(nodes) => {
                log::debug!("registry refresh: {} block store nodes", nodes.len());
                store.replace(nodes);
            }
            Err(e) => log::warn!("registry relist on {registry_root} failed: {e}"),
        }
        tokio::select! {
            _ = shutdown.notified() => return,
            _ = watch => {}
        }
    }
}
