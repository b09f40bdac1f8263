//! In-memory coordination tree for tests and single-process development.
//!
//! `MemoryTree` owns the shared node table; every client obtains its own
//! `MemorySession`, which is what implements [`CoordinationTree`]. Ephemeral
//! nodes are tagged with their creating session and vanish when that session
//! disconnects (explicitly or by drop), firing any armed watches. This is
//! the same crash-release behavior the lock protocol relies on against a
//! real coordination service.

use super::tree::{
    ANY_VERSION, CoordinationTree, CreateMode, TreeError, TreeEvent, Watch, base_name, parent,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

struct Node {
    data: Bytes,
    version: i64,
    /// Session id for ephemeral nodes.
    owner: Option<u64>,
    /// Counter feeding sequential child names.
    next_seq: u64,
    children: BTreeSet<String>,
}

impl Node {
    fn new(data: Bytes, owner: Option<u64>) -> Self {
        Self {
            data,
            version: 0,
            owner,
            next_seq: 0,
            children: BTreeSet::new(),
        }
    }
}

#[derive(Default)]
struct TreeState {
    nodes: HashMap<String, Node>,
    node_watches: HashMap<String, Vec<oneshot::Sender<TreeEvent>>>,
    child_watches: HashMap<String, Vec<oneshot::Sender<TreeEvent>>>,
    next_session: u64,
}

impl TreeState {
    fn fire_node(&mut self, path: &str, event: TreeEvent) {
        if let Some(senders) = self.node_watches.remove(path) {
            for tx in senders {
                let _ = tx.send(event);
            }
        }
    }

    fn fire_children(&mut self, path: &str) {
        if let Some(senders) = self.child_watches.remove(path) {
            for tx in senders {
                let _ = tx.send(TreeEvent::ChildrenChanged);
            }
        }
    }

    fn remove_node(&mut self, path: &str) {
        self.nodes.remove(path);
        let dir = parent(path).to_string();
        if let Some(p) = self.nodes.get_mut(&dir) {
            p.children.remove(base_name(path));
        }
        self.fire_node(path, TreeEvent::Deleted);
        self.fire_children(&dir);
    }
}

/// Shared in-process tree. Cheap to clone; all clones see the same nodes.
#[derive(Clone)]
pub struct MemoryTree {
    state: Arc<Mutex<TreeState>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        let mut state = TreeState::default();
        state.nodes.insert("/".to_string(), Node::new(Bytes::new(), None));
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Opens a new session. Ephemeral nodes created through it live until
    /// the session disconnects.
    pub fn session(&self) -> MemorySession {
        let id = {
            let mut st = self.state.lock().unwrap();
            st.next_session += 1;
            st.next_session
        };
        MemorySession {
            state: self.state.clone(),
            id,
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

/// One client connection to a [`MemoryTree`].
pub struct MemorySession {
    state: Arc<Mutex<TreeState>>,
    id: u64,
    closed: AtomicBool,
}

impl MemorySession {
    /// Tears the session down: every ephemeral node it owns is deleted and
    /// the matching watches fire. Subsequent operations fail with
    /// `SessionClosed`. Also invoked on drop, so an abandoned session
    /// behaves like a crashed client.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut st = self.state.lock().unwrap();
        let owned: Vec<String> = st
            .nodes
            .iter()
            .filter(|(_, n)| n.owner == Some(self.id))
            .map(|(p, _)| p.clone())
            .collect();
        for path in owned {
            st.remove_node(&path);
        }
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, TreeState>, TreeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TreeError::SessionClosed);
        }
        Ok(self.state.lock().unwrap())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[async_trait]
impl CoordinationTree for MemorySession {
    async fn exists(&self, path: &str) -> Result<bool, TreeError> {
        Ok(self.guard()?.nodes.contains_key(path))
    }

    async fn exists_watch(&self, path: &str) -> Result<(bool, Watch), TreeError> {
        let mut st = self.guard()?;
        let (tx, rx) = oneshot::channel();
        st.node_watches.entry(path.to_string()).or_default().push(tx);
        Ok((st.nodes.contains_key(path), rx))
    }

    async fn get(&self, path: &str) -> Result<(Bytes, i64), TreeError> {
        let st = self.guard()?;
        let node = st
            .nodes
            .get(path)
            .ok_or_else(|| TreeError::NoNode(path.to_string()))?;
        Ok((node.data.clone(), node.version))
    }

    async fn set(&self, path: &str, data: Bytes, version: i64) -> Result<i64, TreeError> {
        let mut st = self.guard()?;
        let node = st
            .nodes
            .get_mut(path)
            .ok_or_else(|| TreeError::NoNode(path.to_string()))?;
        if version != ANY_VERSION && version != node.version {
            return Err(TreeError::BadVersion(path.to_string()));
        }
        node.data = data;
        node.version += 1;
        let new_version = node.version;
        st.fire_node(path, TreeEvent::DataChanged);
        Ok(new_version)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, TreeError> {
        let st = self.guard()?;
        let node = st
            .nodes
            .get(path)
            .ok_or_else(|| TreeError::NoNode(path.to_string()))?;
        Ok(node.children.iter().cloned().collect())
    }

    async fn children_watch(&self, path: &str) -> Result<(Vec<String>, Watch), TreeError> {
        let mut st = self.guard()?;
        let names = match st.nodes.get(path) {
            Some(node) => node.children.iter().cloned().collect(),
            None => return Err(TreeError::NoNode(path.to_string())),
        };
        let (tx, rx) = oneshot::channel();
        st.child_watches.entry(path.to_string()).or_default().push(tx);
        Ok((names, rx))
    }

    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<String, TreeError> {
        let mut st = self.guard()?;
        let dir = parent(path).to_string();
        let Some(parent_node) = st.nodes.get_mut(&dir) else {
            return Err(TreeError::NoNode(dir));
        };
        let actual = if mode.contains(CreateMode::SEQUENTIAL) {
            let seq = parent_node.next_seq;
            parent_node.next_seq += 1;
            format!("{path}{seq:010}")
        } else {
            path.to_string()
        };
        if st.nodes.contains_key(&actual) {
            return Err(TreeError::NodeExists(actual));
        }
        let owner = mode.contains(CreateMode::EPHEMERAL).then_some(self.id);
        st.nodes.insert(actual.clone(), Node::new(data, owner));
        let name = base_name(&actual).to_string();
        if let Some(p) = st.nodes.get_mut(&dir) {
            p.children.insert(name);
        }
        st.fire_node(&actual, TreeEvent::Created);
        st.fire_children(&dir);
        Ok(actual)
    }

    async fn delete(&self, path: &str, version: i64) -> Result<(), TreeError> {
        let mut st = self.guard()?;
        let node = st
            .nodes
            .get(path)
            .ok_or_else(|| TreeError::NoNode(path.to_string()))?;
        if !node.children.is_empty() {
            return Err(TreeError::NotEmpty(path.to_string()));
        }
        if version != ANY_VERSION && version != node.version {
            return Err(TreeError::BadVersion(path.to_string()));
        }
        st.remove_node(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequential_names_are_padded_and_increasing() {
        let tree = MemoryTree::new();
        let s = tree.session();
        s.create("/q", Bytes::new(), CreateMode::empty()).await.unwrap();
        let a = s
            .create("/q/n-", Bytes::new(), CreateMode::SEQUENTIAL)
            .await
            .unwrap();
        let b = s
            .create("/q/n-", Bytes::new(), CreateMode::SEQUENTIAL)
            .await
            .unwrap();
        assert_eq!(a, "/q/n-0000000000");
        assert_eq!(b, "/q/n-0000000001");
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let tree = MemoryTree::new();
        let s = tree.session();
        let err = s
            .create("/missing/child", Bytes::new(), CreateMode::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::NoNode(_)));
    }

    #[tokio::test]
    async fn test_delete_rejects_nonempty_and_bad_version() {
        let tree = MemoryTree::new();
        let s = tree.session();
        s.create("/d", Bytes::new(), CreateMode::empty()).await.unwrap();
        s.create("/d/c", Bytes::new(), CreateMode::empty()).await.unwrap();
        assert!(matches!(
            s.delete("/d", ANY_VERSION).await.unwrap_err(),
            TreeError::NotEmpty(_)
        ));
        s.set("/d/c", Bytes::from_static(b"x"), ANY_VERSION).await.unwrap();
        assert!(matches!(
            s.delete("/d/c", 0).await.unwrap_err(),
            TreeError::BadVersion(_)
        ));
        s.delete("/d/c", 1).await.unwrap();
        s.delete("/d", ANY_VERSION).await.unwrap();
    }

    #[tokio::test]
    async fn test_exists_watch_fires_on_delete() {
        let tree = MemoryTree::new();
        let s = tree.session();
        s.create("/w", Bytes::new(), CreateMode::empty()).await.unwrap();
        let (exists, watch) = s.exists_watch("/w").await.unwrap();
        assert!(exists);
        s.delete("/w", ANY_VERSION).await.unwrap();
        assert_eq!(watch.await.unwrap(), TreeEvent::Deleted);
    }

    #[tokio::test]
    async fn test_children_watch_fires_on_create() {
        let tree = MemoryTree::new();
        let s = tree.session();
        let (names, watch) = s.children_watch("/").await.unwrap();
        assert!(names.is_empty());
        s.create("/kid", Bytes::new(), CreateMode::empty()).await.unwrap();
        assert_eq!(watch.await.unwrap(), TreeEvent::ChildrenChanged);
    }

    #[tokio::test]
    async fn test_disconnect_removes_ephemerals_and_fires_watches() {
        let tree = MemoryTree::new();
        let owner = tree.session();
        let other = tree.session();
        owner
            .create("/eph", Bytes::new(), CreateMode::EPHEMERAL)
            .await
            .unwrap();
        let (exists, watch) = other.exists_watch("/eph").await.unwrap();
        assert!(exists);
        owner.disconnect();
        assert_eq!(watch.await.unwrap(), TreeEvent::Deleted);
        assert!(!other.exists("/eph").await.unwrap());
        assert!(matches!(
            owner.exists("/eph").await.unwrap_err(),
            TreeError::SessionClosed
        ));
    }
}
