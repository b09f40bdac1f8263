//! Rotating replica fan-out.
//!
//! One rotation index is shared by all operations so load spreads across the
//! cluster. A store call keeps trying nodes until it has `fanout` successful
//! copies or has asked every node once, and succeeds as long as one copy
//! landed; a fetch asks at most `fanout` nodes and takes the first hit.
//! The node list can be swapped wholesale when cluster membership changes.

use super::{BlockNode, StoreError};
use bytes::Bytes;
use std::sync::{Arc, Mutex};

struct Rotation {
    nodes: Vec<Arc<dyn BlockNode>>,
    next: usize,
}

pub struct ReplicaSet {
    fanout: usize,
    inner: Mutex<Rotation>,
}

impl ReplicaSet {
    pub fn new(nodes: Vec<Arc<dyn BlockNode>>, fanout: usize) -> Self {
        Self {
            fanout,
            inner: Mutex::new(Rotation { nodes, next: 0 }),
        }
    }

    /// Replaces the connection list after a membership change.
    pub fn replace(&self, nodes: Vec<Arc<dyn BlockNode>>) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes = nodes;
        inner.next = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Picks the next node in rotation. The critical section covers only
    /// the index bump; network traffic happens outside it.
    fn next_node(&self) -> Option<Arc<dyn BlockNode>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.nodes.is_empty() {
            return None;
        }
        let node = inner.nodes[inner.next % inner.nodes.len()].clone();
        inner.next = (inner.next + 1) % inner.nodes.len();
        Some(node)
    }

    /// Best-effort replicated write: at least one copy must land.
    pub async fn store(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        let attempts = self.len();
        let mut stored = 0usize;
        for _ in 0..attempts {
            if stored >= self.fanout {
                break;
            }
            let Some(node) = self.next_node() else { break };
            match node.put_block(key, data.clone()).await {
                Ok(()) => stored += 1,
                Err(e) => log::debug!("replica put {key} failed: {e}"),
            }
        }
        if stored == 0 {
            return Err(StoreError::Unavailable(format!("no replica accepted {key}")));
        }
        Ok(())
    }

    /// First successful replica answer wins.
    pub async fn fetch(&self, key: &str) -> Result<Bytes, StoreError> {
        for _ in 0..self.fanout {
            let Some(node) = self.next_node() else { break };
            match node.get_block(key).await {
                Ok(data) => return Ok(data),
                Err(e) => log::debug!("replica get {key} failed: {e}"),
            }
        }
        Err(StoreError::Unavailable(format!("no replica served {key}")))
    }
}
