//! Replicated block store access (store)
//!
//! Responsibilities:
//! - Define the `BlockNode` trait for one backend connection: put/get of
//!   opaque byte blocks addressed by content reference.
//! - Define `NodeConnector`, the seam where real deployments dial a
//!   discovered endpoint; the crate never owns connection setup itself.
//! - Provide `ReplicaSet`, the rotating best-effort fan-out used by every
//!   block operation.
//! - Provide an in-memory cluster backend for tests and demos, with
//!   per-node offline switches to exercise the fan-out paths.
//!
//! Submodules:
//! - `replica`: rotation and fan-out over live connections
pub mod replica;

pub use replica::ReplicaSet;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("block {0} not found")]
    NotFound(String),
    #[error("node {0} offline")]
    Offline(String),
    /// Every replica attempt failed.
    #[error("block store unavailable: {0}")]
    Unavailable(String),
}

/// One connection to a block store backend node.
#[async_trait]
pub trait BlockNode: Send + Sync {
    async fn put_block(&self, key: &str, data: Bytes) -> Result<(), StoreError>;
    async fn get_block(&self, key: &str) -> Result<Bytes, StoreError>;
}

/// Registry payload advertised by a backend node, stored as JSON under the
/// registry root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeAdvert {
    pub node_id: String,
    pub endpoint: String,
}

impl NodeAdvert {
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Turns a discovered advert into a live connection.
#[async_trait]
pub trait NodeConnector: Send + Sync + 'static {
    async fn connect(&self, advert: &NodeAdvert) -> Result<Arc<dyn BlockNode>, StoreError>;
}

/// In-memory stand-in for a content-addressed cluster. All nodes share one
/// backing map, mirroring a DHT where any reachable node resolves any key.
#[derive(Clone, Default)]
pub struct MemoryBlockCluster {
    blocks: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryBlockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh node handle into the cluster, initially online.
    pub fn node(&self) -> Arc<MemoryBlockNode> {
        Arc::new(MemoryBlockNode {
            blocks: self.blocks.clone(),
            online: AtomicBool::new(true),
        })
    }

    /// Direct lookup, bypassing any node. Test hook for durability checks.
    pub fn peek(&self, key: &str) -> Option<Bytes> {
        self.blocks.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl NodeConnector for MemoryBlockCluster {
    async fn connect(&self, _advert: &NodeAdvert) -> Result<Arc<dyn BlockNode>, StoreError> {
        Ok(self.node())
    }
}

pub struct MemoryBlockNode {
    blocks: Arc<Mutex<HashMap<String, Bytes>>>,
    online: AtomicBool,
}

impl MemoryBlockNode {
    /// Simulates the node dropping out of (or back into) the cluster.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Offline("memory".to_string()))
        }
    }
}

#[async_trait]
impl BlockNode for MemoryBlockNode {
    async fn put_block(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        self.check_online()?;
        self.blocks.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn get_block(&self, key: &str) -> Result<Bytes, StoreError> {
        self.check_online()?;
        self.blocks
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
