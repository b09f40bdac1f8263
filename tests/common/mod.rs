//! Shared harness: an in-memory coordination tree plus an in-memory block
//! cluster with a few advertised nodes, bootstrapped the way a real
//! deployment would be.

#![allow(dead_code)]

use bytes::Bytes;
use ripplefs::coord::{MemorySession, MemoryTree};
use ripplefs::store::{MemoryBlockCluster, NodeAdvert};
use ripplefs::vfs::{Client, ClientConfig, FsError, advertise_node, init_roots};
use std::sync::Arc;

pub struct Harness {
    pub tree: MemoryTree,
    pub cluster: MemoryBlockCluster,
    pub config: ClientConfig,
    /// Keeps the ephemeral node adverts alive for the test's duration.
    boot: Arc<MemorySession>,
}

impl Harness {
    pub async fn with_nodes(block_size: u64, nodes: usize) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = ClientConfig {
            block_size,
            ..ClientConfig::default()
        };
        let tree = MemoryTree::new();
        let boot = Arc::new(tree.session());
        init_roots(&boot, &config).await.expect("init roots");
        let cluster = MemoryBlockCluster::new();
        for i in 0..nodes {
            let advert = NodeAdvert {
                node_id: format!("node-{i}"),
                endpoint: format!("mem://node-{i}"),
            };
            advertise_node(&boot, &config, &advert).await.expect("advertise");
        }
        Self {
            tree,
            cluster,
            config,
            boot,
        }
    }

    pub async fn new(block_size: u64) -> Self {
        Self::with_nodes(block_size, 3).await
    }

    pub async fn client(&self) -> Client<MemorySession> {
        self.client_with_session().await.1
    }

    /// Connection attempt with the error surfaced, for bootstrap tests.
    pub async fn try_client(&self) -> Result<Client<MemorySession>, FsError> {
        Client::connect(
            Arc::new(self.tree.session()),
            Arc::new(self.cluster.clone()),
            self.config.clone(),
        )
        .await
    }

    /// Client plus its coordination session, so tests can simulate a crash
    /// by disconnecting the session out from under the client.
    pub async fn client_with_session(&self) -> (Arc<MemorySession>, Client<MemorySession>) {
        let session = Arc::new(self.tree.session());
        let client = Client::connect(
            session.clone(),
            Arc::new(self.cluster.clone()),
            self.config.clone(),
        )
        .await
        .expect("client connect");
        (session, client)
    }

    pub async fn advertise(&self, node_id: &str) {
        let advert = NodeAdvert {
            node_id: node_id.to_string(),
            endpoint: format!("mem://{node_id}"),
        };
        advertise_node(&self.boot, &self.config, &advert)
            .await
            .expect("advertise");
    }
}

/// Open-write-close, the way most scenarios seed file contents.
pub async fn write_file(
    client: &Client<MemorySession>,
    path: &str,
    offset: u64,
    data: &[u8],
) -> Result<(), FsError> {
    let fd = client.open(path, true, true).await?;
    client.write(fd, offset, data).await?;
    client.close(fd).await
}

/// Open-read-close counterpart.
pub async fn read_file(
    client: &Client<MemorySession>,
    path: &str,
    offset: u64,
    size: u64,
) -> Result<Bytes, FsError> {
    let fd = client.open(path, true, false).await?;
    let out = client.read(fd, offset, size).await?;
    client.close(fd).await?;
    Ok(out)
}
