//! Minimal end-to-end walkthrough on the in-memory backends: bootstrap the
//! roots, advertise a few store nodes, then exercise every client operation
//! with a cross-block payload and verify the bytes round-trip.

use super::client::{Client, ClientConfig, advertise_node, init_roots};
use super::error::FsError;
use crate::coord::memory::MemoryTree;
use crate::store::{MemoryBlockCluster, NodeAdvert};
use std::sync::Arc;

pub async fn e2e_memory_demo() -> Result<(), FsError> {
    let config = ClientConfig {
        block_size: 4096,
        ..ClientConfig::default()
    };
    let tree = MemoryTree::new();

    let boot = Arc::new(tree.session());
    init_roots(&boot, &config).await?;
    let cluster = MemoryBlockCluster::new();
    for i in 0..3 {
        let advert = NodeAdvert {
            node_id: format!("node-{i}"),
            endpoint: format!("mem://node-{i}"),
        };
        advertise_node(&boot, &config, &advert).await?;
    }

    let client = Client::connect(
        Arc::new(tree.session()),
        Arc::new(cluster.clone()),
        config.clone(),
    )
    .await?;

    client.mkdir("/demo").await?;
    let payload: Vec<u8> = (0..3 * 4096 + 17).map(|i| (i % 251) as u8).collect();

    let fd = client.open("/demo/blob", true, true).await?;
    client.write(fd, 0, &payload).await?;
    client.close(fd).await?;

    let fd = client.open("/demo/blob", false, false).await?;
    let out = client.read(fd, 0, payload.len() as u64).await?;
    client.close(fd).await?;
    if out != payload {
        return Err(FsError::CorruptRecord("/demo/blob".to_string()));
    }

    let names = client.list("/demo").await?;
    if names != vec!["blob".to_string()] {
        return Err(FsError::NotFound("/demo/blob".to_string()));
    }
    client.remove("/demo").await?;
    client.exit().await;
    Ok(())
}
