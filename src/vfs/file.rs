//! Open-file state and the block I/O paths.
//!
//! Every open handle owns an in-memory copy of the inode record, the
//! distributed lock guarding its path, and a private block cache. Writes
//! never touch stored blocks: each spanned block gets a fresh content
//! reference (copy-on-write) and stays cached until close, when the dirty
//! blocks are pushed to the replica set and the record is committed. The
//! old record keeps pointing at intact blocks until that final commit, so a
//! crash mid-write cannot corrupt durable state.

use super::error::FsError;
use super::inode::InodeRecord;
use crate::coord::tree::CoordinationTree;
use crate::dlock::LockGuard;
use crate::store::ReplicaSet;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

impl OpenMode {
    pub fn writable(self) -> bool {
        matches!(self, OpenMode::ReadWrite)
    }
}

/// Session-wide read counters feeding the prefetch heuristic.
#[derive(Default)]
pub(crate) struct IoStats {
    reads: AtomicU64,
    blocks_requested: AtomicU64,
}

impl IoStats {
    /// Records one read of `requested` bytes and returns the running
    /// average of blocks requested per read, current request included.
    fn prefetch_budget(&self, requested: u64, block_size: u64) -> u64 {
        let blocks = requested.div_ceil(block_size);
        let reads = self.reads.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.blocks_requested.fetch_add(blocks, Ordering::Relaxed) + blocks;
        total / reads
    }
}

fn new_block_ref() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) struct FileHandle<T: CoordinationTree> {
    /// User-visible path, for error reporting.
    path: String,
    /// Tree path under the namespace root.
    fs_path: String,
    mode: OpenMode,
    guard: Option<LockGuard<T>>,
    inode: InodeRecord,
    cache: HashMap<String, Bytes>,
    /// References created by this handle; the only blocks flushed on close.
    dirty: HashSet<String>,
    store: Arc<ReplicaSet>,
    stats: Arc<IoStats>,
    block_size: u64,
}

impl<T: CoordinationTree> FileHandle<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        path: String,
        fs_path: String,
        mode: OpenMode,
        guard: LockGuard<T>,
        inode: InodeRecord,
        store: Arc<ReplicaSet>,
        stats: Arc<IoStats>,
        block_size: u64,
    ) -> Self {
        Self {
            path,
            fs_path,
            mode,
            guard: Some(guard),
            inode,
            cache: HashMap::new(),
            dirty: HashSet::new(),
            store,
            stats,
            block_size,
        }
    }

    pub(crate) fn mode(&self) -> OpenMode {
        self.mode
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn fs_path(&self) -> &str {
        &self.fs_path
    }

    pub(crate) fn encode_record(&self) -> Result<Bytes, FsError> {
        self.inode.encode(&self.fs_path)
    }

    pub(crate) fn take_guard(&mut self) -> Option<LockGuard<T>> {
        self.guard.take()
    }

    /// Block `idx` through the cache, fetching from the replica set on miss.
    async fn cached_block(&mut self, idx: usize) -> Result<Bytes, FsError> {
        let key = self
            .inode
            .blocks
            .get(idx)
            .cloned()
            .ok_or_else(|| FsError::CorruptRecord(self.path.clone()))?;
        if let Some(block) = self.cache.get(&key) {
            return Ok(block.clone());
        }
        let block = self.store.fetch(&key).await?;
        self.cache.insert(key, block.clone());
        Ok(block)
    }

    /// Reads up to `size` bytes at `offset`, truncated at end of file.
    /// Afterwards fetches subsequent sequential blocks into the cache until
    /// the running per-read average is met.
    pub(crate) async fn read(&mut self, offset: u64, size: u64) -> Result<Bytes, FsError> {
        let budget = self.stats.prefetch_budget(size, self.block_size);
        let avail = self.inode.size.saturating_sub(offset).min(size);
        let mut out = Vec::with_capacity(avail as usize);
        let mut off = offset;
        let mut pos = (offset % self.block_size) as usize;
        let mut blocknum = (offset / self.block_size) as usize;
        let mut got = 0u64;
        let mut touched = 0u64;
        while got < size && off < self.inode.size {
            let len = (size - got)
                .min(self.block_size - pos as u64)
                .min(self.inode.size - off) as usize;
            let block = self.cached_block(blocknum).await?;
            if block.len() < pos + len {
                return Err(FsError::CorruptRecord(self.path.clone()));
            }
            out.extend_from_slice(&block[pos..pos + len]);
            got += len as u64;
            off += len as u64;
            blocknum += 1;
            pos = 0;
            touched += 1;
        }
        while touched < budget && blocknum < self.inode.blocks.len() {
            self.cached_block(blocknum).await?;
            blocknum += 1;
            touched += 1;
        }
        Ok(Bytes::from(out))
    }

    /// Copy-on-write write of `data` at `offset`. Gaps beyond the current
    /// block count are filled with fresh zero blocks. Nothing reaches the
    /// network here; dirty blocks travel on close.
    pub(crate) async fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FsError> {
        if data.is_empty() {
            return Ok(());
        }
        let bs = self.block_size as usize;
        let mut pos = (offset % self.block_size) as usize;
        let mut blocknum = (offset / self.block_size) as usize;
        let mut written = 0usize;
        while written < data.len() {
            let take = (data.len() - written).min(bs - pos);
            let mut buf;
            if blocknum < self.inode.blocks.len() {
                // Replace the spanned block under a fresh reference; the old
                // one stays untouched in the store.
                let old_key = self.inode.blocks[blocknum].clone();
                let old = match self.cache.get(&old_key) {
                    Some(block) => block.clone(),
                    None => self.store.fetch(&old_key).await?,
                };
                buf = vec![0u8; bs];
                let n = old.len().min(bs);
                buf[..n].copy_from_slice(&old[..n]);
            } else {
                // Zero blocks for any gap before the target index.
                while self.inode.blocks.len() < blocknum {
                    let key = new_block_ref();
                    self.cache.insert(key.clone(), Bytes::from(vec![0u8; bs]));
                    self.dirty.insert(key.clone());
                    self.inode.blocks.push(key);
                }
                buf = vec![0u8; bs];
            }
            buf[pos..pos + take].copy_from_slice(&data[written..written + take]);
            let key = new_block_ref();
            if blocknum < self.inode.blocks.len() {
                self.inode.blocks[blocknum] = key.clone();
            } else {
                self.inode.blocks.push(key.clone());
            }
            self.cache.insert(key.clone(), Bytes::from(buf));
            self.dirty.insert(key);
            pos = 0;
            written += take;
            blocknum += 1;
        }
        let end = offset + written as u64;
        if end > self.inode.size {
            self.inode.size = end;
        }
        Ok(())
    }

    /// Pushes every dirty block still referenced by the record to the
    /// replica set, in block order.
    pub(crate) async fn flush(&mut self) -> Result<(), FsError> {
        for key in &self.inode.blocks {
            if self.dirty.contains(key)
                && let Some(data) = self.cache.get(key)
            {
                self.store.store(key, data.clone()).await?;
            }
        }
        self.dirty.clear();
        Ok(())
    }
}
