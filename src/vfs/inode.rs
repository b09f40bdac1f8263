//! Inode records: the payload of every namespace node in the coordination
//! tree. Files carry the ordered content-reference list of their blocks; a
//! directory's children live in the tree itself, so its record stays empty.

use super::error::FsError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeRecord {
    pub size: u64,
    pub is_dir: bool,
    /// Content reference of logical block `i`, files only. Invariant:
    /// `size <= blocks.len() * block_size`, and the last block is the only
    /// one that may be partially used.
    pub blocks: Vec<String>,
}

impl InodeRecord {
    pub fn file() -> Self {
        Self {
            size: 0,
            is_dir: false,
            blocks: Vec::new(),
        }
    }

    pub fn dir() -> Self {
        Self {
            size: 0,
            is_dir: true,
            blocks: Vec::new(),
        }
    }

    pub fn encode(&self, path: &str) -> Result<Bytes, FsError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|_| FsError::CorruptRecord(path.to_string()))
    }

    pub fn decode(data: &[u8], path: &str) -> Result<Self, FsError> {
        serde_json::from_slice(data).map_err(|_| FsError::CorruptRecord(path.to_string()))
    }
}
