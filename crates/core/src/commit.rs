//! Commit objects: a root tree linked to its history

use crate::hash::{hash_bytes, Blake3Hash};
use anyhow::Result;
use serde::{Deserialize, Serialize};

const MAGIC: &[u8] = b"SNC1";

/// Immutable snapshot record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Root tree of the snapshot
    pub tree: Blake3Hash,
    /// Previous commit on the branch; `None` for the first checkpoint
    pub parent: Option<Blake3Hash>,
    pub message: String,
    pub author: String,
    /// Unix milliseconds
    pub timestamp_ms: u64,
}

impl Commit {
    pub fn new(tree: Blake3Hash, parent: Option<Blake3Hash>, message: &str, author: &str) -> Self {
        Self {
            tree,
            parent,
            message: message.to_string(),
            author: author.to_string(),
            timestamp_ms: current_timestamp_ms(),
        }
    }

    /// Canonical encoding: magic followed by the bincode body
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&bincode::serialize(self)?);
        Ok(bytes)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
            anyhow::bail!("Invalid commit magic bytes");
        }
        Ok(bincode::deserialize(&bytes[MAGIC.len()..])?)
    }

    pub fn hash(&self) -> Result<Blake3Hash> {
        Ok(hash_bytes(&self.serialize()?))
    }
}

pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
