//! Blob storage with compression and content-addressing

use crate::error::{ObjectKind, StoreError};
use crate::hash::{hash_bytes, Blake3Hash, MMAP_THRESHOLD};
use crate::store::{atomic_write, object_path};
use anyhow::Result;
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

/// Blobs larger than this are zstd-compressed when that actually saves space
const COMPRESSION_THRESHOLD: usize = 4096;

/// Blob header format (version 1)
#[derive(Debug, Clone)]
pub struct BlobHeaderV1 {
    /// Magic bytes: "SNB1"
    pub magic: [u8; 4],
    /// Flags: bit0=compressed, bit1-7=reserved
    pub flags: u8,
    /// Original size (before compression)
    pub orig_len: u64,
    /// Stored size (after compression, if compressed)
    pub stored_len: u64,
}

impl BlobHeaderV1 {
    const MAGIC: [u8; 4] = *b"SNB1";
    const FLAG_COMPRESSED: u8 = 0b0000_0001;
    pub const LEN: usize = 21;

    pub fn new(orig_len: u64, stored_len: u64, compressed: bool) -> Self {
        let flags = if compressed { Self::FLAG_COMPRESSED } else { 0 };
        Self {
            magic: Self::MAGIC,
            flags,
            orig_len,
            stored_len,
        }
    }

    pub fn is_compressed(&self) -> bool {
        (self.flags & Self::FLAG_COMPRESSED) != 0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::LEN);
        bytes.extend_from_slice(&self.magic);
        bytes.push(self.flags);
        bytes.extend_from_slice(&self.orig_len.to_le_bytes());
        bytes.extend_from_slice(&self.stored_len.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::LEN {
            anyhow::bail!(
                "Invalid header length: expected at least {} bytes, got {}",
                Self::LEN,
                bytes.len()
            );
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != Self::MAGIC {
            anyhow::bail!("Invalid magic bytes: expected {:?}, got {:?}", Self::MAGIC, magic);
        }

        let flags = bytes[4];
        let orig_len = u64::from_le_bytes(bytes[5..13].try_into()?);
        let stored_len = u64::from_le_bytes(bytes[13..21].try_into()?);

        Ok(Self {
            magic,
            flags,
            orig_len,
            stored_len,
        })
    }
}

/// Metadata for a stored file's contents
#[derive(Debug, Clone)]
pub struct Blob {
    pub hash: Blake3Hash,
    /// Original size
    pub size: u64,
    pub compressed: bool,
}

impl Blob {
    /// Encode content as header + (possibly compressed) payload
    pub fn from_bytes(data: &[u8]) -> Result<(Self, Vec<u8>)> {
        let hash = hash_bytes(data);
        let orig_len = data.len() as u64;

        let (stored_data, compressed) = if data.len() > COMPRESSION_THRESHOLD {
            match zstd::encode_all(data, 3) {
                Ok(compressed_data) if compressed_data.len() < data.len() => (compressed_data, true),
                Ok(_) => (data.to_vec(), false),
                Err(e) => {
                    tracing::debug!("zstd compression failed for {}, storing raw: {}", hash.short(), e);
                    (data.to_vec(), false)
                }
            }
        } else {
            (data.to_vec(), false)
        };

        let header = BlobHeaderV1::new(orig_len, stored_data.len() as u64, compressed);
        let mut serialized = header.to_bytes();
        serialized.extend_from_slice(&stored_data);

        let blob = Blob {
            hash,
            size: orig_len,
            compressed,
        };

        Ok((blob, serialized))
    }

    /// Decode header + payload back into the original content
    pub fn read_from_bytes(serialized: &[u8]) -> Result<Vec<u8>> {
        let header = BlobHeaderV1::from_bytes(serialized)?;

        let data_start = BlobHeaderV1::LEN;
        let data_end = usize::try_from(header.stored_len)
            .ok()
            .and_then(|len| data_start.checked_add(len))
            .ok_or_else(|| anyhow::anyhow!("Invalid blob data length: {} bytes", header.stored_len))?;

        if serialized.len() < data_end {
            anyhow::bail!(
                "Invalid blob data length: expected at least {} bytes, got {}",
                data_end,
                serialized.len()
            );
        }

        let stored_data = &serialized[data_start..data_end];

        if header.is_compressed() {
            let decompressed = zstd::decode_all(stored_data)?;
            if decompressed.len() != header.orig_len as usize {
                anyhow::bail!(
                    "Decompressed size mismatch: expected {} bytes, got {}",
                    header.orig_len,
                    decompressed.len()
                );
            }
            Ok(decompressed)
        } else {
            Ok(stored_data.to_vec())
        }
    }
}

/// Blob half of the object store (`objects/blobs/<hh>/<rest>`)
pub struct BlobStore {
    /// Repository directory
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Store content and return its digest
    ///
    /// Idempotent: identical content is written once.
    pub fn write_blob(&self, data: &[u8]) -> Result<Blake3Hash> {
        let hash = hash_bytes(data);
        if self.has_blob(hash) {
            return Ok(hash);
        }

        let (_, serialized) = Blob::from_bytes(data)?;
        atomic_write(&self.root.join("tmp/ingest"), &self.blob_path(hash), &serialized)?;

        Ok(hash)
    }

    /// Read and verify a blob
    pub fn read_blob(&self, hash: Blake3Hash) -> Result<Vec<u8>> {
        let blob_path = self.blob_path(hash);
        let mut file = match File::open(&blob_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::ObjectNotFound {
                    kind: ObjectKind::Blob,
                    hash,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        let decoded = if len >= MMAP_THRESHOLD {
            // SAFETY: object files are renamed into place complete and never
            // modified or truncated afterwards
            let mmap = unsafe { Mmap::map(&file)? };
            Blob::read_from_bytes(&mmap)
        } else {
            let mut serialized = Vec::with_capacity(len as usize);
            file.read_to_end(&mut serialized)?;
            Blob::read_from_bytes(&serialized)
        };

        let data = decoded.map_err(|e| StoreError::CorruptObject {
            kind: ObjectKind::Blob,
            hash,
            reason: e.to_string(),
        })?;

        let actual_hash = hash_bytes(&data);
        if actual_hash != hash {
            return Err(StoreError::CorruptObject {
                kind: ObjectKind::Blob,
                hash,
                reason: format!("content hashes to {}", actual_hash),
            }
            .into());
        }

        Ok(data)
    }

    pub fn has_blob(&self, hash: Blake3Hash) -> bool {
        self.blob_path(hash).exists()
    }

    fn blob_path(&self, hash: Blake3Hash) -> PathBuf {
        object_path(&self.root, ObjectKind::Blob, hash)
    }
}
