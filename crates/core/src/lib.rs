//! Timeline core - content-addressed storage primitives for save snapshots
//!
//! This crate provides the foundational storage layer:
//! - BLAKE3 hashing
//! - Blob storage with compression
//! - Tree objects (one directory level each) and diffing
//! - Commit objects
//! - On-disk repository management

pub mod blob;
pub mod commit;
pub mod error;
pub mod hash;
pub mod store;
pub mod tree;

pub use blob::{Blob, BlobStore};
pub use commit::Commit;
pub use error::{ObjectKind, StoreError};
pub use hash::Blake3Hash;
pub use store::ObjectStore;
pub use tree::{Entry, EntryKind, Tree, TreeDiff};

/// Common result type used throughout timeline core
pub type Result<T> = anyhow::Result<T>;
