//! Typed failures raised by the object store
//!
//! Functions in this crate return `anyhow::Result`; these are the leaf errors
//! callers can recover with `downcast_ref`.

use crate::hash::Blake3Hash;
use std::path::PathBuf;

/// The three object kinds kept in a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    /// Directory name under `objects/`
    pub fn dir_name(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blobs",
            ObjectKind::Tree => "trees",
            ObjectKind::Commit => "commits",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Blob => write!(f, "blob"),
            ObjectKind::Tree => write!(f, "tree"),
            ObjectKind::Commit => write!(f, "commit"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {hash}")]
    ObjectNotFound { kind: ObjectKind, hash: Blake3Hash },

    #[error("corrupt {kind} {hash}: {reason}")]
    CorruptObject {
        kind: ObjectKind,
        hash: Blake3Hash,
        reason: String,
    },

    #[error("repository already initialized at {0}")]
    RepositoryExists(PathBuf),

    #[error("not a timeline repository: {path} ({reason})")]
    NotARepository { path: PathBuf, reason: String },
}
