//! History and worktree plumbing on top of the object store
//!
//! This crate provides:
//! - Reference store (branch pointers and HEAD)
//! - Append-only ref log (sled embedded DB)
//! - Commit graph walks
//! - Directory capture into trees
//! - Tree checkout onto directories
//! - Repository verification after unclean shutdown

pub mod capture;
pub mod checkout;
pub mod error;
pub mod graph;
pub mod recovery;
pub mod reflog;
pub mod refs;

// Re-exports
pub use capture::{capture, CaptureResult, CaptureStats};
pub use checkout::{checkout, CheckoutStats};
pub use error::{FsError, RefError, ResolveError};
pub use recovery::{verify_repository, VerifyReport};
pub use reflog::{RefLog, RefLogEntry};
pub use refs::RefStore;

/// Result type for journal operations
pub type Result<T> = anyhow::Result<T>;

/// Prefix of temp files the materializer leaves next to their destination
pub const TEMP_PREFIX: &str = ".tl-tmp-";
