//! Error taxonomy of the manager API

use crate::lock::LockBusy;
use journal::{FsError, RefError, ResolveError};
use tl_core::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimelineError {
    /// Bad input; nothing was changed
    #[error("{0}")]
    Validation(String),

    /// Repository missing, unreadable or inconsistent
    #[error("repository error: {0}")]
    Repository(String),

    /// Snapshot could not be captured or committed
    #[error("checkpoint failed: {0}")]
    Checkpoint(String),

    #[error("{0}")]
    Branch(String),

    /// Live directory or worktree could not be read or written
    #[error("file error: {0}")]
    File(String),

    /// Another process is operating on the timeline
    #[error("timeline busy: {0}")]
    Concurrency(String),
}

impl TimelineError {
    /// Map an internal error by the first typed cause in its chain
    pub(crate) fn classify(err: &anyhow::Error, fallback: fn(String) -> TimelineError) -> Self {
        let message = format!("{:#}", err);

        for cause in err.chain() {
            if cause.is::<LockBusy>() {
                return TimelineError::Concurrency(message);
            }
            if cause.is::<ResolveError>() {
                return TimelineError::Validation(message);
            }
            if cause.is::<FsError>() {
                return TimelineError::File(message);
            }
            match cause.downcast_ref::<RefError>() {
                Some(RefError::AlreadyExists(_)) => return TimelineError::Branch(message),
                Some(_) => return TimelineError::Repository(message),
                None => {}
            }
            match cause.downcast_ref::<StoreError>() {
                Some(StoreError::RepositoryExists(_)) => return TimelineError::Validation(message),
                Some(_) => return TimelineError::Repository(message),
                None => {}
            }
        }

        fallback(message)
    }

    /// Capture and commit failures: file errors stay file errors, everything
    /// else is a failed checkpoint
    pub(crate) fn classify_checkpoint(err: &anyhow::Error) -> Self {
        match Self::classify(err, TimelineError::Checkpoint) {
            TimelineError::File(message) => TimelineError::File(message),
            TimelineError::Concurrency(message) => TimelineError::Concurrency(message),
            other => TimelineError::Checkpoint(other.message().to_string()),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TimelineError::Validation(m)
            | TimelineError::Repository(m)
            | TimelineError::Checkpoint(m)
            | TimelineError::Branch(m)
            | TimelineError::File(m)
            | TimelineError::Concurrency(m) => m,
        }
    }

    /// Short category name, as shown by front ends
    pub fn kind(&self) -> &'static str {
        match self {
            TimelineError::Validation(_) => "ValidationError",
            TimelineError::Repository(_) => "RepositoryError",
            TimelineError::Checkpoint(_) => "CheckpointError",
            TimelineError::Branch(_) => "BranchError",
            TimelineError::File(_) => "FileError",
            TimelineError::Concurrency(_) => "ConcurrencyError",
        }
    }
}
