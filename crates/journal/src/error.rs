use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("ref already exists: {0}")]
    AlreadyExists(String),

    #[error("ref not found: {0}")]
    NotFound(String),

    #[error("ref {name} is unreadable: {reason}")]
    Corrupt { name: String, reason: String },
}

/// Filesystem failure while reading or writing a working directory
#[derive(Debug, thiserror::Error)]
#[error("failed to {op} {}: {source}", path.display())]
pub struct FsError {
    pub op: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl FsError {
    pub fn new(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Attach an `FsError` to io results
pub(crate) trait FsContext<T> {
    fn fs_op(self, op: &'static str, path: &std::path::Path) -> Result<T, FsError>;
}

impl<T> FsContext<T> for std::io::Result<T> {
    fn fs_op(self, op: &'static str, path: &std::path::Path) -> Result<T, FsError> {
        self.map_err(|e| FsError::new(op, path, e))
    }
}

/// Failure to turn a user-supplied checkpoint id into a commit on a branch
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("malformed checkpoint id {0:?} (expected at least 4 hex characters)")]
    Malformed(String),

    #[error("checkpoint {0} is not part of this branch's history")]
    Unknown(String),

    #[error("checkpoint id {0} is ambiguous")]
    Ambiguous(String),
}

pub(crate) fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .map(|e| e.kind() == std::io::ErrorKind::NotFound)
        .unwrap_or(false)
}
