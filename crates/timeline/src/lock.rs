//! Cross-process exclusion for timeline operations
//!
//! In-process callers are serialized by the manager; this advisory `flock`
//! on `<repo>/locks/timeline.lock` turns away other processes. The kernel
//! drops the lock when its holder exits, so a crashed holder never leaves
//! the timeline wedged.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The lock is held by another process
#[derive(Debug, thiserror::Error)]
#[error("timeline locked by another process{}", .pid.map(|p| format!(" (pid {})", p)).unwrap_or_default())]
pub struct LockBusy {
    pub path: PathBuf,
    pub pid: Option<u32>,
}

/// Lock file content
#[derive(Serialize, Deserialize)]
struct LockContent {
    pid: u32,
    acquired_at: u64,
}

/// Held for the duration of one mutating operation
pub struct TimelineLock {
    #[allow(dead_code)]
    file: File,
}

impl TimelineLock {
    /// Acquire the exclusive lock without blocking
    ///
    /// Fails with [`LockBusy`] if another process holds it.
    pub fn acquire(repo: &Path) -> Result<Self> {
        let lock_path = repo.join("locks").join("timeline.lock");

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create locks directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .context("Failed to open lock file")?;

        if !try_flock_exclusive(&file)? {
            let pid = read_lock_content(&mut file).ok().map(|c| c.pid);
            return Err(LockBusy { path: lock_path, pid }.into());
        }

        // The body is informational; the flock is the lock
        if let Err(e) = write_lock_content(&mut file) {
            tracing::debug!("Could not record lock owner in {}: {}", lock_path.display(), e);
        }

        Ok(Self { file })
    }

    /// True if another process currently holds the lock
    pub fn is_held(repo: &Path) -> bool {
        let lock_path = repo.join("locks").join("timeline.lock");
        match OpenOptions::new().read(true).write(true).open(&lock_path) {
            Ok(file) => !try_flock_exclusive(&file).unwrap_or(true),
            Err(_) => false,
        }
    }
}

fn write_lock_content(file: &mut File) -> Result<()> {
    let content = LockContent {
        pid: std::process::id(),
        acquired_at: tl_core::commit::current_timestamp_ms(),
    };

    let serialized = serde_json::to_string(&content).context("Failed to serialize lock content")?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn read_lock_content(file: &mut File) -> Result<LockContent> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).context("Failed to deserialize lock content")
}

/// Try to acquire exclusive file lock (non-blocking)
#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

// No advisory locking here; only in-process serialization applies
#[cfg(not(unix))]
fn try_flock_exclusive(_file: &File) -> Result<bool> {
    Ok(true)
}
