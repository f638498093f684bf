//! Append-only log of branch pointer movements using sled

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use tl_core::commit::current_timestamp_ms;
use tl_core::Blake3Hash;
use ulid::{Generator, Ulid};

/// Why a ref moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefUpdateReason {
    /// Default branch created with the timeline
    Init,
    Checkpoint,
    Restore,
    Branch,
}

impl std::fmt::Display for RefUpdateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefUpdateReason::Init => write!(f, "init"),
            RefUpdateReason::Checkpoint => write!(f, "checkpoint"),
            RefUpdateReason::Restore => write!(f, "restore"),
            RefUpdateReason::Branch => write!(f, "branch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefLogEntry {
    pub id: Ulid,
    pub ref_name: String,
    /// Previous target; `None` when the ref was created
    pub old: Option<Blake3Hash>,
    pub new: Blake3Hash,
    pub timestamp_ms: u64,
    pub reason: RefUpdateReason,
    pub message: String,
}

impl RefLogEntry {
    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Ref log stored at `logs/reflog.db`
///
/// Keys are ULIDs kept strictly increasing, also across handles opened in
/// the same millisecond, so iteration order is append order.
pub struct RefLog {
    db: Db,
    ids: Mutex<Generator>,
}

impl RefLog {
    /// Open or create the ref log of the repository at `repo`
    pub fn open(repo: &Path) -> Result<Self> {
        let path = repo.join("logs").join("reflog.db");
        let db = sled::Config::new()
            .path(&path)
            .flush_every_ms(None)
            .open()
            .with_context(|| format!("Failed to open ref log at {}", path.display()))?;

        Ok(Self {
            db,
            ids: Mutex::new(Generator::new()),
        })
    }

    /// Record one pointer movement and flush it
    pub fn append(
        &self,
        ref_name: &str,
        old: Option<Blake3Hash>,
        new: Blake3Hash,
        reason: RefUpdateReason,
        message: &str,
    ) -> Result<RefLogEntry> {
        let mut id = match self.ids.lock().generate() {
            Ok(id) => id,
            // Generator overflowed within one millisecond
            Err(_) => Ulid::new(),
        };
        if let Some((last, _)) = self.db.last()? {
            if let Ok(bytes) = <[u8; 16]>::try_from(last.as_ref()) {
                let last = Ulid::from_bytes(bytes);
                if id <= last {
                    id = last.increment().unwrap_or(id);
                }
            }
        }

        let entry = RefLogEntry {
            id,
            ref_name: ref_name.to_string(),
            old,
            new,
            timestamp_ms: current_timestamp_ms(),
            reason,
            message: message.to_string(),
        };

        self.db.insert(id.to_bytes(), entry.serialize()?)?;
        self.db.flush()?;

        Ok(entry)
    }

    /// Entries for one ref, oldest first
    pub fn entries_for(&self, ref_name: &str) -> Result<Vec<RefLogEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.ref_name == ref_name)
            .collect())
    }

    /// Every entry, oldest first
    pub fn entries(&self) -> Result<Vec<RefLogEntry>> {
        let mut entries = Vec::new();
        for item in self.db.iter() {
            let (_, value) = item?;
            entries.push(RefLogEntry::deserialize(&value)?);
        }
        Ok(entries)
    }

    pub fn count(&self) -> usize {
        self.db.len()
    }

    /// Scan all entries and report the ones that fail to decode
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport::default();

        for result in self.db.iter() {
            match result {
                Ok((key, value)) => {
                    report.total_entries += 1;

                    let key_ok = <[u8; 16]>::try_from(key.as_ref()).is_ok();
                    match RefLogEntry::deserialize(&value) {
                        Ok(entry) if key_ok && entry.id.to_bytes().as_slice() == key.as_ref() => {
                            report.valid_entries += 1;
                        }
                        Ok(entry) => {
                            tracing::warn!("Ref log entry {} stored under a foreign key", entry.id);
                            report.corrupted_entries.push(key.to_vec());
                        }
                        Err(e) => {
                            tracing::warn!("Failed to decode ref log entry: {}", e);
                            report.corrupted_entries.push(key.to_vec());
                        }
                    }
                }
                Err(e) => report.db_errors.push(e.to_string()),
            }
        }

        tracing::debug!(
            "Ref log integrity check complete: {}/{} valid entries",
            report.valid_entries,
            report.total_entries
        );
        Ok(report)
    }
}

/// Ref log integrity report
#[derive(Debug, Default, Clone)]
pub struct IntegrityReport {
    pub total_entries: usize,
    pub valid_entries: usize,
    /// Keys of entries that failed to decode
    pub corrupted_entries: Vec<Vec<u8>>,
    pub db_errors: Vec<String>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.corrupted_entries.is_empty() && self.db_errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_core::hash::hash_bytes;

    #[test]
    fn test_append_and_filter() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let log = RefLog::open(temp_dir.path())?;

        let a = hash_bytes(b"a");
        let b = hash_bytes(b"b");
        log.append("world1-main", None, a, RefUpdateReason::Init, "Timeline created")?;
        log.append("alt", None, a, RefUpdateReason::Branch, "branch alt")?;
        log.append("world1-main", Some(a), b, RefUpdateReason::Checkpoint, "progress")?;

        let main = log.entries_for("world1-main")?;
        assert_eq!(main.len(), 2);
        assert_eq!(main[0].reason, RefUpdateReason::Init);
        assert_eq!(main[1].old, Some(a));
        assert_eq!(main[1].new, b);
        assert_eq!(log.count(), 3);
        Ok(())
    }

    #[test]
    fn test_entries_survive_reopen() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        {
            let log = RefLog::open(temp_dir.path())?;
            for i in 0..20u8 {
                log.append("main", None, hash_bytes(&[i]), RefUpdateReason::Checkpoint, "cp")?;
            }
        }

        let log = RefLog::open(temp_dir.path())?;
        let entries = log.entries()?;
        assert_eq!(entries.len(), 20);
        // append order is preserved
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.new, hash_bytes(&[i as u8]));
        }
        Ok(())
    }

    #[test]
    fn test_order_holds_across_short_lived_handles() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        for i in 0..30u8 {
            let log = RefLog::open(temp_dir.path())?;
            log.append("main", None, hash_bytes(&[i]), RefUpdateReason::Checkpoint, "cp")?;
        }

        let entries = RefLog::open(temp_dir.path())?.entries()?;
        let news: Vec<_> = entries.iter().map(|e| e.new).collect();
        let expected: Vec<_> = (0..30u8).map(|i| hash_bytes(&[i])).collect();
        assert_eq!(news, expected);
        Ok(())
    }

    #[test]
    fn test_verify_integrity_flags_garbage() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let log = RefLog::open(temp_dir.path())?;
        log.append("main", None, hash_bytes(b"x"), RefUpdateReason::Init, "init")?;
        assert!(log.verify_integrity()?.is_healthy());

        log.db.insert(Ulid::new().to_bytes(), b"junk".to_vec())?;
        let report = log.verify_integrity()?;
        assert!(!report.is_healthy());
        assert_eq!(report.valid_entries, 1);
        assert_eq!(report.corrupted_entries.len(), 1);
        Ok(())
    }
}
