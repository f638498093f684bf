//! Snapshot a directory into trees and blobs
//!
//! The walk never trusts mtimes: a file's blob write is skipped only when its
//! content hash equals the digest the hint tree already records for it.

use crate::error::{is_not_found, FsContext, FsError};
use crate::TEMP_PREFIX;
use anyhow::Result;
use std::path::Path;
use tl_core::hash::hash_file;
use tl_core::{Blake3Hash, Entry, EntryKind, ObjectStore, Tree};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CaptureStats {
    pub files: usize,
    pub symlinks: usize,
    pub dirs: usize,
    /// Files whose content matched the hint
    pub unchanged: usize,
    pub bytes_read: u64,
    /// Entries that vanished or could not be named
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub tree: Blake3Hash,
    pub stats: CaptureStats,
}

/// Capture `source` into `store`, returning the root tree digest
///
/// A missing `source` captures as an empty tree.
pub fn capture(store: &ObjectStore, source: &Path, hint: Option<&Tree>) -> Result<CaptureResult> {
    let mut stats = CaptureStats::default();

    let tree = match capture_dir(store, source, hint, &mut stats)? {
        Some(hash) => hash,
        None => {
            tracing::debug!("Capture source {} is absent, recording an empty tree", source.display());
            store.write_tree(&Tree::new())?
        }
    };

    tracing::debug!(
        "Captured {}: {} files, {} unchanged, {} bytes read",
        source.display(),
        stats.files,
        stats.unchanged,
        stats.bytes_read
    );

    Ok(CaptureResult { tree, stats })
}

/// Returns `None` when the directory disappeared before it could be listed
fn capture_dir(
    store: &ObjectStore,
    dir: &Path,
    hint: Option<&Tree>,
    stats: &mut CaptureStats,
) -> Result<Option<Blake3Hash>> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(FsError::new("list", dir, e).into()),
    };

    let mut tree = Tree::new();

    for dir_entry in read_dir {
        let dir_entry = dir_entry.fs_op("list", dir)?;
        let path = dir_entry.path();

        let name = match dir_entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                tracing::warn!("Skipping non UTF-8 name {:?} in {}", raw, dir.display());
                stats.skipped += 1;
                continue;
            }
        };
        if name.starts_with(TEMP_PREFIX) {
            continue;
        }

        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                vanished(&path, stats);
                continue;
            }
            Err(e) => return Err(FsError::new("stat", &path, e).into()),
        };
        let hinted = hint.and_then(|h| h.get(&name)).copied();

        let entry = if metadata.file_type().is_symlink() {
            match capture_symlink(store, &path)? {
                Some(entry) => {
                    stats.symlinks += 1;
                    entry
                }
                None => {
                    vanished(&path, stats);
                    continue;
                }
            }
        } else if metadata.is_dir() {
            let sub_hint = hinted
                .filter(|e| e.kind == EntryKind::Tree)
                .and_then(|e| match store.read_tree(e.hash) {
                    Ok(tree) => Some(tree),
                    Err(err) => {
                        tracing::warn!("Ignoring unreadable hint tree {}: {}", e.hash.short(), err);
                        None
                    }
                });
            match capture_dir(store, &path, sub_hint.as_ref(), stats)? {
                Some(hash) => Entry::tree(hash),
                None => {
                    vanished(&path, stats);
                    continue;
                }
            }
        } else if metadata.is_file() {
            match capture_file(store, &path, &metadata, hinted, stats)? {
                Some(entry) => {
                    stats.files += 1;
                    entry
                }
                None => {
                    vanished(&path, stats);
                    continue;
                }
            }
        } else {
            tracing::debug!("Skipping special file {}", path.display());
            stats.skipped += 1;
            continue;
        };

        tree.insert(&name, entry)?;
    }

    stats.dirs += 1;
    Ok(Some(store.write_tree(&tree)?))
}

fn vanished(path: &Path, stats: &mut CaptureStats) {
    tracing::debug!("{} vanished during capture", path.display());
    stats.skipped += 1;
}

fn capture_file(
    store: &ObjectStore,
    path: &Path,
    metadata: &std::fs::Metadata,
    hinted: Option<Entry>,
    stats: &mut CaptureStats,
) -> Result<Option<Entry>> {
    let mode = file_mode(metadata);

    if let Some(hinted) = hinted.filter(|e| e.kind == EntryKind::File) {
        let current = match hash_file(path) {
            Ok(hash) => hash,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e.context(format!("Failed to hash {}", path.display()))),
        };
        if current == hinted.hash && store.has_blob(current) {
            stats.unchanged += 1;
            return Ok(Some(Entry::file(mode, current)));
        }
    }

    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(FsError::new("read", path, e).into()),
    };
    stats.bytes_read += data.len() as u64;

    let hash = store.write_blob(&data)?;
    Ok(Some(Entry::file(mode, hash)))
}

fn capture_symlink(store: &ObjectStore, path: &Path) -> Result<Option<Entry>> {
    let target = match std::fs::read_link(path) {
        Ok(target) => target,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(FsError::new("read link", path, e).into()),
    };

    #[cfg(unix)]
    let hash = {
        use std::os::unix::ffi::OsStrExt;
        store.write_blob(target.as_os_str().as_bytes())?
    };
    #[cfg(not(unix))]
    let hash = store.write_blob(target.to_string_lossy().as_bytes())?;

    Ok(Some(Entry::symlink(hash)))
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup() -> (tempfile::TempDir, ObjectStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::init(&temp_dir.path().join("save.git")).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_capture_nested_directories() -> Result<()> {
        let (dir, store) = setup();
        let source = dir.path().join("world1");
        fs::create_dir_all(source.join("region"))?;
        fs::create_dir_all(source.join("empty"))?;
        fs::write(source.join("level.dat"), b"level")?;
        fs::write(source.join("region/r.0.0.mca"), b"chunk")?;

        let result = capture(&store, &source, None)?;
        let root = store.read_tree(result.tree)?;
        assert_eq!(root.len(), 3);
        assert_eq!(root.get("level.dat").unwrap().kind, EntryKind::File);

        let empty = root.get("empty").unwrap();
        assert_eq!(empty.kind, EntryKind::Tree);
        assert!(store.read_tree(empty.hash)?.is_empty());

        let region = store.read_tree(root.get("region").unwrap().hash)?;
        assert_eq!(store.read_blob(region.get("r.0.0.mca").unwrap().hash)?, b"chunk");

        assert_eq!(result.stats.files, 2);
        assert_eq!(result.stats.dirs, 3);
        Ok(())
    }

    #[test]
    fn test_capture_missing_source_is_empty_tree() -> Result<()> {
        let (dir, store) = setup();
        let result = capture(&store, &dir.path().join("nope"), None)?;
        assert_eq!(result.tree, Tree::new().hash());
        Ok(())
    }

    #[test]
    fn test_capture_is_order_independent() -> Result<()> {
        let (dir, store) = setup();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::create_dir_all(&a)?;
        fs::create_dir_all(&b)?;

        for name in ["one", "two", "three"] {
            fs::write(a.join(name), name)?;
        }
        for name in ["three", "one", "two"] {
            fs::write(b.join(name), name)?;
        }

        assert_eq!(capture(&store, &a, None)?.tree, capture(&store, &b, None)?.tree);
        Ok(())
    }

    #[test]
    fn test_hint_skips_unchanged_blobs() -> Result<()> {
        let (dir, store) = setup();
        let source = dir.path().join("save");
        fs::create_dir_all(source.join("sub"))?;
        fs::write(source.join("big.dat"), vec![7u8; 64 * 1024])?;
        fs::write(source.join("sub/small.dat"), b"small")?;

        let first = capture(&store, &source, None)?;
        let hint = store.read_tree(first.tree)?;

        fs::write(source.join("sub/small.dat"), b"changed")?;
        let second = capture(&store, &source, Some(&hint))?;

        assert_eq!(second.stats.unchanged, 1);
        assert_eq!(second.stats.bytes_read, b"changed".len() as u64);
        assert_ne!(first.tree, second.tree);
        Ok(())
    }

    #[test]
    fn test_hint_with_large_file_truncated_by_game() -> Result<()> {
        let (dir, store) = setup();
        let source = dir.path().join("world1");
        fs::create_dir_all(&source)?;
        fs::write(source.join("region.mca"), vec![7u8; 5 * 1024 * 1024])?;

        let first = capture(&store, &source, None)?;
        let hint = store.read_tree(first.tree)?;

        fs::OpenOptions::new()
            .write(true)
            .open(source.join("region.mca"))?
            .set_len(0)?;
        let second = capture(&store, &source, Some(&hint))?;

        let tree = store.read_tree(second.tree)?;
        assert_eq!(tree.get("region.mca").unwrap().hash, tl_core::hash::hash_bytes(b""));
        assert_eq!(second.stats.unchanged, 0);
        Ok(())
    }

    #[test]
    fn test_capture_ignores_checkout_temp_files() -> Result<()> {
        let (dir, store) = setup();
        let source = dir.path().join("save");
        fs::create_dir_all(&source)?;
        fs::write(source.join("keep"), b"k")?;
        fs::write(source.join(format!("{}leftover", TEMP_PREFIX)), b"t")?;

        let root = store.read_tree(capture(&store, &source, None)?.tree)?;
        assert_eq!(root.len(), 1);
        assert!(root.get("keep").is_some());
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_capture_symlink_records_target() -> Result<()> {
        let (dir, store) = setup();
        let source = dir.path().join("save");
        fs::create_dir_all(&source)?;
        std::os::unix::fs::symlink("does/not/exist", source.join("dangling"))?;

        let root = store.read_tree(capture(&store, &source, None)?.tree)?;
        let entry = root.get("dangling").unwrap();
        assert_eq!(entry.kind, EntryKind::Symlink);
        assert_eq!(store.read_blob(entry.hash)?, b"does/not/exist");
        Ok(())
    }
}
