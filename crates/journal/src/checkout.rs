//! Materialize a tree onto a directory
//!
//! Within each directory, entries present in the tree are written first and
//! entries absent from it are deleted last. Every file lands through a temp
//! file in its own directory followed by a rename, so readers never observe a
//! half-written file.

use crate::error::{is_not_found, FsContext, FsError};
use crate::TEMP_PREFIX;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tl_core::hash::hash_file;
use tl_core::{Blake3Hash, EntryKind, ObjectStore, Tree};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckoutStats {
    pub files_written: usize,
    pub files_unchanged: usize,
    pub symlinks_written: usize,
    pub dirs_created: usize,
    pub removed: usize,
}

/// Make `target` match the tree `tree_hash` exactly
///
/// Every tree and blob is checked to be present before the first byte on
/// disk changes. A missing `target` is created.
pub fn checkout(store: &ObjectStore, tree_hash: Blake3Hash, target: &Path) -> Result<CheckoutStats> {
    let root = store.read_tree(tree_hash)?;
    preflight(store, &root)?;

    let mut stats = CheckoutStats::default();
    apply_dir(store, &root, target, &mut stats)?;

    tracing::debug!(
        "Checked out {} to {}: {} written, {} unchanged, {} removed",
        tree_hash.short(),
        target.display(),
        stats.files_written,
        stats.files_unchanged,
        stats.removed
    );
    Ok(stats)
}

fn preflight(store: &ObjectStore, tree: &Tree) -> Result<()> {
    for (_, entry) in tree.sorted_entries() {
        match entry.kind {
            EntryKind::Tree => preflight(store, &store.read_tree(entry.hash)?)?,
            _ => {
                if !store.has_blob(entry.hash) {
                    return Err(tl_core::StoreError::ObjectNotFound {
                        kind: tl_core::ObjectKind::Blob,
                        hash: entry.hash,
                    }
                    .into());
                }
            }
        }
    }
    Ok(())
}

fn apply_dir(store: &ObjectStore, tree: &Tree, dir: &Path, stats: &mut CheckoutStats) -> Result<()> {
    ensure_dir(dir, stats)?;

    // Writes
    for (name, entry) in tree.sorted_entries() {
        let path = dir.join(name);
        let existing = existing_metadata(&path)?;

        match entry.kind {
            EntryKind::File => {
                if let Some(meta) = &existing {
                    if meta.is_file() && file_matches(&path, meta, entry.hash, entry.mode)? {
                        stats.files_unchanged += 1;
                        continue;
                    }
                    if meta.is_dir() {
                        remove_path(&path, meta)?;
                    }
                }
                write_file(dir, &path, &store.read_blob(entry.hash)?, entry.mode)?;
                stats.files_written += 1;
            }
            EntryKind::Symlink => {
                let link_target = store.read_blob(entry.hash)?;
                if let Some(meta) = &existing {
                    if meta.file_type().is_symlink() && link_matches(&path, &link_target) {
                        continue;
                    }
                    remove_path(&path, meta)?;
                }
                write_symlink(dir, &path, &link_target)?;
                stats.symlinks_written += 1;
            }
            EntryKind::Tree => {
                if let Some(meta) = &existing {
                    if !meta.is_dir() {
                        remove_path(&path, meta)?;
                    }
                }
                apply_dir(store, &store.read_tree(entry.hash)?, &path, stats)?;
            }
        }
    }

    // Deletions
    for dir_entry in fs::read_dir(dir).fs_op("list", dir)? {
        let dir_entry = dir_entry.fs_op("list", dir)?;
        let keep = dir_entry
            .file_name()
            .to_str()
            .map(|name| !name.starts_with(TEMP_PREFIX) && tree.get(name).is_some())
            .unwrap_or(false);
        if keep {
            continue;
        }

        let path = dir_entry.path();
        if let Some(meta) = existing_metadata(&path)? {
            remove_path(&path, &meta)?;
            stats.removed += 1;
        }
    }

    Ok(())
}

fn ensure_dir(dir: &Path, stats: &mut CheckoutStats) -> Result<()> {
    match existing_metadata(dir)? {
        Some(meta) if meta.is_dir() => Ok(()),
        Some(meta) => {
            remove_path(dir, &meta)?;
            fs::create_dir(dir).fs_op("create directory", dir)?;
            stats.dirs_created += 1;
            Ok(())
        }
        None => {
            fs::create_dir_all(dir).fs_op("create directory", dir)?;
            stats.dirs_created += 1;
            Ok(())
        }
    }
}

fn existing_metadata(path: &Path) -> Result<Option<fs::Metadata>, FsError> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FsError::new("stat", path, e)),
    }
}

fn remove_path(path: &Path, meta: &fs::Metadata) -> Result<(), FsError> {
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(FsError::new("remove", path, e)),
        _ => Ok(()),
    }
}

fn file_matches(path: &Path, meta: &fs::Metadata, hash: Blake3Hash, mode: u32) -> Result<bool> {
    if !mode_matches(meta, mode) {
        return Ok(false);
    }
    match hash_file(path) {
        Ok(current) => Ok(current == hash),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e.context(format!("Failed to hash {}", path.display()))),
    }
}

#[cfg(unix)]
fn mode_matches(meta: &fs::Metadata, mode: u32) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777 == mode & 0o7777
}

#[cfg(not(unix))]
fn mode_matches(_meta: &fs::Metadata, _mode: u32) -> bool {
    true
}

fn temp_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()))
}

fn write_file(dir: &Path, path: &Path, data: &[u8], mode: u32) -> Result<(), FsError> {
    use std::io::Write;

    let temp = temp_path(dir);
    let written = (|| {
        let mut file = fs::File::create(&temp)?;
        file.write_all(data)?;
        set_mode(&file, mode)?;
        file.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(FsError::new("write", path, e));
    }

    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(FsError::new("replace", path, e));
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(file: &fs::File, mode: u32) -> std::io::Result<()> {
    let mut permissions = file.metadata()?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    file.set_permissions(permissions)
}

#[cfg(unix)]
fn link_matches(path: &Path, target: &[u8]) -> bool {
    use std::os::unix::ffi::OsStrExt;
    fs::read_link(path)
        .map(|current| current.as_os_str().as_bytes() == target)
        .unwrap_or(false)
}

#[cfg(unix)]
fn write_symlink(dir: &Path, path: &Path, target: &[u8]) -> Result<(), FsError> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let temp = temp_path(dir);
    std::os::unix::fs::symlink(OsStr::from_bytes(target), &temp).fs_op("create symlink", path)?;
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(FsError::new("replace", path, e));
    }
    Ok(())
}

// Without symlink support the link target is written out as a regular file
#[cfg(not(unix))]
fn link_matches(path: &Path, target: &[u8]) -> bool {
    fs::read(path).map(|current| current == target).unwrap_or(false)
}

#[cfg(not(unix))]
fn write_symlink(dir: &Path, path: &Path, target: &[u8]) -> Result<(), FsError> {
    write_file(dir, path, target, 0o644)
}
