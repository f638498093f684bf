//! Crash recovery and consistency verification
//!
//! Detects damage after an unclean shutdown. Only stale temp files are
//! removed; everything else is reported for the caller to act on.

use crate::graph::ancestors;
use crate::reflog::RefLog;
use crate::refs::RefStore;
use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use tl_core::{Blake3Hash, EntryKind, ObjectStore};

#[derive(Debug, Default, Clone)]
pub struct VerifyReport {
    pub refs_checked: usize,
    pub commits_walked: usize,
    /// Distinct trees read, across all commits
    pub trees_checked: usize,
    pub blobs_checked: usize,
    pub temp_files_removed: usize,
    /// Human-readable description of each problem found
    pub problems: Vec<String>,
}

impl VerifyReport {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Verify every ref of `refs` resolves to a complete commit chain whose
/// trees and blobs are all present
pub fn verify_repository(store: &ObjectStore, refs: &RefStore) -> Result<VerifyReport> {
    let mut report = VerifyReport {
        temp_files_removed: cleanup_temp_files(&store.tmp_dir())?,
        ..Default::default()
    };

    let mut seen_trees = HashSet::new();
    let names = refs.list("")?;
    for name in &names {
        report.refs_checked += 1;

        let head = match refs.read(name) {
            Ok(head) => head,
            Err(e) => {
                report.problems.push(format!("ref {}: {}", name, e));
                continue;
            }
        };

        for item in ancestors(store, head) {
            match item {
                Ok((hash, commit)) => {
                    report.commits_walked += 1;
                    let before = report.problems.len();
                    verify_tree(store, commit.tree, "", &mut seen_trees, &mut report);
                    for problem in &mut report.problems[before..] {
                        *problem = format!("commit {}: {}", hash.short(), problem);
                    }
                }
                Err(e) => {
                    report.problems.push(format!("ref {}: {}", name, e));
                    break;
                }
            }
        }
    }

    match refs.read_head() {
        Ok(Some(branch)) if !names.contains(&branch) => {
            report.problems.push(format!("HEAD names missing branch {}", branch));
        }
        Ok(_) => {}
        Err(e) => report.problems.push(format!("HEAD: {}", e)),
    }

    if store.root().join("logs").join("reflog.db").exists() {
        match RefLog::open(store.root()).and_then(|log| log.verify_integrity()) {
            Ok(integrity) if !integrity.is_healthy() => report.problems.push(format!(
                "ref log has {} unreadable entries",
                integrity.corrupted_entries.len() + integrity.db_errors.len()
            )),
            Ok(_) => {}
            // Not fatal: refs alone define state
            Err(e) => tracing::warn!("Could not verify ref log: {}", e),
        }
    }

    if report.is_healthy() {
        tracing::info!(
            "Repository {} verified ({} refs, {} commits)",
            store.root().display(),
            report.refs_checked,
            report.commits_walked
        );
    } else {
        for problem in &report.problems {
            tracing::warn!("Repository {}: {}", store.root().display(), problem);
        }
    }

    Ok(report)
}

/// Check one tree and everything below it; trees already in `seen` are skipped
fn verify_tree(
    store: &ObjectStore,
    hash: Blake3Hash,
    path: &str,
    seen: &mut HashSet<Blake3Hash>,
    report: &mut VerifyReport,
) {
    if !seen.insert(hash) {
        return;
    }

    let tree = match store.read_tree(hash) {
        Ok(tree) => tree,
        Err(e) => {
            report.problems.push(format!("tree {} at /{}: {}", hash.short(), path, e));
            return;
        }
    };
    report.trees_checked += 1;

    for (name, entry) in tree.sorted_entries() {
        let child = if path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", path, name)
        };
        match entry.kind {
            EntryKind::Tree => verify_tree(store, entry.hash, &child, seen, report),
            EntryKind::File | EntryKind::Symlink => {
                report.blobs_checked += 1;
                if !store.has_blob(entry.hash) {
                    report.problems.push(format!("missing blob {} for /{}", entry.hash.short(), child));
                }
            }
        }
    }
}

/// Delete incomplete writes left in `tmp/ingest`
fn cleanup_temp_files(tmp_dir: &Path) -> Result<usize> {
    if !tmp_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(tmp_dir)? {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        tracing::debug!("Recovery: removed incomplete write {}", path.display());
        removed += 1;
    }

    Ok(removed)
}
