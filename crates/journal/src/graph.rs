//! Walks over first-parent commit chains

use crate::error::ResolveError;
use anyhow::Result;
use std::collections::HashSet;
use tl_core::{Blake3Hash, Commit, ObjectKind, ObjectStore, StoreError};

/// Minimum length of an abbreviated checkpoint id
pub const MIN_PREFIX_LEN: usize = 4;

/// Iterator over `(hash, commit)` pairs from `head` back to the root
///
/// Yields an error and stops if a commit is missing or the chain loops.
pub struct Ancestors<'a> {
    store: &'a ObjectStore,
    next: Option<Blake3Hash>,
    seen: HashSet<Blake3Hash>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = Result<(Blake3Hash, Commit)>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;

        if !self.seen.insert(hash) {
            return Some(Err(StoreError::CorruptObject {
                kind: ObjectKind::Commit,
                hash,
                reason: "parent chain cycles back to this commit".to_string(),
            }
            .into()));
        }

        match self.store.read_commit(hash) {
            Ok(commit) => {
                self.next = commit.parent;
                Some(Ok((hash, commit)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

pub fn ancestors(store: &ObjectStore, head: Blake3Hash) -> Ancestors<'_> {
    Ancestors {
        store,
        next: Some(head),
        seen: HashSet::new(),
    }
}

/// First-parent history from `head`, newest first
pub fn history(store: &ObjectStore, head: Blake3Hash, limit: Option<usize>) -> Result<Vec<(Blake3Hash, Commit)>> {
    ancestors(store, head)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

/// True if `candidate` is `head` or one of its ancestors
pub fn is_ancestor(store: &ObjectStore, candidate: Blake3Hash, head: Blake3Hash) -> Result<bool> {
    for item in ancestors(store, head) {
        let (hash, _) = item?;
        if hash == candidate {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Resolve a full or abbreviated checkpoint id within the history of `head`
pub fn resolve_in_history(store: &ObjectStore, head: Blake3Hash, id: &str) -> Result<Blake3Hash> {
    let id = id.trim().to_ascii_lowercase();
    if id.len() < MIN_PREFIX_LEN || id.len() > 64 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ResolveError::Malformed(id).into());
    }

    let mut found = None;
    for item in ancestors(store, head) {
        let (hash, _) = item?;
        if hash.to_hex().starts_with(&id) {
            if found.is_some() {
                return Err(ResolveError::Ambiguous(id).into());
            }
            found = Some(hash);
            if id.len() == 64 {
                break;
            }
        }
    }

    found.ok_or_else(|| ResolveError::Unknown(id).into())
}
