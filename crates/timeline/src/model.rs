//! Plain data passed in and out of the manager

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tl_core::{Blake3Hash, Commit};

/// A save directory of one game: `<root>/<game>/<name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SaveGame {
    pub game: String,
    pub name: String,
}

impl SaveGame {
    pub fn new(game: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            game: game.into(),
            name: name.into(),
        }
    }

    /// `<save-name>-main`
    pub fn default_branch(&self) -> String {
        format!("{}-main", self.name)
    }

    pub(crate) fn key(&self) -> String {
        format!("{}/{}", self.game, self.name)
    }
}

impl std::fmt::Display for SaveGame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.game, self.name)
    }
}

/// User-facing view of a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Blake3Hash,
    pub parent: Option<Blake3Hash>,
    pub tree: Blake3Hash,
    pub message: String,
    pub author: String,
    /// Unix milliseconds
    pub timestamp_ms: u64,
}

impl Checkpoint {
    pub fn from_commit(id: Blake3Hash, commit: &Commit) -> Self {
        Self {
            id,
            parent: commit.parent,
            tree: commit.tree,
            message: commit.message.clone(),
            author: commit.author.clone(),
            timestamp_ms: commit.timestamp_ms,
        }
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.timestamp_ms as i64).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineBranch {
    pub name: String,
    pub head: Blake3Hash,
    pub is_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelineStatus {
    Initializing,
    Active,
    /// Repository and worktree may disagree; only `reinitialize` recovers
    Error,
    /// Save directory without a timeline (discovery only)
    Inactive,
}

impl std::fmt::Display for TimelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimelineStatus::Initializing => "initializing",
            TimelineStatus::Active => "active",
            TimelineStatus::Error => "error",
            TimelineStatus::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

/// Snapshot of one timeline's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub name: String,
    pub game: String,
    /// Live directory the game writes to
    pub source_path: PathBuf,
    /// Engine-owned checkout of the current head
    pub worktree_path: PathBuf,
    pub repository_path: PathBuf,
    pub branches: BTreeMap<String, TimelineBranch>,
    pub current_branch: String,
    pub current_checkpoint: Option<Blake3Hash>,
    pub status: TimelineStatus,
    /// Cause of the last transition to `Error`
    pub last_error: Option<String>,
}

impl Timeline {
    pub fn branch(&self, name: &str) -> Option<&TimelineBranch> {
        self.branches.get(name)
    }

    pub fn save(&self) -> SaveGame {
        SaveGame::new(self.game.clone(), self.name.clone())
    }
}

/// Result of scanning the saves root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredSave {
    pub save: SaveGame,
    pub path: PathBuf,
    /// `Active` when a valid repository and worktree exist, else `Inactive`
    pub status: TimelineStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_branch_name() {
        assert_eq!(SaveGame::new("minecraft", "world1").default_branch(), "world1-main");
    }

    #[test]
    fn test_checkpoint_from_commit() {
        let tree = tl_core::hash::hash_bytes(b"tree");
        let commit = Commit::new(tree, None, "Timeline created", "YACL");
        let id = commit.hash().unwrap();

        let checkpoint = Checkpoint::from_commit(id, &commit);
        assert_eq!(checkpoint.id, id);
        assert_eq!(checkpoint.tree, tree);
        assert_eq!(checkpoint.parent, None);
        assert!(checkpoint.created_at().timestamp() > 0);
    }
}
