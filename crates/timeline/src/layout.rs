//! Where live saves, repositories and worktrees live on disk
//!
//! ```text
//! <root>/<game>/<save>/                                   live directory
//! <root>/.yacl_timelines/<game>/repositories/<save>.git/  repository
//! <root>/.yacl_timelines/<game>/worktrees/<save>/         engine worktree
//! ```

use crate::model::SaveGame;
use std::path::{Path, PathBuf};

/// Directory under the root holding all engine state
pub const TIMELINES_DIR: &str = ".yacl_timelines";

#[derive(Debug, Clone)]
pub struct TimelineLayout {
    root: PathBuf,
}

impl TimelineLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn game_dir(&self, game: &str) -> PathBuf {
        self.root.join(game)
    }

    pub fn save_dir(&self, save: &SaveGame) -> PathBuf {
        self.game_dir(&save.game).join(&save.name)
    }

    pub fn timelines_dir(&self, game: &str) -> PathBuf {
        self.root.join(TIMELINES_DIR).join(game)
    }

    pub fn repository_dir(&self, save: &SaveGame) -> PathBuf {
        self.timelines_dir(&save.game)
            .join("repositories")
            .join(format!("{}.git", save.name))
    }

    pub fn worktree_dir(&self, save: &SaveGame) -> PathBuf {
        self.timelines_dir(&save.game).join("worktrees").join(&save.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = TimelineLayout::new("/saves");
        let save = SaveGame::new("minecraft", "world1");

        assert_eq!(layout.save_dir(&save), PathBuf::from("/saves/minecraft/world1"));
        assert_eq!(
            layout.repository_dir(&save),
            PathBuf::from("/saves/.yacl_timelines/minecraft/repositories/world1.git")
        );
        assert_eq!(
            layout.worktree_dir(&save),
            PathBuf::from("/saves/.yacl_timelines/minecraft/worktrees/world1")
        );
    }
}
