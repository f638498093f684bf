//! Put a save under version control

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use timeline::{ManagerConfig, SaveGame};

pub async fn run(config: ManagerConfig, save: SaveGame) -> Result<()> {
    let timeline = util::with_manager(config, move |manager| manager.create_timeline(&save)).await?;

    let root = timeline
        .current_checkpoint
        .map(|id| id.short())
        .unwrap_or_default();
    println!(
        "{} Created timeline {} on branch {} at {}",
        "✓".green(),
        format!("{}/{}", timeline.game, timeline.name).bold(),
        timeline.current_branch.cyan(),
        root.yellow()
    );
    println!("  Worktree: {}", timeline.worktree_path.display().to_string().dimmed());
    Ok(())
}
