//! Branch listing, creation and switching

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use timeline::{ManagerConfig, SaveGame};

/// List branches, or create `(name, checkpoint)` when given
pub async fn run(config: ManagerConfig, save: SaveGame, create: Option<(String, String)>) -> Result<()> {
    if let Some((name, checkpoint)) = create {
        let branch = util::with_manager(config, move |manager| manager.create_branch(&save, &name, &checkpoint)).await?;
        println!(
            "{} Created branch {} at {}",
            "✓".green(),
            branch.name.cyan(),
            branch.head.short().yellow()
        );
        return Ok(());
    }

    let timeline = util::with_manager(config, move |manager| manager.get_timeline(&save)).await?;
    for branch in timeline.branches.values() {
        let current = branch.name == timeline.current_branch;
        let marker = if current { "*" } else { " " };
        let default = if branch.is_default { " (default)" } else { "" };
        let name = if current {
            branch.name.green().bold().to_string()
        } else {
            branch.name.clone()
        };
        println!("{} {} {}{}", marker, name, branch.head.short().yellow(), default.dimmed());
    }
    Ok(())
}

pub async fn switch(config: ManagerConfig, save: SaveGame, branch: String) -> Result<()> {
    let timeline = util::with_manager(config, move |manager| manager.switch_branch(&save, &branch)).await?;

    let head = timeline
        .current_checkpoint
        .map(|id| id.short())
        .unwrap_or_default();
    println!(
        "{} Switched to {} at {}",
        "✓".green(),
        timeline.current_branch.cyan(),
        head.yellow()
    );
    Ok(())
}
