//! Timeline state and recovery

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use timeline::{ManagerConfig, SaveGame, Timeline, TimelineStatus};

pub async fn run(config: ManagerConfig, save: SaveGame) -> Result<()> {
    let timeline = util::with_manager(config, move |manager| manager.get_timeline(&save)).await?;
    print_timeline(&timeline);
    Ok(())
}

/// Reload a timeline stuck in the error state
pub async fn reinit(config: ManagerConfig, save: SaveGame) -> Result<()> {
    let timeline = util::with_manager(config, move |manager| manager.reinitialize(&save)).await?;
    println!("{} Timeline verified and reloaded", "✓".green());
    println!();
    print_timeline(&timeline);
    Ok(())
}

fn print_timeline(timeline: &Timeline) {
    let status = match timeline.status {
        TimelineStatus::Active => timeline.status.to_string().green().to_string(),
        TimelineStatus::Error => timeline.status.to_string().red().bold().to_string(),
        _ => timeline.status.to_string().yellow().to_string(),
    };

    println!("{}", format!("{}/{}", timeline.game, timeline.name).bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Status:     {}", status);
    println!("Branch:     {}", timeline.current_branch.cyan());
    if let Some(head) = timeline.current_checkpoint {
        println!("Checkpoint: {}", head.short().yellow());
    }
    println!("Branches:   {}", timeline.branches.len());
    println!("Save:       {}", timeline.source_path.display());
    println!("Worktree:   {}", timeline.worktree_path.display().to_string().dimmed());
    println!("Repository: {}", timeline.repository_path.display().to_string().dimmed());

    if let Some(err) = &timeline.last_error {
        println!();
        println!("{} {}", "Last error:".red().bold(), err);
        println!("{}", "Run 'tl reinit <game>/<save>' to recover".dimmed());
    }
}
