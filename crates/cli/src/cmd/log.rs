//! Checkpoint history and ref log

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use timeline::{ManagerConfig, SaveGame};

pub async fn run(config: ManagerConfig, save: SaveGame, branch: Option<String>, limit: Option<usize>) -> Result<()> {
    let (timeline, checkpoints) = util::with_manager(config, move |manager| {
        let timeline = manager.get_timeline(&save)?;
        let checkpoints = manager.list_checkpoints(&save, branch.as_deref())?;
        Ok((timeline, checkpoints))
    })
    .await?;

    let limit = limit.unwrap_or(20);
    for cp in checkpoints.iter().take(limit) {
        util::display_checkpoint_compact(cp, timeline.current_checkpoint == Some(cp.id));
    }
    if checkpoints.len() > limit {
        println!("{}", format!("... and {} older checkpoints", checkpoints.len() - limit).dimmed());
    }
    Ok(())
}

pub async fn reflog(config: ManagerConfig, save: SaveGame, branch: Option<String>) -> Result<()> {
    let entries = util::with_manager(config, move |manager| manager.ref_log(&save, branch.as_deref())).await?;

    if entries.is_empty() {
        println!("{}", "No ref log entries".dimmed());
        return Ok(());
    }

    for entry in entries.iter().rev() {
        let old = entry.old.map(|h| h.short()).unwrap_or_else(|| "-".repeat(8));
        let at = chrono::DateTime::from_timestamp_millis(entry.timestamp_ms as i64)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{} {} {} -> {} {}: {}",
            at.dimmed(),
            entry.ref_name.cyan(),
            old,
            entry.new.short().yellow(),
            entry.reason,
            entry.message
        );
    }
    Ok(())
}
