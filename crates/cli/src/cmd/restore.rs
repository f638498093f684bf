//! Restore a save to an earlier checkpoint

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use timeline::{ManagerConfig, SaveGame};

pub async fn run(config: ManagerConfig, save: SaveGame, checkpoint: String, yes: bool) -> Result<()> {
    if !yes {
        println!("{}", "Restore Checkpoint".bold());
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("Save:       {}", save);
        println!("Checkpoint: {}", checkpoint.yellow());
        println!();
        println!(
            "{}",
            "Warning: this overwrites the live save and drops later checkpoints from the branch!"
                .red()
                .bold()
        );
        println!();

        if !util::confirm("Continue?")? {
            println!("{}", "Restore cancelled".yellow());
            return Ok(());
        }
    }

    let cp = util::with_manager(config, move |manager| manager.restore_checkpoint(&save, &checkpoint)).await?;

    println!(
        "{} Restored to {} {} {}",
        "✓".green(),
        cp.id.short().yellow(),
        cp.message,
        format!("({})", util::format_relative_time(cp.timestamp_ms)).dimmed()
    );
    Ok(())
}
