//! Delete a timeline

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use timeline::{ManagerConfig, SaveGame};

pub async fn run(config: ManagerConfig, save: SaveGame, yes: bool) -> Result<()> {
    if !yes {
        println!(
            "{}",
            format!("This deletes every checkpoint and branch of {}. The live save is kept.", save)
                .red()
                .bold()
        );
        if !util::confirm("Continue?")? {
            println!("{}", "Delete cancelled".yellow());
            return Ok(());
        }
    }

    let name = save.to_string();
    util::with_manager(config, move |manager| manager.delete_timeline(&save)).await?;

    println!("{} Deleted timeline {}", "✓".green(), name.bold());
    Ok(())
}
