//! Record a checkpoint of the live save

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use timeline::{ManagerConfig, SaveGame};

pub async fn run(config: ManagerConfig, save: SaveGame, message: String) -> Result<()> {
    let cp = util::with_manager(config, move |manager| manager.create_checkpoint(&save, &message)).await?;

    println!("{} Checkpoint {} {}", "✓".green(), cp.id.short().yellow(), cp.message);
    Ok(())
}
