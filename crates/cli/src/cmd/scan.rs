//! List saves under the root

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use timeline::{ManagerConfig, TimelineStatus};

pub async fn run(config: ManagerConfig) -> Result<()> {
    let root = config.root.clone();
    let saves = util::with_manager(config, |manager| manager.initialize()).await?;

    if saves.is_empty() {
        println!("{}", format!("No saves found under {}", root.display()).dimmed());
        return Ok(());
    }

    println!("{}", "Saves".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for discovered in &saves {
        let status = match discovered.status {
            TimelineStatus::Active => "timeline".green().to_string(),
            _ => "untracked".dimmed().to_string(),
        };
        println!("  {:<40} {}", discovered.save.to_string(), status);
    }

    let untracked = saves.iter().filter(|d| d.status != TimelineStatus::Active).count();
    if untracked > 0 {
        println!();
        println!("{}", format!("{} saves without timelines; add one with: tl create <game>/<save>", untracked).dimmed());
    }

    Ok(())
}
