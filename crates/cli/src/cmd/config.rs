//! Show or write the effective configuration

use anyhow::{Context, Result};
use timeline::config::config_path;
use timeline::ManagerConfig;

pub fn run(config: ManagerConfig, write: bool) -> Result<()> {
    let path = config_path().context("No config directory on this platform")?;

    if write {
        config.save(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
    Ok(())
}
