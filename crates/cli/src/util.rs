//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use timeline::config::config_path;
use timeline::{Checkpoint, EventSink, ManagerConfig, SaveGame, TimelineEvent, TimelineManager};

/// Parse a `<game>/<save>` argument
pub fn parse_save(arg: &str) -> Result<SaveGame, String> {
    match arg.split_once('/') {
        Some((game, name)) if !game.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(SaveGame::new(game, name))
        }
        _ => Err(format!("expected <game>/<save>, got '{}'", arg)),
    }
}

/// Config file contents with an optional root override
pub fn load_config(root: Option<PathBuf>) -> Result<ManagerConfig> {
    let mut config = match config_path() {
        Some(path) => ManagerConfig::load(&path)?,
        None => ManagerConfig::default(),
    };
    if let Some(root) = root {
        config.root = root;
    }
    Ok(config)
}

/// Logs manager events
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: TimelineEvent) {
        tracing::debug!(timeline = event.timeline(), "{}", event.name());
    }
}

/// Run a blocking manager operation off the async runtime
pub async fn with_manager<T, F>(config: ManagerConfig, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&TimelineManager) -> timeline::Result<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let manager = TimelineManager::new(config, Arc::new(LogSink));
        op(&manager)
    })
    .await
    .context("Timeline operation panicked")?;

    Ok(result?)
}

/// Ask a yes/no question on stdin; anything but "y" is no
pub fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Format timestamp as relative time ("5 minutes ago")
pub fn format_relative_time(ts_ms: u64) -> String {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let datetime = UNIX_EPOCH + Duration::from_millis(ts_ms);

    if let Ok(elapsed) = SystemTime::now().duration_since(datetime) {
        let seconds = elapsed.as_secs();

        if seconds < 60 {
            format!("{} seconds ago", seconds)
        } else if seconds < 3600 {
            format!("{} minutes ago", seconds / 60)
        } else if seconds < 86400 {
            format!("{} hours ago", seconds / 3600)
        } else if seconds < 604800 {
            format!("{} days ago", seconds / 86400)
        } else {
            format!("{} weeks ago", seconds / 604800)
        }
    } else {
        "in the future".to_string()
    }
}

/// One-line checkpoint summary: short id, message, age
pub fn display_checkpoint_compact(cp: &Checkpoint, is_head: bool) {
    let marker = if is_head { "*" } else { " " };
    println!(
        "{} {} {} {}",
        marker.green(),
        cp.id.short().yellow(),
        cp.message,
        format!("({})", format_relative_time(cp.timestamp_ms)).dimmed()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_save() {
        assert_eq!(parse_save("minecraft/world1").unwrap(), SaveGame::new("minecraft", "world1"));
        assert!(parse_save("world1").is_err());
        assert!(parse_save("/world1").is_err());
        assert!(parse_save("minecraft/").is_err());
        assert!(parse_save("a/b/c").is_err());
    }

    #[test]
    fn test_relative_time() {
        let now = chrono::Utc::now().timestamp_millis() as u64;
        assert_eq!(format_relative_time(now), "0 seconds ago");
        assert_eq!(format_relative_time(now - 2 * 3600 * 1000), "2 hours ago");
        assert_eq!(format_relative_time(now + 60_000), "in the future");
    }

    #[test]
    fn test_root_override() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = load_config(Some(dir.path().to_path_buf()))?;
        assert_eq!(config.root, dir.path());
        Ok(())
    }
}
