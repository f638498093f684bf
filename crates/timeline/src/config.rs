//! Manager configuration
//!
//! Stored as TOML, by default at `~/.config/yacl-tl/config.toml` (Linux),
//! `~/Library/Application Support/yacl-tl/config.toml` (macOS) or
//! `%APPDATA%\yacl-tl\config.toml` (Windows). Every key is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Root holding `<game>/<save>` directories (default: `<data_dir>/yacl/saves`)
    pub root: PathBuf,

    /// Author recorded on commits (default: "YACL")
    pub author: String,

    /// Longest accepted checkpoint message, in characters (default: 500)
    pub max_message_len: usize,

    /// Game types scanned by discovery; empty scans every directory
    pub games: Vec<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("yacl")
                .join("saves"),
            author: "YACL".to_string(),
            max_message_len: 500,
            games: Vec::new(),
        }
    }
}

impl ManagerConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

/// Default location of the config file
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|c| c.join("yacl-tl").join("config.toml"))
}
