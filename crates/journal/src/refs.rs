//! File-backed branch pointers
//!
//! Each branch is one file under `refs/heads/<namespace>/` holding the hex
//! digest of its head commit. `HEAD` names the current branch.

use crate::error::RefError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tl_core::store::atomic_write;
use tl_core::Blake3Hash;

const HEAD_PREFIX: &str = "ref: ";

pub struct RefStore {
    repo: PathBuf,
    namespace: String,
}

impl RefStore {
    /// Ref store for `namespace` inside the repository at `repo`
    pub fn new(repo: &Path, namespace: &str) -> Self {
        Self {
            repo: repo.to_path_buf(),
            namespace: namespace.to_string(),
        }
    }

    fn heads_dir(&self) -> PathBuf {
        self.repo.join("refs").join("heads").join(&self.namespace)
    }

    fn tmp_dir(&self) -> PathBuf {
        self.repo.join("tmp").join("ingest")
    }

    fn ref_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
            anyhow::bail!("Invalid ref name: {:?}", name);
        }
        Ok(self.heads_dir().join(name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.ref_path(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Create a new ref; fails with `RefError::AlreadyExists` without touching
    /// the existing one
    pub fn create(&self, name: &str, target: Blake3Hash) -> Result<()> {
        use std::fs;
        use std::io::Write;

        let path = self.ref_path(name)?;
        fs::create_dir_all(self.heads_dir())?;
        fs::create_dir_all(self.tmp_dir())?;

        // Fully written temp file, then a hard link: the link either appears
        // with complete content or fails because the name is taken
        let temp_path = self.tmp_dir().join(format!("ref-{}", uuid::Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path)?;
            writeln!(file, "{}", target.to_hex())?;
            file.sync_all()?;
        }

        let linked = fs::hard_link(&temp_path, &path);
        let _ = fs::remove_file(&temp_path);

        match linked {
            Ok(()) => {
                tracing::debug!("Created ref {}/{} at {}", self.namespace, name, target.short());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(RefError::AlreadyExists(name.to_string()).into())
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to create ref {}", name))),
        }
    }

    /// Move an existing ref
    pub fn update(&self, name: &str, target: Blake3Hash) -> Result<()> {
        let path = self.ref_path(name)?;
        if !path.is_file() {
            return Err(RefError::NotFound(name.to_string()).into());
        }

        atomic_write(&self.tmp_dir(), &path, format!("{}\n", target.to_hex()).as_bytes())
            .with_context(|| format!("Failed to update ref {}", name))?;
        tracing::debug!("Updated ref {}/{} to {}", self.namespace, name, target.short());
        Ok(())
    }

    pub fn read(&self, name: &str) -> Result<Blake3Hash> {
        let path = self.ref_path(name)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RefError::NotFound(name.to_string()).into());
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("Failed to read ref {}", name))),
        };

        content.trim().parse::<Blake3Hash>().map_err(|e| {
            anyhow::Error::from(RefError::Corrupt {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
    }

    /// Names of refs starting with `prefix`, sorted
    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.heads_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') && name.starts_with(prefix) {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.ref_path(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RefError::NotFound(name.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Current branch recorded in `HEAD`, if any
    pub fn read_head(&self) -> Result<Option<String>> {
        let path = self.repo.join("HEAD");
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        match content.strip_prefix(HEAD_PREFIX) {
            Some(branch) if !branch.trim().is_empty() => Ok(Some(branch.trim().to_string())),
            _ => Err(RefError::Corrupt {
                name: "HEAD".to_string(),
                reason: format!("unexpected content {:?}", content),
            }
            .into()),
        }
    }

    pub fn write_head(&self, branch: &str) -> Result<()> {
        self.ref_path(branch)?;
        atomic_write(
            &self.tmp_dir(),
            &self.repo.join("HEAD"),
            format!("{}{}\n", HEAD_PREFIX, branch).as_bytes(),
        )
        .context("Failed to write HEAD")
    }
}
