//! On-disk repository holding blobs, trees and commits

use crate::blob::BlobStore;
use crate::commit::Commit;
use crate::error::{ObjectKind, StoreError};
use crate::hash::Blake3Hash;
use crate::tree::Tree;
use anyhow::{Context, Result};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Repository format written to `config.toml`
pub const FORMAT_VERSION: i64 = 1;

const REQUIRED_DIRS: [&str; 7] = [
    "objects/blobs",
    "objects/trees",
    "objects/commits",
    "refs/heads",
    "logs",
    "locks",
    "tmp/ingest",
];

/// Content-addressed object store for one timeline repository
///
/// Manages the `<save>.git/` directory structure:
/// ```text
/// <save>.git/
///   config.toml
///   HEAD
///   objects/
///     blobs/<hh>/<rest>
///     trees/<hh>/<rest>
///     commits/<hh>/<rest>
///   refs/
///     heads/<namespace>/<branch>
///   logs/
///     reflog.db
///   locks/
///   tmp/
///     ingest/
/// ```
pub struct ObjectStore {
    root: PathBuf,
    blob_store: BlobStore,
    tree_cache: DashMap<Blake3Hash, Arc<Tree>>,
    commit_cache: DashMap<Blake3Hash, Arc<Commit>>,
    /// Maximum entries per cache
    cache_limit: usize,
}

/// Default entry limit of the tree and commit caches
pub const DEFAULT_CACHE_LIMIT: usize = 4096;

impl ObjectStore {
    /// Create a new repository at `repo_dir`
    pub fn init(repo_dir: &Path) -> Result<Self> {
        use std::fs;

        if let Some(parent) = repo_dir.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // create_dir (not _all) so concurrent initializers cannot both win
        match fs::create_dir(repo_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::RepositoryExists(repo_dir.to_path_buf()).into());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!("Failed to create {}", repo_dir.display())));
            }
        }

        for dir in &REQUIRED_DIRS {
            fs::create_dir_all(repo_dir.join(dir))
                .with_context(|| format!("Failed to create {}", repo_dir.join(dir).display()))?;
        }

        let config_content = format!(
            r#"# Save timeline repository
[store]
version = {}
blob_compression_threshold = 4096  # 4KB
"#,
            FORMAT_VERSION
        );
        fs::write(repo_dir.join("config.toml"), config_content)?;
        fs::write(repo_dir.join("HEAD"), "")?;

        tracing::debug!("Initialized repository at {}", repo_dir.display());
        Ok(Self::with_root(repo_dir))
    }

    /// Open an existing repository, validating its structure
    pub fn open(repo_dir: &Path) -> Result<Self> {
        check_structure(repo_dir).map_err(|reason| StoreError::NotARepository {
            path: repo_dir.to_path_buf(),
            reason,
        })?;
        Ok(Self::with_root(repo_dir))
    }

    /// Non-failing structural check used by discovery
    pub fn is_repository(repo_dir: &Path) -> bool {
        check_structure(repo_dir).is_ok()
    }

    fn with_root(repo_dir: &Path) -> Self {
        Self {
            root: repo_dir.to_path_buf(),
            blob_store: BlobStore::new(repo_dir.to_path_buf()),
            tree_cache: DashMap::new(),
            commit_cache: DashMap::new(),
            cache_limit: DEFAULT_CACHE_LIMIT,
        }
    }

    pub fn write_blob(&self, data: &[u8]) -> Result<Blake3Hash> {
        self.blob_store.write_blob(data)
    }

    pub fn read_blob(&self, hash: Blake3Hash) -> Result<Vec<u8>> {
        self.blob_store.read_blob(hash)
    }

    pub fn has_blob(&self, hash: Blake3Hash) -> bool {
        self.blob_store.has_blob(hash)
    }

    /// Write a tree; idempotent
    pub fn write_tree(&self, tree: &Tree) -> Result<Blake3Hash> {
        let hash = tree.hash();
        let tree_path = object_path(&self.root, ObjectKind::Tree, hash);

        if !tree_path.exists() {
            atomic_write(&self.tmp_dir(), &tree_path, &tree.serialize())?;
        }
        cache_insert(&self.tree_cache, self.cache_limit, hash, tree.clone());

        Ok(hash)
    }

    pub fn read_tree(&self, hash: Blake3Hash) -> Result<Tree> {
        if let Some(cached) = self.tree_cache.get(&hash) {
            return Ok((**cached).clone());
        }

        let serialized = self.read_object(ObjectKind::Tree, hash)?;
        let tree = Tree::deserialize(&serialized).map_err(|e| corrupt(ObjectKind::Tree, hash, e))?;

        let computed = tree.hash();
        if computed != hash {
            return Err(StoreError::CorruptObject {
                kind: ObjectKind::Tree,
                hash,
                reason: format!("content hashes to {}", computed),
            }
            .into());
        }

        cache_insert(&self.tree_cache, self.cache_limit, hash, tree.clone());
        Ok(tree)
    }

    /// Write a commit; idempotent
    pub fn write_commit(&self, commit: &Commit) -> Result<Blake3Hash> {
        let serialized = commit.serialize()?;
        let hash = crate::hash::hash_bytes(&serialized);
        let commit_path = object_path(&self.root, ObjectKind::Commit, hash);

        if !commit_path.exists() {
            atomic_write(&self.tmp_dir(), &commit_path, &serialized)?;
        }
        cache_insert(&self.commit_cache, self.cache_limit, hash, commit.clone());

        Ok(hash)
    }

    pub fn read_commit(&self, hash: Blake3Hash) -> Result<Commit> {
        if let Some(cached) = self.commit_cache.get(&hash) {
            return Ok((**cached).clone());
        }

        let serialized = self.read_object(ObjectKind::Commit, hash)?;
        let computed = crate::hash::hash_bytes(&serialized);
        if computed != hash {
            return Err(StoreError::CorruptObject {
                kind: ObjectKind::Commit,
                hash,
                reason: format!("content hashes to {}", computed),
            }
            .into());
        }
        let commit = Commit::deserialize(&serialized).map_err(|e| corrupt(ObjectKind::Commit, hash, e))?;

        cache_insert(&self.commit_cache, self.cache_limit, hash, commit.clone());
        Ok(commit)
    }

    pub fn has_commit(&self, hash: Blake3Hash) -> bool {
        object_path(&self.root, ObjectKind::Commit, hash).exists()
    }

    /// Number of stored objects of one kind
    pub fn object_count(&self, kind: ObjectKind) -> Result<usize> {
        let dir = self.root.join("objects").join(kind.dir_name());
        let mut count = 0;
        for prefix in std::fs::read_dir(&dir)? {
            let prefix = prefix?;
            if prefix.file_type()?.is_dir() {
                count += std::fs::read_dir(prefix.path())?.count();
            }
        }
        Ok(count)
    }

    fn read_object(&self, kind: ObjectKind, hash: Blake3Hash) -> Result<Vec<u8>> {
        match std::fs::read(object_path(&self.root, kind, hash)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ObjectNotFound { kind, hash }.into())
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to read {} {}", kind, hash))),
        }
    }

    /// Scratch directory for in-flight writes
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp").join("ingest")
    }

    /// Repository directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn corrupt(kind: ObjectKind, hash: Blake3Hash, e: anyhow::Error) -> StoreError {
    StoreError::CorruptObject {
        kind,
        hash,
        reason: e.to_string(),
    }
}

fn check_structure(repo_dir: &Path) -> std::result::Result<(), String> {
    if !repo_dir.is_dir() {
        return Err("directory does not exist".to_string());
    }

    for dir in &REQUIRED_DIRS {
        if !repo_dir.join(dir).is_dir() {
            return Err(format!("missing required directory {}", dir));
        }
    }

    let content = std::fs::read_to_string(repo_dir.join("config.toml"))
        .map_err(|e| format!("unreadable config.toml: {}", e))?;
    let config: toml::Value = content
        .parse()
        .map_err(|e| format!("invalid config.toml: {}", e))?;
    let version = config
        .get("store")
        .and_then(|s| s.get("version"))
        .and_then(|v| v.as_integer());
    if version != Some(FORMAT_VERSION) {
        return Err(format!("unsupported repository version {:?}", version));
    }

    Ok(())
}

/// Fan-out location of an object: `objects/<kind>/<hh>/<rest>`
/// Insert into a bounded cache, evicting an arbitrary entry when full
fn cache_insert<T>(cache: &DashMap<Blake3Hash, Arc<T>>, limit: usize, hash: Blake3Hash, value: T) {
    if cache.len() >= limit && !cache.contains_key(&hash) {
        let victim = cache.iter().next().map(|e| *e.key());
        if let Some(victim) = victim {
            cache.remove(&victim);
        }
    }
    cache.insert(hash, Arc::new(value));
}

pub(crate) fn object_path(root: &Path, kind: ObjectKind, hash: Blake3Hash) -> PathBuf {
    let hex = hash.to_hex();
    let (prefix, rest) = hex.split_at(2);
    root.join("objects").join(kind.dir_name()).join(prefix).join(rest)
}

/// Atomic write helper
///
/// Writes data to a temporary file, fsyncs it, then renames it to the target
/// path, so readers only ever see the old or the new content.
pub fn atomic_write(tmp_dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    use std::fs;
    use std::io::Write;

    fs::create_dir_all(tmp_dir)?;
    let temp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());

    let mut temp_file = fs::File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    if let Err(e) = fs::rename(&temp_path, target) {
        let _ = fs::remove_file(&temp_path);
        return Err(anyhow::Error::new(e).context(format!("Failed to move object into {}", target.display())));
    }

    // Best effort; some filesystems refuse to fsync directories
    if let Some(parent) = target.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}
