//! Timeline manager: the single entry point of the engine
//!
//! Each managed save gets one cached handle. A mutex on the handle
//! serializes operations on that timeline; the `get_timeline` snapshot sits in
//! its own `RwLock` so readers never queue behind a long checkout. Another
//! process is kept out by [`TimelineLock`].

use crate::config::ManagerConfig;
use crate::error::TimelineError;
use crate::events::{EventSink, TimelineEvent};
use crate::layout::TimelineLayout;
use crate::lock::TimelineLock;
use crate::model::{Checkpoint, DiscoveredSave, SaveGame, Timeline, TimelineBranch, TimelineStatus};
use crate::validate::{validate_branch_name, validate_component, validate_message};
use crate::Result;
use dashmap::DashMap;
use journal::graph::{history, resolve_in_history};
use journal::reflog::RefUpdateReason;
use journal::{capture, checkout, verify_repository, RefLog, RefLogEntry, RefStore, ResolveError};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tl_core::{Blake3Hash, Commit, ObjectKind, ObjectStore, StoreError};

/// Message of the commit recorded by `create_timeline`
pub const CREATED_MESSAGE: &str = "Timeline created";

struct Repo {
    store: ObjectStore,
    refs: RefStore,
}

struct TimelineHandle {
    save: SaveGame,
    source_dir: PathBuf,
    repo_dir: PathBuf,
    worktree_dir: PathBuf,
    /// Held for the whole of every operation; `None` until opened
    repo: Mutex<Option<Arc<Repo>>>,
    /// `None` while no timeline exists for the save
    snapshot: RwLock<Option<Timeline>>,
}

impl TimelineHandle {
    fn blank_timeline(&self, status: TimelineStatus) -> Timeline {
        Timeline {
            name: self.save.name.clone(),
            game: self.save.game.clone(),
            source_path: self.source_dir.clone(),
            worktree_path: self.worktree_dir.clone(),
            repository_path: self.repo_dir.clone(),
            branches: BTreeMap::new(),
            current_branch: self.save.default_branch(),
            current_checkpoint: None,
            status,
            last_error: None,
        }
    }

    fn mark_error(&self, err: &TimelineError) {
        if let Some(timeline) = self.snapshot.write().as_mut() {
            timeline.status = TimelineStatus::Error;
            timeline.last_error = Some(err.to_string());
        }
        tracing::error!("Timeline {} entered error state: {}", self.save, err);
    }

    /// Classify `err` and move the timeline to `Error`
    fn broken(&self, err: anyhow::Error, fallback: fn(String) -> TimelineError) -> TimelineError {
        let err = TimelineError::classify(&err, fallback);
        self.mark_error(&err);
        err
    }

    fn no_timeline(&self) -> TimelineError {
        TimelineError::Validation(format!("No timeline exists for {}", self.save))
    }
}

pub struct TimelineManager {
    layout: TimelineLayout,
    config: ManagerConfig,
    events: Arc<dyn EventSink>,
    timelines: DashMap<String, Arc<TimelineHandle>>,
    discovered: RwLock<Vec<DiscoveredSave>>,
}

impl TimelineManager {
    /// Manager rooted at `config.root`
    pub fn new(config: ManagerConfig, events: Arc<dyn EventSink>) -> Self {
        let layout = TimelineLayout::new(config.root.clone());
        Self::with_layout(layout, config, events)
    }

    pub fn with_layout(layout: TimelineLayout, config: ManagerConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            layout,
            config,
            events,
            timelines: DashMap::new(),
            discovered: RwLock::new(Vec::new()),
        }
    }

    pub fn layout(&self) -> &TimelineLayout {
        &self.layout
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Scan `<root>/<game>/<save>` and classify every save found
    ///
    /// Creates nothing. The result is retained for [`Self::discovered`].
    pub fn initialize(&self) -> Result<Vec<DiscoveredSave>> {
        let games = if self.config.games.is_empty() {
            list_visible_dirs(self.layout.root())?
        } else {
            self.config.games.clone()
        };

        let mut found = Vec::new();
        for game in games {
            if validate_component("game type", &game).is_err() {
                tracing::warn!("Skipping invalid game type {:?}", game);
                continue;
            }

            for name in list_visible_dirs(&self.layout.game_dir(&game))? {
                let save = SaveGame::new(game.clone(), name);
                let has_timeline = ObjectStore::is_repository(&self.layout.repository_dir(&save))
                    && self.layout.worktree_dir(&save).is_dir();
                found.push(DiscoveredSave {
                    path: self.layout.save_dir(&save),
                    status: if has_timeline {
                        TimelineStatus::Active
                    } else {
                        TimelineStatus::Inactive
                    },
                    save,
                });
            }
        }

        found.sort_by(|a, b| (&a.save.game, &a.save.name).cmp(&(&b.save.game, &b.save.name)));
        tracing::info!(
            "Discovered {} saves under {} ({} with timelines)",
            found.len(),
            self.layout.root().display(),
            found.iter().filter(|d| d.status == TimelineStatus::Active).count()
        );

        *self.discovered.write() = found.clone();
        Ok(found)
    }

    /// Result of the last [`Self::initialize`]
    pub fn discovered(&self) -> Vec<DiscoveredSave> {
        self.discovered.read().clone()
    }

    /// Saves found by the last scan that have no timeline yet
    pub fn saves_without_timelines(&self) -> Vec<SaveGame> {
        self.discovered
            .read()
            .iter()
            .filter(|d| d.status == TimelineStatus::Inactive)
            .map(|d| d.save.clone())
            .collect()
    }

    /// Put an existing save directory under version control
    pub fn create_timeline(&self, save: &SaveGame) -> Result<Timeline> {
        let handle = self.handle(save)?;
        let mut repo_slot = handle.repo.lock();

        if handle.snapshot.read().is_some() || handle.repo_dir.exists() {
            return Err(TimelineError::Validation(format!("Timeline already exists for {}", save)));
        }
        if !handle.source_dir.is_dir() {
            return Err(TimelineError::Validation(format!(
                "Save directory not found: {}",
                handle.source_dir.display()
            )));
        }

        *handle.snapshot.write() = Some(handle.blank_timeline(TimelineStatus::Initializing));

        let store = match ObjectStore::init(&handle.repo_dir) {
            Ok(store) => store,
            Err(e) => {
                *handle.snapshot.write() = None;
                return Err(TimelineError::classify(&e, TimelineError::Repository));
            }
        };

        match self.populate(&handle, store) {
            Ok((repo, timeline, root)) => {
                *repo_slot = Some(Arc::new(repo));
                *handle.snapshot.write() = Some(timeline.clone());
                self.set_discovered_status(save, TimelineStatus::Active);

                tracing::info!("Created timeline {} at {}", save, root.short());
                self.events.emit(TimelineEvent::TimelineCreated {
                    timeline: save.name.clone(),
                    checkpoint: root,
                });
                Ok(timeline)
            }
            Err(e) => {
                let err = TimelineError::classify(&e, TimelineError::Repository);
                tracing::warn!("Creating timeline {} failed, cleaning up: {}", save, err);
                for dir in [&handle.worktree_dir, &handle.repo_dir] {
                    if let Err(e) = remove_dir_if_exists(dir) {
                        tracing::warn!("Failed to remove {}: {}", dir.display(), e);
                    }
                }
                *handle.snapshot.write() = None;
                Err(err)
            }
        }
    }

    fn populate(&self, handle: &TimelineHandle, store: ObjectStore) -> anyhow::Result<(Repo, Timeline, Blake3Hash)> {
        let _lock = TimelineLock::acquire(&handle.repo_dir)?;
        let refs = RefStore::new(&handle.repo_dir, &handle.save.name);

        let captured = capture(&store, &handle.source_dir, None)?;
        let commit = Commit::new(captured.tree, None, CREATED_MESSAGE, &self.config.author);
        let root = store.write_commit(&commit)?;

        let branch = handle.save.default_branch();
        refs.create(&branch, root)?;
        refs.write_head(&branch)?;
        checkout(&store, captured.tree, &handle.worktree_dir)?;
        self.log_ref_move(&handle.repo_dir, &branch, None, root, RefUpdateReason::Init, CREATED_MESSAGE);

        let mut timeline = handle.blank_timeline(TimelineStatus::Active);
        timeline.branches.insert(
            branch.clone(),
            TimelineBranch {
                name: branch.clone(),
                head: root,
                is_default: true,
            },
        );
        timeline.current_branch = branch;
        timeline.current_checkpoint = Some(root);

        Ok((Repo { store, refs }, timeline, root))
    }

    /// Snapshot the live directory onto the current branch
    pub fn create_checkpoint(&self, save: &SaveGame, message: &str) -> Result<Checkpoint> {
        let message = validate_message(message, self.config.max_message_len)?;

        self.mutate(save, |handle, repo, timeline| {
            let branch = timeline.current_branch.clone();
            let head = repo
                .refs
                .read(&branch)
                .map_err(|e| handle.broken(e, TimelineError::Repository))?;
            let head_commit = repo
                .store
                .read_commit(head)
                .map_err(|e| handle.broken(e, TimelineError::Repository))?;
            let hint = match repo.store.read_tree(head_commit.tree) {
                Ok(tree) => Some(tree),
                Err(e) => {
                    tracing::warn!("Capturing {} without hint: {:#}", handle.save, e);
                    None
                }
            };

            let captured = capture(&repo.store, &handle.source_dir, hint.as_ref())
                .map_err(|e| TimelineError::classify_checkpoint(&e))?;
            let commit = Commit::new(captured.tree, Some(head), message, &self.config.author);
            let id = repo
                .store
                .write_commit(&commit)
                .map_err(|e| TimelineError::classify_checkpoint(&e))?;
            repo.refs
                .update(&branch, id)
                .map_err(|e| TimelineError::classify_checkpoint(&e))?;
            self.log_ref_move(&handle.repo_dir, &branch, Some(head), id, RefUpdateReason::Checkpoint, message);

            checkout(&repo.store, captured.tree, &handle.worktree_dir)
                .map_err(|e| handle.broken(e, TimelineError::File))?;

            timeline.current_checkpoint = Some(id);
            if let Some(b) = timeline.branches.get_mut(&branch) {
                b.head = id;
            }

            tracing::info!(
                "Checkpoint {} on {}/{} ({} files, {} unchanged)",
                id.short(),
                handle.save,
                branch,
                captured.stats.files,
                captured.stats.unchanged
            );
            let event = TimelineEvent::CheckpointCreated {
                timeline: handle.save.name.clone(),
                checkpoint: id,
            };
            Ok((Checkpoint::from_commit(id, &commit), event))
        })
    }

    /// Check out an earlier checkpoint of the current branch and reset the
    /// branch to it
    pub fn restore_checkpoint(&self, save: &SaveGame, checkpoint_id: &str) -> Result<Checkpoint> {
        self.mutate(save, |handle, repo, timeline| {
            let branch = timeline.current_branch.clone();
            let head = repo
                .refs
                .read(&branch)
                .map_err(|e| handle.broken(e, TimelineError::Repository))?;

            let target = resolve_in_history(&repo.store, head, checkpoint_id).map_err(|e| {
                if e.is::<ResolveError>() {
                    TimelineError::classify(&e, TimelineError::Validation)
                } else {
                    handle.broken(e, TimelineError::Repository)
                }
            })?;
            let commit = repo
                .store
                .read_commit(target)
                .map_err(|e| handle.broken(e, TimelineError::Repository))?;

            checkout(&repo.store, commit.tree, &handle.source_dir)
                .map_err(|e| handle.broken(e, TimelineError::File))?;
            repo.refs
                .update(&branch, target)
                .map_err(|e| handle.broken(e, TimelineError::Repository))?;
            self.log_ref_move(
                &handle.repo_dir,
                &branch,
                Some(head),
                target,
                RefUpdateReason::Restore,
                &format!("restore {}", target.short()),
            );
            checkout(&repo.store, commit.tree, &handle.worktree_dir)
                .map_err(|e| handle.broken(e, TimelineError::File))?;

            timeline.current_checkpoint = Some(target);
            if let Some(b) = timeline.branches.get_mut(&branch) {
                b.head = target;
            }

            tracing::info!("Restored {} on {} to {}", handle.save, branch, target.short());
            let event = TimelineEvent::CheckpointRestored {
                timeline: handle.save.name.clone(),
                checkpoint: target,
            };
            Ok((Checkpoint::from_commit(target, &commit), event))
        })
    }

    /// New branch pointing at `from_checkpoint`; the live directory is untouched
    pub fn create_branch(&self, save: &SaveGame, name: &str, from_checkpoint: &str) -> Result<TimelineBranch> {
        validate_branch_name(name)?;

        self.mutate(save, |handle, repo, timeline| {
            if repo.refs.exists(name) {
                return Err(TimelineError::Branch(format!("Branch '{}' already exists", name)));
            }

            let target = resolve_any_branch(handle, repo, timeline, from_checkpoint)?;
            repo.refs
                .create(name, target)
                .map_err(|e| TimelineError::classify(&e, TimelineError::Repository))?;
            self.log_ref_move(
                &handle.repo_dir,
                name,
                None,
                target,
                RefUpdateReason::Branch,
                &format!("branch from {}", target.short()),
            );

            let branch = TimelineBranch {
                name: name.to_string(),
                head: target,
                is_default: false,
            };
            timeline.branches.insert(name.to_string(), branch.clone());

            tracing::info!("Created branch {} on {} at {}", name, handle.save, target.short());
            let event = TimelineEvent::BranchCreated {
                timeline: handle.save.name.clone(),
                branch: name.to_string(),
                checkpoint: target,
            };
            Ok((branch, event))
        })
    }

    /// Check out the head of `name` onto the live directory and make it current
    pub fn switch_branch(&self, save: &SaveGame, name: &str) -> Result<Timeline> {
        self.mutate(save, |handle, repo, timeline| {
            if !repo.refs.exists(name) {
                return Err(TimelineError::Branch(format!("Branch '{}' not found", name)));
            }

            let head = repo
                .refs
                .read(name)
                .map_err(|e| handle.broken(e, TimelineError::Repository))?;
            let commit = repo
                .store
                .read_commit(head)
                .map_err(|e| handle.broken(e, TimelineError::Repository))?;

            checkout(&repo.store, commit.tree, &handle.source_dir)
                .map_err(|e| handle.broken(e, TimelineError::File))?;
            repo.refs
                .write_head(name)
                .map_err(|e| handle.broken(e, TimelineError::Repository))?;
            checkout(&repo.store, commit.tree, &handle.worktree_dir)
                .map_err(|e| handle.broken(e, TimelineError::File))?;

            timeline.current_branch = name.to_string();
            timeline.current_checkpoint = Some(head);
            if let Some(b) = timeline.branches.get_mut(name) {
                b.head = head;
            }

            tracing::info!("Switched {} to branch {} at {}", handle.save, name, head.short());
            let event = TimelineEvent::BranchSwitched {
                timeline: handle.save.name.clone(),
                branch: name.to_string(),
                checkpoint: head,
            };
            Ok((timeline.clone(), event))
        })
    }

    /// Current snapshot of a timeline, in any status
    pub fn get_timeline(&self, save: &SaveGame) -> Result<Timeline> {
        let handle = self.handle(save)?;
        if let Some(timeline) = handle.snapshot.read().clone() {
            return Ok(timeline);
        }

        // First access: load under the operation lock
        let mut repo_slot = handle.repo.lock();
        self.ensure_loaded(&handle, &mut repo_slot)?;
        let snapshot = handle.snapshot.read().clone();
        snapshot.ok_or_else(|| handle.no_timeline())
    }

    /// Remove the repository and worktree; the live directory stays
    pub fn delete_timeline(&self, save: &SaveGame) -> Result<()> {
        let handle = self.handle(save)?;
        let mut repo_slot = handle.repo.lock();
        self.ensure_loaded(&handle, &mut repo_slot)?;

        let lock = TimelineLock::acquire(&handle.repo_dir)
            .map_err(|e| TimelineError::classify(&e, TimelineError::Repository))?;
        *repo_slot = None;

        let removed = remove_dir_if_exists(&handle.worktree_dir);
        drop(lock);
        if let Err(e) = removed.and_then(|_| remove_dir_if_exists(&handle.repo_dir)) {
            let err = TimelineError::File(format!("Failed to delete timeline {}: {}", save, e));
            handle.mark_error(&err);
            return Err(err);
        }

        // Callers still holding the old handle find no snapshot and no repository
        *handle.snapshot.write() = None;
        self.timelines.remove(&save.key());
        self.set_discovered_status(save, TimelineStatus::Inactive);

        tracing::info!("Deleted timeline {}", save);
        self.events.emit(TimelineEvent::TimelineDeleted {
            timeline: save.name.clone(),
        });
        Ok(())
    }

    /// History of `branch` (default: current), newest first
    pub fn list_checkpoints(&self, save: &SaveGame, branch: Option<&str>) -> Result<Vec<Checkpoint>> {
        self.inspect(save, |_handle, repo, timeline| {
            let branch = branch.unwrap_or(timeline.current_branch.as_str());
            if !repo.refs.exists(branch) {
                return Err(TimelineError::Branch(format!("Branch '{}' not found", branch)));
            }

            let head = repo
                .refs
                .read(branch)
                .map_err(|e| TimelineError::classify(&e, TimelineError::Repository))?;
            let commits = history(&repo.store, head, None)
                .map_err(|e| TimelineError::classify(&e, TimelineError::Repository))?;

            Ok(commits
                .iter()
                .map(|(id, commit)| Checkpoint::from_commit(*id, commit))
                .collect())
        })
    }

    /// Recorded pointer movements, oldest first; all refs when `branch` is `None`
    pub fn ref_log(&self, save: &SaveGame, branch: Option<&str>) -> Result<Vec<RefLogEntry>> {
        self.inspect(save, |handle, _repo, _timeline| {
            let _lock = TimelineLock::acquire(&handle.repo_dir)
                .map_err(|e| TimelineError::classify(&e, TimelineError::Repository))?;

            let entries = RefLog::open(&handle.repo_dir).and_then(|log| match branch {
                Some(branch) => log.entries_for(branch),
                None => log.entries(),
            });
            entries.map_err(|e| TimelineError::classify(&e, TimelineError::Repository))
        })
    }

    /// Recovery path out of `Error`: reopen, verify and re-materialize
    ///
    /// Damage found by verification is reported, never repaired.
    pub fn reinitialize(&self, save: &SaveGame) -> Result<Timeline> {
        let handle = self.handle(save)?;
        let mut repo_slot = handle.repo.lock();
        *repo_slot = None;
        *handle.snapshot.write() = None;

        if !handle.repo_dir.exists() {
            return Err(handle.no_timeline());
        }

        let _lock = TimelineLock::acquire(&handle.repo_dir)
            .map_err(|e| TimelineError::classify(&e, TimelineError::Repository))?;

        let reopened = (|| -> anyhow::Result<(Repo, Timeline)> {
            let store = ObjectStore::open(&handle.repo_dir)?;
            let refs = RefStore::new(&handle.repo_dir, &handle.save.name);

            let report = verify_repository(&store, &refs)?;
            if !report.is_healthy() {
                anyhow::bail!("repository is damaged: {}", report.problems.join("; "));
            }

            let repo = Repo { store, refs };
            let timeline = read_state(&handle, &repo)?;
            Ok((repo, timeline))
        })();

        let (repo, timeline) = match reopened {
            Ok(reopened) => reopened,
            Err(e) => {
                let err = TimelineError::classify(&e, TimelineError::Repository);
                let mut timeline = handle.blank_timeline(TimelineStatus::Error);
                timeline.last_error = Some(err.to_string());
                *handle.snapshot.write() = Some(timeline);
                return Err(err);
            }
        };

        *handle.snapshot.write() = Some(timeline.clone());
        if let Err(e) = mirror_worktree(&handle, &repo, &timeline) {
            return Err(handle.broken(e, TimelineError::File));
        }
        *repo_slot = Some(Arc::new(repo));

        tracing::info!("Reinitialized timeline {}", save);
        Ok(timeline)
    }

    fn handle(&self, save: &SaveGame) -> Result<Arc<TimelineHandle>> {
        validate_component("game type", &save.game)?;
        validate_component("save name", &save.name)?;

        let handle = self
            .timelines
            .entry(save.key())
            .or_insert_with(|| {
                Arc::new(TimelineHandle {
                    save: save.clone(),
                    source_dir: self.layout.save_dir(save),
                    repo_dir: self.layout.repository_dir(save),
                    worktree_dir: self.layout.worktree_dir(save),
                    repo: Mutex::new(None),
                    snapshot: RwLock::new(None),
                })
            })
            .value()
            .clone();
        Ok(handle)
    }

    /// Load the timeline from disk on first use
    ///
    /// A repository that fails to load yields an `Error` snapshot rather than
    /// an error, so the timeline stays visible and recoverable.
    fn ensure_loaded(&self, handle: &TimelineHandle, repo_slot: &mut Option<Arc<Repo>>) -> Result<()> {
        if handle.snapshot.read().is_some() {
            return Ok(());
        }
        if !handle.repo_dir.exists() {
            return Err(handle.no_timeline());
        }

        match load(handle) {
            Ok((repo, timeline)) => {
                tracing::debug!("Loaded timeline {}", handle.save);
                *repo_slot = Some(Arc::new(repo));
                *handle.snapshot.write() = Some(timeline);
            }
            Err(e) => {
                tracing::error!("Failed to load timeline {}: {:#}", handle.save, e);
                let mut timeline = handle.blank_timeline(TimelineStatus::Error);
                timeline.last_error = Some(format!("{:#}", e));
                *handle.snapshot.write() = Some(timeline);
            }
        }
        Ok(())
    }

    /// Run a mutating operation under both locks
    ///
    /// The snapshot is replaced and the event emitted only if `op` succeeds.
    fn mutate<T>(
        &self,
        save: &SaveGame,
        op: impl FnOnce(&TimelineHandle, &Repo, &mut Timeline) -> Result<(T, TimelineEvent)>,
    ) -> Result<T> {
        let handle = self.handle(save)?;
        let mut repo_slot = handle.repo.lock();
        self.ensure_loaded(&handle, &mut repo_slot)?;

        let snapshot = handle.snapshot.read().clone();
        let mut timeline = snapshot.ok_or_else(|| handle.no_timeline())?;
        if timeline.status == TimelineStatus::Error {
            return Err(TimelineError::Repository(format!(
                "Timeline {} is in an error state ({}); reinitialize it first",
                save,
                timeline.last_error.as_deref().unwrap_or("unknown cause")
            )));
        }
        let repo = repo_slot
            .clone()
            .ok_or_else(|| TimelineError::Repository(format!("Repository of {} is not open", save)))?;

        let lock = TimelineLock::acquire(&handle.repo_dir)
            .map_err(|e| TimelineError::classify(&e, TimelineError::Repository))?;
        let (value, event) = op(&*handle, &*repo, &mut timeline)?;
        drop(lock);

        *handle.snapshot.write() = Some(timeline);
        self.events.emit(event);
        Ok(value)
    }

    /// Run a read-only operation under the operation lock
    fn inspect<T>(&self, save: &SaveGame, op: impl FnOnce(&TimelineHandle, &Repo, &Timeline) -> Result<T>) -> Result<T> {
        let handle = self.handle(save)?;
        let mut repo_slot = handle.repo.lock();
        self.ensure_loaded(&handle, &mut repo_slot)?;

        let snapshot = handle.snapshot.read().clone();
        let timeline = snapshot.ok_or_else(|| handle.no_timeline())?;
        let repo = repo_slot.clone().ok_or_else(|| {
            TimelineError::Repository(format!("Timeline {} is in an error state; reinitialize it first", save))
        })?;
        op(&*handle, &*repo, &timeline)
    }

    fn log_ref_move(
        &self,
        repo_dir: &Path,
        ref_name: &str,
        old: Option<Blake3Hash>,
        new: Blake3Hash,
        reason: RefUpdateReason,
        message: &str,
    ) {
        let logged = RefLog::open(repo_dir).and_then(|log| log.append(ref_name, old, new, reason, message));
        if let Err(e) = logged {
            tracing::warn!("Failed to record ref log entry for {}: {:#}", ref_name, e);
        }
    }

    fn set_discovered_status(&self, save: &SaveGame, status: TimelineStatus) {
        for discovered in self.discovered.write().iter_mut() {
            if &discovered.save == save {
                discovered.status = status;
            }
        }
    }
}

/// Open an existing repository and read its branches
fn load(handle: &TimelineHandle) -> anyhow::Result<(Repo, Timeline)> {
    let store = ObjectStore::open(&handle.repo_dir)?;
    let refs = RefStore::new(&handle.repo_dir, &handle.save.name);
    let repo = Repo { store, refs };
    let timeline = read_state(handle, &repo)?;

    if !handle.worktree_dir.is_dir() {
        match TimelineLock::acquire(&handle.repo_dir) {
            Ok(_lock) => {
                tracing::info!("Worktree of {} missing, re-materializing", handle.save);
                mirror_worktree(handle, &repo, &timeline)?;
            }
            Err(e) => tracing::debug!("Not re-materializing worktree of {}: {:#}", handle.save, e),
        }
    }

    Ok((repo, timeline))
}

fn read_state(handle: &TimelineHandle, repo: &Repo) -> anyhow::Result<Timeline> {
    let default_branch = handle.save.default_branch();

    let mut branches = BTreeMap::new();
    for name in repo.refs.list("")? {
        let head = repo.refs.read(&name)?;
        if !repo.store.has_commit(head) {
            return Err(StoreError::ObjectNotFound {
                kind: ObjectKind::Commit,
                hash: head,
            }
            .into());
        }
        branches.insert(
            name.clone(),
            TimelineBranch {
                is_default: name == default_branch,
                name,
                head,
            },
        );
    }

    let current = repo.refs.read_head()?.unwrap_or(default_branch);
    let head = branches
        .get(&current)
        .map(|b| b.head)
        .ok_or_else(|| anyhow::anyhow!("HEAD names unknown branch {}", current))?;

    let mut timeline = handle.blank_timeline(TimelineStatus::Active);
    timeline.branches = branches;
    timeline.current_branch = current;
    timeline.current_checkpoint = Some(head);
    Ok(timeline)
}

fn mirror_worktree(handle: &TimelineHandle, repo: &Repo, timeline: &Timeline) -> anyhow::Result<()> {
    let head = timeline
        .current_checkpoint
        .ok_or_else(|| anyhow::anyhow!("timeline {} has no head", handle.save))?;
    let commit = repo.store.read_commit(head)?;
    checkout(&repo.store, commit.tree, &handle.worktree_dir)?;
    Ok(())
}

/// Resolve a checkpoint id against the history of every branch
///
/// Checkpoints left behind by a restore are found through the ref log
/// targets, and a full id naming any stored commit is always accepted.
fn resolve_any_branch(handle: &TimelineHandle, repo: &Repo, timeline: &Timeline, id: &str) -> Result<Blake3Hash> {
    let mut matches = BTreeSet::new();
    let heads: BTreeSet<Blake3Hash> = timeline.branches.values().map(|b| b.head).collect();

    for &head in &heads {
        match resolve_in_history(&repo.store, head, id) {
            Ok(hash) => {
                matches.insert(hash);
            }
            Err(e) => match e.downcast_ref::<ResolveError>() {
                Some(ResolveError::Unknown(_)) => {}
                Some(_) => return Err(TimelineError::classify(&e, TimelineError::Validation)),
                None => return Err(handle.broken(e, TimelineError::Repository)),
            },
        }
    }

    if matches.is_empty() {
        for target in logged_targets(&handle.repo_dir) {
            if heads.contains(&target) {
                continue;
            }
            match resolve_in_history(&repo.store, target, id) {
                Ok(hash) => {
                    matches.insert(hash);
                }
                Err(e) => match e.downcast_ref::<ResolveError>() {
                    Some(ResolveError::Ambiguous(_)) => {
                        return Err(TimelineError::classify(&e, TimelineError::Validation))
                    }
                    Some(_) => {}
                    None => tracing::debug!("Skipping unreadable ref log target {}: {:#}", target.short(), e),
                },
            }
        }
    }

    if matches.is_empty() {
        if let Ok(hash) = Blake3Hash::from_hex(&id.trim().to_ascii_lowercase()) {
            if repo.store.has_commit(hash) {
                matches.insert(hash);
            }
        }
    }

    let mut matches = matches.into_iter();
    match (matches.next(), matches.next()) {
        (Some(hash), None) => Ok(hash),
        (Some(_), Some(_)) => Err(TimelineError::Validation(format!("Checkpoint id {} is ambiguous", id))),
        (None, _) => Err(TimelineError::Validation(format!("Unknown checkpoint {}", id))),
    }
}

/// Every commit a ref has pointed at, newest first
fn logged_targets(repo_dir: &Path) -> Vec<Blake3Hash> {
    let entries = match RefLog::open(repo_dir).and_then(|log| log.entries()) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Could not read ref log of {}: {:#}", repo_dir.display(), e);
            return Vec::new();
        }
    };

    let mut seen = BTreeSet::new();
    entries
        .iter()
        .rev()
        .flat_map(|entry| std::iter::once(entry.new).chain(entry.old))
        .filter(|hash| seen.insert(*hash))
        .collect()
}

fn list_visible_dirs(dir: &Path) -> Result<Vec<String>> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(TimelineError::File(format!("Failed to list {}: {}", dir.display(), e))),
    };

    let mut names = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| TimelineError::File(format!("Failed to list {}: {}", dir.display(), e)))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }

    names.sort();
    Ok(names)
}

fn remove_dir_if_exists(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
