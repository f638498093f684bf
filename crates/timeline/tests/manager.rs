//! End-to-end tests of the timeline manager against real directories

use anyhow::Result;
use crossbeam_channel::Receiver;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use timeline::lock::TimelineLock;
use timeline::{
    EventBus, ManagerConfig, SaveGame, TimelineError, TimelineEvent, TimelineManager, TimelineStatus,
};
use tl_core::{ObjectKind, ObjectStore};

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    manager: TimelineManager,
    events: Receiver<TimelineEvent>,
    save: SaveGame,
}

impl Fixture {
    fn live(&self) -> PathBuf {
        self.manager.layout().save_dir(&self.save)
    }

    fn worktree(&self) -> PathBuf {
        self.manager.layout().worktree_dir(&self.save)
    }

    fn repo(&self) -> PathBuf {
        self.manager.layout().repository_dir(&self.save)
    }

    fn drain_events(&self) -> Vec<TimelineEvent> {
        self.events.try_iter().collect()
    }

    fn blob_count(&self) -> Result<usize> {
        ObjectStore::open(&self.repo())?.object_count(ObjectKind::Blob)
    }
}

/// `<root>/minecraft/world1` with a small save in it
fn fixture() -> Result<Fixture> {
    let dir = TempDir::new()?;
    let root = dir.path().join("saves");
    let live = root.join("minecraft").join("world1");
    fs::create_dir_all(live.join("region"))?;
    fs::write(live.join("level.dat"), b"day 1")?;
    fs::write(live.join("region/r.0.0.mca"), vec![3u8; 20_000])?;

    let bus = Arc::new(EventBus::new());
    let events = bus.subscribe();
    let config = ManagerConfig {
        root: root.clone(),
        author: "tester".to_string(),
        ..ManagerConfig::default()
    };
    let manager = TimelineManager::new(config, bus);

    Ok(Fixture {
        _dir: dir,
        root,
        manager,
        events,
        save: SaveGame::new("minecraft", "world1"),
    })
}

fn read(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap_or_default()
}

#[test]
fn test_world1_scenario() -> Result<()> {
    let fx = fixture()?;

    let discovered = fx.manager.initialize()?;
    assert_eq!(discovered.len(), 1);
    assert_eq!(discovered[0].status, TimelineStatus::Inactive);
    assert_eq!(fx.manager.saves_without_timelines(), vec![fx.save.clone()]);

    let created = fx.manager.create_timeline(&fx.save)?;
    assert_eq!(created.status, TimelineStatus::Active);
    assert_eq!(created.current_branch, "world1-main");
    assert!(created.branches["world1-main"].is_default);
    assert_eq!(read(&fx.worktree().join("level.dat")), b"day 1");
    assert!(fx.manager.saves_without_timelines().is_empty());
    let root = created.current_checkpoint.unwrap();

    // The game plays on
    fs::write(fx.live().join("level.dat"), b"day 2")?;
    let day2 = fx.manager.create_checkpoint(&fx.save, "reached the nether")?;
    assert_eq!(day2.parent, Some(root));
    assert_eq!(read(&fx.worktree().join("level.dat")), b"day 2");

    // Branching leaves the live directory alone
    let alt = fx.manager.create_branch(&fx.save, "alt", &root.to_hex())?;
    assert_eq!(alt.head, root);
    assert!(!alt.is_default);
    assert_eq!(read(&fx.live().join("level.dat")), b"day 2");

    let switched = fx.manager.switch_branch(&fx.save, "alt")?;
    assert_eq!(switched.current_branch, "alt");
    assert_eq!(switched.current_checkpoint, Some(root));
    assert_eq!(read(&fx.live().join("level.dat")), b"day 1");

    fs::write(fx.live().join("level.dat"), b"alt day")?;
    let alt_cp = fx.manager.create_checkpoint(&fx.save, "alt progress")?;
    assert_eq!(alt_cp.parent, Some(root));

    fx.manager.switch_branch(&fx.save, "world1-main")?;
    assert_eq!(read(&fx.live().join("level.dat")), b"day 2");
    assert_eq!(read(&fx.worktree().join("level.dat")), b"day 2");

    let main_history = fx.manager.list_checkpoints(&fx.save, None)?;
    assert_eq!(main_history.iter().map(|c| c.id).collect::<Vec<_>>(), vec![day2.id, root]);
    let alt_history = fx.manager.list_checkpoints(&fx.save, Some("alt"))?;
    assert_eq!(alt_history.iter().map(|c| c.id).collect::<Vec<_>>(), vec![alt_cp.id, root]);
    assert_eq!(alt_history[1].message, "Timeline created");
    assert_eq!(alt_history[0].author, "tester");

    let rescanned = fx.manager.initialize()?;
    assert_eq!(rescanned[0].status, TimelineStatus::Active);
    Ok(())
}

#[test]
fn test_branch_from_checkpoint_left_behind_by_restore() -> Result<()> {
    let fx = fixture()?;
    fs::write(fx.live().join("a.txt"), b"hello")?;
    let h0 = fx.manager.create_timeline(&fx.save)?.current_checkpoint.unwrap();

    fs::write(fx.live().join("a.txt"), b"hello world")?;
    let h1 = fx.manager.create_checkpoint(&fx.save, "more words")?;
    fx.manager.restore_checkpoint(&fx.save, &h0.to_hex())?;
    assert_eq!(read(&fx.live().join("a.txt")), b"hello");

    // No branch reaches H1 any more
    let history = fx.manager.list_checkpoints(&fx.save, None)?;
    assert!(history.iter().all(|cp| cp.id != h1.id));

    let explore = fx.manager.create_branch(&fx.save, "explore", &h1.id.to_hex())?;
    assert_eq!(explore.head, h1.id);
    let short = fx.manager.create_branch(&fx.save, "explore-short", &h1.id.to_hex()[..8])?;
    assert_eq!(short.head, h1.id);

    fx.manager.switch_branch(&fx.save, "explore")?;
    assert_eq!(read(&fx.live().join("a.txt")), b"hello world");
    assert_eq!(fx.manager.get_timeline(&fx.save)?.current_checkpoint, Some(h1.id));

    // Ids naming nothing stored are still rejected
    let unknown = "f".repeat(64);
    assert!(matches!(
        fx.manager.create_branch(&fx.save, "nowhere", &unknown),
        Err(TimelineError::Validation(_))
    ));
    Ok(())
}

#[test]
fn test_restore_then_checkpoint_keeps_history_linear() -> Result<()> {
    let fx = fixture()?;
    let a = fx.manager.create_timeline(&fx.save)?.current_checkpoint.unwrap();

    fs::write(fx.live().join("level.dat"), b"B")?;
    let b = fx.manager.create_checkpoint(&fx.save, "B")?;
    fs::write(fx.live().join("level.dat"), b"C")?;
    fs::write(fx.live().join("extra.dat"), b"only in C")?;
    let c = fx.manager.create_checkpoint(&fx.save, "C")?;

    let restored = fx.manager.restore_checkpoint(&fx.save, &b.id.to_hex()[..8])?;
    assert_eq!(restored.id, b.id);
    assert_eq!(read(&fx.live().join("level.dat")), b"B");
    assert!(!fx.live().join("extra.dat").exists());
    assert_eq!(fx.manager.get_timeline(&fx.save)?.current_checkpoint, Some(b.id));

    fs::write(fx.live().join("level.dat"), b"D")?;
    let d = fx.manager.create_checkpoint(&fx.save, "D")?;
    assert_eq!(d.parent, Some(b.id));

    let ids: Vec<_> = fx
        .manager
        .list_checkpoints(&fx.save, None)?
        .iter()
        .map(|cp| cp.id)
        .collect();
    assert_eq!(ids, vec![d.id, b.id, a]);
    assert!(!ids.contains(&c.id));
    Ok(())
}

#[test]
fn test_restore_rejects_ids_off_the_current_branch() -> Result<()> {
    let fx = fixture()?;
    let root = fx.manager.create_timeline(&fx.save)?.current_checkpoint.unwrap();

    fx.manager.create_branch(&fx.save, "alt", &root.to_hex())?;
    fx.manager.switch_branch(&fx.save, "alt")?;
    fs::write(fx.live().join("level.dat"), b"alt only")?;
    let alt_cp = fx.manager.create_checkpoint(&fx.save, "alt only")?;
    fx.manager.switch_branch(&fx.save, "world1-main")?;
    fx.drain_events();

    for bad in [alt_cp.id.to_hex(), "zzzz".to_string(), "ab".to_string(), "0000000000".to_string()] {
        let err = fx.manager.restore_checkpoint(&fx.save, &bad).unwrap_err();
        assert!(matches!(err, TimelineError::Validation(_)), "{}: {:?}", bad, err);
    }

    assert_eq!(fx.manager.get_timeline(&fx.save)?.status, TimelineStatus::Active);
    assert!(fx.drain_events().is_empty());
    Ok(())
}

#[test]
fn test_unchanged_checkpoints_add_no_blobs() -> Result<()> {
    let fx = fixture()?;
    let root = fx.manager.create_timeline(&fx.save)?.current_checkpoint.unwrap();
    let blobs = fx.blob_count()?;

    let mut last = root;
    for i in 0..5 {
        let cp = fx.manager.create_checkpoint(&fx.save, &format!("idle {}", i))?;
        assert_eq!(cp.parent, Some(last));
        last = cp.id;
    }

    // Identical snapshots are still recorded as checkpoints
    assert_eq!(fx.manager.list_checkpoints(&fx.save, None)?.len(), 6);
    assert_eq!(fx.blob_count()?, blobs);

    // One changed file adds exactly one blob
    fs::write(fx.live().join("level.dat"), b"day 2")?;
    fx.manager.create_checkpoint(&fx.save, "changed")?;
    assert_eq!(fx.blob_count()?, blobs + 1);
    Ok(())
}

#[test]
fn test_validation_errors_change_nothing() -> Result<()> {
    let fx = fixture()?;
    let root = fx.manager.create_timeline(&fx.save)?.current_checkpoint.unwrap();
    fx.drain_events();

    assert!(matches!(
        fx.manager.create_checkpoint(&fx.save, "   "),
        Err(TimelineError::Validation(_))
    ));
    assert!(matches!(
        fx.manager.create_checkpoint(&fx.save, &"x".repeat(501)),
        Err(TimelineError::Validation(_))
    ));
    for bad in ["", "has space", "main", "a/b"] {
        assert!(matches!(
            fx.manager.create_branch(&fx.save, bad, &root.to_hex()),
            Err(TimelineError::Validation(_))
        ));
    }
    assert!(matches!(
        fx.manager.create_branch(&fx.save, "alt", "deadbeefdeadbeef"),
        Err(TimelineError::Validation(_))
    ));

    let err = fx.manager.create_branch(&fx.save, "world1-main", &root.to_hex()).unwrap_err();
    assert_eq!(err, TimelineError::Branch("Branch 'world1-main' already exists".to_string()));
    assert!(matches!(
        fx.manager.switch_branch(&fx.save, "nope"),
        Err(TimelineError::Branch(_))
    ));

    let timeline = fx.manager.get_timeline(&fx.save)?;
    assert_eq!(timeline.status, TimelineStatus::Active);
    assert_eq!(timeline.branches.len(), 1);
    assert_eq!(timeline.current_checkpoint, Some(root));
    assert!(fx.drain_events().is_empty());
    Ok(())
}

#[test]
fn test_create_timeline_preconditions() -> Result<()> {
    let fx = fixture()?;

    let missing = SaveGame::new("minecraft", "world404");
    assert!(matches!(
        fx.manager.create_timeline(&missing),
        Err(TimelineError::Validation(_))
    ));
    assert!(!fx.manager.layout().repository_dir(&missing).exists());
    assert!(matches!(
        fx.manager.get_timeline(&missing),
        Err(TimelineError::Validation(_))
    ));

    assert!(matches!(
        fx.manager.create_timeline(&SaveGame::new("minecraft", "../escape")),
        Err(TimelineError::Validation(_))
    ));

    fx.manager.create_timeline(&fx.save)?;
    assert!(matches!(
        fx.manager.create_timeline(&fx.save),
        Err(TimelineError::Validation(_))
    ));
    Ok(())
}

#[test]
fn test_one_event_per_successful_operation() -> Result<()> {
    let fx = fixture()?;

    let root = fx.manager.create_timeline(&fx.save)?.current_checkpoint.unwrap();
    let cp = fx.manager.create_checkpoint(&fx.save, "one")?;
    fx.manager.create_branch(&fx.save, "alt", &root.to_hex())?;
    fx.manager.switch_branch(&fx.save, "alt")?;
    fx.manager.switch_branch(&fx.save, "world1-main")?;
    fx.manager.restore_checkpoint(&fx.save, &root.to_hex())?;
    let _ = fx.manager.get_timeline(&fx.save)?;
    let _ = fx.manager.list_checkpoints(&fx.save, None)?;
    fx.manager.delete_timeline(&fx.save)?;

    let events = fx.drain_events();
    let names: Vec<_> = events.iter().map(|e| e.name()).collect();
    assert_eq!(
        names,
        vec![
            "timeline_created",
            "checkpoint_created",
            "branch_created",
            "branch_switched",
            "branch_switched",
            "checkpoint_restored",
            "timeline_deleted",
        ]
    );
    assert!(events.iter().all(|e| e.timeline() == "world1"));
    assert_eq!(
        events[1],
        TimelineEvent::CheckpointCreated {
            timeline: "world1".to_string(),
            checkpoint: cp.id,
        }
    );
    Ok(())
}

#[test]
fn test_concurrent_checkpoints_never_share_a_parent() -> Result<()> {
    let fx = fixture()?;
    let root = fx.manager.create_timeline(&fx.save)?.current_checkpoint.unwrap();

    let results: Vec<_> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let manager = &fx.manager;
                let save = &fx.save;
                s.spawn(move || manager.create_checkpoint(save, &format!("worker {}", i)))
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let mut parents = HashSet::new();
    for result in results {
        let checkpoint = result?;
        assert!(parents.insert(checkpoint.parent), "two checkpoints share a parent");
    }
    assert!(parents.contains(&Some(root)));

    let history = fx.manager.list_checkpoints(&fx.save, None)?;
    assert_eq!(history.len(), 9);
    for pair in history.windows(2) {
        assert_eq!(pair[0].parent, Some(pair[1].id));
    }
    Ok(())
}

#[test]
fn test_get_timeline_does_not_wait_for_operations() -> Result<()> {
    let fx = fixture()?;
    fx.manager.create_timeline(&fx.save)?;

    std::thread::scope(|s| {
        let writer = s.spawn(|| {
            for i in 0..10 {
                fx.manager.create_checkpoint(&fx.save, &format!("cp {}", i)).unwrap();
            }
        });
        for _ in 0..50 {
            let timeline = fx.manager.get_timeline(&fx.save).unwrap();
            assert_eq!(timeline.status, TimelineStatus::Active);
        }
        writer.join().unwrap();
    });

    assert_eq!(fx.manager.list_checkpoints(&fx.save, None)?.len(), 11);
    Ok(())
}

#[test]
#[cfg(unix)]
fn test_other_process_lock_is_a_concurrency_error() -> Result<()> {
    let fx = fixture()?;
    fx.manager.create_timeline(&fx.save)?;
    fx.drain_events();

    let held = TimelineLock::acquire(&fx.repo())?;
    let err = fx.manager.create_checkpoint(&fx.save, "blocked").unwrap_err();
    assert!(matches!(err, TimelineError::Concurrency(_)), "{:?}", err);
    assert_eq!(fx.manager.get_timeline(&fx.save)?.status, TimelineStatus::Active);
    assert!(fx.drain_events().is_empty());

    drop(held);
    fx.manager.create_checkpoint(&fx.save, "unblocked")?;
    Ok(())
}

#[test]
fn test_failed_restore_enters_error_until_reinitialized() -> Result<()> {
    let fx = fixture()?;
    fs::write(fx.live().join("old.dat"), b"only in the first checkpoint")?;
    let root = fx.manager.create_timeline(&fx.save)?.current_checkpoint.unwrap();

    fs::remove_file(fx.live().join("old.dat"))?;
    fx.manager.create_checkpoint(&fx.save, "cleaned up")?;

    // Lose the blob only the first checkpoint needs
    let hex = tl_core::hash::hash_bytes(b"only in the first checkpoint").to_hex();
    fs::remove_file(fx.repo().join("objects/blobs").join(&hex[..2]).join(&hex[2..]))?;
    fx.drain_events();

    let err = fx.manager.restore_checkpoint(&fx.save, &root.to_hex()).unwrap_err();
    assert!(matches!(err, TimelineError::Repository(_)), "{:?}", err);

    let broken = fx.manager.get_timeline(&fx.save)?;
    assert_eq!(broken.status, TimelineStatus::Error);
    assert!(broken.last_error.is_some());
    // The live directory was not touched
    assert!(!fx.live().join("old.dat").exists());

    assert!(matches!(
        fx.manager.create_checkpoint(&fx.save, "while broken"),
        Err(TimelineError::Repository(_))
    ));
    assert!(fx.drain_events().is_empty());

    // Verification names the lost object and recovers nothing
    let err = fx.manager.reinitialize(&fx.save).unwrap_err();
    assert!(matches!(err, TimelineError::Repository(_)), "{:?}", err);
    assert!(err.to_string().contains("/old.dat"), "{}", err);
    assert_eq!(fx.manager.get_timeline(&fx.save)?.status, TimelineStatus::Error);

    // Put the object back by hand, then recover
    ObjectStore::open(&fx.repo())?.write_blob(b"only in the first checkpoint")?;
    let recovered = fx.manager.reinitialize(&fx.save)?;
    assert_eq!(recovered.status, TimelineStatus::Active);
    assert_eq!(recovered.last_error, None);
    fx.manager.restore_checkpoint(&fx.save, &root.to_hex())?;
    assert_eq!(read(&fx.live().join("old.dat")), b"only in the first checkpoint");
    fx.manager.create_checkpoint(&fx.save, "after recovery")?;
    Ok(())
}

#[test]
fn test_reinitialize_reports_damaged_repository() -> Result<()> {
    let fx = fixture()?;
    let root = fx.manager.create_timeline(&fx.save)?.current_checkpoint.unwrap();

    let hex = root.to_hex();
    fs::remove_file(fx.repo().join("objects/commits").join(&hex[..2]).join(&hex[2..]))?;

    let err = fx.manager.reinitialize(&fx.save).unwrap_err();
    assert!(matches!(err, TimelineError::Repository(_)), "{:?}", err);
    assert_eq!(fx.manager.get_timeline(&fx.save)?.status, TimelineStatus::Error);
    Ok(())
}

#[test]
fn test_delete_timeline_keeps_live_directory() -> Result<()> {
    let fx = fixture()?;
    fx.manager.create_timeline(&fx.save)?;

    fx.manager.delete_timeline(&fx.save)?;
    assert!(!fx.repo().exists());
    assert!(!fx.worktree().exists());
    assert_eq!(read(&fx.live().join("level.dat")), b"day 1");
    assert!(matches!(
        fx.manager.get_timeline(&fx.save),
        Err(TimelineError::Validation(_))
    ));
    assert!(matches!(
        fx.manager.delete_timeline(&fx.save),
        Err(TimelineError::Validation(_))
    ));

    // The save can be put under version control again
    let again = fx.manager.create_timeline(&fx.save)?;
    assert_eq!(again.branches.len(), 1);
    Ok(())
}

#[test]
fn test_state_survives_a_new_manager() -> Result<()> {
    let fx = fixture()?;
    let root = fx.manager.create_timeline(&fx.save)?.current_checkpoint.unwrap();
    fx.manager.create_branch(&fx.save, "alt", &root.to_hex())?;
    fx.manager.switch_branch(&fx.save, "alt")?;
    let cp = fx.manager.create_checkpoint(&fx.save, "on alt")?;

    let config = ManagerConfig {
        root: fx.root.clone(),
        ..ManagerConfig::default()
    };
    let fresh = TimelineManager::new(config, Arc::new(timeline::NullSink));
    let loaded = fresh.get_timeline(&fx.save)?;
    assert_eq!(loaded.status, TimelineStatus::Active);
    assert_eq!(loaded.current_branch, "alt");
    assert_eq!(loaded.current_checkpoint, Some(cp.id));
    assert_eq!(loaded.branches.len(), 2);
    assert!(loaded.branches["world1-main"].is_default);
    Ok(())
}

#[test]
fn test_missing_worktree_is_rematerialized_on_load() -> Result<()> {
    let fx = fixture()?;
    fx.manager.create_timeline(&fx.save)?;
    fs::remove_dir_all(fx.worktree())?;

    let fresh = TimelineManager::new(
        ManagerConfig {
            root: fx.root.clone(),
            ..ManagerConfig::default()
        },
        Arc::new(timeline::NullSink),
    );
    assert_eq!(fresh.get_timeline(&fx.save)?.status, TimelineStatus::Active);
    assert_eq!(read(&fx.worktree().join("level.dat")), b"day 1");
    Ok(())
}

#[test]
fn test_game_deleting_its_save_is_tolerated() -> Result<()> {
    let fx = fixture()?;
    let root = fx.manager.create_timeline(&fx.save)?.current_checkpoint.unwrap();

    fs::remove_dir_all(fx.live())?;
    let empty = fx.manager.create_checkpoint(&fx.save, "save wiped")?;
    assert_eq!(empty.tree, tl_core::Tree::new().hash());

    fx.manager.restore_checkpoint(&fx.save, &root.to_hex())?;
    assert_eq!(read(&fx.live().join("level.dat")), b"day 1");
    assert_eq!(read(&fx.live().join("region/r.0.0.mca")), vec![3u8; 20_000]);
    Ok(())
}

#[test]
fn test_ref_log_records_pointer_moves() -> Result<()> {
    let fx = fixture()?;
    let root = fx.manager.create_timeline(&fx.save)?.current_checkpoint.unwrap();
    let cp = fx.manager.create_checkpoint(&fx.save, "progress")?;
    fx.manager.restore_checkpoint(&fx.save, &root.to_hex())?;
    fx.manager.create_branch(&fx.save, "alt", &cp.id.to_hex())?;

    let main = fx.manager.ref_log(&fx.save, Some("world1-main"))?;
    assert_eq!(main.len(), 3);
    assert_eq!(main[0].old, None);
    assert_eq!(main[1].new, cp.id);
    assert_eq!(main[1].message, "progress");
    assert_eq!(main[2].old, Some(cp.id));
    assert_eq!(main[2].new, root);

    assert_eq!(fx.manager.ref_log(&fx.save, None)?.len(), 4);
    Ok(())
}

#[test]
fn test_discovery_respects_configured_games() -> Result<()> {
    let fx = fixture()?;
    fs::create_dir_all(fx.root.join("terraria/world9"))?;
    fs::create_dir_all(fx.root.join("minecraft/.hidden"))?;
    fs::write(fx.root.join("minecraft/not_a_dir.txt"), b"x")?;

    let all = fx.manager.initialize()?;
    let names: Vec<_> = all.iter().map(|d| d.save.to_string()).collect();
    assert_eq!(names, vec!["minecraft/world1", "terraria/world9"]);

    let only_minecraft = TimelineManager::new(
        ManagerConfig {
            root: fx.root.clone(),
            games: vec!["minecraft".to_string()],
            ..ManagerConfig::default()
        },
        Arc::new(timeline::NullSink),
    );
    assert_eq!(only_minecraft.initialize()?.len(), 1);
    assert!(only_minecraft.discovered()[0].path.ends_with("minecraft/world1"));
    Ok(())
}
