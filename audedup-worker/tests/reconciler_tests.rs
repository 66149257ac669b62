//! View reconciler integration tests
//!
//! Records are seeded directly in the store; source files are plain text
//! since the reconciler never opens them.

mod helpers;

use audedup_common::events::{ClassificationEvent, EventBus, EventMetadata};
use audedup_common::Error;
use audedup_worker::services::view_reconciler::{self, LinkOutcome, VIEW_LOCK_FILE};
use audedup_worker::{ViewLayout, ViewReconciler};
use helpers::{create_test_db, seed_track, seed_unknown, write_text_file};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

struct Fixture {
    _dir: TempDir,
    pool: SqlitePool,
    source: PathBuf,
    view: PathBuf,
}

impl Fixture {
    async fn new() -> Self {
        let (dir, pool) = create_test_db().await.unwrap();
        let source = dir.path().join("music");
        let view = dir.path().join("view");
        std::fs::create_dir_all(&source).unwrap();
        Self {
            _dir: dir,
            pool,
            source,
            view,
        }
    }

    fn store_path(&self, rel: &str) -> String {
        self.source.join(rel).to_str().unwrap().to_string()
    }

    /// Create the source file and return its store path
    fn source_file(&self, rel: &str) -> String {
        write_text_file(&self.source.join(rel), rel).unwrap();
        self.store_path(rel)
    }

    fn reconciler(&self) -> ViewReconciler {
        let layout = ViewLayout::new(&self.view, &self.source, &self.source).unwrap();
        ViewReconciler::new(self.pool.clone(), layout).with_batch_size(2)
    }

    /// Relative paths of every non-directory entry in the view
    fn leaves(&self) -> BTreeSet<String> {
        WalkDir::new(&self.view)
            .min_depth(1)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| !e.file_type().is_dir())
            .map(|e| {
                e.path()
                    .strip_prefix(&self.view)
                    .unwrap()
                    .to_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_full_reconcile_builds_view() {
    let fx = Fixture::new().await;
    let a = fx.source_file("Artist/Album/01.flac");
    let b = fx.source_file("Artist/Album/02.flac");
    let dup = fx.source_file("Other/01.flac");
    let cover = fx.source_file("Artist/Album/cover.jpg");
    seed_track(&fx.pool, &a, 1, false).await.unwrap();
    seed_track(&fx.pool, &b, 2, false).await.unwrap();
    seed_track(&fx.pool, &dup, 1, true).await.unwrap();
    seed_unknown(&fx.pool, &cover).await.unwrap();
    seed_track(&fx.pool, "/elsewhere/x.flac", 3, false).await.unwrap();

    let report = fx.reconciler().full_reconcile().await.unwrap();

    assert_eq!(report.created, 3);
    assert_eq!(report.errors, 0);
    assert_eq!(
        fx.leaves(),
        set(&["Artist/Album/01.flac", "Artist/Album/02.flac", "Artist/Album/cover.jpg"])
    );

    let link = fx.view.join("Artist/Album/01.flac");
    assert_eq!(
        std::fs::read_link(&link).unwrap(),
        Path::new("../../../music/Artist/Album/01.flac")
    );
    assert_eq!(
        std::fs::canonicalize(&link).unwrap(),
        std::fs::canonicalize(fx.source.join("Artist/Album/01.flac")).unwrap()
    );
}

#[tokio::test]
async fn test_full_reconcile_removes_stale_and_prunes() {
    let fx = Fixture::new().await;
    let keep = fx.source_file("keep.flac");
    let dup = fx.source_file("Gone/dup.flac");
    seed_track(&fx.pool, &keep, 1, false).await.unwrap();
    seed_track(&fx.pool, &dup, 1, true).await.unwrap();

    // Leftovers from an earlier state of the store
    std::fs::create_dir_all(fx.view.join("Gone/Deeper")).unwrap();
    std::os::unix::fs::symlink("../../music/Gone/dup.flac", fx.view.join("Gone/dup.flac")).unwrap();
    std::os::unix::fs::symlink("nowhere", fx.view.join("Gone/Deeper/old.flac")).unwrap();
    std::fs::write(fx.view.join("stray.txt"), "stray").unwrap();

    let report = fx.reconciler().full_reconcile().await.unwrap();

    assert_eq!(report.removed, 3);
    assert_eq!(report.created, 1);
    assert_eq!(fx.leaves(), set(&["keep.flac"]));
    assert!(!fx.view.join("Gone").exists());
}

#[tokio::test]
async fn test_full_reconcile_repairs_and_is_stable() {
    let fx = Fixture::new().await;
    let a = fx.source_file("A/a.flac");
    seed_track(&fx.pool, &a, 1, false).await.unwrap();

    std::fs::create_dir_all(fx.view.join("A")).unwrap();
    std::os::unix::fs::symlink("/absolute/wrong", fx.view.join("A/a.flac")).unwrap();

    let reconciler = fx.reconciler();
    let first = reconciler.full_reconcile().await.unwrap();
    assert_eq!(first.repaired, 1);
    assert_eq!(
        std::fs::read_link(fx.view.join("A/a.flac")).unwrap(),
        Path::new("../../music/A/a.flac")
    );

    let second = reconciler.full_reconcile().await.unwrap();
    assert_eq!(second.unchanged, 1);
    assert_eq!(second.created + second.repaired + second.removed, 0);
}

#[tokio::test]
async fn test_real_file_in_view_is_never_overwritten() {
    let fx = Fixture::new().await;
    let a = fx.source_file("a.flac");
    seed_track(&fx.pool, &a, 1, false).await.unwrap();

    std::fs::create_dir_all(&fx.view).unwrap();
    std::fs::write(fx.view.join("a.flac"), "precious").unwrap();

    let report = fx.reconciler().full_reconcile().await.unwrap();

    assert_eq!(report.skipped_occupied, 1);
    assert_eq!(std::fs::read_to_string(fx.view.join("a.flac")).unwrap(), "precious");
}

#[tokio::test]
async fn test_reconcile_one() {
    let fx = Fixture::new().await;
    let reconciler = fx.reconciler();
    let a = fx.source_file("X/a.flac");

    assert_eq!(reconciler.reconcile_one(&a).await.unwrap(), LinkOutcome::Created);
    assert_eq!(reconciler.reconcile_one(&a).await.unwrap(), LinkOutcome::AlreadyCorrect);
    assert_eq!(
        reconciler.reconcile_one("/outside/prefix.flac").await.unwrap(),
        LinkOutcome::OutsidePrefix
    );
    assert_eq!(fx.leaves(), set(&["X/a.flac"]));
}

#[tokio::test]
async fn test_listener_links_new_and_unknown_only() {
    let fx = Fixture::new().await;
    std::fs::create_dir_all(&fx.view).unwrap();
    let bus = EventBus::new(16);
    let handle = view_reconciler::spawn_listener(Arc::new(fx.reconciler()), bus.subscribe());

    let new = fx.source_file("new.flac");
    let dup = fx.source_file("dup.flac");
    let unknown = fx.source_file("unknown.bin");
    bus.emit_lossy(ClassificationEvent::track(&new, false, 1, EventMetadata::default()));
    bus.emit_lossy(ClassificationEvent::track(&dup, true, 1, EventMetadata::default()));
    bus.emit_lossy(ClassificationEvent::unknown(&unknown));

    drop(bus);
    handle.await.unwrap();

    assert_eq!(fx.leaves(), set(&["new.flac", "unknown.bin"]));
}

#[tokio::test]
async fn test_one_failing_link_does_not_abort_batch() {
    let fx = Fixture::new().await;
    let before = fx.source_file("A/before.flac");
    let after = fx.source_file("Z/after.flac");
    // Longer than NAME_MAX, so the link cannot exist even for root
    let unlinkable = fx.store_path(&format!("M/{}.flac", "x".repeat(300)));
    seed_track(&fx.pool, &before, 1, false).await.unwrap();
    seed_track(&fx.pool, &unlinkable, 2, false).await.unwrap();
    seed_track(&fx.pool, &after, 3, false).await.unwrap();

    let report = fx.reconciler().full_reconcile().await.unwrap();

    assert_eq!(report.errors, 1);
    assert_eq!(report.created, 2);
    assert_eq!(fx.leaves(), set(&["A/before.flac", "Z/after.flac"]));
}

#[tokio::test]
async fn test_concurrent_reconcile_is_refused() {
    let fx = Fixture::new().await;
    let a = fx.source_file("a.flac");
    seed_track(&fx.pool, &a, 1, false).await.unwrap();

    let holder = fx.reconciler();
    let lock = holder.lock().unwrap();
    assert!(fx.view.join(VIEW_LOCK_FILE).is_file());

    let second = fx.reconciler().full_reconcile().await;
    assert!(matches!(second, Err(Error::ViewLocked(_))));
    assert!(fx.reconciler().lock().is_err());

    // The holder still reconciles and its lock file is not treated as a stale leaf
    let report = holder.full_reconcile_locked(&lock).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.removed, 0);
    assert!(fx.view.join(VIEW_LOCK_FILE).is_file());

    drop(lock);
    assert!(!fx.view.join(VIEW_LOCK_FILE).exists());
    assert_eq!(fx.leaves(), set(&["a.flac"]));
}

#[tokio::test]
async fn test_lock_released_after_full_reconcile() {
    let fx = Fixture::new().await;
    let a = fx.source_file("a.flac");
    seed_track(&fx.pool, &a, 1, false).await.unwrap();

    fx.reconciler().full_reconcile().await.unwrap();
    assert!(!fx.view.join(VIEW_LOCK_FILE).exists());

    let report = fx.reconciler().full_reconcile().await.unwrap();
    assert_eq!(report.unchanged, 1);
}
