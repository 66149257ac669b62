//! Canonical view reconciliation
//!
//! Maintains a tree of relative symlinks under `view_root` mirroring every
//! non-duplicate track and unknown file whose store path lies below
//! `store_prefix`. The record store is authoritative; the view is a derived
//! projection that `full_reconcile` can always rebuild.
//!
//! A store path `store_prefix/rel` is linked at `view_root/rel` with target
//! `"../" * depth(rel) + source_relative + "/" + rel`, where `source_relative`
//! leads from `view_root` to `source_root`. Links are never absolute, so the
//! two trees can be moved together.
//!
//! At most one process may mutate the view at a time. `lock` creates
//! `view_root/.audedup-view.lock` exclusively and the returned guard removes
//! it on drop; a second worker pointed at the same view fails with
//! `Error::ViewLocked` instead of racing the first. A lock left behind by a
//! crashed process must be removed by hand.

use audedup_common::db::{self, tracks, unknown_files};
use audedup_common::events::ClassificationEvent;
use audedup_common::{Error, Result};
use futures::StreamExt;
use sqlx::SqlitePool;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

/// Where the view lives and how store paths map into it
#[derive(Debug, Clone)]
pub struct ViewLayout {
    view_root: PathBuf,
    store_prefix: PathBuf,
    /// `source_root` expressed relative to `view_root`
    source_relative: PathBuf,
}

impl ViewLayout {
    pub fn new(
        view_root: impl Into<PathBuf>,
        source_root: impl Into<PathBuf>,
        store_prefix: impl Into<PathBuf>,
    ) -> Result<Self> {
        let view_root = absolute(&view_root.into())?;
        let source_root = absolute(&source_root.into())?;
        let source_relative = relative_path(&view_root, &source_root);

        Ok(Self {
            view_root,
            store_prefix: store_prefix.into(),
            source_relative,
        })
    }

    pub fn view_root(&self) -> &Path {
        &self.view_root
    }

    pub fn source_relative(&self) -> &Path {
        &self.source_relative
    }

    /// View-relative path of a store path, or `None` outside the prefix
    pub fn relative_for(&self, store_path: &str) -> Option<PathBuf> {
        let rel = Path::new(store_path).strip_prefix(&self.store_prefix).ok()?;
        let normal = rel.components().all(|c| matches!(c, Component::Normal(_)));
        (normal && rel.components().next().is_some()).then(|| rel.to_path_buf())
    }

    /// Store path a view leaf stands for
    pub fn store_path_for(&self, rel: &Path) -> PathBuf {
        self.store_prefix.join(rel)
    }

    pub fn link_path(&self, rel: &Path) -> PathBuf {
        self.view_root.join(rel)
    }

    /// Relative symlink target for the leaf at `view_root/rel`
    pub fn link_target(&self, rel: &Path) -> PathBuf {
        let depth = rel
            .parent()
            .map(|p| p.components().count())
            .unwrap_or(0);

        let mut target = PathBuf::new();
        for _ in 0..depth {
            target.push("..");
        }
        target.push(&self.source_relative);
        target.push(rel);
        target
    }
}

/// Name of the lock file kept directly under `view_root`
pub const VIEW_LOCK_FILE: &str = ".audedup-view.lock";

/// Exclusive claim on a view; the lock file is removed on drop
#[derive(Debug)]
pub struct ViewLock {
    path: PathBuf,
}

impl ViewLock {
    fn acquire(view_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(view_root)?;
        let path = view_root.join(VIEW_LOCK_FILE);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                return Err(Error::ViewLocked(format!(
                    "{} (held by pid {})",
                    path.display(),
                    holder.trim()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ViewLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to remove view lock");
        }
    }
}

/// Result of reconciling one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    /// An existing symlink pointed elsewhere and was replaced
    Repaired,
    AlreadyCorrect,
    /// A regular file or directory sits where the link belongs; left untouched
    OccupiedByFile,
    /// The store path is not below the configured prefix
    OutsidePrefix,
}

/// Tally of one `full_reconcile` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed: usize,
    pub created: usize,
    pub repaired: usize,
    pub unchanged: usize,
    pub skipped_occupied: usize,
    pub errors: usize,
}

impl ReconcileReport {
    fn record(&mut self, outcome: LinkOutcome) {
        match outcome {
            LinkOutcome::Created => self.created += 1,
            LinkOutcome::Repaired => self.repaired += 1,
            LinkOutcome::AlreadyCorrect => self.unchanged += 1,
            LinkOutcome::OccupiedByFile => self.skipped_occupied += 1,
            LinkOutcome::OutsidePrefix => {}
        }
    }
}

/// Keeps the symlink view consistent with the record store
pub struct ViewReconciler {
    pool: SqlitePool,
    layout: ViewLayout,
    batch_size: usize,
}

impl ViewReconciler {
    pub fn new(pool: SqlitePool, layout: ViewLayout) -> Self {
        Self {
            pool,
            layout,
            batch_size: db::MAX_BATCH_PATHS,
        }
    }

    /// Paths per validity query during stale removal
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn layout(&self) -> &ViewLayout {
        &self.layout
    }

    /// Take the exclusive view lock; hold the guard for as long as this
    /// process may write links
    pub fn lock(&self) -> Result<ViewLock> {
        ViewLock::acquire(&self.layout.view_root)
    }

    /// Lock the view for the duration of one `full_reconcile_locked` pass
    pub async fn full_reconcile(&self) -> Result<ReconcileReport> {
        let lock = self.lock()?;
        self.full_reconcile_locked(&lock).await
    }

    /// Remove stale leaves, prune empty directories, then create or repair
    /// a link for every canonical record
    pub async fn full_reconcile_locked(&self, lock: &ViewLock) -> Result<ReconcileReport> {
        tracing::info!(
            view_root = %self.layout.view_root.display(),
            lock = %lock.path().display(),
            "Starting full view reconciliation"
        );

        let mut report = ReconcileReport::default();
        self.remove_stale(&mut report).await?;
        self.prune_empty_dirs().await?;
        self.create_missing(&mut report).await?;

        tracing::info!(
            removed = report.removed,
            created = report.created,
            repaired = report.repaired,
            unchanged = report.unchanged,
            skipped_occupied = report.skipped_occupied,
            errors = report.errors,
            "Full view reconciliation complete"
        );
        Ok(report)
    }

    /// Create or repair the link for a single store path
    pub async fn reconcile_one(&self, store_path: &str) -> Result<LinkOutcome> {
        let Some(rel) = self.layout.relative_for(store_path) else {
            tracing::debug!(path = store_path, "Path outside view prefix, not linked");
            return Ok(LinkOutcome::OutsidePrefix);
        };

        let outcome = self.ensure_link(&rel).await?;
        match outcome {
            LinkOutcome::OccupiedByFile => tracing::warn!(
                path = store_path,
                link = %self.layout.link_path(&rel).display(),
                "View location occupied by a real file, not overwriting"
            ),
            LinkOutcome::Created | LinkOutcome::Repaired => {
                tracing::debug!(path = store_path, ?outcome, "Linked into view")
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Pass 1: delete leaves whose store path is no longer canonical
    async fn remove_stale(&self, report: &mut ReconcileReport) -> Result<()> {
        let view_root = self.layout.view_root.clone();
        let leaves = tokio::task::spawn_blocking(move || collect_leaves(&view_root))
            .await
            .map_err(|e| Error::Internal(format!("View walk task failed: {}", e)))?;

        for batch in leaves.chunks(self.batch_size) {
            let store_paths: Vec<String> = batch
                .iter()
                .map(|rel| self.layout.store_path_for(rel).to_string_lossy().into_owned())
                .collect();

            let valid = db::batch_check_valid_paths(&self.pool, &store_paths).await?;

            for (rel, store_path) in batch.iter().zip(&store_paths) {
                if valid.contains(store_path) {
                    continue;
                }
                let leaf = self.layout.link_path(rel);
                match tokio::fs::remove_file(&leaf).await {
                    Ok(()) => {
                        tracing::debug!(leaf = %leaf.display(), "Removed stale view entry");
                        report.removed += 1;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(leaf = %leaf.display(), error = %e, "Failed to remove stale view entry");
                        report.errors += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove directories left empty, deepest first
    async fn prune_empty_dirs(&self) -> Result<()> {
        let view_root = self.layout.view_root.clone();
        tokio::task::spawn_blocking(move || {
            for entry in WalkDir::new(&view_root)
                .min_depth(1)
                .contents_first(true)
                .follow_links(false)
                .into_iter()
                .flatten()
            {
                if entry.file_type().is_dir() {
                    // Fails on non-empty directories, which is expected
                    let _ = std::fs::remove_dir(entry.path());
                }
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("Directory prune task failed: {}", e)))
    }

    /// Pass 2: stream canonical records and link each one
    async fn create_missing(&self, report: &mut ReconcileReport) -> Result<()> {
        let mut streams = [
            tracks::stream_non_duplicate_track_paths(&self.pool),
            unknown_files::stream_unknown_file_paths(&self.pool),
        ];

        for stream in streams.iter_mut() {
            while let Some(path) = stream.next().await {
                let path = path?;
                match self.reconcile_one(&path).await {
                    Ok(outcome) => report.record(outcome),
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "Failed to link path into view");
                        report.errors += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn ensure_link(&self, rel: &Path) -> io::Result<LinkOutcome> {
        let link = self.layout.link_path(rel);
        let target = self.layout.link_target(rel);

        match tokio::fs::symlink_metadata(&link).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                if tokio::fs::read_link(&link).await? == target {
                    return Ok(LinkOutcome::AlreadyCorrect);
                }
                tokio::fs::remove_file(&link).await?;
                tokio::fs::symlink(&target, &link).await?;
                Ok(LinkOutcome::Repaired)
            }
            Ok(_) => Ok(LinkOutcome::OccupiedByFile),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = link.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::symlink(&target, &link).await?;
                Ok(LinkOutcome::Created)
            }
            Err(e) => Err(e),
        }
    }
}

/// Apply `reconcile_one` to every New and Unknown event until the bus closes
pub fn spawn_listener(
    reconciler: Arc<ViewReconciler>,
    mut rx: broadcast::Receiver<ClassificationEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.kind.is_canonical() => {
                    if let Err(e) = reconciler.reconcile_one(&event.path).await {
                        tracing::warn!(path = %event.path, error = %e, "Incremental view update failed");
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "View listener lagged; missed paths are linked by the next full reconcile");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("View listener stopped");
    })
}

/// Leaf entries (anything but directories) under `root`, relative to it
fn collect_leaves(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read view entry");
                None
            }
        })
        .filter(|entry| !entry.file_type().is_dir())
        .filter(|entry| !(entry.depth() == 1 && entry.file_name() == VIEW_LOCK_FILE))
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(normalize(&joined))
}

/// Lexically resolve `.` and `..`
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Path leading from directory `from` to `to`; both absolute and normalized
fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for component in &to[common..] {
        rel.push(component);
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}
