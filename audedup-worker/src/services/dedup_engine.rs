//! Duplicate detection engine
//!
//! Classifies every regular file under a path as `new`, `duplicate` or
//! `unknown`, writes exactly one record per path and emits one event per
//! newly classified path.
//!
//! **Per-file algorithm:**
//! 1. Skip paths that already have a Track or UnknownFile record
//! 2. Probe the file; non-audio becomes an UnknownFile
//! 3. Fingerprint audio; failures leave the path unrecorded for a later scan
//! 4. Look up a canonical track with the same identity tuple
//! 5. Insert the track with `duplicate` set accordingly
//!
//! Store uniqueness constraints settle races with other workers: a path
//! insert that loses is a skip, an identity insert that loses is re-written
//! as a duplicate.

use crate::services::file_classifier::{AudioClassifier, AudioProbe};
use crate::services::metadata_extractor::TrackTags;
use audedup_common::db::{self, retry_on_lock, tracks, unknown_files, NewTrack};
use audedup_common::events::{ClassificationEvent, EventBus};
use audedup_common::{Error, Result};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Default upper bound on retrying a locked write
const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Outcome of one `process_path` call
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Events for newly classified paths, in processing order
    pub events: Vec<ClassificationEvent>,
    /// Paths that were already classified (including lost races)
    pub skipped: usize,
    /// Audio files whose fingerprinting failed; left unrecorded
    pub failed: Vec<String>,
}

/// What happened to a single file
enum FileOutcome {
    Classified(ClassificationEvent),
    Skipped,
    Failed,
}

/// Duplicate detection engine
#[derive(Clone)]
pub struct DedupEngine {
    pool: SqlitePool,
    classifier: Arc<dyn AudioClassifier>,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
}

impl DedupEngine {
    pub fn new(pool: SqlitePool, classifier: Arc<dyn AudioClassifier>, event_bus: EventBus) -> Self {
        Self {
            pool,
            classifier,
            event_bus,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    /// Bound the total time spent retrying a locked database per write
    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Classify a file, or every regular file below a directory
    ///
    /// # Errors
    /// * `Error::NotFound` - the path does not exist
    /// * `Error::Database` - the store failed for a reason other than a lost race
    ///
    /// Per-file problems never fail the call; they are counted in the report.
    pub async fn process_path(&self, path: &Path) -> Result<ScanReport> {
        tracing::info!(path = %path.display(), "Processing path");

        let root = path.to_path_buf();
        let files = tokio::task::spawn_blocking(move || enumerate_files(&root))
            .await
            .map_err(|e| Error::Internal(format!("Directory walk task failed: {}", e)))??;

        tracing::debug!(path = %path.display(), files = files.len(), "Enumerated files");

        let mut report = ScanReport::default();
        for file in files {
            let Some(file_str) = file.to_str().map(str::to_string) else {
                tracing::warn!(file = %file.display(), "Skipping non UTF-8 path");
                report.failed.push(file.to_string_lossy().into_owned());
                continue;
            };

            match self.process_file(&file, &file_str).await? {
                FileOutcome::Classified(event) => report.events.push(event),
                FileOutcome::Skipped => report.skipped += 1,
                FileOutcome::Failed => report.failed.push(file_str),
            }
        }

        tracing::info!(
            path = %path.display(),
            classified = report.events.len(),
            skipped = report.skipped,
            failed = report.failed.len(),
            "Finished processing path"
        );

        Ok(report)
    }

    async fn process_file(&self, file: &Path, file_str: &str) -> Result<FileOutcome> {
        if db::is_classified(&self.pool, file_str).await? {
            tracing::debug!(file = file_str, "Skipping already indexed file");
            return Ok(FileOutcome::Skipped);
        }

        let probe = self.run_blocking(file, |classifier, path| classifier.probe(path)).await?;

        let tags = match probe {
            AudioProbe::Audio(tags) => tags,
            AudioProbe::Unsupported(reason) => return self.record_unknown(file_str, &reason).await,
        };

        let fingerprint = match self
            .run_blocking(file, |classifier, path| classifier.fingerprint(path))
            .await?
        {
            Ok(fp) => fp,
            Err(e) => {
                tracing::warn!(file = file_str, error = %e, "Fingerprinting failed, leaving file unrecorded");
                return Ok(FileOutcome::Failed);
            }
        };

        self.record_track(file_str, fingerprint, &tags).await
    }

    async fn record_unknown(&self, file_str: &str, reason: &str) -> Result<FileOutcome> {
        let inserted = retry_on_lock("insert_unknown_file", self.max_lock_wait_ms, || {
            unknown_files::insert_unknown_file(&self.pool, file_str)
        })
        .await;

        match inserted {
            Ok(_) => {
                tracing::info!(file = file_str, reason, "Skipping file in unsupported format");
                Ok(FileOutcome::Classified(self.emit(ClassificationEvent::unknown(file_str))))
            }
            Err(Error::AlreadyClassified(_)) => {
                tracing::debug!(file = file_str, "Lost insert race, file already classified");
                Ok(FileOutcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    async fn record_track(&self, file_str: &str, fingerprint: i64, tags: &TrackTags) -> Result<FileOutcome> {
        let identity = tags.identity(fingerprint);
        let existing = tracks::find_track_by_identity(&self.pool, &identity).await?;

        let mut new_track = NewTrack {
            path: file_str.to_string(),
            identity,
            duplicate: existing.is_some(),
        };

        let mut inserted = self.insert_track(&new_track).await;
        if let Err(Error::IdentityConflict(_)) = inserted {
            tracing::debug!(file = file_str, "Canonical track committed concurrently, recording as duplicate");
            new_track.duplicate = true;
            inserted = self.insert_track(&new_track).await;
        }

        match inserted {
            Ok(_) => {
                tracing::info!(file = file_str, fingerprint, duplicate = new_track.duplicate, "Processed file");
                let event = ClassificationEvent::track(
                    file_str,
                    new_track.duplicate,
                    fingerprint,
                    tags.event_metadata(),
                );
                Ok(FileOutcome::Classified(self.emit(event)))
            }
            Err(Error::AlreadyClassified(_)) => {
                tracing::debug!(file = file_str, "Lost insert race, file already classified");
                Ok(FileOutcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    async fn insert_track(&self, new_track: &NewTrack) -> Result<i64> {
        retry_on_lock("insert_track", self.max_lock_wait_ms, || {
            tracks::insert_track(&self.pool, new_track)
        })
        .await
    }

    /// Broadcast after commit; returns the event for the report
    fn emit(&self, event: ClassificationEvent) -> ClassificationEvent {
        let receivers = self.event_bus.emit_lossy(event.clone());
        tracing::trace!(path = %event.path, receivers, "Emitted classification event");
        event
    }

    /// Run a classifier call on the blocking pool
    async fn run_blocking<T, F>(&self, file: &Path, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn AudioClassifier, &Path) -> T + Send + 'static,
    {
        let classifier = Arc::clone(&self.classifier);
        let path = file.to_path_buf();
        tokio::task::spawn_blocking(move || f(classifier.as_ref(), &path))
            .await
            .map_err(|e| Error::Internal(format!("Classifier task failed: {}", e)))
    }
}

/// Regular files under `root` (or `root` itself), in file-name order
///
/// Symlinks are not followed. Unreadable directory entries are logged and
/// skipped.
fn enumerate_files(root: &Path) -> Result<Vec<PathBuf>> {
    if std::fs::symlink_metadata(root).is_err() {
        return Err(Error::NotFound(format!("Path not found: {}", root.display())));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read directory entry"),
        }
    }
    Ok(files)
}
