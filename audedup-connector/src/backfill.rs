//! Queue backfill from an existing tgmount directory
//!
//! tgmount names files `<message id> <title>`. Entries whose message id is
//! above `min_msgid` are queued newest first as `basedir/fname`, the same
//! path the tgmount webhook would have queued.

use crate::api::queue::{enqueue, tgmount_path};
use crate::{ApiError, ApiResult, AppState};
use std::path::Path;

/// One file found in the tgmount directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillEntry {
    pub msg_id: i64,
    pub fname: String,
}

/// List backfill candidates in submission order
///
/// Names without a numeric message id prefix are logged and skipped. Equal
/// message ids are ordered by name.
pub fn list_backfill(dir: &Path, min_msgid: i64) -> std::io::Result<Vec<BackfillEntry>> {
    let mut entries = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Some(fname) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(name = ?entry.file_name(), "Skipping non UTF-8 file name");
            continue;
        };

        let Some(msg_id) = fname.split(' ').next().and_then(|id| id.parse::<i64>().ok()) else {
            tracing::warn!(fname = %fname, "Skipping file without message id prefix");
            continue;
        };

        if msg_id > min_msgid {
            entries.push(BackfillEntry { msg_id, fname });
        }
    }

    entries.sort_by(|a, b| b.msg_id.cmp(&a.msg_id).then_with(|| a.fname.cmp(&b.fname)));
    Ok(entries)
}

/// Queue every candidate in `dir`; returns the job ids in submission order
pub async fn run_backfill(state: &AppState, dir: &Path, min_msgid: i64) -> ApiResult<Vec<i64>> {
    if !dir.is_dir() {
        return Err(ApiError::BadRequest(format!("{} is not a directory", dir.display())));
    }

    let entries = list_backfill(dir, min_msgid).map_err(audedup_common::Error::from)?;
    tracing::info!(dir = %dir.display(), files = entries.len(), min_msgid, "Backfilling dedup queue");

    let mut queued = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = tgmount_path(&state.basedir, &entry.fname)?;
        let queue_id = enqueue(state, &path).await?;
        tracing::info!(msg_id = entry.msg_id, queue_id, path = %path, "Queued message");
        queued.push(queue_id);
    }

    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_newest_first_above_min() {
        let dir = TempDir::new().unwrap();
        for name in ["5 old.flac", "12 newer.mp3", "40 newest.ogg", "12 also.flac", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let entries = list_backfill(dir.path(), 5).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.fname.as_str()).collect();
        assert_eq!(names, vec!["40 newest.ogg", "12 also.flac", "12 newer.mp3"]);
        assert_eq!(entries[0].msg_id, 40);
    }

    #[test]
    fn test_list_missing_dir_is_error() {
        assert!(list_backfill(Path::new("/nonexistent/tgmount"), 0).is_err());
    }
}
