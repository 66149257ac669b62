//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Job lifecycle: Pending → Processing → {Done, Failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome reported by a worker for a claimed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    Failed,
}

impl From<JobOutcome> for JobStatus {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Done => JobStatus::Done,
            JobOutcome::Failed => JobStatus::Failed,
        }
    }
}

/// A unit of scan work
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub path: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The "same recording" key among non-duplicate tracks
///
/// Absent tag values take part in the comparison: two files without an album
/// tag share the album component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackIdentity {
    pub acoustic_fingerprint: i64,
    pub album: Option<String>,
    pub album_id: Option<String>,
    pub disc_number: Option<u32>,
    pub track_number: Option<u32>,
}

/// A classified, fingerprint-identified audio file
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Track {
    pub id: i64,
    pub path: String,
    pub acoustic_fingerprint: i64,
    pub album: Option<String>,
    pub album_id: Option<String>,
    pub disc_number: Option<u32>,
    pub track_number: Option<u32>,
    pub duplicate: bool,
    pub created_at: DateTime<Utc>,
}

impl Track {
    pub fn identity(&self) -> TrackIdentity {
        TrackIdentity {
            acoustic_fingerprint: self.acoustic_fingerprint,
            album: self.album.clone(),
            album_id: self.album_id.clone(),
            disc_number: self.disc_number,
            track_number: self.track_number,
        }
    }
}

/// Insert payload for a track record
#[derive(Debug, Clone)]
pub struct NewTrack {
    pub path: String,
    pub identity: TrackIdentity,
    pub duplicate: bool,
}

/// A path that could not be classified as audio
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UnknownFile {
    pub id: i64,
    pub path: String,
    pub created_at: DateTime<Utc>,
}
